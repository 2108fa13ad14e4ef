//! Page loading core: document model, block state machine, section reveal,
//! plugin lifecycle.

pub mod block;
pub mod document;
pub mod errors;
pub mod orchestrator;
pub mod plugin;
pub mod plugins;
pub mod resolver;
pub mod resources;
pub mod sections;

pub use block::BlockLoader;
pub use document::{
    build_block, read_block_config, Block, BlockStatus, ContentDecoder, Document, DocumentBuilder,
    Image, ImageState, Main, MainContent, Section, SectionStatus,
};
pub use errors::{LoaderError, LoaderResult};
pub use orchestrator::{
    HookFailure, LoadOptions, LoadProgress, PageLoadReport, PageLoader, PhaseHook,
    DEFAULT_DELAYED_DURATION,
};
pub use plugin::{
    Hook, HookCtx, HookSet, PageContext, Phase, Plugin, PluginApi, PluginHost, PluginOptions,
    Registration,
};
pub use resolver::{resolve_block_config, BlockConfig};
pub use resources::{BlockDecorator, BlockModule, ModuleLoader, ModuleRegistry, StyleLoader};
pub use sections::update_sections_status;
