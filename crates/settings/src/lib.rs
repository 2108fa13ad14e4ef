pub mod apply;
pub mod defaults;
pub mod errors;
pub mod loader;
pub mod model;

pub use apply::apply_override;
pub use defaults::default_settings;
pub use errors::{SettingsError, SettingsResult};
pub use loader::{load_settings, load_settings_with_options, parse_override, LoadOptions};
pub use model::{
    ExperimentationSettings, LoggingSettings, PageSettings, PlaceholdersSettings, SettingSource,
    Settings, SettingsProvenance,
};
