//! Experiment bucketing and decisioning for pagekit pages.
//!
//! Visitors are bucketed with MurmurHash3 so that every client agrees on the
//! treatment; devices get a random treatment that is remembered for 30 days.

pub mod allocation;
pub mod config;
pub mod decision;
pub mod errors;
pub mod hash;
pub mod patch;
pub mod plugin;
pub mod store;

pub use allocation::{assign_treatment, assign_treatment_by_visitor, pick_with_weights_bucket, VisitorAssignment};
pub use config::{
    ExperimentConfig, ExperimentConfigLoader, ManifestParser, RawExperimentConfig, RawVariant,
    SheetManifestParser, Variant,
};
pub use decision::{
    decision_policy_for, Decision, DecisionContext, DecisionEngine, DecisionNode, DecisionPolicy,
    ExperimentNode, RandomizationUnit, Treatment,
};
pub use errors::{ExperimentError, ExperimentResult};
pub use hash::{get_bucket, murmurhash3_32_gc, TOTAL_BUCKETS};
pub use patch::patch_block_config;
pub use plugin::{
    ActiveExperiment, ExperimentApi, ExperimentOptions, ExperimentationPlugin, EXPERIMENTATION_PLUGIN,
};
pub use store::{AssignmentStore, FileKvStore, KeyValueStore, MemoryKvStore, StoredAssignment};
