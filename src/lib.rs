//! pagekit: phased page loading with content experiments.
//!
//! The library half of the `pagekit` binary. The heavy lifting lives in the
//! workspace crates; this crate wires them to files, HTTP and the command line.

pub mod app;
pub mod cli;
pub mod fetch;
pub mod observe;
pub mod page_source;

pub use app::{evaluate_manifest, run_page_load, EvaluateOutcome, LoadOutcome, PageRequest, Source};
pub use fetch::{DirFetcher, HttpFetcher};
pub use observe::init_tracing;
pub use page_source::PageDescription;
