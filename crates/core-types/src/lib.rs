pub mod fetch;
pub mod text;

use thiserror::Error;

pub use fetch::{FetchResponse, Fetcher, StaticFetcher};
pub use text::{to_camel_case, to_class_name};

/// Shared error type for the pagekit crates.
#[derive(Debug, Error, Clone)]
pub enum PageError {
    #[error("{message}")]
    Message { message: String },
    #[error("fetch failed for {url}: {reason}")]
    Fetch { url: String, reason: String },
}

impl PageError {
    pub fn new(message: impl Into<String>) -> Self {
        Self::Message {
            message: message.into(),
        }
    }

    pub fn fetch(url: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Fetch {
            url: url.into(),
            reason: reason.into(),
        }
    }
}
