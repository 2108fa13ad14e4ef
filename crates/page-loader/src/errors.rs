use pagekit_core_types::PageError;
use thiserror::Error;

use crate::plugin::Hook;

#[derive(Debug, Error)]
pub enum LoaderError {
    #[error("module not found: {0}")]
    ModuleNotFound(String),
    #[error("module {path} failed: {message}")]
    Module { path: String, message: String },
    #[error("plugin not found: {0}")]
    PluginNotFound(String),
    #[error("{plugin} failed in {hook}: {message}")]
    Hook {
        plugin: String,
        hook: Hook,
        message: String,
    },
    #[error("{0}")]
    Plugin(String),
    #[error("undecodable content: {0}")]
    Content(String),
    #[error(transparent)]
    Page(#[from] PageError),
}

impl LoaderError {
    pub fn plugin(message: impl Into<String>) -> Self {
        Self::Plugin(message.into())
    }
}

impl From<LoaderError> for PageError {
    fn from(value: LoaderError) -> Self {
        match value {
            LoaderError::Page(inner) => inner,
            other => PageError::new(other.to_string()),
        }
    }
}

pub type LoaderResult<T> = Result<T, LoaderError>;
