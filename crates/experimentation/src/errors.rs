use pagekit_core_types::PageError;
use pagekit_loader::LoaderError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ExperimentError {
    #[error("invalid experiment config: {0}")]
    InvalidConfig(String),
    #[error("unknown randomization unit: {0}")]
    UnsupportedRandomizationUnit(String),
    #[error("no identity in namespace {namespace}")]
    MissingIdentity { namespace: String },
    #[error("decision node {0} not found")]
    UnknownNode(String),
    #[error("unsupported decision node type: {0}")]
    UnsupportedNodeType(String),
    #[error("assignment storage failed: {0}")]
    Storage(String),
    #[error(transparent)]
    Page(#[from] PageError),
}

impl ExperimentError {
    pub fn invalid(message: impl Into<String>) -> Self {
        Self::InvalidConfig(message.into())
    }

    pub fn storage(message: impl Into<String>) -> Self {
        Self::Storage(message.into())
    }
}

impl From<ExperimentError> for LoaderError {
    fn from(value: ExperimentError) -> Self {
        match value {
            ExperimentError::Page(inner) => LoaderError::Page(inner),
            other => LoaderError::plugin(other.to_string()),
        }
    }
}

impl From<ExperimentError> for PageError {
    fn from(value: ExperimentError) -> Self {
        match value {
            ExperimentError::Page(inner) => inner,
            other => PageError::new(other.to_string()),
        }
    }
}

pub type ExperimentResult<T> = Result<T, ExperimentError>;
