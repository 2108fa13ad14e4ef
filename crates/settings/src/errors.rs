use pagekit_core_types::PageError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("invalid settings: {0}")]
    Invalid(String),
    #[error("io error: {0}")]
    Io(String),
    #[error("unsupported settings path: {0}")]
    UnsupportedPath(String),
    #[error("invalid value for {path}: {reason}")]
    InvalidValue { path: String, reason: String },
}

impl SettingsError {
    pub(crate) fn invalid_value(path: &str, reason: impl Into<String>) -> Self {
        Self::InvalidValue {
            path: path.to_string(),
            reason: reason.into(),
        }
    }
}

impl From<SettingsError> for PageError {
    fn from(value: SettingsError) -> Self {
        PageError::new(value.to_string())
    }
}

pub type SettingsResult<T> = Result<T, SettingsError>;
