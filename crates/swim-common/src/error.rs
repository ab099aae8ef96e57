//! Error types for value parsing

use thiserror::Error;

/// Result type alias for swim-common operations
pub type Result<T> = std::result::Result<T, SwimError>;

#[derive(Error, Debug)]
pub enum SwimError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid swim time: {0:?}")]
    InvalidTime(String),

    #[error("Invalid date: {0:?}")]
    InvalidDate(String),

    #[error("Invalid {field}: {value:?}")]
    InvalidValue { field: &'static str, value: String },
}

impl SwimError {
    pub fn invalid(field: &'static str, value: impl Into<String>) -> Self {
        Self::InvalidValue {
            field,
            value: value.into(),
        }
    }
}
