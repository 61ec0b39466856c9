//! Error types for the wakegate state store.

use thiserror::Error;

/// Result type alias for state store operations.
pub type StateResult<T> = Result<T, StateError>;

/// Errors that can occur during state store operations.
///
/// Every variant except `InvalidValue` means the store could not be
/// reached or could not complete the operation; callers must not read
/// any of them as "no record".
#[derive(Debug, Error)]
pub enum StateError {
    #[error("failed to open store: {0}")]
    Open(String),

    #[error("transaction error: {0}")]
    Transaction(String),

    #[error("table error: {0}")]
    Table(String),

    #[error("read error: {0}")]
    Read(String),

    #[error("write error: {0}")]
    Write(String),

    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error("unknown lifecycle value {value:?} at {key}")]
    InvalidValue { key: String, value: String },
}

impl StateError {
    /// True for transient failures of the store itself.
    pub fn is_unavailable(&self) -> bool {
        !matches!(self, StateError::InvalidValue { .. })
    }
}
