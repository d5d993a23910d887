//! Domain-level error types.

use thiserror::Error;

/// Errors raised when constructing value objects
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValueObjectError {
    #[error("{0} must not be empty")]
    Empty(&'static str),

    #[error("{field} exceeds {max} characters")]
    TooLong { field: &'static str, max: usize },

    #[error("{0} contains invalid characters")]
    InvalidCharacters(&'static str),
}

/// Errors raised by repository implementations
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RepositoryError {
    #[error("session '{0}' already exists")]
    SessionAlreadyExists(String),

    #[error("session '{0}' not found")]
    SessionNotFound(String),

    #[error("storage failure: {0}")]
    Storage(String),
}
