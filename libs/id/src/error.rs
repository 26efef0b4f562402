//! Voyage ID parse errors.

use thiserror::Error;

/// Why a string is not a voyage ID.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum IdError {
    /// The ID string is empty.
    #[error("ID cannot be empty")]
    Empty,

    /// The ID does not start with the expected prefix.
    #[error("invalid ID prefix: expected '{expected}', got '{actual}'")]
    InvalidPrefix {
        expected: &'static str,
        actual: String,
    },

    /// The random token after the prefix is malformed.
    #[error("invalid ID token '{token}': {message}")]
    InvalidToken { token: String, message: String },
}
