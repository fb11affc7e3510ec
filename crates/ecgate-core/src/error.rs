//! Common error types for ecgate.

use thiserror::Error;

/// A result type using `CoreError`.
pub type Result<T> = std::result::Result<T, CoreError>;

/// Core errors shared across crates.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CoreError {
    /// An invalid identifier was provided.
    #[error("invalid identifier: {0}")]
    InvalidId(#[from] crate::ids::IdError),

    /// A duration string could not be parsed.
    #[error("invalid duration: {0}")]
    InvalidDuration(String),

    /// A date pattern uses letters that are not supported.
    #[error("unsupported date pattern: {0}")]
    InvalidPattern(String),

    /// A date does not match its pattern.
    #[error("date {value} does not match pattern {pattern}")]
    InvalidDate {
        /// The offending value.
        value: String,
        /// The pattern it was parsed with.
        pattern: String,
    },
}
