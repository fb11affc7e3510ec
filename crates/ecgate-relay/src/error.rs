//! Error types for the relay client.

use thiserror::Error;

/// A result type using `RelayError`.
pub type Result<T> = std::result::Result<T, RelayError>;

/// Errors produced while talking to the gateway or a mover.
#[derive(Debug, Error)]
pub enum RelayError {
    /// Socket failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The peer replied with a `-` line, or a `+MESSAGE` where another
    /// parameter was expected.
    #[error("{0}")]
    Rejected(String),

    /// A `+` reply naming another parameter.
    #[error("Unexpected parameter (expected {expected}, got {got})")]
    UnexpectedParameter {
        /// The parameter we waited for.
        expected: String,
        /// The line received.
        got: String,
    },

    /// A line with neither `+` nor `-`.
    #[error("Bad message format: {0}")]
    BadFormat(String),

    /// The peer closed the connection.
    #[error("Connection closed")]
    ConnectionClosed,

    /// Connecting or waiting for a reply took too long.
    #[error("connection timed out")]
    Timeout,

    /// A malformed `host:port` candidate.
    #[error("Invalid Data Mover address: {0}")]
    InvalidMover(String),

    /// Every candidate failed.
    #[error("Transmission failed to each Data Mover")]
    AllMoversFailed,

    /// The gateway reply carries no data file identifier.
    #[error("{0}")]
    NoDataFileId(String),
}

impl RelayError {
    /// Whether the failure is worth another mover or another attempt.
    #[must_use]
    pub const fn is_retriable(&self) -> bool {
        matches!(
            self,
            Self::Io(_) | Self::ConnectionClosed | Self::Timeout | Self::BadFormat(_)
        )
    }
}
