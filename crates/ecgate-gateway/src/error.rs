//! Gateway error types.

use thiserror::Error;

/// A result type using `GatewayError`.
pub type Result<T> = std::result::Result<T, GatewayError>;

/// Errors that stop the gateway from starting or serving.
#[derive(Debug, Error)]
pub enum GatewayError {
    /// Socket failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The configuration file could not be read or parsed.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// Repository failure.
    #[error("store error: {0}")]
    Store(#[from] ecgate_store::StoreError),

    /// Coordinator failure outside a session.
    #[error("control error: {0}")]
    Control(#[from] ecgate_control::ControlError),
}
