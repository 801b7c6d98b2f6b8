//! Custom error types for the gateway.
//!
//! `GateError` is the single error type used across sessions, backends and
//! the dispatcher. Every variant maps to an envelope status: state-violation
//! errors are recoverable and become warnings, everything else (including a
//! missing capability) becomes an error. Nothing crosses the dispatcher
//! boundary as a raw error; the dispatcher folds everything into a reply
//! envelope.

use thiserror::Error;

use crate::envelope::Status;

/// Convenience alias for results using the gateway error type.
pub type GateResult<T> = std::result::Result<T, GateError>;

#[derive(Error, Debug)]
pub enum GateError {
    #[error("device is not connected")]
    NotConnected,

    #[error("device is already connected")]
    AlreadyConnected,

    #[error("invalid value: {0}")]
    InvalidValue(String),

    #[error("invalid operation: {0}")]
    InvalidOperation(String),

    #[error("driver error: {0}")]
    Driver(String),

    #[error("network error: {0}")]
    Network(String),

    #[error("operation timed out")]
    Timeout,

    #[error("unknown device type: {0}")]
    UnknownDeviceKind(String),

    #[error("command not available: {0}")]
    UnknownOperation(String),

    #[error("not supported: {0}")]
    NotSupported(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

impl GateError {
    /// Envelope status this error reports as.
    ///
    /// Wrong-state failures are non-fatal: the caller can retry after fixing
    /// state or parameters. Everything else, a missing capability included,
    /// is a hard error.
    pub fn status(&self) -> Status {
        match self {
            GateError::NotConnected
            | GateError::AlreadyConnected
            | GateError::InvalidOperation(_) => Status::Warning,
            _ => Status::Error,
        }
    }
}
