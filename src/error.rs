//! Error types for the sideline spout.
//!
//! All fallible operations in this crate return [`Result`]. Lifecycle
//! violations and bad host input surface synchronously as
//! [`SidelineError::IllegalState`] / [`SidelineError::InvalidArgument`];
//! broker and persistence faults are absorbed by the owning worker and
//! retried on its next iteration.

use thiserror::Error;

/// Result type alias for sideline operations
pub type Result<T> = std::result::Result<T, SidelineError>;

/// Main error type for the sideline spout
#[derive(Error, Debug)]
pub enum SidelineError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("illegal state: {0}")]
    IllegalState(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("broker error: {0}")]
    Broker(String),

    #[error("persistence error: {0}")]
    Persistence(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("coordinator is shutting down")]
    ShuttingDown,
}

impl SidelineError {
    /// Lifecycle violation (re-open, use-before-open, inconsistent bounds).
    pub fn illegal_state(msg: impl Into<String>) -> Self {
        SidelineError::IllegalState(msg.into())
    }

    /// Bad input handed across the host boundary.
    pub fn invalid_argument(msg: impl Into<String>) -> Self {
        SidelineError::InvalidArgument(msg.into())
    }

    /// Opaque fault from the broker consumer.
    pub fn broker(msg: impl Into<String>) -> Self {
        SidelineError::Broker(msg.into())
    }

    /// Failed persist or retrieve against the durable store.
    pub fn persistence(msg: impl Into<String>) -> Self {
        SidelineError::Persistence(msg.into())
    }

    /// Rejected configuration.
    pub fn config(msg: impl Into<String>) -> Self {
        SidelineError::Config(msg.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = SidelineError::illegal_state("open() called twice");
        assert_eq!(err.to_string(), "illegal state: open() called twice");

        let err = SidelineError::invalid_argument("not a message id");
        assert_eq!(err.to_string(), "invalid argument: not a message id");
    }

    #[test]
    fn test_io_error_conversion() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        let err: SidelineError = io.into();
        assert!(matches!(err, SidelineError::Io(_)));
    }
}
