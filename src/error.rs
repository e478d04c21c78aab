//! Error types for the AI engine.

use std::error::Error as StdError;
use std::fmt;
use std::result;
use tonic::Status;

/// A specialized Result type for engine operations.
pub type Result<T> = result::Result<T, Error>;

/// The error type for engine operations.
///
/// Request validation failures are not errors: they travel back to the caller
/// as a [`crate::service::messages::Response`] carrying a result code. This
/// type covers state lookups, collaborator failures and plumbing.
#[derive(Debug)]
pub enum Error {
    /// Lookup against the pod registry for a pod that was never initialized
    UnknownPod(String),
    /// Lookup against the model registry for a pod without a model record
    UnknownModel(String),
    /// Agent algorithm not known to the agent factory
    UnsupportedAlgorithm(String),
    /// Reward or effect expression failed to parse or evaluate
    Expression(String),
    /// Arrow-related errors (CSV ingestion)
    Arrow(String),
    /// Configuration errors
    Config(String),
    /// I/O errors
    Io(std::io::Error),
    /// Serialization/deserialization errors
    Serialization(String),
    /// Invalid data errors
    InvalidData(String),
    /// The command queue consumer is gone
    QueueClosed,
    /// Runtime errors
    Runtime(String),
    /// Internal errors
    Internal(String),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::UnknownPod(pod) => write!(f, "Unknown pod: {}", pod),
            Error::UnknownModel(pod) => write!(f, "No trained model for pod: {}", pod),
            Error::UnsupportedAlgorithm(name) => write!(f, "Unsupported algorithm: {}", name),
            Error::Expression(msg) => write!(f, "Expression error: {}", msg),
            Error::Arrow(msg) => write!(f, "Arrow error: {}", msg),
            Error::Config(msg) => write!(f, "Configuration error: {}", msg),
            Error::Io(err) => write!(f, "I/O error: {}", err),
            Error::Serialization(msg) => write!(f, "Serialization error: {}", msg),
            Error::InvalidData(msg) => write!(f, "Invalid data: {}", msg),
            Error::QueueClosed => write!(f, "Command queue is closed"),
            Error::Runtime(msg) => write!(f, "Runtime error: {}", msg),
            Error::Internal(msg) => write!(f, "Internal error: {}", msg),
        }
    }
}

impl StdError for Error {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        match self {
            Error::Io(err) => Some(err),
            _ => None,
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Io(err)
    }
}

impl From<arrow::error::ArrowError> for Error {
    fn from(err: arrow::error::ArrowError) -> Self {
        Error::Arrow(err.to_string())
    }
}

impl From<config::ConfigError> for Error {
    fn from(err: config::ConfigError) -> Self {
        Error::Config(err.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}

impl From<Error> for Status {
    fn from(err: Error) -> Self {
        match err {
            Error::UnknownPod(pod) => Status::not_found(format!("Unknown pod: {}", pod)),
            Error::UnknownModel(pod) => {
                Status::not_found(format!("No trained model for pod: {}", pod))
            }
            Error::UnsupportedAlgorithm(name) => {
                Status::invalid_argument(format!("Unsupported algorithm: {}", name))
            }
            Error::Expression(msg) => Status::invalid_argument(msg),
            Error::Arrow(msg) => Status::internal(format!("Arrow error: {}", msg)),
            Error::Config(msg) => Status::failed_precondition(format!("Config error: {}", msg)),
            Error::Io(err) => Status::internal(format!("I/O error: {}", err)),
            Error::Serialization(msg) => Status::invalid_argument(msg),
            Error::InvalidData(msg) => Status::invalid_argument(msg),
            Error::QueueClosed => Status::unavailable("Command queue is closed"),
            Error::Runtime(msg) => Status::internal(format!("Runtime error: {}", msg)),
            Error::Internal(msg) => Status::internal(format!("Internal error: {}", msg)),
        }
    }
}

/// Text of a caught panic payload
pub(crate) fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        msg.to_string()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tonic::Code;

    #[test]
    fn test_unknown_pod_maps_to_not_found() {
        let status: Status = Error::UnknownPod("trader".into()).into();
        assert_eq!(status.code(), Code::NotFound);
        assert!(status.message().contains("trader"));
    }

    #[test]
    fn test_queue_closed_maps_to_unavailable() {
        let status: Status = Error::QueueClosed.into();
        assert_eq!(status.code(), Code::Unavailable);
    }

    #[test]
    fn test_io_error_source() {
        let err = Error::from(std::io::Error::new(std::io::ErrorKind::NotFound, "gone"));
        assert!(err.source().is_some());
        assert_eq!(err.to_string(), "I/O error: gone");
    }
}
