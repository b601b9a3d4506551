//! Network Error Types
//!
//! Errors raised by membranes and transports. Every variant maps onto the
//! runtime's [`FailureKind`] taxonomy so that errors which cannot be
//! returned to a caller (a proxy send, a frame read on a server task) can
//! still be reported through the runtime's failure policy.

use crate::uid::Uid;
use actors::{Failure, FailureKind};
use thiserror::Error;

/// Main network error type
#[derive(Error, Debug)]
pub enum NetworkError {
    /// Envelope or delivery named a uid this membrane never registered
    #[error("Unknown uid: {uid}")]
    UnknownUid { uid: Uid },

    /// No transport is registered for the configured protocol
    #[error("No transport for protocol '{protocol}'")]
    NoTransportForProtocol { protocol: String },

    /// Bounded retry exhausted for an outgoing envelope
    #[error("Send to {endpoint} failed after {attempts} attempts")]
    TransportSendFailed {
        endpoint: String,
        attempts: u32,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Wire frame or marshalled actor token could not be decoded
    #[error("Malformed envelope: {message}")]
    MalformedEnvelope {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Transport configuration is missing a field or has a bad value
    #[error("Configuration error: {message}")]
    Configuration {
        message: String,
        field: Option<String>,
    },

    /// Connection-level I/O failure
    #[error("I/O error: {message}")]
    Io {
        message: String,
        #[source]
        source: std::io::Error,
    },

    /// Connect or write did not finish in time
    #[error("Timeout error: {operation} exceeded {timeout_ms}ms")]
    Timeout { operation: String, timeout_ms: u64 },

    /// A proxy outlived the membrane that created it
    #[error("Membrane dropped; proxy {uid} can no longer forward")]
    MembraneDropped { uid: Uid },
}

/// Result type alias for network operations
pub type Result<T> = std::result::Result<T, NetworkError>;

impl NetworkError {
    pub fn unknown_uid(uid: Uid) -> Self {
        Self::UnknownUid { uid }
    }

    pub fn no_transport(protocol: impl Into<String>) -> Self {
        Self::NoTransportForProtocol {
            protocol: protocol.into(),
        }
    }

    /// Create a send failure wrapping the last attempt's error
    pub fn send_failed(endpoint: impl Into<String>, attempts: u32, source: NetworkError) -> Self {
        Self::TransportSendFailed {
            endpoint: endpoint.into(),
            attempts,
            source: Some(Box::new(source)),
        }
    }

    /// Create a send failure with no underlying error
    pub fn endpoint_unavailable(endpoint: impl Into<String>) -> Self {
        Self::TransportSendFailed {
            endpoint: endpoint.into(),
            attempts: 1,
            source: None,
        }
    }

    pub fn malformed(message: impl Into<String>) -> Self {
        Self::MalformedEnvelope {
            message: message.into(),
            source: None,
        }
    }

    pub fn malformed_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::MalformedEnvelope {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Create a configuration error
    pub fn configuration(message: impl Into<String>, field: Option<&str>) -> Self {
        Self::Configuration {
            message: message.into(),
            field: field.map(|s| s.to_string()),
        }
    }

    pub fn io(message: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            message: message.into(),
            source,
        }
    }

    pub fn timeout(operation: impl Into<String>, timeout_ms: u64) -> Self {
        Self::Timeout {
            operation: operation.into(),
            timeout_ms,
        }
    }

    /// Classification used when the error is reported as a failure
    pub fn failure_kind(&self) -> FailureKind {
        match self {
            Self::UnknownUid { .. } => FailureKind::UnknownUid,
            Self::NoTransportForProtocol { .. } => FailureKind::NoTransportForProtocol,
            Self::MalformedEnvelope { .. } => FailureKind::MalformedEnvelope,
            Self::TransportSendFailed { .. }
            | Self::Configuration { .. }
            | Self::Io { .. }
            | Self::Timeout { .. }
            | Self::MembraneDropped { .. } => FailureKind::TransportSendFailed,
        }
    }

    /// Convert into a failure record, keeping the error for downcasting
    pub fn into_failure(self) -> Failure {
        let kind = self.failure_kind();
        Failure::from_error(kind, anyhow::Error::new(self))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failure_kinds() {
        let uid = Uid::new();
        assert_eq!(NetworkError::unknown_uid(uid).failure_kind(), FailureKind::UnknownUid);
        assert_eq!(
            NetworkError::no_transport("carrier-pigeon").failure_kind(),
            FailureKind::NoTransportForProtocol
        );
        assert_eq!(
            NetworkError::malformed("not json").failure_kind(),
            FailureKind::MalformedEnvelope
        );
        assert_eq!(
            NetworkError::timeout("connect", 5000).failure_kind(),
            FailureKind::TransportSendFailed
        );
    }

    #[test]
    fn test_into_failure_keeps_error() {
        let uid = Uid::new();
        let failure = NetworkError::unknown_uid(uid).into_failure();

        assert_eq!(failure.kind, FailureKind::UnknownUid);
        assert_eq!(failure.message, format!("Unknown uid: {}", uid));
        match failure.downcast_ref::<NetworkError>() {
            Some(NetworkError::UnknownUid { uid: got }) => assert_eq!(*got, uid),
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn test_send_failed_chain() {
        let err = NetworkError::send_failed(
            "127.0.0.1:9",
            3,
            NetworkError::io(
                "connect failed",
                std::io::Error::from(std::io::ErrorKind::ConnectionRefused),
            ),
        );
        let failure = err.into_failure();
        assert_eq!(failure.message, "Send to 127.0.0.1:9 failed after 3 attempts");
        assert_eq!(failure.trace[0], "caused by: I/O error: connect failed");
    }
}
