//! Failure Records and Scheduler Errors
//!
//! Every failure the system detects (a behavior that errors or panics, an
//! envelope for an unknown uid, a transport that gives up) is turned into a
//! [`Failure`] and handed to the runtime's failure policy. Nothing is allowed
//! to unwind out of the dispatch loop.

use std::any::Any;
use std::backtrace::{Backtrace, BacktraceStatus};
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

/// Classification of a reported failure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailureKind {
    /// A behavior returned an error or panicked while handling a message
    BehaviorExecution,
    /// An envelope named a uid that no membrane table entry matches
    UnknownUid,
    /// The transport exhausted its retries for an outgoing envelope
    TransportSendFailed,
    /// A transport configuration named a protocol with no implementation
    NoTransportForProtocol,
    /// A wire frame or marshalled actor token could not be decoded
    MalformedEnvelope,
}

impl FailureKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureKind::BehaviorExecution => "BehaviorExecutionFailure",
            FailureKind::UnknownUid => "UnknownUid",
            FailureKind::TransportSendFailed => "TransportSendFailed",
            FailureKind::NoTransportForProtocol => "NoTransportForProtocol",
            FailureKind::MalformedEnvelope => "MalformedEnvelope",
        }
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Structured failure record delivered to a [`FailurePolicy`](crate::FailurePolicy)
#[derive(Clone)]
pub struct Failure {
    pub kind: FailureKind,
    pub message: String,
    /// Error chain followed by backtrace frames, one entry per line
    pub trace: Vec<String>,
    error: Option<Arc<anyhow::Error>>,
}

impl Failure {
    /// Create a failure record with no trace attached
    pub fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            trace: Vec::new(),
            error: None,
        }
    }

    /// Build a record from an error, keeping the error for later inspection
    pub fn from_error(kind: FailureKind, error: anyhow::Error) -> Self {
        let mut trace: Vec<String> = error
            .chain()
            .skip(1)
            .map(|cause| format!("caused by: {}", cause))
            .collect();
        trace.extend(backtrace_lines(error.backtrace()));

        Self {
            kind,
            message: error.to_string(),
            trace,
            error: Some(Arc::new(error)),
        }
    }

    /// Build a record from a caught panic payload
    pub fn from_panic(payload: &(dyn Any + Send)) -> Self {
        let message = if let Some(s) = payload.downcast_ref::<&'static str>() {
            format!("behavior panicked: {}", s)
        } else if let Some(s) = payload.downcast_ref::<String>() {
            format!("behavior panicked: {}", s)
        } else {
            "behavior panicked".to_string()
        };

        Self {
            kind: FailureKind::BehaviorExecution,
            message,
            trace: backtrace_lines(&Backtrace::capture()),
            error: None,
        }
    }

    /// The originating error, if the failure was built from one
    pub fn error(&self) -> Option<&anyhow::Error> {
        self.error.as_deref()
    }

    /// Downcast the originating error to a concrete type
    pub fn downcast_ref<E>(&self) -> Option<&E>
    where
        E: fmt::Display + fmt::Debug + Send + Sync + 'static,
    {
        self.error().and_then(|e| e.downcast_ref::<E>())
    }
}

impl fmt::Debug for Failure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Failure")
            .field("kind", &self.kind)
            .field("message", &self.message)
            .field("trace_lines", &self.trace.len())
            .finish()
    }
}

impl fmt::Display for Failure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

fn backtrace_lines(backtrace: &Backtrace) -> Vec<String> {
    if backtrace.status() != BacktraceStatus::Captured {
        return Vec::new();
    }
    backtrace
        .to_string()
        .lines()
        .map(|line| line.to_string())
        .collect()
}

/// Scheduler errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SchedulerError {
    /// Non-blocking step found nothing to run
    #[error("scheduler queue is empty")]
    Empty,

    /// A stop sentinel was dequeued; the dispatch loop should exit
    #[error("scheduler was stopped")]
    Stopped,
}

/// Result type alias for scheduler operations
pub type Result<T> = std::result::Result<T, SchedulerError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, thiserror::Error)]
    #[error("disk on fire")]
    struct DiskOnFire;

    #[test]
    fn test_from_error_keeps_source_for_downcast() {
        let err = anyhow::Error::new(DiskOnFire).context("while saving");
        let failure = Failure::from_error(FailureKind::BehaviorExecution, err);

        assert_eq!(failure.message, "while saving");
        assert_eq!(failure.trace[0], "caused by: disk on fire");
        assert!(failure.downcast_ref::<DiskOnFire>().is_some());
    }

    #[test]
    fn test_from_panic_payloads() {
        let failure = Failure::from_panic(&"boom");
        assert_eq!(failure.message, "behavior panicked: boom");

        let owned: Box<dyn Any + Send> = Box::new(String::from("kaboom"));
        let failure = Failure::from_panic(owned.as_ref());
        assert_eq!(failure.message, "behavior panicked: kaboom");
        assert!(failure.error().is_none());
    }

    #[test]
    fn test_kind_names() {
        assert_eq!(FailureKind::UnknownUid.to_string(), "UnknownUid");
        assert_eq!(
            Failure::new(FailureKind::TransportSendFailed, "gave up").to_string(),
            "TransportSendFailed: gave up"
        );
    }
}
