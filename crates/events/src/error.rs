//! Error types for the events crate.

use std::time::Duration;

use thiserror::Error;

/// Result type alias for dispatch operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Dispatch error types.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Error {
    /// The event envelope is not valid JSON or lacks a required property.
    #[error("malformed event: {reason}")]
    MalformedEvent { reason: String },

    /// The event's request type is not Create, Update or Delete.
    #[error("unknown request type '{request_type}'")]
    UnknownRequestType { request_type: String },

    /// Reconciliation failed.
    #[error(transparent)]
    Reconcile(#[from] seedkeeper_reconciler::Error),

    /// Handling did not finish before the invocation deadline.
    #[error("handling timed out after {}ms", .after.as_millis())]
    TimedOut { after: Duration },

    /// The outcome report could not be delivered.
    #[error("outcome report failed: {reason}")]
    ReportFailed { reason: String },

    /// Invalid state transition.
    #[error("invalid state transition from '{from}' to '{to}'")]
    InvalidTransition { from: String, to: String },
}

impl Error {
    /// Create a malformed event error.
    pub fn malformed_event(reason: impl Into<String>) -> Self {
        Self::MalformedEvent {
            reason: reason.into(),
        }
    }

    /// Create an unknown request type error.
    pub fn unknown_request_type(request_type: impl Into<String>) -> Self {
        Self::UnknownRequestType {
            request_type: request_type.into(),
        }
    }

    /// Create a timed out error.
    pub const fn timed_out(after: Duration) -> Self {
        Self::TimedOut { after }
    }

    /// Create a report failed error.
    pub fn report_failed(reason: impl Into<String>) -> Self {
        Self::ReportFailed {
            reason: reason.into(),
        }
    }

    /// Create an invalid transition error.
    pub fn invalid_transition(from: impl Into<String>, to: impl Into<String>) -> Self {
        Self::InvalidTransition {
            from: from.into(),
            to: to.into(),
        }
    }

    /// Stable identifier of the error class.
    pub const fn code(&self) -> &'static str {
        match self {
            Self::MalformedEvent { .. } => "MalformedEvent",
            Self::UnknownRequestType { .. } => "UnknownRequestType",
            Self::Reconcile(inner) => inner.code(),
            Self::TimedOut { .. } => "TimedOut",
            Self::ReportFailed { .. } => "ReportFailed",
            Self::InvalidTransition { .. } => "InvalidTransition",
        }
    }
}
