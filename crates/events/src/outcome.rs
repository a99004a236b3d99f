//! Outcome reports.

use std::fmt;

use serde::{Serialize, Serializer};
use serde_json::{Map, Value};

/// Status sent back to the orchestrator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OutcomeStatus {
    /// The request was handled.
    Success,
    /// The request failed.
    Failed,
}

impl OutcomeStatus {
    /// Wire name of the status.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Success => "SUCCESS",
            Self::Failed => "FAILED",
        }
    }
}

impl fmt::Display for OutcomeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The single success or failure signal produced per lifecycle event.
#[derive(Debug, Clone, PartialEq)]
pub enum OutcomeReport {
    /// Handling succeeded.
    Success { data: Map<String, Value> },
    /// Handling failed.
    Failure { reason: String },
}

impl OutcomeReport {
    /// Success with an empty payload.
    pub fn success() -> Self {
        Self::Success { data: Map::new() }
    }

    /// Failure with a human-readable reason.
    pub fn failure(reason: impl Into<String>) -> Self {
        Self::Failure {
            reason: reason.into(),
        }
    }

    /// The report's status.
    pub const fn status(&self) -> OutcomeStatus {
        match self {
            Self::Success { .. } => OutcomeStatus::Success,
            Self::Failure { .. } => OutcomeStatus::Failed,
        }
    }

    /// Whether this is a success report.
    pub const fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }

    /// Payload; always empty for a failure.
    pub fn data(&self) -> Map<String, Value> {
        match self {
            Self::Success { data } => data.clone(),
            Self::Failure { .. } => Map::new(),
        }
    }

    /// Failure reason, if any.
    pub fn reason(&self) -> Option<&str> {
        match self {
            Self::Success { .. } => None,
            Self::Failure { reason } => Some(reason),
        }
    }
}

#[derive(Serialize)]
struct WireOutcome<'a> {
    status: OutcomeStatus,
    data: Map<String, Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    reason: Option<&'a str>,
}

/// Serializes as `{"status": "SUCCESS"|"FAILED", "data": {..}, "reason"?: ".."}`.
impl Serialize for OutcomeReport {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        WireOutcome {
            status: self.status(),
            data: self.data(),
            reason: self.reason(),
        }
        .serialize(serializer)
    }
}
