//! Error types for the reconciler crate.

use thiserror::Error;

/// Result type alias for reconciler operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Reconciler error types.
///
/// Every variant is terminal for the current invocation. Nothing in this
/// crate retries; retry policy belongs to whoever invoked the reconciler.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Error {
    /// Declaration text did not parse into a sequence of records.
    #[error("malformed declaration: {reason}")]
    MalformedDeclaration { reason: String },

    /// A declared record has no value for the hash-key attribute.
    #[error("record at position {index} is missing hash key '{hash_key}'")]
    MissingKey { hash_key: String, index: usize },

    /// The store could not be read.
    #[error("store unavailable: {reason}")]
    StoreUnavailable { reason: String },

    /// A delete or put was rejected by the store.
    #[error("store write failed{}: {reason}", describe_key(.key))]
    StoreWriteFailed { key: Option<String>, reason: String },

    /// The table is keyed on a different attribute than the one requested.
    #[error("table '{table}' is keyed on '{expected}', not '{requested}'")]
    KeySchemaMismatch {
        table: String,
        expected: String,
        requested: String,
    },

    /// Invalid configuration.
    #[error("invalid configuration: {reason}")]
    InvalidConfig { reason: String },
}

#[allow(clippy::ref_option)]
fn describe_key(key: &Option<String>) -> String {
    key.as_ref()
        .map(|k| format!(" for key '{k}'"))
        .unwrap_or_default()
}

impl Error {
    /// Create a malformed declaration error.
    pub fn malformed_declaration(reason: impl Into<String>) -> Self {
        Self::MalformedDeclaration {
            reason: reason.into(),
        }
    }

    /// Create a missing key error.
    pub fn missing_key(hash_key: impl Into<String>, index: usize) -> Self {
        Self::MissingKey {
            hash_key: hash_key.into(),
            index,
        }
    }

    /// Create a store unavailable error.
    pub fn store_unavailable(reason: impl Into<String>) -> Self {
        Self::StoreUnavailable {
            reason: reason.into(),
        }
    }

    /// Create a store write error that is not tied to a single key.
    pub fn store_write_failed(reason: impl Into<String>) -> Self {
        Self::StoreWriteFailed {
            key: None,
            reason: reason.into(),
        }
    }

    /// Create a store write error for a specific key.
    pub fn store_write_failed_for(key: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::StoreWriteFailed {
            key: Some(key.into()),
            reason: reason.into(),
        }
    }

    /// Create a key schema mismatch error.
    pub fn key_schema_mismatch(
        table: impl Into<String>,
        expected: impl Into<String>,
        requested: impl Into<String>,
    ) -> Self {
        Self::KeySchemaMismatch {
            table: table.into(),
            expected: expected.into(),
            requested: requested.into(),
        }
    }

    /// Create an invalid config error.
    pub fn invalid_config(reason: impl Into<String>) -> Self {
        Self::InvalidConfig {
            reason: reason.into(),
        }
    }

    /// Attach a key to a write failure that does not name one yet.
    #[must_use]
    pub fn with_key(self, key: impl Into<String>) -> Self {
        match self {
            Self::StoreWriteFailed { key: None, reason } => Self::StoreWriteFailed {
                key: Some(key.into()),
                reason,
            },
            other => other,
        }
    }

    /// Stable identifier of the error class, used in outcome reports.
    pub const fn code(&self) -> &'static str {
        match self {
            Self::MalformedDeclaration { .. } => "MalformedDeclaration",
            Self::MissingKey { .. } => "MissingKey",
            Self::StoreUnavailable { .. } => "StoreUnavailable",
            Self::StoreWriteFailed { .. } => "StoreWriteFailed",
            Self::KeySchemaMismatch { .. } => "KeySchemaMismatch",
            Self::InvalidConfig { .. } => "InvalidConfig",
        }
    }

    /// The key the failure concerns, when known.
    pub fn failing_key(&self) -> Option<&str> {
        match self {
            Self::StoreWriteFailed { key, .. } => key.as_deref(),
            _ => None,
        }
    }
}
