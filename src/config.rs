//! Configuration for the seedkeeper binary.
//!
//! Values come from an optional TOML or JSON file, then `SEEDKEEPER_*`
//! environment variables, then command line flags.

use std::fmt::Display;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use seedkeeper_events::{DeletePolicy, DispatcherConfig};
use seedkeeper_reconciler::{
    DEFAULT_MARKER_ATTRIBUTE, MAX_BATCH_DELETE_KEYS, Reconciler, ReconcilerBuilder,
    ReconcilerConfig,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const ENV_MARKER_ATTRIBUTE: &str = "SEEDKEEPER_MARKER_ATTRIBUTE";
pub const ENV_DELETE_BATCH_SIZE: &str = "SEEDKEEPER_DELETE_BATCH_SIZE";
pub const ENV_UPSERT_CONCURRENCY: &str = "SEEDKEEPER_UPSERT_CONCURRENCY";
pub const ENV_DELETE_POLICY: &str = "SEEDKEEPER_DELETE_POLICY";
pub const ENV_TIMEOUT_SECS: &str = "SEEDKEEPER_TIMEOUT_SECS";
pub const ENV_REPORT_TIMEOUT_SECS: &str = "SEEDKEEPER_REPORT_TIMEOUT_SECS";
pub const ENV_STORE_DIR: &str = "SEEDKEEPER_STORE_DIR";

/// Errors raised while loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config file {}: {reason}", .path.display())]
    Parse { path: PathBuf, reason: String },

    #[error("invalid value for {var}: {reason}")]
    InvalidEnv { var: &'static str, reason: String },

    #[error("invalid configuration: {0}")]
    Invalid(String),

    #[error(transparent)]
    Reconciler(#[from] seedkeeper_reconciler::Error),
}

pub type Result<T> = std::result::Result<T, ConfigError>;

/// Runtime configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeedkeeperConfig {
    /// Attribute that marks a record as owned.
    #[serde(default = "default_marker_attribute")]
    pub marker_attribute: String,

    /// Keys per batch delete call.
    #[serde(default = "default_delete_batch_size")]
    pub delete_batch_size: usize,

    /// Puts in flight at once.
    #[serde(default = "default_upsert_concurrency")]
    pub upsert_concurrency: usize,

    /// What a Delete event does to owned records.
    #[serde(default)]
    pub delete_policy: DeletePolicy,

    /// Deadline for handling one event.
    #[serde(default)]
    pub invocation_timeout_secs: Option<u64>,

    /// Deadline for delivering one report over HTTP.
    #[serde(default = "default_report_timeout_secs")]
    pub report_timeout_secs: u64,

    /// Directory holding one JSON file per table.
    #[serde(default = "default_store_dir")]
    pub store_dir: PathBuf,
}

impl Default for SeedkeeperConfig {
    fn default() -> Self {
        Self {
            marker_attribute: default_marker_attribute(),
            delete_batch_size: default_delete_batch_size(),
            upsert_concurrency: default_upsert_concurrency(),
            delete_policy: DeletePolicy::default(),
            invocation_timeout_secs: None,
            report_timeout_secs: default_report_timeout_secs(),
            store_dir: default_store_dir(),
        }
    }
}

impl SeedkeeperConfig {
    /// Load from an optional file, then apply the process environment.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed, or an
    /// environment variable holds an unusable value.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.apply_env_from(|var| std::env::var(var).ok())
    }

    /// Load configuration from a file. `.json` files are read as JSON,
    /// anything else as TOML.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Read`] or [`ConfigError::Parse`].
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;

        let parsed = if path.extension().is_some_and(|e| e == "json") {
            serde_json::from_str(&content).map_err(|e| e.to_string())
        } else {
            toml::from_str(&content).map_err(|e| e.to_string())
        };

        parsed.map_err(|reason| ConfigError::Parse {
            path: path.to_path_buf(),
            reason,
        })
    }

    /// Override fields from `SEEDKEEPER_*` variables resolved by `lookup`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidEnv`] for a value that does not parse.
    pub fn apply_env_from<F>(mut self, lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(value) = lookup(ENV_MARKER_ATTRIBUTE) {
            self.marker_attribute = value;
        }
        if let Some(value) = lookup(ENV_DELETE_BATCH_SIZE) {
            self.delete_batch_size = parse_env(ENV_DELETE_BATCH_SIZE, &value)?;
        }
        if let Some(value) = lookup(ENV_UPSERT_CONCURRENCY) {
            self.upsert_concurrency = parse_env(ENV_UPSERT_CONCURRENCY, &value)?;
        }
        if let Some(value) = lookup(ENV_DELETE_POLICY) {
            self.delete_policy = parse_env(ENV_DELETE_POLICY, &value)?;
        }
        if let Some(value) = lookup(ENV_TIMEOUT_SECS) {
            self.invocation_timeout_secs = Some(parse_env(ENV_TIMEOUT_SECS, &value)?);
        }
        if let Some(value) = lookup(ENV_REPORT_TIMEOUT_SECS) {
            self.report_timeout_secs = parse_env(ENV_REPORT_TIMEOUT_SECS, &value)?;
        }
        if let Some(value) = lookup(ENV_STORE_DIR) {
            self.store_dir = PathBuf::from(value);
        }
        Ok(self)
    }

    /// Check every value is usable.
    ///
    /// # Errors
    ///
    /// Returns an error naming the first unusable value.
    pub fn validate(&self) -> Result<()> {
        if self.marker_attribute.trim().is_empty() {
            return Err(ConfigError::Invalid(
                "marker_attribute must not be empty".to_string(),
            ));
        }
        if self.invocation_timeout_secs == Some(0) {
            return Err(ConfigError::Invalid(
                "invocation_timeout_secs must be at least 1".to_string(),
            ));
        }
        if self.report_timeout_secs == 0 {
            return Err(ConfigError::Invalid(
                "report_timeout_secs must be at least 1".to_string(),
            ));
        }
        self.reconciler_config().validate()?;
        Ok(())
    }

    /// Reconciler settings.
    pub const fn reconciler_config(&self) -> ReconcilerConfig {
        ReconcilerConfig {
            delete_batch_size: self.delete_batch_size,
            upsert_concurrency: self.upsert_concurrency,
        }
    }

    /// Dispatcher settings.
    pub fn dispatcher_config(&self) -> DispatcherConfig {
        DispatcherConfig {
            delete_policy: self.delete_policy,
            invocation_timeout: self.invocation_timeout_secs.map(Duration::from_secs),
        }
    }

    /// HTTP report deadline.
    pub const fn report_timeout(&self) -> Duration {
        Duration::from_secs(self.report_timeout_secs)
    }

    /// Build a reconciler from these settings.
    ///
    /// # Errors
    ///
    /// Returns an error if the settings do not validate.
    pub fn build_reconciler(&self) -> Result<Reconciler> {
        self.validate()?;
        let reconciler = ReconcilerBuilder::new()
            .marker_attribute(&self.marker_attribute)
            .with_config(self.reconciler_config())
            .build()?;
        Ok(reconciler)
    }
}

fn parse_env<T>(var: &'static str, value: &str) -> Result<T>
where
    T: FromStr,
    T::Err: Display,
{
    value
        .trim()
        .parse()
        .map_err(|e: T::Err| ConfigError::InvalidEnv {
            var,
            reason: format!("'{value}': {e}"),
        })
}

fn default_marker_attribute() -> String {
    DEFAULT_MARKER_ATTRIBUTE.to_string()
}

const fn default_delete_batch_size() -> usize {
    MAX_BATCH_DELETE_KEYS
}

const fn default_upsert_concurrency() -> usize {
    8
}

const fn default_report_timeout_secs() -> u64 {
    30
}

fn default_store_dir() -> PathBuf {
    PathBuf::from(".seedkeeper/tables")
}
