//! Operator configuration.
//!
//! A single explicit `OperatorConfig` is built at startup and handed to every
//! reconciler; nothing reads process-wide state after that.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::Error;
use crate::result::Result;

/// Default finalizer token placed on declarations with a live remote side.
pub const DEFAULT_FINALIZER: &str = "nxo.dev/finalizer";

/// Configuration for the reconciliation engine and its worker pool.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperatorConfig {
    /// Fixed backoff before a failed pass is re-run.
    #[serde(with = "duration_secs", default = "default_retry_interval")]
    pub retry_interval: Duration,

    /// Delay before re-running a pass that lost an optimistic-concurrency race.
    #[serde(with = "duration_secs", default = "default_conflict_retry_interval")]
    pub conflict_retry_interval: Duration,

    /// Upper bound for resolving a remote session.
    #[serde(with = "duration_secs", default = "default_timeout")]
    pub resolve_timeout: Duration,

    /// Upper bound for each remote get/create/update/delete call.
    #[serde(with = "duration_secs", default = "default_timeout")]
    pub remote_timeout: Duration,

    /// Maximum number of keys reconciled in parallel.
    #[serde(default = "default_workers")]
    pub workers: usize,

    /// Finalizer token.
    #[serde(default = "default_finalizer")]
    pub finalizer: String,
}

impl Default for OperatorConfig {
    fn default() -> Self {
        Self {
            retry_interval: default_retry_interval(),
            conflict_retry_interval: default_conflict_retry_interval(),
            resolve_timeout: default_timeout(),
            remote_timeout: default_timeout(),
            workers: default_workers(),
            finalizer: default_finalizer(),
        }
    }
}

impl OperatorConfig {
    /// Load configuration from a TOML (or `.json`) file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed, or if the parsed
    /// configuration fails [`OperatorConfig::validate`].
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::file_read_failed(path, e.to_string()))?;

        let config: Self = if path.extension().is_some_and(|e| e == "json") {
            serde_json::from_str(&content).map_err(|e| Error::json_parse_failed(e.to_string()))?
        } else {
            toml::from_str(&content).map_err(|e| Error::toml_parse_failed(e.to_string()))?
        };

        config.validate()?;
        Ok(config)
    }

    /// Apply `NXO_*` environment overrides on top of this configuration.
    ///
    /// Unparseable values are ignored with a warning.
    #[must_use]
    pub fn with_env_overrides(self) -> Self {
        self.with_overrides(|key| std::env::var(key).ok())
    }

    fn with_overrides<F>(mut self, lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let secs = |key: &str| {
            lookup(key).and_then(|raw| {
                raw.parse::<u64>()
                    .map_err(|e| tracing::warn!(key, value = %raw, error = %e, "Ignoring override"))
                    .ok()
            })
        };

        if let Some(v) = secs("NXO_RETRY_INTERVAL_SECS") {
            self.retry_interval = Duration::from_secs(v);
        }
        if let Some(v) = secs("NXO_REMOTE_TIMEOUT_SECS") {
            self.remote_timeout = Duration::from_secs(v);
        }
        if let Some(v) = secs("NXO_RESOLVE_TIMEOUT_SECS") {
            self.resolve_timeout = Duration::from_secs(v);
        }
        if let Some(v) = secs("NXO_WORKERS") {
            self.workers = usize::try_from(v).unwrap_or(self.workers);
        }
        if let Some(finalizer) = lookup("NXO_FINALIZER") {
            self.finalizer = finalizer;
        }
        self
    }

    /// Check the configuration for values the engine cannot run with.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfig`] when `workers` is zero, the finalizer
    /// token is blank, or a timeout is zero.
    pub fn validate(&self) -> Result<()> {
        if self.workers == 0 {
            return Err(Error::invalid_config("workers must be at least 1"));
        }
        if self.finalizer.trim().is_empty() {
            return Err(Error::invalid_config("finalizer must not be empty"));
        }
        if self.remote_timeout.is_zero() || self.resolve_timeout.is_zero() {
            return Err(Error::invalid_config("timeouts must be non-zero"));
        }
        Ok(())
    }

    /// Set the retry interval.
    #[must_use]
    pub fn retry_interval(mut self, interval: Duration) -> Self {
        self.retry_interval = interval;
        self
    }

    /// Set the number of workers.
    #[must_use]
    pub fn workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    /// Set the remote call timeout.
    #[must_use]
    pub fn remote_timeout(mut self, timeout: Duration) -> Self {
        self.remote_timeout = timeout;
        self
    }
}

const fn default_retry_interval() -> Duration {
    Duration::from_secs(30)
}

const fn default_conflict_retry_interval() -> Duration {
    Duration::from_secs(1)
}

const fn default_timeout() -> Duration {
    Duration::from_secs(10)
}

const fn default_workers() -> usize {
    4
}

fn default_finalizer() -> String {
    DEFAULT_FINALIZER.to_string()
}

/// Serialization helper for Duration as seconds.
mod duration_secs {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        duration.as_secs().serialize(serializer)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}
