//! Run configuration.
//!
//! Values come from, in increasing precedence: defaults, a TOML (or JSON)
//! file, `IAMSYNC_*` environment variables, then command-line flags.

use std::fmt::Display;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use iamsync_core::{Error, Result, ResultExt};
use iamsync_directory::RetryPolicy;
use iamsync_reconciler::ControllerConfig;
use serde::{Deserialize, Serialize};

/// Environment variable overriding [`SyncConfig::concurrency`].
pub const ENV_CONCURRENCY: &str = "IAMSYNC_CONCURRENCY";
/// Environment variable overriding [`SyncConfig::deadline_secs`].
pub const ENV_DEADLINE_SECS: &str = "IAMSYNC_DEADLINE_SECS";
/// Environment variable overriding the retry count.
pub const ENV_MAX_RETRIES: &str = "IAMSYNC_MAX_RETRIES";

/// Configuration for one sync run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Identities reconciled in parallel.
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,

    /// Stop dispatching new identities after this many seconds.
    #[serde(default)]
    pub deadline_secs: Option<u64>,

    /// Backoff for throttled and transient directory calls.
    #[serde(default)]
    pub retry: RetryPolicy,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            concurrency: default_concurrency(),
            deadline_secs: None,
            retry: RetryPolicy::default(),
        }
    }
}

impl SyncConfig {
    /// Load configuration from a file.
    ///
    /// Files ending in `.json` are parsed as JSON, anything else as TOML.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::file_read_failed(path, e.to_string()))?;

        if path.extension().is_some_and(|e| e == "json") {
            serde_json::from_str(&content).map_err(|e| Error::json_parse_failed(e.to_string()))
        } else {
            toml::from_str(&content).map_err(|e| Error::toml_parse_failed(e.to_string()))
        }
    }

    /// Load configuration from an optional file, then apply `IAMSYNC_*`
    /// overrides from the process environment.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load(file: Option<&Path>) -> Result<Self> {
        let base = match file {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        Ok(base.with_env_overrides(|key| std::env::var(key).ok()))
    }

    /// Apply `IAMSYNC_*` overrides read through `lookup`.
    ///
    /// Unparseable values are logged and ignored.
    #[must_use]
    pub fn with_env_overrides<F>(mut self, lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(concurrency) = env_value(&lookup, ENV_CONCURRENCY) {
            self.concurrency = concurrency;
        }
        if let Some(secs) = env_value(&lookup, ENV_DEADLINE_SECS) {
            self.deadline_secs = Some(secs);
        }
        if let Some(retries) = env_value(&lookup, ENV_MAX_RETRIES) {
            self.retry.max_retries = retries;
        }
        self
    }

    /// Check the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error for a zero concurrency or deadline, or an invalid
    /// retry policy.
    pub fn validate(&self) -> Result<()> {
        if self.concurrency == 0 {
            return Err(Error::invalid_config("concurrency must be at least 1"));
        }
        if self.deadline_secs == Some(0) {
            return Err(Error::invalid_config("deadline_secs must be positive"));
        }
        self.retry
            .validate()
            .map_err(|reason| Error::invalid_config(format!("retry: {reason}")))
    }

    /// Run deadline, if any.
    #[must_use]
    pub fn deadline(&self) -> Option<Duration> {
        self.deadline_secs.map(Duration::from_secs)
    }

    /// Controller settings derived from this configuration.
    #[must_use]
    pub fn controller_config(&self) -> ControllerConfig {
        ControllerConfig {
            concurrency: self.concurrency,
            deadline: self.deadline(),
        }
    }
}

const fn default_concurrency() -> usize {
    4
}

fn env_value<T, F>(lookup: &F, key: &str) -> Option<T>
where
    T: FromStr,
    T::Err: Display,
    F: Fn(&str) -> Option<String>,
{
    lookup(key).and_then(|raw| parse_env(key, &raw).into_option_logged())
}

fn parse_env<T>(key: &str, raw: &str) -> Result<T>
where
    T: FromStr,
    T::Err: Display,
{
    raw.trim()
        .parse()
        .map_err(|e| Error::invalid_config(format!("{key}={raw}: {e}")))
}
