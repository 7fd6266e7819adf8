//! Session store configuration.
//!
//! Defaults match the bot's production values: sessions idle for an hour are
//! evicted, and the sweep runs once a minute. Every value can be overridden
//! from the environment (see the `ENV_*` constants).

use std::time::Duration;

use thiserror::Error;

/// Inactivity after which a session is evicted.
pub const DEFAULT_IDLE_THRESHOLD: Duration = Duration::from_secs(3600);

/// Cadence of the background sweep.
pub const DEFAULT_SWEEP_PERIOD: Duration = Duration::from_secs(60);

/// Upper bound a caller waits for a handle to be released.
pub const DEFAULT_RELEASE_TIMEOUT: Duration = Duration::from_secs(10);

pub const ENV_IDLE_THRESHOLD: &str = "NEWSWATCH_IDLE_THRESHOLD_SECS";
pub const ENV_SWEEP_PERIOD: &str = "NEWSWATCH_SWEEP_PERIOD_SECS";
pub const ENV_RELEASE_TIMEOUT: &str = "NEWSWATCH_RELEASE_TIMEOUT_SECS";
pub const ENV_CIPHER_PASSPHRASE: &str = "NEWSWATCH_CIPHER_PASSPHRASE";

#[derive(Error, Debug, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{0} is not set")]
    Missing(&'static str),

    #[error("{var} must be a positive number of seconds, got {value:?}")]
    InvalidSeconds { var: &'static str, value: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreConfig {
    /// Sessions with no activity for longer than this are evicted.
    pub idle_threshold: Duration,

    /// How often the background sweep looks for idle sessions.
    pub sweep_period: Duration,

    /// How long a delete waits for the release contract before moving on.
    pub release_timeout: Duration,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            idle_threshold: DEFAULT_IDLE_THRESHOLD,
            sweep_period: DEFAULT_SWEEP_PERIOD,
            release_timeout: DEFAULT_RELEASE_TIMEOUT,
        }
    }
}

impl StoreConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_idle_threshold(mut self, threshold: Duration) -> Self {
        self.idle_threshold = threshold;
        self
    }

    pub fn with_sweep_period(mut self, period: Duration) -> Self {
        self.sweep_period = period;
        self
    }

    pub fn with_release_timeout(mut self, timeout: Duration) -> Self {
        self.release_timeout = timeout;
        self
    }

    /// Load overrides from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Load overrides through `lookup`, falling back to defaults for unset keys.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        if let Some(secs) = seconds(&lookup, ENV_IDLE_THRESHOLD)? {
            config.idle_threshold = secs;
        }
        if let Some(secs) = seconds(&lookup, ENV_SWEEP_PERIOD)? {
            config.sweep_period = secs;
        }
        if let Some(secs) = seconds(&lookup, ENV_RELEASE_TIMEOUT)? {
            config.release_timeout = secs;
        }
        Ok(config)
    }
}

/// Read the cipher passphrase. There is no default: a missing secret is an error.
pub fn cipher_passphrase(lookup: impl Fn(&str) -> Option<String>) -> Result<String, ConfigError> {
    lookup(ENV_CIPHER_PASSPHRASE)
        .filter(|p| !p.is_empty())
        .ok_or(ConfigError::Missing(ENV_CIPHER_PASSPHRASE))
}

fn seconds(
    lookup: &impl Fn(&str) -> Option<String>,
    var: &'static str,
) -> Result<Option<Duration>, ConfigError> {
    let Some(value) = lookup(var) else {
        return Ok(None);
    };
    match value.trim().parse::<u64>() {
        Ok(secs) if secs > 0 => Ok(Some(Duration::from_secs(secs))),
        _ => Err(ConfigError::InvalidSeconds { var, value }),
    }
}
