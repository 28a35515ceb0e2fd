//! Configuration for the fulfillment services.
//!
//! Values are plain structs passed at construction time. `from_env` exists for
//! process entry points; nothing inside the core reads the environment.

use std::time::Duration;

use thiserror::Error;

pub const ENV_LOCK_TIMEOUT_MS: &str = "MEALFLOW_LOCK_TIMEOUT_MS";
pub const ENV_BUSY_RETRIES: &str = "MEALFLOW_BUSY_RETRIES";
pub const ENV_RETRY_BACKOFF_MS: &str = "MEALFLOW_RETRY_BACKOFF_MS";
pub const ENV_NOTES_MAX_LEN: &str = "MEALFLOW_NOTES_MAX_LEN";

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid value for {var}: '{value}'")]
    Invalid { var: &'static str, value: String },
}

/// Fulfillment service configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FulfillmentConfig {
    /// Bounded wait for inventory row locks before failing with `Busy`.
    pub lock_timeout: Duration,
    /// Extra attempts after a `Busy` failure.
    pub busy_retries: u32,
    /// Base backoff between attempts (multiplied by the attempt number).
    pub retry_backoff: Duration,
    /// Maximum characters kept from order notes.
    pub notes_max_len: usize,
}

impl Default for FulfillmentConfig {
    fn default() -> Self {
        Self {
            lock_timeout: Duration::from_millis(2000),
            busy_retries: 3,
            retry_backoff: Duration::from_millis(25),
            notes_max_len: 1000,
        }
    }
}

impl FulfillmentConfig {
    pub fn with_lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout = timeout;
        self
    }

    pub fn with_busy_retries(mut self, retries: u32) -> Self {
        self.busy_retries = retries;
        self
    }

    pub fn with_retry_backoff(mut self, backoff: Duration) -> Self {
        self.retry_backoff = backoff;
        self
    }

    pub fn with_notes_max_len(mut self, max: usize) -> Self {
        self.notes_max_len = max;
        self
    }

    /// Read overrides from `MEALFLOW_*` environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Same as [`from_env`](Self::from_env) with an injectable lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();
        if let Some(ms) = parse::<u64, _>(&lookup, ENV_LOCK_TIMEOUT_MS)? {
            config.lock_timeout = Duration::from_millis(ms);
        }
        if let Some(n) = parse::<u32, _>(&lookup, ENV_BUSY_RETRIES)? {
            config.busy_retries = n;
        }
        if let Some(ms) = parse::<u64, _>(&lookup, ENV_RETRY_BACKOFF_MS)? {
            config.retry_backoff = Duration::from_millis(ms);
        }
        if let Some(n) = parse::<usize, _>(&lookup, ENV_NOTES_MAX_LEN)? {
            config.notes_max_len = n;
        }
        Ok(config)
    }
}

fn parse<T, F>(lookup: &F, var: &'static str) -> Result<Option<T>, ConfigError>
where
    T: core::str::FromStr,
    F: Fn(&str) -> Option<String>,
{
    match lookup(var) {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|_| ConfigError::Invalid { var, value: raw }),
    }
}

/// Where order notifications go.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum NotificationChannel {
    /// Publish envelopes on the event bus.
    #[default]
    Bus,
    /// Write a structured log line only.
    Log,
}

/// Notification settings, handed explicitly to the notifier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotificationConfig {
    pub enabled: bool,
    pub channel: NotificationChannel,
}

impl Default for NotificationConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            channel: NotificationChannel::Bus,
        }
    }
}

impl NotificationConfig {
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Self::default()
        }
    }

    pub fn with_channel(mut self, channel: NotificationChannel) -> Self {
        self.channel = channel;
        self
    }

    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }
}
