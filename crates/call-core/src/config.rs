//! Configuration for call-core

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::errors::{CallError, Result};
use crate::logging::LoggingConfig;

/// Environment variable prefix read by [`CallConfig::from_env`]
pub const ENV_PREFIX: &str = "CALLHUB_";

/// Timeouts and housekeeping windows
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CallConfig {
    /// How long a call may ring before it is missed
    pub ring_timeout_secs: u64,
    /// How long an accepted call may negotiate media before it fails
    pub negotiation_timeout_secs: u64,
    /// Period of the background sweeper
    pub sweep_interval_ms: u64,
    /// How long a finished call id is remembered as terminal
    pub tombstone_ttl_secs: u64,
    /// Capacity of the session event broadcast channel
    pub event_channel_capacity: usize,
    /// Log output, read from a `[logging]` table
    pub logging: LoggingConfig,
}

impl Default for CallConfig {
    fn default() -> Self {
        Self {
            ring_timeout_secs: 45,
            negotiation_timeout_secs: 20,
            sweep_interval_ms: 1000,
            tombstone_ttl_secs: 300,
            event_channel_capacity: 256,
            logging: LoggingConfig::default(),
        }
    }
}

impl CallConfig {
    pub fn ring_timeout(&self) -> Duration {
        Duration::from_secs(self.ring_timeout_secs)
    }

    pub fn negotiation_timeout(&self) -> Duration {
        Duration::from_secs(self.negotiation_timeout_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_millis(self.sweep_interval_ms)
    }

    pub fn tombstone_ttl(&self) -> Duration {
        Duration::from_secs(self.tombstone_ttl_secs)
    }

    /// Parse from TOML; missing keys take their defaults
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let config: Self = toml::from_str(text)
            .map_err(|e| CallError::config(format!("Invalid TOML: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| CallError::config(format!("Cannot read {}: {}", path.display(), e)))?;
        Self::from_toml_str(&text)
    }

    /// Load from `CALLHUB_*` environment variables over the defaults
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`from_env`](Self::from_env) with an arbitrary variable source
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();
        let read = |name: &str| -> Result<Option<u64>> {
            let key = format!("{}{}", ENV_PREFIX, name);
            match lookup(&key) {
                Some(raw) => raw
                    .trim()
                    .parse::<u64>()
                    .map(Some)
                    .map_err(|_| CallError::config(format!("{} is not a number: {:?}", key, raw))),
                None => Ok(None),
            }
        };

        if let Some(v) = read("RING_TIMEOUT_SECS")? {
            config.ring_timeout_secs = v;
        }
        if let Some(v) = read("NEGOTIATION_TIMEOUT_SECS")? {
            config.negotiation_timeout_secs = v;
        }
        if let Some(v) = read("SWEEP_INTERVAL_MS")? {
            config.sweep_interval_ms = v;
        }
        if let Some(v) = read("TOMBSTONE_TTL_SECS")? {
            config.tombstone_ttl_secs = v;
        }
        if let Some(v) = read("EVENT_CHANNEL_CAPACITY")? {
            config.event_channel_capacity = usize::try_from(v)
                .map_err(|_| CallError::config("EVENT_CHANNEL_CAPACITY out of range"))?;
        }
        if let Some(filter) = lookup(&format!("{}LOG_FILTER", ENV_PREFIX)) {
            config.logging.filter = filter;
        }
        if let Some(raw) = lookup(&format!("{}LOG_JSON", ENV_PREFIX)) {
            config.logging.json = match raw.trim() {
                "1" | "true" => true,
                "0" | "false" => false,
                other => {
                    return Err(CallError::config(format!(
                        "{}LOG_JSON must be true or false: {:?}",
                        ENV_PREFIX, other
                    )));
                }
            };
        }

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.ring_timeout_secs == 0 {
            return Err(CallError::config("ring_timeout_secs must be greater than zero"));
        }
        if self.negotiation_timeout_secs == 0 {
            return Err(CallError::config("negotiation_timeout_secs must be greater than zero"));
        }
        if self.sweep_interval_ms == 0 {
            return Err(CallError::config("sweep_interval_ms must be greater than zero"));
        }
        if self.event_channel_capacity == 0 {
            return Err(CallError::config("event_channel_capacity must be greater than zero"));
        }
        self.logging.validate()
    }
}
