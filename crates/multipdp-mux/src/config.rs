use std::path::Path;
use std::time::Duration;

use multipdp_frame::{DEFAULT_MAX_PAYLOAD, MAX_WIRE_PAYLOAD};
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::registry::DEFAULT_SLOT_COUNT;

/// Default outbound ring size per data channel.
pub const DEFAULT_RING_CAPACITY: usize = 16;

/// Multiplexer behavior configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct MuxConfig {
    /// Maximum payload per frame. Default: 1500.
    pub max_payload: usize,
    /// Channel slots in the registry. Default: 10.
    pub slot_count: usize,
    /// Slots per data-channel outbound ring (one stays empty). Default: 16.
    pub ring_capacity: usize,
    /// Delay before a failed flush is retried. Default: 10 ms.
    pub flush_retry_delay_ms: u64,
    /// Upper bound on one readiness wait, i.e. cancellation latency. Default: 100 ms.
    pub poll_interval_ms: u64,
    /// Initial id offset applied to data-channel requests. Default: 0.
    pub id_adjustment: i32,
}

impl Default for MuxConfig {
    fn default() -> Self {
        Self {
            max_payload: DEFAULT_MAX_PAYLOAD,
            slot_count: DEFAULT_SLOT_COUNT,
            ring_capacity: DEFAULT_RING_CAPACITY,
            flush_retry_delay_ms: 10,
            poll_interval_ms: 100,
            id_adjustment: 0,
        }
    }
}

impl MuxConfig {
    /// Parse and validate a JSON config document.
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a JSON config file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let json = std::fs::read_to_string(path)
            .map_err(|err| ConfigError::Invalid(format!("{}: {err}", path.display())))?;
        Self::from_json(&json)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_payload == 0 || self.max_payload > MAX_WIRE_PAYLOAD {
            return Err(ConfigError::Invalid(format!(
                "max_payload must be between 1 and {MAX_WIRE_PAYLOAD}, got {}",
                self.max_payload
            )));
        }
        if self.slot_count == 0 {
            return Err(ConfigError::Invalid("slot_count must be at least 1".into()));
        }
        if self.ring_capacity < 2 {
            return Err(ConfigError::Invalid(
                "ring_capacity must be at least 2".into(),
            ));
        }
        if self.flush_retry_delay_ms == 0 {
            return Err(ConfigError::Invalid(
                "flush_retry_delay_ms must be greater than zero".into(),
            ));
        }
        if self.poll_interval_ms == 0 {
            return Err(ConfigError::Invalid(
                "poll_interval_ms must be greater than zero".into(),
            ));
        }
        Ok(())
    }

    pub fn flush_retry_delay(&self) -> Duration {
        Duration::from_millis(self.flush_retry_delay_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}
