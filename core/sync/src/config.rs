//! Configuration for the sync context.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use attrsync_common::{Error, Result};

use crate::attributes::AttributeLimits;
use crate::bus::DEFAULT_REPLAY_DEPTH;

/// Where and as whom webservice requests are sent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EndpointConfig {
    /// Base URL, without the version segment.
    pub base_url: String,
    /// Version path segment, e.g. `v1`.
    pub api_version: String,
    /// Project API key, used as a path segment.
    pub api_key: String,
    /// Per-request timeout.
    pub timeout_ms: u64,
    /// Installation identifier sent with every request.
    pub installation_id: Option<String>,
    /// Device language, e.g. `en`.
    pub language: Option<String>,
    /// Device region, e.g. `US`.
    pub region: Option<String>,
    /// SDK API level.
    pub api_level: u32,
    /// Whether the user allows data collection.
    pub data_collection: bool,
}

impl EndpointConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

impl Default for EndpointConfig {
    fn default() -> Self {
        Self {
            base_url: "https://ws.attrsync.example".to_string(),
            api_version: "v1".to_string(),
            api_key: String::new(),
            timeout_ms: 30_000,
            installation_id: None,
            language: None,
            region: None,
            api_level: 1,
            data_collection: true,
        }
    }
}

/// Attribute synchronization behavior.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AttributeSyncConfig {
    /// Materialize full sets for array edits on unknown keys.
    pub compat_mode: bool,
    /// Minimum time between two successful checks.
    pub check_throttle_ms: u64,
}

impl AttributeSyncConfig {
    pub fn check_throttle(&self) -> Duration {
        Duration::from_millis(self.check_throttle_ms)
    }
}

impl Default for AttributeSyncConfig {
    fn default() -> Self {
        Self {
            compat_mode: true,
            check_throttle_ms: 5 * 60 * 1000,
        }
    }
}

/// Event delivery buffer behavior.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EventBufferConfig {
    /// Quiet period after the last `track` before sending.
    pub debounce_ms: u64,
    /// Maximum events per request.
    pub batch_size: usize,
    /// Total attempts per batch, the first one included.
    pub max_attempts: u32,
    /// Spacing between attempts.
    pub retry_delay_ms: u64,
    /// Minimum time between two authentication diagnostics.
    pub auth_log_cooldown_ms: u64,
    /// Names starting with this prefix are sent first.
    pub reserved_prefix: String,
}

impl EventBufferConfig {
    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    pub fn auth_log_cooldown(&self) -> Duration {
        Duration::from_millis(self.auth_log_cooldown_ms)
    }

    /// Reject settings under which events could never be delivered.
    pub fn validate(&self) -> Result<()> {
        if self.batch_size == 0 {
            return Err(Error::InvalidInput(
                "events.batch_size must be at least 1".to_string(),
            ));
        }
        if self.max_attempts == 0 {
            return Err(Error::InvalidInput(
                "events.max_attempts must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

impl Default for EventBufferConfig {
    fn default() -> Self {
        Self {
            debounce_ms: 200,
            batch_size: 30,
            max_attempts: 3,
            retry_delay_ms: 1000,
            auth_log_cooldown_ms: 10_000,
            reserved_prefix: "_".to_string(),
        }
    }
}

/// Configuration for a [`crate::SyncContext`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    pub endpoint: EndpointConfig,
    pub limits: AttributeLimits,
    pub attributes: AttributeSyncConfig,
    pub events: EventBufferConfig,
    /// Events kept per bus code for late subscribers.
    pub bus_replay_depth: usize,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            endpoint: EndpointConfig::default(),
            limits: AttributeLimits::default(),
            attributes: AttributeSyncConfig::default(),
            events: EventBufferConfig::default(),
            bus_replay_depth: DEFAULT_REPLAY_DEPTH,
        }
    }
}

impl SyncConfig {
    /// Parse and validate a JSON document. Missing fields take their default.
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)
            .map_err(|e| Error::InvalidInput(format!("Invalid configuration: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        self.events.validate()
    }

    /// Load a JSON configuration file.
    pub async fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let json = tokio::fs::read_to_string(path).await?;
        Self::from_json(&json)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = SyncConfig::default();
        assert_eq!(config.attributes.check_throttle(), Duration::from_secs(300));
        assert!(config.attributes.compat_mode);
        assert_eq!(config.events.debounce(), Duration::from_millis(200));
        assert_eq!(config.events.batch_size, 30);
        assert_eq!(config.events.max_attempts, 3);
        assert_eq!(config.events.retry_delay(), Duration::from_secs(1));
        assert_eq!(config.events.auth_log_cooldown(), Duration::from_secs(10));
        assert_eq!(config.limits.max_attributes, 50);
        assert_eq!(config.bus_replay_depth, 10);
    }

    #[test]
    fn test_partial_json_keeps_defaults() {
        let config = SyncConfig::from_json(
            r#"{ "endpoint": { "api_key": "KEY" }, "events": { "batch_size": 5 } }"#,
        )
        .unwrap();

        assert_eq!(config.endpoint.api_key, "KEY");
        assert_eq!(config.endpoint.api_version, "v1");
        assert_eq!(config.events.batch_size, 5);
        assert_eq!(config.events.debounce_ms, 200);
    }

    #[test]
    fn test_invalid_json_is_rejected() {
        assert!(matches!(
            SyncConfig::from_json("{ not json"),
            Err(Error::InvalidInput(_))
        ));
    }

    #[test]
    fn test_undeliverable_event_settings_are_rejected() {
        for json in [
            r#"{ "events": { "batch_size": 0 } }"#,
            r#"{ "events": { "max_attempts": 0 } }"#,
        ] {
            assert!(matches!(
                SyncConfig::from_json(json),
                Err(Error::InvalidInput(_))
            ));
        }
    }

    #[tokio::test]
    async fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("attrsync.json");
        let mut config = SyncConfig::default();
        config.endpoint.api_key = "FILEKEY".to_string();
        tokio::fs::write(&path, config.to_json().unwrap()).await.unwrap();

        let loaded = SyncConfig::load(&path).await.unwrap();
        assert_eq!(loaded, config);
    }
}
