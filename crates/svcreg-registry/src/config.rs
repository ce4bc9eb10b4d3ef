//! Registry configuration.
//!
//! Loaded from YAML. Every section and every field is optional; durations
//! are written as `"500ms"`, `"3s"`, `"1m"` or `"1h"`.
//!
//! ```yaml
//! server:
//!   host: 127.0.0.1
//!   port: 3000
//! heartbeat:
//!   interval: 3s
//!   attempts: 3
//!   retry_delay: 1s
//!   probe_timeout: 5s
//! delivery:
//!   timeout: 5s
//!   max_concurrent: 64
//! duplicate_policy: append
//! ```

use anyhow::{ensure, Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Top-level configuration structure
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistryConfig {
    pub server: ServerConfig,
    pub heartbeat: HeartbeatConfig,
    pub delivery: DeliveryConfig,
    pub duplicate_policy: DuplicatePolicy,
}

/// HTTP listener options
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
        }
    }
}

impl ServerConfig {
    /// Socket address string for the listener.
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Heartbeat monitor options
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HeartbeatConfig {
    /// Pause between the end of one cycle and the start of the next.
    #[serde(with = "duration_serde")]
    pub interval: Duration,

    /// Probes per registration per cycle.
    pub attempts: u32,

    /// Spacing between consecutive probes of one registration.
    #[serde(with = "duration_serde")]
    pub retry_delay: Duration,

    /// Upper bound for a single probe, transport included.
    #[serde(with = "duration_serde")]
    pub probe_timeout: Duration,
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(3),
            attempts: 3,
            retry_delay: Duration::from_secs(1),
            probe_timeout: Duration::from_secs(5),
        }
    }
}

/// Patch delivery options
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeliveryConfig {
    /// Upper bound for a single patch POST.
    #[serde(with = "duration_serde")]
    pub timeout: Duration,

    /// Deliveries in flight at once, across all dependents.
    pub max_concurrent: usize,
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(5),
            max_concurrent: 64,
        }
    }
}

/// What `add` does with a service URL that is already registered.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DuplicatePolicy {
    /// Store another entry under the same URL.
    #[default]
    Append,
    /// Refuse the registration.
    Reject,
}

impl RegistryConfig {
    /// Load configuration from a YAML file
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read config file: {}", path.as_ref().display()))?;

        Self::load_from_string(&content)
    }

    /// Load configuration from a YAML string
    pub fn load_from_string(content: &str) -> Result<Self> {
        let config: RegistryConfig =
            serde_yaml::from_str(content).context("Failed to parse YAML configuration")?;

        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        ensure!(!self.server.host.is_empty(), "server.host must not be empty");
        ensure!(self.heartbeat.attempts >= 1, "heartbeat.attempts must be at least 1");
        ensure!(
            !self.heartbeat.probe_timeout.is_zero(),
            "heartbeat.probe_timeout must be greater than zero"
        );
        ensure!(
            !self.delivery.timeout.is_zero(),
            "delivery.timeout must be greater than zero"
        );
        ensure!(
            self.delivery.max_concurrent >= 1,
            "delivery.max_concurrent must be at least 1"
        );
        Ok(())
    }
}

// Durations as "500ms", "3s", "1m", "1h"
mod duration_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        if duration.subsec_millis() == 0 {
            serializer.serialize_str(&format!("{}s", duration.as_secs()))
        } else {
            serializer.serialize_str(&format!("{}ms", duration.as_millis()))
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        parse_duration(&s).map_err(serde::de::Error::custom)
    }

    pub(super) fn parse_duration(s: &str) -> Result<Duration, String> {
        let s = s.trim();
        let invalid = || format!("Invalid duration: {}", s);

        // "ms" before "s", since "ms" ends with 's'
        if let Some(num) = s.strip_suffix("ms") {
            num.parse().map(Duration::from_millis).map_err(|_| invalid())
        } else if let Some(num) = s.strip_suffix('s') {
            num.parse().map(Duration::from_secs).map_err(|_| invalid())
        } else if let Some(num) = s.strip_suffix('m') {
            scaled_secs(num, 60).ok_or_else(invalid)
        } else if let Some(num) = s.strip_suffix('h') {
            scaled_secs(num, 3600).ok_or_else(invalid)
        } else {
            Err(format!("Duration must end with 'ms', 's', 'm' or 'h': {}", s))
        }
    }

    // None on a malformed number or when the seconds overflow u64.
    fn scaled_secs(num: &str, factor: u64) -> Option<Duration> {
        num.parse::<u64>()
            .ok()?
            .checked_mul(factor)
            .map(Duration::from_secs)
    }
}
