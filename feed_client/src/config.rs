//! Runtime configuration of the feed client.
//!
//! Every field has a default, so a JSON config file only needs to name the values it
//! overrides:
//!
//! ```json
//! { "series_capacity": 120, "reconnect": { "max_attempts": 8 } }
//! ```
use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use std::time::Duration;

use feed_common::{FeedError, Result};
use serde::Deserialize;

/// Bounded exponential backoff used between reconnect attempts.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct ReconnectConfig {
    /// Delay before the first retry.
    pub initial_backoff_ms: u64,
    /// Upper bound for any single delay.
    pub max_backoff_ms: u64,
    /// Failed connect attempts before the manager reports offline.
    pub max_attempts: u32,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            initial_backoff_ms: 500,
            max_backoff_ms: 15_000,
            max_attempts: 5,
        }
    }
}

impl ReconnectConfig {
    /// Delay before the first retry.
    pub fn initial_backoff(&self) -> Duration {
        Duration::from_millis(self.initial_backoff_ms)
    }

    /// Upper bound for any single delay.
    pub fn max_backoff(&self) -> Duration {
        Duration::from_millis(self.max_backoff_ms)
    }
}

/// Client configuration.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct FeedConfig {
    /// Maximum number of points kept in a quote's trailing series.
    pub series_capacity: usize,
    /// Interval between keep-alive pings on a live channel.
    pub heartbeat_interval_ms: u64,
    /// Silence after which a live channel is treated as dropped.
    pub idle_timeout_ms: u64,
    /// Timeout of a single connect attempt.
    pub connect_timeout_ms: u64,
    /// Largest quantity accepted by order entry.
    pub max_order_quantity: u64,
    /// Reconnect policy.
    pub reconnect: ReconnectConfig,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            series_capacity: 60,
            heartbeat_interval_ms: 2000,
            idle_timeout_ms: 5000,
            connect_timeout_ms: 3000,
            max_order_quantity: 1000,
            reconnect: ReconnectConfig::default(),
        }
    }
}

impl FeedConfig {
    /// Loads and validates a JSON config file.
    pub fn from_json_file(path: &Path) -> Result<Self> {
        let file = File::open(path)?;
        let config: FeedConfig = serde_json::from_reader(BufReader::new(file))?;
        config.validate()?;
        Ok(config)
    }

    /// Rejects values the client cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.series_capacity == 0 {
            return Err(FeedError::Config("series_capacity must be positive".into()));
        }
        if self.heartbeat_interval_ms == 0 {
            return Err(FeedError::Config(
                "heartbeat_interval_ms must be positive".into(),
            ));
        }
        if self.idle_timeout_ms <= self.heartbeat_interval_ms {
            return Err(FeedError::Config(format!(
                "idle_timeout_ms ({}) must exceed heartbeat_interval_ms ({})",
                self.idle_timeout_ms, self.heartbeat_interval_ms
            )));
        }
        if self.reconnect.max_attempts == 0 {
            return Err(FeedError::Config("reconnect.max_attempts must be positive".into()));
        }
        if self.reconnect.initial_backoff_ms > self.reconnect.max_backoff_ms {
            return Err(FeedError::Config(
                "reconnect.initial_backoff_ms exceeds reconnect.max_backoff_ms".into(),
            ));
        }
        Ok(())
    }

    /// Interval between keep-alive pings.
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms)
    }

    /// Silence threshold for a live channel.
    pub fn idle_timeout(&self) -> Duration {
        Duration::from_millis(self.idle_timeout_ms)
    }

    /// Timeout of a single connect attempt.
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        assert!(FeedConfig::default().validate().is_ok());
    }

    #[test]
    fn partial_json_keeps_other_defaults() {
        let config: FeedConfig =
            serde_json::from_str(r#"{"series_capacity": 120, "reconnect": {"max_attempts": 8}}"#)
                .unwrap();
        assert_eq!(config.series_capacity, 120);
        assert_eq!(config.reconnect.max_attempts, 8);
        assert_eq!(config.reconnect.initial_backoff_ms, 500);
        assert_eq!(config.heartbeat_interval_ms, 2000);
    }

    #[test]
    fn idle_timeout_must_exceed_heartbeat() {
        let config = FeedConfig {
            idle_timeout_ms: 2000,
            ..FeedConfig::default()
        };
        assert!(matches!(config.validate(), Err(FeedError::Config(_))));
    }

    #[test]
    fn zero_capacity_is_rejected() {
        let config = FeedConfig {
            series_capacity: 0,
            ..FeedConfig::default()
        };
        assert!(config.validate().is_err());
    }
}
