//! Hub configuration.

use crate::error::{HubError, HubResult};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Channel hub and transport configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HubConfig {
    /// Bounded outbound queue size per connection (drop-oldest on overflow).
    #[serde(default = "default_outbound_queue_capacity")]
    pub outbound_queue_capacity: usize,
    /// Channels that are never garbage-collected when empty.
    #[serde(default = "default_persistent_channels")]
    pub persistent_channels: Vec<String>,
    /// Maximum concurrent WebSocket connections.
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
}

fn default_outbound_queue_capacity() -> usize {
    256
}

fn default_persistent_channels() -> Vec<String> {
    vec![beacon_core::ChannelName::BROADCAST.to_string()]
}

fn default_max_connections() -> usize {
    10_000
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            outbound_queue_capacity: default_outbound_queue_capacity(),
            persistent_channels: default_persistent_channels(),
            max_connections: default_max_connections(),
        }
    }
}

/// Server-side heartbeat configuration.
///
/// The monitor checks every `min(interval_ms, timeout_ms) / 2`. A connection
/// silent for `timeout_ms` is closed on the next check, so a dead peer is
/// reclaimed within `timeout_ms + check_period`. `validate` keeps that
/// within `2 * interval_ms` of the last pong.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeartbeatConfig {
    /// Ping interval.
    #[serde(default = "default_heartbeat_interval_ms")]
    pub interval_ms: u64,
    /// Silence after which a connection is declared dead.
    #[serde(default = "default_heartbeat_timeout_ms")]
    pub timeout_ms: u64,
}

fn default_heartbeat_interval_ms() -> u64 {
    30_000
}

fn default_heartbeat_timeout_ms() -> u64 {
    45_000
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            interval_ms: default_heartbeat_interval_ms(),
            timeout_ms: default_heartbeat_timeout_ms(),
        }
    }
}

impl HeartbeatConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms.max(1))
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms.max(1))
    }

    /// How often the monitor sweeps.
    pub fn check_period(&self) -> Duration {
        (self.interval().min(self.timeout()) / 2).max(Duration::from_millis(1))
    }

    /// Worst-case time from a peer's last frame to its removal.
    pub fn reap_bound(&self) -> Duration {
        self.timeout() + self.check_period()
    }

    pub fn validate(&self) -> HubResult<()> {
        if self.interval_ms == 0 || self.timeout_ms == 0 {
            return Err(HubError::InvalidConfig(
                "heartbeat interval and timeout must be greater than 0".to_string(),
            ));
        }
        if self.reap_bound() > self.interval() * 2 {
            return Err(HubError::InvalidConfig(format!(
                "heartbeat timeout_ms {} plus check period {}ms exceeds 2 * interval_ms {}",
                self.timeout_ms,
                self.check_period().as_millis(),
                self.interval_ms
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_from_empty_config() {
        let config: HubConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config.outbound_queue_capacity, 256);
        assert_eq!(config.persistent_channels, vec!["broadcast".to_string()]);

        let heartbeat = HeartbeatConfig::default();
        assert_eq!(heartbeat.check_period(), Duration::from_secs(15));
        assert_eq!(heartbeat.reap_bound(), Duration::from_secs(60));
        assert!(heartbeat.validate().is_ok());
    }

    #[test]
    fn test_check_period_follows_shorter_of_interval_and_timeout() {
        let config = HeartbeatConfig {
            interval_ms: 1000,
            timeout_ms: 400,
        };
        assert_eq!(config.check_period(), Duration::from_millis(200));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_timeout_past_two_intervals_rejected() {
        // 2000 + 500 > 2 * 1000
        let config = HeartbeatConfig {
            interval_ms: 1000,
            timeout_ms: 2000,
        };
        assert_eq!(config.reap_bound(), Duration::from_millis(2500));
        assert!(matches!(config.validate(), Err(HubError::InvalidConfig(_))));

        let zero = HeartbeatConfig {
            interval_ms: 0,
            timeout_ms: 1000,
        };
        assert!(matches!(zero.validate(), Err(HubError::InvalidConfig(_))));
    }
}
