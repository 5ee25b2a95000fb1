//! Client connection configuration and backoff schedule.

use crate::error::{WsError, WsResult};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Upper bound on the backoff exponent; `2^16` times the base is far past any cap.
const MAX_BACKOFF_EXPONENT: u32 = 16;

/// Client connection configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectionConfig {
    /// Server endpoint, e.g. `ws://127.0.0.1:8080/ws`.
    #[serde(default = "default_url")]
    pub url: String,
    /// Consecutive failed attempts before giving up (must be > 0).
    #[serde(default = "default_max_reconnect_attempts")]
    pub max_reconnect_attempts: u32,
    #[serde(default = "default_reconnect_base_delay_ms")]
    pub reconnect_base_delay_ms: u64,
    #[serde(default = "default_reconnect_max_delay_ms")]
    pub reconnect_max_delay_ms: u64,
    /// Random extra delay added to each backoff, `0..=max_jitter_ms`.
    #[serde(default = "default_max_jitter_ms")]
    pub max_jitter_ms: u64,
    /// Idle time before an app-level `ping` is sent.
    #[serde(default = "default_heartbeat_interval_ms")]
    pub heartbeat_interval_ms: u64,
    /// How long to wait for the matching `pong`.
    #[serde(default = "default_heartbeat_timeout_ms")]
    pub heartbeat_timeout_ms: u64,
    /// Capacity of the event channel handed to the application.
    #[serde(default = "default_event_buffer")]
    pub event_buffer: usize,
}

fn default_url() -> String {
    "ws://127.0.0.1:8080/ws".to_string()
}

fn default_max_reconnect_attempts() -> u32 {
    10
}

fn default_reconnect_base_delay_ms() -> u64 {
    1_000
}

fn default_reconnect_max_delay_ms() -> u64 {
    60_000
}

fn default_max_jitter_ms() -> u64 {
    1_000
}

fn default_heartbeat_interval_ms() -> u64 {
    30_000
}

fn default_heartbeat_timeout_ms() -> u64 {
    10_000
}

fn default_event_buffer() -> usize {
    1_024
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            url: default_url(),
            max_reconnect_attempts: default_max_reconnect_attempts(),
            reconnect_base_delay_ms: default_reconnect_base_delay_ms(),
            reconnect_max_delay_ms: default_reconnect_max_delay_ms(),
            max_jitter_ms: default_max_jitter_ms(),
            heartbeat_interval_ms: default_heartbeat_interval_ms(),
            heartbeat_timeout_ms: default_heartbeat_timeout_ms(),
            event_buffer: default_event_buffer(),
        }
    }
}

impl ConnectionConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Self::default()
        }
    }

    pub fn validate(&self) -> WsResult<()> {
        if self.url.is_empty() {
            return Err(WsError::InvalidConfig("url must not be empty".to_string()));
        }
        if self.max_reconnect_attempts == 0 {
            return Err(WsError::InvalidConfig(
                "max_reconnect_attempts must be greater than zero".to_string(),
            ));
        }
        if self.reconnect_base_delay_ms == 0 {
            return Err(WsError::InvalidConfig(
                "reconnect_base_delay_ms must be greater than zero".to_string(),
            ));
        }
        if self.reconnect_max_delay_ms < self.reconnect_base_delay_ms {
            return Err(WsError::InvalidConfig(
                "reconnect_max_delay_ms must be at least reconnect_base_delay_ms".to_string(),
            ));
        }
        if self.heartbeat_interval_ms == 0 || self.heartbeat_timeout_ms == 0 {
            return Err(WsError::InvalidConfig(
                "heartbeat interval and timeout must be greater than zero".to_string(),
            ));
        }
        if self.event_buffer == 0 {
            return Err(WsError::InvalidConfig(
                "event_buffer must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }

    /// Backoff before reconnect attempt `attempt` (0-based), without jitter:
    /// `min(base * 2^attempt, max)`.
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.min(MAX_BACKOFF_EXPONENT);
        let delay = self
            .reconnect_base_delay_ms
            .saturating_mul(1u64 << exponent)
            .min(self.reconnect_max_delay_ms);
        Duration::from_millis(delay)
    }

    /// Backoff plus a random jitter in `0..=max_jitter_ms`.
    pub fn backoff_with_jitter(&self, attempt: u32) -> Duration {
        self.backoff_delay(attempt) + Duration::from_millis(rand_jitter(self.max_jitter_ms))
    }
}

/// Cheap jitter source from the clock's sub-second nanos.
fn rand_jitter(max_ms: u64) -> u64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    if max_ms == 0 {
        return 0;
    }
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.subsec_nanos())
        .unwrap_or(0);
    u64::from(nanos) % (max_ms + 1)
}
