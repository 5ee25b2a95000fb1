//! Application configuration.

use crate::error::{AppError, AppResult};
use beacon_hub::{HeartbeatConfig, HubConfig};
use beacon_ratelimit::RateLimitConfig;
use beacon_ws::ConnectionConfig;
use serde::{Deserialize, Serialize};
use std::net::{IpAddr, SocketAddr};

/// HTTP listener configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Allowed CORS origins. Empty allows any origin.
    #[serde(default)]
    pub cors_origins: Vec<String>,
    /// Capacity of the domain-event queue feeding the broadcaster.
    #[serde(default = "default_event_queue_capacity")]
    pub event_queue_capacity: usize,
}

fn default_bind() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_event_queue_capacity() -> usize {
    4_096
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            port: default_port(),
            cors_origins: Vec::new(),
            event_queue_capacity: default_event_queue_capacity(),
        }
    }
}

impl ServerConfig {
    pub fn socket_addr(&self) -> AppResult<SocketAddr> {
        let ip: IpAddr = self
            .bind
            .parse()
            .map_err(|e| AppError::Config(format!("Invalid bind address {:?}: {e}", self.bind)))?;
        Ok(SocketAddr::new(ip, self.port))
    }
}

/// Top-level configuration file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub hub: HubConfig,
    #[serde(default)]
    pub heartbeat: HeartbeatConfig,
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
    /// Defaults for the `watch` client.
    #[serde(default)]
    pub client: ConnectionConfig,
}

impl AppConfig {
    /// Load and validate configuration from a TOML file.
    pub fn from_file(path: &str) -> AppResult<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| AppError::Config(format!("Failed to read config: {e}")))?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> AppResult<Self> {
        let config: Self = toml::from_str(content)
            .map_err(|e| AppError::Config(format!("Failed to parse config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> AppResult<()> {
        self.server.socket_addr()?;
        if self.server.event_queue_capacity == 0 {
            return Err(AppError::Config(
                "server.event_queue_capacity must be greater than 0".to_string(),
            ));
        }
        if self.hub.outbound_queue_capacity == 0 {
            return Err(AppError::Config(
                "hub.outbound_queue_capacity must be greater than 0".to_string(),
            ));
        }
        self.heartbeat.validate()?;
        self.rate_limit.validate()?;
        Ok(())
    }
}
