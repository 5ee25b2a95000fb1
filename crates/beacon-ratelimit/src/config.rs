//! Admission tiers and store configuration.

use crate::error::{RateLimitError, RateLimitResult};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::IpAddr;
use std::str::FromStr;

/// Independent quota category. Each has its own tier and bucket namespace.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QuotaCategory {
    General,
    Auth,
    Trading,
    Bridge,
}

impl QuotaCategory {
    pub const ALL: [QuotaCategory; 4] = [Self::General, Self::Auth, Self::Trading, Self::Bridge];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::General => "general",
            Self::Auth => "auth",
            Self::Trading => "trading",
            Self::Bridge => "bridge",
        }
    }
}

impl fmt::Display for QuotaCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for QuotaCategory {
    type Err = RateLimitError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "general" => Ok(Self::General),
            "auth" => Ok(Self::Auth),
            "trading" => Ok(Self::Trading),
            "bridge" => Ok(Self::Bridge),
            other => Err(RateLimitError::UnknownCategory(other.to_string())),
        }
    }
}

/// Quota tier: `capacity` points per `window_secs`.
///
/// `block_secs > 0` pins a block marker once the quota is exhausted, and
/// every attempt is rejected until it elapses even if the window resets
/// earlier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TierConfig {
    pub capacity: u32,
    pub window_secs: u64,
    #[serde(default)]
    pub block_secs: u64,
}

impl TierConfig {
    pub const fn new(capacity: u32, window_secs: u64, block_secs: u64) -> Self {
        Self {
            capacity,
            window_secs,
            block_secs,
        }
    }

    pub fn window_ms(&self) -> u64 {
        self.window_secs.saturating_mul(1000)
    }

    pub fn block_ms(&self) -> u64 {
        self.block_secs.saturating_mul(1000)
    }
}

/// Per-category tiers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TiersConfig {
    #[serde(default = "default_general_tier")]
    pub general: TierConfig,
    #[serde(default = "default_auth_tier")]
    pub auth: TierConfig,
    #[serde(default = "default_trading_tier")]
    pub trading: TierConfig,
    #[serde(default = "default_bridge_tier")]
    pub bridge: TierConfig,
}

fn default_general_tier() -> TierConfig {
    TierConfig::new(100, 900, 0)
}

fn default_auth_tier() -> TierConfig {
    TierConfig::new(5, 900, 900)
}

fn default_trading_tier() -> TierConfig {
    TierConfig::new(30, 60, 60)
}

fn default_bridge_tier() -> TierConfig {
    TierConfig::new(10, 3600, 3600)
}

impl Default for TiersConfig {
    fn default() -> Self {
        Self {
            general: default_general_tier(),
            auth: default_auth_tier(),
            trading: default_trading_tier(),
            bridge: default_bridge_tier(),
        }
    }
}

impl TiersConfig {
    pub fn get(&self, category: QuotaCategory) -> &TierConfig {
        match category {
            QuotaCategory::General => &self.general,
            QuotaCategory::Auth => &self.auth,
            QuotaCategory::Trading => &self.trading,
            QuotaCategory::Bridge => &self.bridge,
        }
    }
}

/// Rate limiter configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitConfig {
    /// Redis URL for the shared quota store. `None` uses the in-process store.
    #[serde(default)]
    pub store_url: Option<String>,
    /// Upper bound on one store round-trip.
    #[serde(default = "default_store_timeout_ms")]
    pub store_timeout_ms: u64,
    /// Admit requests when the store is unavailable.
    #[serde(default = "default_fail_open")]
    pub fail_open: bool,
    /// Peers allowed to set `X-Forwarded-For` / `X-Real-IP`. Loopback is
    /// always trusted; every other peer is keyed by its socket address.
    #[serde(default)]
    pub trusted_proxies: Vec<IpAddr>,
    #[serde(default)]
    pub tiers: TiersConfig,
}

fn default_store_timeout_ms() -> u64 {
    250
}

fn default_fail_open() -> bool {
    true
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            store_url: None,
            store_timeout_ms: default_store_timeout_ms(),
            fail_open: default_fail_open(),
            trusted_proxies: Vec::new(),
            tiers: TiersConfig::default(),
        }
    }
}

impl RateLimitConfig {
    pub fn validate(&self) -> RateLimitResult<()> {
        for category in QuotaCategory::ALL {
            let tier = self.tiers.get(category);
            if tier.window_secs == 0 {
                return Err(RateLimitError::InvalidTier {
                    category: category.to_string(),
                    reason: "window_secs must be greater than 0".to_string(),
                });
            }
        }
        Ok(())
    }
}
