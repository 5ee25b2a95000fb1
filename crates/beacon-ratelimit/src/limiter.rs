//! Tiered admission gate.

use crate::config::{QuotaCategory, RateLimitConfig, TiersConfig};
use crate::store::{QuotaKey, QuotaOutcome, QuotaStore};
use crate::error::StoreError;
use beacon_telemetry::Metrics;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Admission decision. Both variants carry what the rate-limit headers need.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Allowed {
        limit: u32,
        remaining: u32,
        reset_after_secs: u64,
    },
    Rejected {
        limit: u32,
        reset_after_secs: u64,
        retry_after_secs: u64,
    },
}

impl Admission {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Self::Allowed { .. })
    }

    pub fn limit(&self) -> u32 {
        match self {
            Self::Allowed { limit, .. } | Self::Rejected { limit, .. } => *limit,
        }
    }

    pub fn remaining(&self) -> u32 {
        match self {
            Self::Allowed { remaining, .. } => *remaining,
            Self::Rejected { .. } => 0,
        }
    }

    pub fn reset_after_secs(&self) -> u64 {
        match self {
            Self::Allowed {
                reset_after_secs, ..
            }
            | Self::Rejected {
                reset_after_secs, ..
            } => *reset_after_secs,
        }
    }
}

/// Whole seconds, rounded up.
fn ceil_secs(ms: u64) -> u64 {
    ms.div_ceil(1000)
}

/// Admission gate consulting a shared quota store per category.
pub struct RateLimiter {
    store: Arc<dyn QuotaStore>,
    tiers: TiersConfig,
    store_timeout: Duration,
    fail_open: bool,
    trusted_proxies: Vec<IpAddr>,
}

impl RateLimiter {
    pub fn new(store: Arc<dyn QuotaStore>, config: &RateLimitConfig) -> Self {
        Self {
            store,
            tiers: config.tiers.clone(),
            store_timeout: Duration::from_millis(config.store_timeout_ms),
            fail_open: config.fail_open,
            trusted_proxies: config.trusted_proxies.clone(),
        }
    }

    pub fn tiers(&self) -> &TiersConfig {
        &self.tiers
    }

    /// Whether forwarding headers from `peer` name the real client.
    pub fn trusts_proxy(&self, peer: IpAddr) -> bool {
        peer.is_loopback() || self.trusted_proxies.contains(&peer)
    }

    /// Consume one point for `(category, client_key)`.
    ///
    /// Bounded by the store timeout. A store failure or timeout admits the
    /// request when fail-open is enabled.
    pub async fn admit(&self, category: QuotaCategory, client_key: &str) -> Admission {
        let tier = *self.tiers.get(category);
        let key = QuotaKey::new(category, client_key);

        let started = Instant::now();
        let result = tokio::time::timeout(self.store_timeout, self.store.consume(key, tier))
            .await
            .unwrap_or(Err(StoreError::Timeout(self.store_timeout)));
        Metrics::store_latency(category.as_str(), started.elapsed().as_secs_f64() * 1000.0);

        match result {
            Ok(outcome) => self.decide(category, tier.capacity, client_key, outcome),
            Err(e) => self.store_failed(category, tier.capacity, tier.window_secs, client_key, e),
        }
    }

    fn decide(
        &self,
        category: QuotaCategory,
        limit: u32,
        client_key: &str,
        outcome: QuotaOutcome,
    ) -> Admission {
        let reset_after_secs = ceil_secs(outcome.reset_after_ms);
        if outcome.allowed {
            Metrics::admission(category.as_str(), "allowed");
            Admission::Allowed {
                limit,
                remaining: outcome.remaining,
                reset_after_secs,
            }
        } else {
            Metrics::admission(category.as_str(), "rejected");
            let retry_after_secs = reset_after_secs.max(1);
            debug!(
                category = %category,
                client = client_key,
                retry_after_secs,
                "Quota exceeded"
            );
            Admission::Rejected {
                limit,
                reset_after_secs,
                retry_after_secs,
            }
        }
    }

    fn store_failed(
        &self,
        category: QuotaCategory,
        limit: u32,
        window_secs: u64,
        client_key: &str,
        error: StoreError,
    ) -> Admission {
        if self.fail_open {
            Metrics::admission(category.as_str(), "fail_open");
            warn!(
                category = %category,
                client = client_key,
                store = self.store.name(),
                error = %error,
                "Quota store unavailable, admitting request"
            );
            Admission::Allowed {
                limit,
                remaining: limit,
                reset_after_secs: window_secs,
            }
        } else {
            Metrics::admission(category.as_str(), "fail_closed");
            warn!(
                category = %category,
                client = client_key,
                store = self.store.name(),
                error = %error,
                "Quota store unavailable, rejecting request"
            );
            Admission::Rejected {
                limit,
                reset_after_secs: 1,
                retry_after_secs: 1,
            }
        }
    }
}
