//! Quota store abstraction.
//!
//! A store performs one atomic consume-and-read per call. Implementations:
//! - `RedisQuotaStore`: shared across processes, one Lua round-trip
//! - `MemoryQuotaStore`: single process, for tests and development

mod memory;
mod redis_store;

pub use self::memory::MemoryQuotaStore;
pub use self::redis_store::RedisQuotaStore;

use crate::config::{QuotaCategory, TierConfig};
use crate::error::StoreResult;
use std::pin::Pin;

/// Boxed future for dyn-compatible async trait methods.
pub type BoxFuture<'a, T> = Pin<Box<dyn std::future::Future<Output = T> + Send + 'a>>;

/// Bucket identity: `(category, client)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct QuotaKey {
    pub category: QuotaCategory,
    pub client: String,
}

impl QuotaKey {
    pub fn new(category: QuotaCategory, client: impl Into<String>) -> Self {
        Self {
            category,
            client: client.into(),
        }
    }

    /// Window counter key.
    pub fn bucket_key(&self) -> String {
        format!("ratelimit:{}:{}", self.category, self.client)
    }

    /// Block marker key.
    pub fn block_key(&self) -> String {
        format!("ratelimit:block:{}:{}", self.category, self.client)
    }
}

/// Result of one consume attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QuotaOutcome {
    pub allowed: bool,
    /// Points left in the window after this call.
    pub remaining: u32,
    /// Until the window resets (allowed) or the rejection lifts (rejected).
    pub reset_after_ms: u64,
}

pub trait QuotaStore: Send + Sync {
    /// Atomically consume one point of `key`'s bucket under `tier`.
    ///
    /// A missing bucket is created with `capacity - 1` remaining and a
    /// `window_secs` expiry. A rejected attempt does not consume, and
    /// pins the block marker when the tier defines one.
    fn consume(&self, key: QuotaKey, tier: TierConfig) -> BoxFuture<'_, StoreResult<QuotaOutcome>>;

    /// Store name for logs.
    fn name(&self) -> &'static str;
}
