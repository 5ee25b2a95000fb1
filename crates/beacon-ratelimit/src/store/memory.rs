//! In-process quota store.

use super::{BoxFuture, QuotaKey, QuotaOutcome, QuotaStore};
use crate::config::TierConfig;
use crate::error::StoreResult;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::time::Duration;
use tokio::time::Instant;

/// Expired buckets and blocks are swept at most this often.
const PURGE_INTERVAL: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, Copy)]
struct Bucket {
    used: u32,
    resets_at: Instant,
}

#[derive(Debug, Default)]
struct State {
    buckets: HashMap<QuotaKey, Bucket>,
    blocks: HashMap<QuotaKey, Instant>,
    next_purge: Option<Instant>,
}

impl State {
    fn purge(&mut self, now: Instant) {
        self.buckets.retain(|_, bucket| bucket.resets_at > now);
        self.blocks.retain(|_, until| *until > now);
        self.next_purge = Some(now + PURGE_INTERVAL);
    }
}

/// Single-process store with the same semantics as the Redis script.
#[derive(Debug, Default)]
pub struct MemoryQuotaStore {
    state: Mutex<State>,
}

impl MemoryQuotaStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop buckets and blocks that have expired.
    ///
    /// `consume` also does this once per `PURGE_INTERVAL`.
    pub fn purge_expired(&self) {
        self.state.lock().purge(Instant::now());
    }

    /// Buckets currently tracked (including expired ones not yet purged).
    pub fn tracked(&self) -> usize {
        self.state.lock().buckets.len()
    }

    /// Block markers currently tracked (including expired ones not yet purged).
    pub fn blocked(&self) -> usize {
        self.state.lock().blocks.len()
    }

    fn consume_now(&self, key: QuotaKey, tier: TierConfig) -> QuotaOutcome {
        let now = Instant::now();
        let mut guard = self.state.lock();
        let state = &mut *guard;

        if let Some(until) = state.blocks.get(&key).copied() {
            if until > now {
                return rejected(until - now);
            }
            state.blocks.remove(&key);
        }

        match state.next_purge {
            Some(at) if at > now => {}
            Some(_) => state.purge(now),
            None => state.next_purge = Some(now + PURGE_INTERVAL),
        }

        let window = Duration::from_millis(tier.window_ms());
        let bucket = state.buckets.entry(key.clone()).or_insert(Bucket {
            used: 0,
            resets_at: now + window,
        });
        if bucket.resets_at <= now {
            *bucket = Bucket {
                used: 0,
                resets_at: now + window,
            };
        }

        let ttl = bucket.resets_at - now;
        if bucket.used >= tier.capacity {
            if tier.block_secs > 0 {
                let pin = ttl.max(Duration::from_millis(tier.block_ms()));
                state.blocks.insert(key, now + pin);
                return rejected(pin);
            }
            return rejected(ttl);
        }

        bucket.used += 1;
        QuotaOutcome {
            allowed: true,
            remaining: tier.capacity - bucket.used,
            reset_after_ms: ttl.as_millis() as u64,
        }
    }
}

fn rejected(wait: Duration) -> QuotaOutcome {
    QuotaOutcome {
        allowed: false,
        remaining: 0,
        reset_after_ms: wait.as_millis() as u64,
    }
}

impl QuotaStore for MemoryQuotaStore {
    fn consume(&self, key: QuotaKey, tier: TierConfig) -> BoxFuture<'_, StoreResult<QuotaOutcome>> {
        Box::pin(async move { Ok(self.consume_now(key, tier)) })
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}
