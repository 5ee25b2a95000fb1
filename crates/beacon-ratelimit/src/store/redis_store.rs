//! Redis-backed quota store.
//!
//! Consume-and-read runs as one Lua script (`EVALSHA`, falling back to
//! `EVAL`), so concurrent requests sharing a key never race.

use super::{BoxFuture, QuotaKey, QuotaOutcome, QuotaStore};
use crate::config::TierConfig;
use crate::error::{StoreError, StoreResult};
use redis::aio::ConnectionManager;
use redis::{Client, Script};
use tracing::info;

/// KEYS[1] = bucket, KEYS[2] = block marker.
/// ARGV[1] = capacity, ARGV[2] = window ms, ARGV[3] = block ms.
/// Returns `{allowed, remaining, reset_after_ms}`.
const CONSUME_SCRIPT: &str = r#"
local blocked = redis.call('PTTL', KEYS[2])
if blocked > 0 then
  return {0, 0, blocked}
end

local capacity = tonumber(ARGV[1])
local window_ms = tonumber(ARGV[2])
local block_ms = tonumber(ARGV[3])

local used = tonumber(redis.call('GET', KEYS[1]) or '0')
if used >= capacity then
  local ttl = redis.call('PTTL', KEYS[1])
  if ttl < 0 then
    ttl = window_ms
  end
  if block_ms > 0 then
    local pin = math.max(block_ms, ttl)
    redis.call('SET', KEYS[2], '1', 'PX', pin)
    return {0, 0, pin}
  end
  return {0, 0, ttl}
end

used = redis.call('INCR', KEYS[1])
if used == 1 then
  redis.call('PEXPIRE', KEYS[1], window_ms)
end
local ttl = redis.call('PTTL', KEYS[1])
if ttl < 0 then
  ttl = window_ms
end
return {1, capacity - used, ttl}
"#;

/// Shared store. Cloning shares the underlying multiplexed connection.
#[derive(Clone)]
pub struct RedisQuotaStore {
    connection: ConnectionManager,
    script: Script,
}

impl RedisQuotaStore {
    /// Connect to `url` (`redis://host:port/db`).
    ///
    /// The connection manager reconnects on its own after failures.
    pub async fn connect(url: &str) -> StoreResult<Self> {
        info!("Connecting to quota store");
        let client = Client::open(url)?;
        let connection = ConnectionManager::new(client).await?;
        info!("Quota store connection established");

        Ok(Self {
            connection,
            script: Script::new(CONSUME_SCRIPT),
        })
    }

    /// `PING` the server.
    pub async fn health_check(&self) -> StoreResult<bool> {
        let mut connection = self.connection.clone();
        let reply: String = redis::cmd("PING").query_async(&mut connection).await?;
        Ok(reply == "PONG")
    }
}

/// Convert the raw `{allowed, remaining, reset_after_ms}` reply.
fn parse_reply(reply: &[i64]) -> StoreResult<QuotaOutcome> {
    match reply {
        [allowed, remaining, reset_after_ms] => Ok(QuotaOutcome {
            allowed: *allowed == 1,
            remaining: (*remaining).clamp(0, u32::MAX as i64) as u32,
            reset_after_ms: (*reset_after_ms).max(0) as u64,
        }),
        other => Err(StoreError::UnexpectedReply(format!("{other:?}"))),
    }
}

impl QuotaStore for RedisQuotaStore {
    fn consume(&self, key: QuotaKey, tier: TierConfig) -> BoxFuture<'_, StoreResult<QuotaOutcome>> {
        Box::pin(async move {
            let mut connection = self.connection.clone();
            let reply: Vec<i64> = self
                .script
                .key(key.bucket_key())
                .key(key.block_key())
                .arg(tier.capacity)
                .arg(tier.window_ms())
                .arg(tier.block_ms())
                .invoke_async(&mut connection)
                .await?;
            parse_reply(&reply)
        })
    }

    fn name(&self) -> &'static str {
        "redis"
    }
}
