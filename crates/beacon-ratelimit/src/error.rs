//! Rate limiting error types.

use std::time::Duration;
use thiserror::Error;

/// Quota store failures. Never surfaced to clients; the limiter fails open.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("Store did not answer within {0:?}")]
    Timeout(Duration),

    #[error("Unexpected store reply: {0}")]
    UnexpectedReply(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

#[derive(Debug, Error)]
pub enum RateLimitError {
    #[error("Unknown quota category: {0}")]
    UnknownCategory(String),

    #[error("Invalid tier for {category}: {reason}")]
    InvalidTier { category: String, reason: String },

    #[error(transparent)]
    Store(#[from] StoreError),
}

pub type RateLimitResult<T> = Result<T, RateLimitError>;
