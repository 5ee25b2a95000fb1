//! Tiered admission control for the Beacon HTTP surface.
//!
//! - `RateLimiter`: per-category quota gate with fail-open on store failure
//! - `QuotaStore`: atomic consume-and-read (`RedisQuotaStore`, `MemoryQuotaStore`)
//! - `with_admission`: axum middleware producing 429 responses and quota headers

pub mod config;
pub mod error;
pub mod limiter;
pub mod middleware;
pub mod store;

pub use config::{QuotaCategory, RateLimitConfig, TierConfig, TiersConfig};
pub use error::{RateLimitError, RateLimitResult, StoreError, StoreResult};
pub use limiter::{Admission, RateLimiter};
pub use middleware::{admission_middleware, client_key, with_admission, AdmissionState};
pub use store::{MemoryQuotaStore, QuotaKey, QuotaOutcome, QuotaStore, RedisQuotaStore};
