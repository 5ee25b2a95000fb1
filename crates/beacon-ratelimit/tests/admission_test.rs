//! Admission behaviour under concurrency and across a full router.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::body::Body;
use axum::extract::ConnectInfo;
use axum::http::{Request, StatusCode};
use axum::routing::post;
use axum::Router;
use beacon_ratelimit::{
    with_admission, MemoryQuotaStore, QuotaCategory, RateLimitConfig, RateLimiter, TierConfig,
};
use tower::ServiceExt;

fn limiter(tier: TierConfig) -> Arc<RateLimiter> {
    let mut config = RateLimitConfig::default();
    config.tiers.bridge = tier;
    Arc::new(RateLimiter::new(Arc::new(MemoryQuotaStore::new()), &config))
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_admits_never_exceed_capacity() {
    let limiter = limiter(TierConfig::new(10, 3600, 3600));

    let handles: Vec<_> = (0..50)
        .map(|_| {
            let limiter = limiter.clone();
            tokio::spawn(async move { limiter.admit(QuotaCategory::Bridge, "shared").await })
        })
        .collect();

    let mut allowed = 0;
    for handle in handles {
        if handle.await.unwrap().is_allowed() {
            allowed += 1;
        }
    }
    assert_eq!(allowed, 10);
}

#[test]
fn test_admit_outside_async_context() {
    let limiter = limiter(TierConfig::new(1, 60, 0));

    assert!(tokio_test::block_on(limiter.admit(QuotaCategory::Bridge, "ip")).is_allowed());
    assert!(!tokio_test::block_on(limiter.admit(QuotaCategory::Bridge, "ip")).is_allowed());
}

#[tokio::test]
async fn test_scopes_use_their_own_tiers() {
    let limiter = limiter(TierConfig::new(1, 3600, 3600));
    let bridge = with_admission(
        Router::new().route("/bridge/quote", post(|| async { "quoted" })),
        limiter.clone(),
        QuotaCategory::Bridge,
    );
    let general = with_admission(
        Router::new().route("/tokens", post(|| async { "tokens" })),
        limiter,
        QuotaCategory::General,
    );
    let app = Router::new().nest("/api", bridge.merge(general));

    let call = |path: &'static str| {
        let mut request = Request::builder()
            .method("POST")
            .uri(path)
            .body(Body::empty())
            .unwrap();
        request
            .extensions_mut()
            .insert(ConnectInfo(SocketAddr::from(([198, 51, 100, 9], 50000))));
        request
    };

    let first = app.clone().oneshot(call("/api/bridge/quote")).await.unwrap();
    assert_eq!(first.status(), StatusCode::OK);

    let second = app.clone().oneshot(call("/api/bridge/quote")).await.unwrap();
    assert_eq!(second.status(), StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(second.headers()["retry-after"], "3600");

    let other = app.oneshot(call("/api/tokens")).await.unwrap();
    assert_eq!(other.status(), StatusCode::OK);
}
