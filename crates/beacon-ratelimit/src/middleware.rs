//! axum admission middleware.
//!
//! Buckets are keyed by the peer address; forwarding headers count only
//! when the peer is a trusted proxy. Rejections are answered with 429, a
//! `Retry-After` header and a JSON body. Every response carries
//! `X-RateLimit-Limit`, `X-RateLimit-Remaining` and `X-RateLimit-Reset`.

use crate::config::QuotaCategory;
use crate::limiter::{Admission, RateLimiter};
use axum::extract::{ConnectInfo, Request, State};
use axum::http::header::RETRY_AFTER;
use axum::http::{HeaderMap, HeaderName, HeaderValue, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use axum::{Json, Router};
use serde_json::json;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use tracing::warn;

pub const X_RATELIMIT_LIMIT: HeaderName = HeaderName::from_static("x-ratelimit-limit");
pub const X_RATELIMIT_REMAINING: HeaderName = HeaderName::from_static("x-ratelimit-remaining");
pub const X_RATELIMIT_RESET: HeaderName = HeaderName::from_static("x-ratelimit-reset");

/// Middleware state: one limiter, one category.
#[derive(Clone)]
pub struct AdmissionState {
    limiter: Arc<RateLimiter>,
    category: QuotaCategory,
}

impl AdmissionState {
    pub fn new(limiter: Arc<RateLimiter>, category: QuotaCategory) -> Self {
        Self { limiter, category }
    }
}

/// Wrap every route of `router` with the admission gate for `category`.
pub fn with_admission<S>(
    router: Router<S>,
    limiter: Arc<RateLimiter>,
    category: QuotaCategory,
) -> Router<S>
where
    S: Clone + Send + Sync + 'static,
{
    router.layer(axum::middleware::from_fn_with_state(
        AdmissionState::new(limiter, category),
        admission_middleware,
    ))
}

pub async fn admission_middleware(
    State(state): State<AdmissionState>,
    request: Request,
    next: Next,
) -> Response {
    let client = client_key(&request, &state.limiter);
    let admission = state.limiter.admit(state.category, &client).await;

    match admission {
        Admission::Allowed { .. } => {
            let mut response = next.run(request).await;
            insert_quota_headers(response.headers_mut(), &admission);
            response
        }
        Admission::Rejected {
            retry_after_secs, ..
        } => {
            warn!(
                category = %state.category,
                client = %client,
                retry_after_secs,
                "Rate limit exceeded"
            );
            let mut response = (
                StatusCode::TOO_MANY_REQUESTS,
                Json(json!({
                    "error": "Too Many Requests",
                    "message": format!(
                        "Rate limit exceeded for {}. Please try again later.",
                        state.category
                    ),
                    "retryAfter": retry_after_secs,
                })),
            )
                .into_response();

            let headers = response.headers_mut();
            headers.insert(RETRY_AFTER, HeaderValue::from(retry_after_secs));
            insert_quota_headers(headers, &admission);
            response
        }
    }
}

fn insert_quota_headers(headers: &mut HeaderMap, admission: &Admission) {
    headers.insert(X_RATELIMIT_LIMIT, HeaderValue::from(admission.limit()));
    headers.insert(X_RATELIMIT_REMAINING, HeaderValue::from(admission.remaining()));
    headers.insert(X_RATELIMIT_RESET, HeaderValue::from(admission.reset_after_secs()));
}

/// Client key for quota buckets.
///
/// The peer address from `ConnectInfo` by default. When the peer is a
/// trusted proxy (loopback or `trusted_proxies`), the first
/// `X-Forwarded-For` entry, then `X-Real-IP`, names the client instead.
/// Forwarded loopback values are ignored. No peer and no trusted header
/// keys as `"unknown"`.
pub fn client_key(request: &Request, limiter: &RateLimiter) -> String {
    let peer = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip());

    let headers = request.headers();
    let forwarded = forwarded_ip(headers, "x-forwarded-for", |v| v.split(',').next());
    let real_ip = forwarded_ip(headers, "x-real-ip", Some);

    match peer {
        Some(peer) if limiter.trusts_proxy(peer) => {
            match forwarded.or(real_ip) {
                Some(Ok(ip)) if !ip.is_loopback() => ip.to_string(),
                Some(Ok(ip)) => {
                    warn!(peer = %peer, forwarded = %ip, "Ignoring loopback forwarded address");
                    peer.to_string()
                }
                Some(Err(raw)) => {
                    warn!(peer = %peer, forwarded = %raw, "Ignoring unparseable forwarded address");
                    peer.to_string()
                }
                None => peer.to_string(),
            }
        }
        Some(peer) => {
            if forwarded.is_some() || real_ip.is_some() {
                warn!(peer = %peer, "Ignoring forwarding headers from untrusted peer");
            }
            peer.to_string()
        }
        None => "unknown".to_string(),
    }
}

/// First value of header `name`, parsed as an IP. `Err` carries the raw text.
fn forwarded_ip<'a>(
    headers: &'a HeaderMap,
    name: &str,
    pick: impl FnOnce(&'a str) -> Option<&'a str>,
) -> Option<Result<IpAddr, &'a str>> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .and_then(pick)
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(|v| v.parse::<IpAddr>().map_err(|_| v))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{RateLimitConfig, TierConfig};
    use crate::store::MemoryQuotaStore;
    use axum::body::{to_bytes, Body};
    use axum::routing::{get, post};
    use serde_json::Value;
    use tower::ServiceExt;

    fn limiter(config: RateLimitConfig) -> Arc<RateLimiter> {
        Arc::new(RateLimiter::new(Arc::new(MemoryQuotaStore::new()), &config))
    }

    fn app(capacity: u32) -> Router {
        let mut config = RateLimitConfig::default();
        config.tiers.trading = TierConfig::new(capacity, 60, 60);
        with_admission(
            Router::new().route("/orders", get(|| async { "ok" })),
            limiter(config),
            QuotaCategory::Trading,
        )
    }

    fn login_app() -> Router {
        with_admission(
            Router::new().route("/login", post(|| async { "ok" })),
            limiter(RateLimitConfig::default()),
            QuotaCategory::Auth,
        )
    }

    fn request(method: &str, uri: &str, peer: [u8; 4], forwarded: Option<&str>) -> Request {
        let mut builder = axum::http::Request::builder().method(method).uri(uri);
        if let Some(forwarded) = forwarded {
            builder = builder.header("x-forwarded-for", forwarded);
        }
        let mut request = builder.body(Body::empty()).unwrap();
        request
            .extensions_mut()
            .insert(ConnectInfo(SocketAddr::from((peer, 40000))));
        request
    }

    fn orders(peer: [u8; 4]) -> Request {
        request("GET", "/orders", peer, None)
    }

    #[tokio::test(start_paused = true)]
    async fn test_allowed_response_carries_quota_headers() {
        let app = app(2);
        let response = app.oneshot(orders([1, 1, 1, 1])).await.unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let headers = response.headers();
        assert_eq!(headers[&X_RATELIMIT_LIMIT], "2");
        assert_eq!(headers[&X_RATELIMIT_REMAINING], "1");
        assert_eq!(headers[&X_RATELIMIT_RESET], "60");
    }

    #[tokio::test(start_paused = true)]
    async fn test_rejection_is_429_with_body() {
        let app = app(1);
        let first = app.clone().oneshot(orders([1, 1, 1, 1])).await.unwrap();
        assert_eq!(first.status(), StatusCode::OK);

        let response = app.clone().oneshot(orders([1, 1, 1, 1])).await.unwrap();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(response.headers()[RETRY_AFTER], "60");
        assert_eq!(response.headers()[&X_RATELIMIT_REMAINING], "0");

        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body: Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(body["error"], "Too Many Requests");
        assert_eq!(body["retryAfter"], 60);
        assert!(body["message"].as_str().unwrap().contains("trading"));

        // A different client is unaffected.
        let other = app.oneshot(orders([2, 2, 2, 2])).await.unwrap();
        assert_eq!(other.status(), StatusCode::OK);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rotating_forwarded_for_does_not_escape_auth_tier() {
        let app = login_app();
        let peer = [198, 51, 100, 7];

        for attempt in 0..50u8 {
            let forwarded = format!("203.0.113.{attempt}");
            let response = app
                .clone()
                .oneshot(request("POST", "/login", peer, Some(forwarded.as_str())))
                .await
                .unwrap();

            if attempt < 5 {
                assert_eq!(response.status(), StatusCode::OK, "attempt {attempt}");
            } else {
                assert_eq!(
                    response.status(),
                    StatusCode::TOO_MANY_REQUESTS,
                    "attempt {attempt}"
                );
            }
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_loopback_proxy_forwards_distinct_clients() {
        let app = login_app();
        let proxy = [127, 0, 0, 1];

        for _ in 0..5 {
            let response = app
                .clone()
                .oneshot(request("POST", "/login", proxy, Some("203.0.113.1")))
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::OK);
        }
        let blocked = app
            .clone()
            .oneshot(request("POST", "/login", proxy, Some("203.0.113.1")))
            .await
            .unwrap();
        assert_eq!(blocked.status(), StatusCode::TOO_MANY_REQUESTS);

        let other = app
            .oneshot(request("POST", "/login", proxy, Some("203.0.113.2")))
            .await
            .unwrap();
        assert_eq!(other.status(), StatusCode::OK);
    }

    #[test]
    fn test_client_key_precedence() {
        let limiter = limiter(RateLimitConfig {
            trusted_proxies: vec!["10.0.0.2".parse().unwrap()],
            ..RateLimitConfig::default()
        });
        fn build(peer: Option<[u8; 4]>, headers: &[(&str, &str)]) -> Request {
            let mut builder = axum::http::Request::builder();
            for (name, value) in headers {
                builder = builder.header(*name, *value);
            }
            let mut req = builder.body(Body::empty()).unwrap();
            if let Some(peer) = peer {
                req.extensions_mut()
                    .insert(ConnectInfo(SocketAddr::from((peer, 4000))));
            }
            req
        }
        let both = [
            ("x-forwarded-for", " 203.0.113.7 , 10.0.0.1"),
            ("x-real-ip", "198.51.100.2"),
        ];

        // Trusted proxy: forwarded-for first, then real-ip.
        assert_eq!(client_key(&build(Some([10, 0, 0, 2]), &both), &limiter), "203.0.113.7");
        assert_eq!(
            client_key(
                &build(Some([10, 0, 0, 2]), &[("x-real-ip", "198.51.100.2")]),
                &limiter
            ),
            "198.51.100.2"
        );
        assert_eq!(
            client_key(&build(Some([127, 0, 0, 1]), &both), &limiter),
            "203.0.113.7"
        );

        // Untrusted peer: headers are ignored.
        assert_eq!(client_key(&build(Some([192, 0, 2, 1]), &both), &limiter), "192.0.2.1");

        // A forwarded loopback or garbage value falls back to the proxy.
        assert_eq!(
            client_key(
                &build(Some([10, 0, 0, 2]), &[("x-forwarded-for", "127.0.0.1")]),
                &limiter
            ),
            "10.0.0.2"
        );
        assert_eq!(
            client_key(
                &build(Some([10, 0, 0, 2]), &[("x-forwarded-for", "not-an-ip")]),
                &limiter
            ),
            "10.0.0.2"
        );

        // No peer: headers are never trusted.
        assert_eq!(client_key(&build(None, &both), &limiter), "unknown");
        assert_eq!(client_key(&build(None, &[]), &limiter), "unknown");
    }
}
