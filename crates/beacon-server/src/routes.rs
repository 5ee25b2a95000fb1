//! HTTP routes outside the WebSocket endpoint.

use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{any, get};
use axum::{Json, Router};
use beacon_hub::ChannelHub;
use beacon_ratelimit::{with_admission, QuotaCategory, RateLimiter};
use serde_json::json;
use std::sync::Arc;
use tracing::error;

/// `GET /health` and `GET /metrics`.
pub fn ops_router(hub: Arc<ChannelHub>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/metrics", get(metrics))
        .with_state(hub)
}

async fn health(State(hub): State<Arc<ChannelHub>>) -> Json<serde_json::Value> {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "connections": hub.connection_count(),
        "channels": hub.channel_count(),
    }))
}

async fn metrics() -> Response {
    match beacon_telemetry::render_metrics() {
        Ok(body) => (
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            body,
        )
            .into_response(),
        Err(e) => {
            error!(error = %e, "Failed to render metrics");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

/// `/api/<category>` scopes, each behind its own admission tier.
///
/// Business handlers are mounted elsewhere; each scope answers with a
/// placeholder once admitted.
pub fn api_router(limiter: Arc<RateLimiter>) -> Router {
    QuotaCategory::ALL
        .into_iter()
        .fold(Router::new(), |router, category| {
            router.merge(api_scope(category, Arc::clone(&limiter)))
        })
}

fn api_scope(category: QuotaCategory, limiter: Arc<RateLimiter>) -> Router {
    let handler = move || async move { placeholder(category) };
    let scope = Router::new()
        .route(&format!("/api/{category}"), any(handler))
        .route(&format!("/api/{category}/{{*rest}}"), any(handler));
    with_admission(scope, limiter, category)
}

fn placeholder(category: QuotaCategory) -> Response {
    (
        StatusCode::NOT_IMPLEMENTED,
        Json(json!({
            "scope": category.as_str(),
            "message": "No handler mounted for this scope",
        })),
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::{to_bytes, Body};
    use axum::extract::ConnectInfo;
    use axum::http::Request;
    use std::net::SocketAddr;
    use beacon_hub::ConnectionRegistry;
    use beacon_ratelimit::{MemoryQuotaStore, RateLimitConfig};
    use beacon_core::ChannelName;
    use serde_json::Value;
    use tower::ServiceExt;

    fn hub() -> Arc<ChannelHub> {
        Arc::new(ChannelHub::new(
            ConnectionRegistry::new(8),
            [ChannelName::broadcast()],
        ))
    }

    #[tokio::test]
    async fn test_health_reports_counts() {
        let response = ops_router(hub())
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body: Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(body["status"], "ok");
        assert_eq!(body["connections"], 0);
        assert_eq!(body["channels"], 1);
    }

    #[tokio::test]
    async fn test_metrics_is_prometheus_text() {
        beacon_telemetry::Metrics::heartbeat_reaped();
        let response = ops_router(hub())
            .oneshot(Request::builder().uri("/metrics").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert!(response.headers()[header::CONTENT_TYPE]
            .to_str()
            .unwrap()
            .starts_with("text/plain"));

        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body = String::from_utf8(body.to_vec()).unwrap();
        assert!(body.contains("beacon_hub_heartbeat_reaped_total"));
    }

    #[tokio::test]
    async fn test_api_scopes_are_gated_per_category() {
        let limiter = Arc::new(RateLimiter::new(
            Arc::new(MemoryQuotaStore::new()),
            &RateLimitConfig::default(),
        ));
        let app = api_router(limiter);

        let login = |path: &str| {
            let mut request = Request::builder()
                .method("POST")
                .uri(path)
                .body(Body::empty())
                .unwrap();
            request
                .extensions_mut()
                .insert(ConnectInfo(SocketAddr::from(([203, 0, 113, 5], 50000))));
            request
        };

        for _ in 0..5 {
            let response = app.clone().oneshot(login("/api/auth/login")).await.unwrap();
            assert_eq!(response.status(), StatusCode::NOT_IMPLEMENTED);
            assert_eq!(response.headers()["x-ratelimit-limit"], "5");
        }
        let rejected = app.clone().oneshot(login("/api/auth")).await.unwrap();
        assert_eq!(rejected.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(rejected.headers()["retry-after"], "900");

        let general = app.oneshot(login("/api/general/tokens")).await.unwrap();
        assert_eq!(general.status(), StatusCode::NOT_IMPLEMENTED);
        assert_eq!(general.headers()["x-ratelimit-limit"], "100");
    }
}
