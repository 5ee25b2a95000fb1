//! Application wiring.
//!
//! Constructs the hub, broadcaster, heartbeat monitor and rate limiter once
//! at startup and passes them to the handlers that need them. Shutdown fans
//! out through one `CancellationToken`.

use crate::config::{AppConfig, ServerConfig};
use crate::error::AppResult;
use crate::routes::{api_router, ops_router};
use axum::http::{HeaderValue, Method};
use axum::Router;
use beacon_hub::{
    ws_router, Broadcaster, ChannelHub, DomainEvent, HeartbeatMonitor, OpaqueIdentity, WsState,
};
use beacon_ratelimit::{
    MemoryQuotaStore, QuotaStore, RateLimitConfig, RateLimiter, RedisQuotaStore,
};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

/// Upper bound on the initial quota store connection.
const STORE_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Main application.
pub struct Application {
    config: AppConfig,
    hub: Arc<ChannelHub>,
    limiter: Arc<RateLimiter>,
    events_tx: mpsc::Sender<DomainEvent>,
    events_rx: mpsc::Receiver<DomainEvent>,
    shutdown: CancellationToken,
}

impl Application {
    pub async fn new(config: AppConfig) -> AppResult<Self> {
        config.validate()?;

        let hub = Arc::new(ChannelHub::from_config(&config.hub)?);
        let store = quota_store(&config.rate_limit).await;
        let limiter = Arc::new(RateLimiter::new(store, &config.rate_limit));
        let (events_tx, events_rx) = mpsc::channel(config.server.event_queue_capacity);

        Ok(Self {
            config,
            hub,
            limiter,
            events_tx,
            events_rx,
            shutdown: CancellationToken::new(),
        })
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn hub(&self) -> &Arc<ChannelHub> {
        &self.hub
    }

    pub fn limiter(&self) -> &Arc<RateLimiter> {
        &self.limiter
    }

    /// Producer side of the domain-event queue.
    pub fn domain_events(&self) -> mpsc::Sender<DomainEvent> {
        self.events_tx.clone()
    }

    /// Cancelling this token stops the server and its background tasks.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Full HTTP surface: `/ws`, `/health`, `/metrics` and `/api/*`.
    pub fn router(&self) -> Router {
        let ws_state = WsState::new(
            Arc::clone(&self.hub),
            Arc::new(OpaqueIdentity),
            self.config.hub.max_connections,
        );

        Router::new()
            .merge(ws_router(ws_state))
            .merge(ops_router(Arc::clone(&self.hub)))
            .merge(api_router(Arc::clone(&self.limiter)))
            .layer(TraceLayer::new_for_http())
            .layer(cors_layer(&self.config.server))
    }

    /// Bind the configured address and serve until ctrl-c or shutdown.
    pub async fn run(self) -> AppResult<()> {
        let addr = self.config.server.socket_addr()?;
        let listener = TcpListener::bind(addr).await?;

        let shutdown = self.shutdown.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = shutdown.cancelled() => {}
                result = tokio::signal::ctrl_c() => {
                    match result {
                        Ok(()) => info!("Shutdown signal received"),
                        Err(e) => warn!(error = %e, "Failed to listen for ctrl-c"),
                    }
                    shutdown.cancel();
                }
            }
        });

        self.serve(listener).await
    }

    /// Serve on an already bound listener until the shutdown token fires.
    pub async fn serve(self, listener: TcpListener) -> AppResult<()> {
        let router = self.router();
        // The retained sender keeps the queue open until shutdown even
        // when no producer has been handed out.
        let Self {
            hub,
            events_tx: _producer,
            events_rx,
            shutdown,
            config,
            ..
        } = self;

        let broadcaster = Broadcaster::new(Arc::clone(&hub));
        let broadcaster_task = tokio::spawn(broadcaster.run(events_rx, shutdown.clone()));
        let heartbeat = HeartbeatMonitor::new(Arc::clone(&hub), &config.heartbeat);
        let heartbeat_task = tokio::spawn(heartbeat.run(shutdown.clone()));

        let addr = listener.local_addr()?;
        info!(%addr, "Beacon server listening");

        axum::serve(
            listener,
            router.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(shutdown.clone().cancelled_owned())
        .await?;

        info!("Server shutdown initiated, cleaning up");
        shutdown.cancel();
        let closed = hub.close_all();
        if let Err(e) = broadcaster_task.await {
            warn!(error = %e, "Broadcaster task failed");
        }
        if let Err(e) = heartbeat_task.await {
            warn!(error = %e, "Heartbeat task failed");
        }
        info!(closed, "Beacon server stopped");
        Ok(())
    }
}

/// Redis when a URL is configured and reachable, otherwise the in-process store.
async fn quota_store(config: &RateLimitConfig) -> Arc<dyn QuotaStore> {
    let Some(url) = config.store_url.as_deref() else {
        info!("No quota store configured, using in-process store");
        return Arc::new(MemoryQuotaStore::new());
    };

    match tokio::time::timeout(STORE_CONNECT_TIMEOUT, RedisQuotaStore::connect(url)).await {
        Ok(Ok(store)) => Arc::new(store),
        Ok(Err(e)) => {
            warn!(error = %e, "Quota store unreachable, falling back to in-process store");
            Arc::new(MemoryQuotaStore::new())
        }
        Err(_) => {
            warn!(
                timeout_secs = STORE_CONNECT_TIMEOUT.as_secs(),
                "Quota store connect timed out, falling back to in-process store"
            );
            Arc::new(MemoryQuotaStore::new())
        }
    }
}

fn cors_layer(config: &ServerConfig) -> CorsLayer {
    let origins: Vec<HeaderValue> = config
        .cors_origins
        .iter()
        .filter_map(|origin| origin.trim().parse().ok())
        .collect();
    let allow_origin = if origins.is_empty() {
        AllowOrigin::any()
    } else {
        AllowOrigin::list(origins)
    };

    CorsLayer::new()
        .allow_origin(allow_origin)
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE])
}
