//! WebSocket transport: bridges axum sockets to the hub.
//!
//! One reader loop and one writer task per connection. The writer is the
//! only consumer of the connection's outbound queue, so a slow socket
//! never stalls a broadcast. Once the connection is closed in the hub the
//! reader stops, and a writer stuck on a dead peer is aborted after
//! `CLOSE_GRACE`.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::body::Bytes;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use beacon_core::{ChannelName, ConnectionId, Event, EventPayload};
use beacon_telemetry::Metrics;
use futures_util::stream::{SplitSink, StreamExt};
use futures_util::SinkExt;
use tracing::{debug, info, warn};

use crate::auth::IdentityVerifier;
use crate::dispatch::MessageDispatcher;
use crate::error::HubError;
use crate::hub::ChannelHub;
use crate::queue::{Frame, OutboundReceiver};

/// How long the writer may spend flushing and closing after the reader stops.
const CLOSE_GRACE: Duration = Duration::from_secs(3);

/// Caps concurrent WebSocket connections.
pub struct ConnectionLimiter {
    current: AtomicUsize,
    max: usize,
}

impl ConnectionLimiter {
    pub fn new(max: usize) -> Self {
        Self {
            current: AtomicUsize::new(0),
            max,
        }
    }

    /// Take a slot. The permit releases it on drop.
    pub fn try_acquire(self: &Arc<Self>) -> Option<ConnectionPermit> {
        loop {
            let current = self.current.load(Ordering::Acquire);
            if current >= self.max {
                return None;
            }
            if self
                .current
                .compare_exchange(current, current + 1, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                return Some(ConnectionPermit {
                    limiter: Arc::clone(self),
                });
            }
        }
    }

    pub fn current_count(&self) -> usize {
        self.current.load(Ordering::Relaxed)
    }

    pub fn max(&self) -> usize {
        self.max
    }
}

/// Owned slot, held for the lifetime of the socket task.
pub struct ConnectionPermit {
    limiter: Arc<ConnectionLimiter>,
}

impl Drop for ConnectionPermit {
    fn drop(&mut self) {
        self.limiter.current.fetch_sub(1, Ordering::Release);
    }
}

/// Shared state for the `/ws` handler.
#[derive(Clone)]
pub struct WsState {
    dispatcher: MessageDispatcher,
    limiter: Arc<ConnectionLimiter>,
}

impl WsState {
    pub fn new(
        hub: Arc<ChannelHub>,
        verifier: Arc<dyn IdentityVerifier>,
        max_connections: usize,
    ) -> Self {
        Self {
            dispatcher: MessageDispatcher::new(hub, verifier),
            limiter: Arc::new(ConnectionLimiter::new(max_connections)),
        }
    }

    pub fn hub(&self) -> &Arc<ChannelHub> {
        self.dispatcher.hub()
    }

    pub fn limiter(&self) -> &Arc<ConnectionLimiter> {
        &self.limiter
    }
}

/// Router serving `GET /ws`.
pub fn ws_router(state: WsState) -> Router {
    Router::new()
        .route("/ws", get(ws_handler))
        .with_state(state)
}

async fn ws_handler(State(state): State<WsState>, ws: WebSocketUpgrade) -> Response {
    let Some(permit) = state.limiter.try_acquire() else {
        warn!(
            current = state.limiter.current_count(),
            max = state.limiter.max(),
            "WebSocket connection limit reached"
        );
        return (StatusCode::SERVICE_UNAVAILABLE, "Too many connections").into_response();
    };

    ws.on_upgrade(move |socket| handle_socket(socket, state, permit))
}

async fn handle_socket(socket: WebSocket, state: WsState, _permit: ConnectionPermit) {
    let hub = state.hub().clone();
    let registry = hub.registry();
    let (id, outbound) = registry.open();
    if registry.activate(id).is_err() {
        return;
    }
    // Every live connection hears global announcements.
    if let Err(e) = hub.subscribe(id, &ChannelName::broadcast()) {
        debug!(connection_id = %id, error = %e, "Connection closed before joining broadcast");
        return;
    }
    info!(
        connection_id = %id,
        connections = state.limiter.current_count(),
        "WebSocket connection accepted"
    );

    let (sink, mut stream) = socket.split();
    let closed = outbound.closed_token();
    let mut writer = tokio::spawn(write_loop(sink, outbound, hub.clone(), id));
    let mut writer_done = false;

    loop {
        tokio::select! {
            _ = closed.cancelled() => {
                debug!(connection_id = %id, "Connection closed by hub");
                break;
            }
            frame = stream.next() => {
                match frame {
                    Some(Ok(Message::Text(text))) => {
                        let _ = registry.touch(id);
                        match state.dispatcher.handle_text(id, text.as_str()) {
                            Ok(()) => {}
                            Err(HubError::ConnectionNotFound(_)) => break,
                            Err(e) => debug!(connection_id = %id, error = %e, "Client message failed"),
                        }
                    }
                    Some(Ok(Message::Binary(_))) => {
                        let _ = registry.touch(id);
                        let reply = Event::direct(EventPayload::Error {
                            message: "binary frames are not supported".to_string(),
                        });
                        if hub.send_to(id, reply).is_err() {
                            break;
                        }
                    }
                    Some(Ok(Message::Ping(_))) | Some(Ok(Message::Pong(_))) => {
                        let _ = registry.touch(id);
                    }
                    Some(Ok(Message::Close(frame))) => {
                        debug!(connection_id = %id, ?frame, "Client sent close frame");
                        break;
                    }
                    Some(Err(e)) => {
                        debug!(connection_id = %id, error = %e, "WebSocket receive error");
                        break;
                    }
                    None => break,
                }
            }
            _ = &mut writer => {
                writer_done = true;
                debug!(connection_id = %id, "Writer finished, closing connection");
                break;
            }
        }
    }

    // Already closed by the writer or the heartbeat monitor is fine.
    let _ = hub.close(id);
    if !writer_done && tokio::time::timeout(CLOSE_GRACE, &mut writer).await.is_err() {
        warn!(connection_id = %id, "Writer did not finish, dropping socket");
        writer.abort();
    }
}

async fn write_loop(
    mut sink: SplitSink<WebSocket, Message>,
    outbound: OutboundReceiver,
    hub: Arc<ChannelHub>,
    id: ConnectionId,
) {
    while let Some(frame) = outbound.recv().await {
        let message = match frame {
            Frame::Event(event) => match event.to_json() {
                Ok(json) => Message::Text(json.into()),
                Err(e) => {
                    warn!(connection_id = %id, error = %e, "Failed to serialize event");
                    continue;
                }
            },
            Frame::Ping => Message::Ping(Bytes::new()),
        };

        if let Err(e) = sink.send(message).await {
            debug!(connection_id = %id, error = %e, "Socket write failed");
            Metrics::delivery_failure();
            let _ = hub.close(id);
            return;
        }
    }

    let _ = sink.send(Message::Close(None)).await;
}
