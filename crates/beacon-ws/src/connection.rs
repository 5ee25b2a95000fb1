//! Reconnecting connection manager.
//!
//! Owns the socket for one run: connect, replay the subscription intent,
//! then pump inbound events, outbound changes and the heartbeat until the
//! connection ends. Abnormal ends are retried with capped exponential
//! backoff; a normal close (1000) or an explicit disconnect ends the run.

use crate::config::ConnectionConfig;
use crate::error::{WsError, WsResult};
use crate::handle::{ClientHandle, Shared};
use crate::heartbeat::ClientHeartbeat;
use crate::state::ClientState;
use beacon_core::{ClientMessage, Event, EventPayload};
use beacon_telemetry::Metrics;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use std::sync::Arc;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, Mutex as TokioMutex};
use tokio::time::{Instant, MissedTickBehavior};
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async_tls_with_config, MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsSink = SplitSink<WsStream, Message>;
type WsSource = SplitStream<WsStream>;

const NORMAL_CLOSE: u16 = 1000;

/// How a connection ended without error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SessionEnd {
    /// `disconnect()` was called.
    Cancelled,
    /// The server closed with 1000.
    ClosedNormally,
}

/// Client connection manager.
pub struct ReconnectManager {
    config: ConnectionConfig,
    shared: Arc<Shared>,
    outbound_rx: TokioMutex<mpsc::UnboundedReceiver<ClientMessage>>,
    event_tx: mpsc::Sender<Event>,
}

impl ReconnectManager {
    /// Build a manager, its handle, and the receiver for server events.
    pub fn new(config: ConnectionConfig) -> WsResult<(Self, ClientHandle, mpsc::Receiver<Event>)> {
        config.validate()?;
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = mpsc::channel(config.event_buffer);
        let shared = Arc::new(Shared::new(outbound_tx));
        let handle = ClientHandle::new(Arc::clone(&shared));

        let manager = Self {
            config,
            shared,
            outbound_rx: TokioMutex::new(outbound_rx),
            event_tx,
        };
        Ok((manager, handle, event_rx))
    }

    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    pub fn handle(&self) -> ClientHandle {
        ClientHandle::new(Arc::clone(&self.shared))
    }

    pub fn state(&self) -> ClientState {
        self.shared.state()
    }

    /// Run until disconnect, normal close, or the attempt cap is reached.
    ///
    /// Returns `Ok(())` in the first two cases (state `Idle`) and
    /// `WsError::ReconnectExhausted` in the last (state `GaveUp`).
    pub async fn run(&self) -> WsResult<()> {
        let Ok(mut outbound) = self.outbound_rx.try_lock() else {
            return Err(WsError::AlreadyRunning);
        };
        let session = self.shared.new_session();
        let mut heartbeat = ClientHeartbeat::new(
            self.config.heartbeat_interval_ms,
            self.config.heartbeat_timeout_ms,
        );
        let mut attempt: u32 = 0;

        loop {
            if session.is_cancelled() {
                self.transition(ClientState::Idle);
                return Ok(());
            }

            self.transition(ClientState::Connecting);
            let reason = match self
                .connect_once(&mut outbound, &mut heartbeat, &session, &mut attempt)
                .await
            {
                Ok(SessionEnd::Cancelled) => {
                    info!("Client stopped by disconnect");
                    self.transition(ClientState::Idle);
                    return Ok(());
                }
                Ok(SessionEnd::ClosedNormally) => {
                    info!("Server closed the connection normally");
                    self.transition(ClientState::Idle);
                    return Ok(());
                }
                Err(e) => {
                    warn!(error = %e, attempt, "Connection lost");
                    reconnect_reason(&e)
                }
            };

            if attempt >= self.config.max_reconnect_attempts {
                error!(attempt, "Max reconnection attempts reached");
                self.transition(ClientState::GaveUp);
                return Err(WsError::ReconnectExhausted { attempts: attempt });
            }

            self.transition(ClientState::Reconnecting);
            let delay = self.config.backoff_with_jitter(attempt);
            attempt += 1;
            Metrics::ws_client_reconnect(reason);
            warn!(attempt, delay_ms = delay.as_millis() as u64, "Reconnecting");

            tokio::select! {
                biased;
                () = session.cancelled() => {
                    info!("Disconnect requested during backoff");
                    self.transition(ClientState::Idle);
                    return Ok(());
                }
                () = tokio::time::sleep(delay) => {}
            }
        }
    }

    fn transition(&self, state: ClientState) {
        let _intent = self.shared.intent.lock();
        self.shared.set_state(state);
    }

    async fn connect_once(
        &self,
        outbound: &mut mpsc::UnboundedReceiver<ClientMessage>,
        heartbeat: &mut ClientHeartbeat,
        session: &CancellationToken,
        attempt: &mut u32,
    ) -> WsResult<SessionEnd> {
        info!(url = %self.config.url, "Connecting to WebSocket");

        let connect = connect_async_tls_with_config(&self.config.url, None, true, None);
        let (ws_stream, _response) = tokio::select! {
            biased;
            () = session.cancelled() => return Ok(SessionEnd::Cancelled),
            result = connect => result?,
        };
        let (mut write, mut read) = ws_stream.split();

        // Anything queued for the previous connection is covered by the replay.
        while outbound.try_recv().is_ok() {}

        self.replay(&mut write).await?;
        *attempt = 0;
        heartbeat.reset();
        info!("WebSocket open");

        self.message_loop(&mut write, &mut read, outbound, heartbeat, session)
            .await
    }

    /// Authenticate and resubscribe, then diff until the intent stops
    /// changing. `Open` is set under the intent lock once nothing is pending.
    async fn replay(&self, write: &mut WsSink) -> WsResult<()> {
        let (messages, mut sent) = {
            let intent = self.shared.intent.lock();
            (intent.replay(), intent.snapshot())
        };
        info!(
            subscriptions = sent.subscriptions.len(),
            authenticate = sent.identity.is_some(),
            "Replaying subscription intent"
        );
        send_all(write, &messages).await?;

        loop {
            let diff = {
                let intent = self.shared.intent.lock();
                if intent.version() == sent.version {
                    self.shared.set_state(ClientState::Open);
                    return Ok(());
                }
                let diff = intent.diff(&sent);
                sent = intent.snapshot();
                diff
            };
            debug!(messages = diff.len(), "Sending changes made during replay");
            send_all(write, &diff).await?;
        }
    }

    async fn message_loop(
        &self,
        write: &mut WsSink,
        read: &mut WsSource,
        outbound: &mut mpsc::UnboundedReceiver<ClientMessage>,
        heartbeat: &mut ClientHeartbeat,
        session: &CancellationToken,
    ) -> WsResult<SessionEnd> {
        let period = heartbeat.check_period();
        let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;

                () = session.cancelled() => {
                    let frame = CloseFrame {
                        code: CloseCode::Normal,
                        reason: "client disconnect".into(),
                    };
                    if let Err(e) = write.send(Message::Close(Some(frame))).await {
                        warn!(error = %e, "Failed to send Close frame");
                    }
                    return Ok(SessionEnd::Cancelled);
                }

                msg = read.next() => {
                    match msg {
                        Some(Ok(Message::Text(text))) => {
                            self.handle_text(&text, heartbeat).await;
                        }
                        Some(Ok(Message::Ping(data))) => {
                            heartbeat.record_message();
                            write.send(Message::Pong(data)).await?;
                        }
                        Some(Ok(Message::Pong(_))) => {
                            heartbeat.record_message();
                        }
                        Some(Ok(Message::Close(frame))) => {
                            let (code, reason) = frame
                                .map(|f| (u16::from(f.code), f.reason.to_string()))
                                .unwrap_or((1005, "no status".to_string()));
                            if code == NORMAL_CLOSE {
                                return Ok(SessionEnd::ClosedNormally);
                            }
                            warn!(code, %reason, "WebSocket closed by server");
                            return Err(WsError::ConnectionClosed { code, reason });
                        }
                        Some(Ok(_)) => {}
                        Some(Err(e)) => {
                            error!(error = %e, "WebSocket read error");
                            return Err(e.into());
                        }
                        None => {
                            return Err(WsError::ConnectionClosed {
                                code: 1006,
                                reason: "stream ended".to_string(),
                            });
                        }
                    }
                }

                Some(message) = outbound.recv() => {
                    debug!(kind = message.message_type(), "Sending client message");
                    write.send(Message::Text(message.to_json()?)).await?;
                }

                _ = ticker.tick() => {
                    if heartbeat.is_timed_out() {
                        error!("Heartbeat timeout");
                        return Err(WsError::HeartbeatTimeout);
                    }
                    if heartbeat.should_send_ping() {
                        write.send(Message::Text(ClientMessage::Ping.to_json()?)).await?;
                        heartbeat.record_ping();
                        debug!("Sent heartbeat ping");
                    }
                }
            }
        }
    }

    async fn handle_text(&self, text: &str, heartbeat: &mut ClientHeartbeat) {
        heartbeat.record_message();

        let event = match Event::parse(text) {
            Ok(event) => event,
            Err(e) => {
                warn!(error = %e, "Ignoring unparseable server frame");
                return;
            }
        };

        match &event.payload {
            EventPayload::Pong => {
                heartbeat.record_pong();
                return;
            }
            EventPayload::Authenticated { success: false } => {
                warn!("Server rejected authentication");
            }
            EventPayload::Error { message } => {
                warn!(%message, "Server reported an error");
            }
            _ => {}
        }

        if self.event_tx.send(event).await.is_err() {
            debug!("Event receiver dropped");
        }
    }
}

async fn send_all(write: &mut WsSink, messages: &[ClientMessage]) -> WsResult<()> {
    for message in messages {
        write.send(Message::Text(message.to_json()?)).await?;
    }
    Ok(())
}

fn reconnect_reason(error: &WsError) -> &'static str {
    match error {
        WsError::HeartbeatTimeout => "heartbeat_timeout",
        WsError::ConnectionClosed { .. } => "closed",
        WsError::Tungstenite(_) => "transport",
        _ => "error",
    }
}
