//! End-to-end tests for the `/ws` endpoint using a real socket client.

use std::sync::Arc;
use std::time::Duration;

use beacon_core::{ChainUpdate, ChannelName, Notification, NotificationLevel};
use beacon_hub::{
    ws_router, Broadcaster, ChannelHub, ConnectionLimiter, ConnectionRegistry, OpaqueIdentity,
    WsState,
};
use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

type Client = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

async fn start_server(max_connections: usize) -> (String, Arc<ChannelHub>) {
    let (url, hub, _) = start_server_with_limiter(max_connections).await;
    (url, hub)
}

async fn start_server_with_limiter(
    max_connections: usize,
) -> (String, Arc<ChannelHub>, Arc<ConnectionLimiter>) {
    let hub = Arc::new(ChannelHub::new(
        ConnectionRegistry::new(64),
        [ChannelName::broadcast()],
    ));
    let state = WsState::new(hub.clone(), Arc::new(OpaqueIdentity), max_connections);
    let limiter = state.limiter().clone();
    let app = ws_router(state);

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    (format!("ws://{addr}/ws"), hub, limiter)
}

async fn send_json(client: &mut Client, value: Value) {
    client
        .send(Message::Text(value.to_string()))
        .await
        .unwrap();
}

/// Next text frame as JSON, skipping transport pings.
async fn next_json(client: &mut Client) -> Value {
    loop {
        let frame = tokio::time::timeout(Duration::from_secs(2), client.next())
            .await
            .expect("timed out waiting for frame")
            .expect("stream ended")
            .expect("socket error");
        if let Message::Text(text) = frame {
            return serde_json::from_str(&text).unwrap();
        }
    }
}

/// Poll until `condition` holds or fail after two seconds.
async fn eventually(mut condition: impl FnMut() -> bool) {
    for _ in 0..200 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached");
}

#[tokio::test]
async fn test_subscribe_and_receive_chain_update() {
    let (url, hub) = start_server(16).await;
    let (mut client, _) = connect_async(url.as_str()).await.unwrap();

    send_json(
        &mut client,
        json!({"type": "subscribe:chain", "data": {"chainId": 11155931}, "timestamp": 1}),
    )
    .await;

    let channel = ChannelName::chain(11155931);
    eventually(|| !hub.members(&channel).is_empty()).await;

    let delivered = Broadcaster::new(hub.clone()).publish_chain(ChainUpdate {
        chain_id: 11155931,
        block_number: 7,
        healthy: true,
        latency_ms: None,
        gas_price_gwei: None,
    });
    assert_eq!(delivered, 1);

    let event = next_json(&mut client).await;
    assert_eq!(event["type"], "chain-update");
    assert_eq!(event["channel"], "chain:11155931");
    assert_eq!(event["data"]["blockNumber"], 7);
    assert!(event["timestamp"].as_i64().unwrap() > 0);
}

#[tokio::test]
async fn test_ping_authenticate_and_errors() {
    let (url, hub) = start_server(16).await;
    let (mut client, _) = connect_async(url.as_str()).await.unwrap();

    send_json(&mut client, json!({"type": "ping", "timestamp": 1})).await;
    assert_eq!(next_json(&mut client).await["type"], "pong");

    send_json(
        &mut client,
        json!({"type": "authenticate", "data": {"identity": "alice"}}),
    )
    .await;
    let reply = next_json(&mut client).await;
    assert_eq!(reply["type"], "authenticated");
    assert_eq!(reply["data"]["success"], true);
    assert_eq!(hub.members(&ChannelName::user("alice")).len(), 1);

    client
        .send(Message::Text("definitely not json".to_string()))
        .await
        .unwrap();
    assert_eq!(next_json(&mut client).await["type"], "error");

    // Still usable after a malformed frame.
    send_json(&mut client, json!({"type": "ping"})).await;
    assert_eq!(next_json(&mut client).await["type"], "pong");
}

#[tokio::test]
async fn test_client_close_removes_connection() {
    let (url, hub) = start_server(16).await;
    let (mut client, _) = connect_async(url.as_str()).await.unwrap();

    send_json(
        &mut client,
        json!({"type": "subscribe:prices", "data": {"tokens": ["0xABC"]}}),
    )
    .await;
    let channel = ChannelName::price("0xabc");
    eventually(|| hub.members(&channel).len() == 1).await;

    client.close(None).await.unwrap();

    eventually(|| hub.connection_count() == 0).await;
    assert!(!hub.has_channel(&channel));
}

#[tokio::test]
async fn test_connection_limit_rejects_upgrade() {
    let (url, hub) = start_server(1).await;
    let (_first, _) = connect_async(url.as_str()).await.unwrap();
    eventually(|| hub.connection_count() == 1).await;

    assert!(connect_async(url.as_str()).await.is_err());
}

#[tokio::test]
async fn test_announcement_reaches_every_connection() {
    let (url, hub) = start_server(16).await;
    let (mut first, _) = connect_async(url.as_str()).await.unwrap();
    let (mut second, _) = connect_async(url.as_str()).await.unwrap();
    eventually(|| hub.members(&ChannelName::broadcast()).len() == 2).await;

    let delivered = Broadcaster::new(hub.clone()).announce(Notification::new(
        "Maintenance",
        "Bridge paused for 10 minutes",
        NotificationLevel::Warning,
    ));
    assert_eq!(delivered, 2);

    for client in [&mut first, &mut second] {
        let event = next_json(client).await;
        assert_eq!(event["type"], "notification");
        assert_eq!(event["channel"], "broadcast");
        assert_eq!(event["data"]["level"], "warning");
    }
}

#[tokio::test]
async fn test_hub_close_ends_socket_task_for_stalled_peer() {
    let (url, hub, limiter) = start_server_with_limiter(16).await;
    // Never read from this client, so its receive window fills up.
    let (_stalled, _) = connect_async(url.as_str()).await.unwrap();
    eventually(|| hub.connection_count() == 1).await;
    let id = hub.registry().ids()[0];
    let connection = hub.registry().get(id).unwrap();

    let broadcaster = Broadcaster::new(hub.clone());
    let filler = "x".repeat(64 * 1024);
    for _ in 0..4_000 {
        broadcaster.announce(Notification::new(
            "Filler",
            filler.clone(),
            NotificationLevel::Info,
        ));
        tokio::task::yield_now().await;
        if connection.queued() >= 64 {
            break;
        }
    }

    // What the heartbeat monitor does to a silent peer.
    hub.close(id).unwrap();

    for _ in 0..1_000 {
        if limiter.current_count() == 0 {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("socket task still running after hub close");
}
