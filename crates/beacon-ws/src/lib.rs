//! Reconnecting WebSocket client for Beacon channels.
//!
//! Provides:
//! - Automatic reconnection with capped exponential backoff and jitter
//! - A persistent subscription intent replayed after every reconnect
//! - App-level ping/pong heartbeat with timeout detection
//! - Typed server events delivered over an mpsc channel

pub mod config;
pub mod connection;
pub mod error;
pub mod handle;
pub mod heartbeat;
pub mod state;
pub mod subscription;

pub use config::ConnectionConfig;
pub use connection::ReconnectManager;
pub use error::{WsError, WsResult};
pub use handle::ClientHandle;
pub use heartbeat::ClientHeartbeat;
pub use state::ClientState;
pub use subscription::{ClientSubscription, IntentSnapshot, SubscriptionIntent};

use std::sync::Once;

static INIT_CRYPTO: Once = Once::new();

/// Install the TLS crypto provider. Call once before connecting to `wss://` endpoints.
pub fn init_crypto() {
    INIT_CRYPTO.call_once(|| {
        let _ = rustls::crypto::ring::default_provider().install_default();
    });
}
