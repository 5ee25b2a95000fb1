//! Server-side real-time distribution for Beacon.
//!
//! - `ConnectionRegistry`: live connections, identity, liveness
//! - `ChannelHub`: channel membership and broadcast fan-out
//! - `Broadcaster`: typed producers and the domain-event loop
//! - `HeartbeatMonitor`: pings and reaps silent connections
//! - `ws_router`: axum `/ws` endpoint bridging sockets to the hub

pub mod auth;
pub mod broadcast;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod heartbeat;
pub mod hub;
pub mod queue;
pub mod registry;
pub mod server;

pub use auth::{IdentityVerifier, OpaqueIdentity};
pub use broadcast::{Broadcaster, DomainEvent};
pub use config::{HeartbeatConfig, HubConfig};
pub use dispatch::MessageDispatcher;
pub use error::{HubError, HubResult};
pub use heartbeat::{HeartbeatMonitor, SweepReport};
pub use hub::ChannelHub;
pub use queue::{Frame, OutboundReceiver, PushOutcome};
pub use registry::{Connection, ConnectionRegistry, ConnectionState};
pub use server::{ws_router, ConnectionLimiter, ConnectionPermit, WsState};
