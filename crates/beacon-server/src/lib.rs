//! Beacon real-time distribution server.
//!
//! Wires the channel hub, broadcaster, heartbeat monitor and rate limiter
//! behind one axum router:
//! - `GET /ws`: pub/sub WebSocket endpoint
//! - `GET /health`, `GET /metrics`: operational endpoints
//! - `/api/{general,auth,trading,bridge}`: scopes behind admission tiers

pub mod app;
pub mod config;
pub mod error;
pub mod routes;
pub mod watch;

pub use app::Application;
pub use config::{AppConfig, ServerConfig};
pub use error::{AppError, AppResult};
pub use watch::{watch, WatchPlan};
