//! Prometheus metrics and structured logging for Beacon.
//!
//! - Prometheus metrics for connections, fan-out, heartbeats and admission control
//! - Structured logging with tracing (JSON in production, pretty otherwise)

pub mod error;
pub mod logging;
pub mod metrics;

pub use error::{TelemetryError, TelemetryResult};
pub use logging::init_logging;
pub use metrics::{render_metrics, Metrics};
