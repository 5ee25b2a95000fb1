//! Application error types.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Hub error: {0}")]
    Hub(#[from] beacon_hub::HubError),

    #[error("Rate limit error: {0}")]
    RateLimit(#[from] beacon_ratelimit::RateLimitError),

    #[error("WebSocket error: {0}")]
    WebSocket(#[from] Box<beacon_ws::WsError>),

    #[error("Telemetry error: {0}")]
    Telemetry(#[from] beacon_telemetry::TelemetryError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<beacon_ws::WsError> for AppError {
    fn from(e: beacon_ws::WsError) -> Self {
        Self::WebSocket(Box::new(e))
    }
}

pub type AppResult<T> = Result<T, AppError>;
