//! Hub error types.

use beacon_core::{ConnectionId, CoreError};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum HubError {
    /// Operation on a closed or unknown connection.
    #[error("Connection not found: {0}")]
    ConnectionNotFound(ConnectionId),

    /// Identity rejected; the connection stays open unauthenticated.
    #[error("Authentication failed: {0}")]
    AuthFailure(String),

    /// Outbound queue for one connection is gone.
    #[error("Delivery failed for connection {0}")]
    DeliveryFailure(ConnectionId),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Protocol error: {0}")]
    Protocol(#[from] CoreError),
}

pub type HubResult<T> = Result<T, HubError>;
