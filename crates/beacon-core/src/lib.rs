//! Core types for the Beacon real-time layer.
//!
//! This crate provides the vocabulary shared by the server hub and the client:
//! - `ChannelName`: Validated pub/sub topic names (`price:<token>`, `chain:<id>`, ...)
//! - `ConnectionId`: Server-side connection identifier
//! - `Event`, `EventPayload`: Typed server→client events
//! - `Envelope`, `ClientMessage`: Wire envelope and client→server control messages

pub mod channel;
pub mod error;
pub mod event;
pub mod protocol;

pub use channel::{normalize_address, ChannelKind, ChannelName, ConnectionId};
pub use error::{CoreError, Result};
pub use event::{
    ChainUpdate, Event, EventPayload, Notification, NotificationLevel, PriceUpdate,
    TransactionStatus, TransactionUpdate,
};
pub use protocol::{now_ms, ClientMessage, Envelope};
