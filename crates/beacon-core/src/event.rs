//! Server→client event types.
//!
//! Every event kind has a fixed payload shape. The wire `type` tag is
//! derived from the variant, never from the payload contents.

use crate::channel::ChannelName;
use crate::error::{CoreError, Result};
use crate::protocol::{now_ms, Envelope};
use rust_decimal::Decimal;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use uuid::Uuid;

/// Token price tick.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PriceUpdate {
    pub token_address: String,
    pub price_usd: Decimal,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub change_24h_pct: Option<Decimal>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub volume_24h_usd: Option<Decimal>,
}

/// Chain health sample.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChainUpdate {
    pub chain_id: u64,
    pub block_number: u64,
    pub healthy: bool,
    /// RPC round-trip latency observed by the producer.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub latency_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gas_price_gwei: Option<Decimal>,
}

/// Transaction lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransactionStatus {
    Pending,
    Confirmed,
    Failed,
}

/// Transaction status change for a watched address.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionUpdate {
    pub hash: String,
    pub address: String,
    pub chain_id: u64,
    pub status: TransactionStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub block_number: Option<u64>,
}

/// Notification severity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NotificationLevel {
    #[default]
    Info,
    Success,
    Warning,
    Error,
}

/// User-facing notification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    pub id: Uuid,
    pub title: String,
    pub message: String,
    #[serde(default)]
    pub level: NotificationLevel,
}

impl Notification {
    pub fn new(title: impl Into<String>, message: impl Into<String>, level: NotificationLevel) -> Self {
        Self {
            id: Uuid::new_v4(),
            title: title.into(),
            message: message.into(),
            level,
        }
    }
}

/// Typed event payload.
#[derive(Debug, Clone, PartialEq)]
pub enum EventPayload {
    /// Reply to `authenticate`.
    Authenticated { success: bool },
    PriceUpdate(PriceUpdate),
    ChainUpdate(ChainUpdate),
    TransactionUpdate(TransactionUpdate),
    Notification(Notification),
    /// Reply to `ping`.
    Pong,
    /// Malformed or rejected client frame.
    Error { message: String },
}

impl EventPayload {
    /// Wire `type` tag.
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::Authenticated { .. } => "authenticated",
            Self::PriceUpdate(_) => "price-update",
            Self::ChainUpdate(_) => "chain-update",
            Self::TransactionUpdate(_) => "transaction-update",
            Self::Notification(_) => "notification",
            Self::Pong => "pong",
            Self::Error { .. } => "error",
        }
    }

    /// Wire `data` object.
    pub fn data(&self) -> Result<Value> {
        let value = match self {
            Self::Authenticated { success } => json!({ "success": success }),
            Self::PriceUpdate(update) => serde_json::to_value(update)?,
            Self::ChainUpdate(update) => serde_json::to_value(update)?,
            Self::TransactionUpdate(update) => serde_json::to_value(update)?,
            Self::Notification(notification) => serde_json::to_value(notification)?,
            Self::Pong => json!({}),
            Self::Error { message } => json!({ "message": message }),
        };
        Ok(value)
    }

    /// Decode a payload from its wire tag and data.
    pub fn from_wire(kind: &str, data: Value) -> Result<Self> {
        let payload = match kind {
            "authenticated" => {
                #[derive(Deserialize)]
                struct Data {
                    success: bool,
                }
                let data: Data = decode(kind, data)?;
                Self::Authenticated {
                    success: data.success,
                }
            }
            "price-update" => Self::PriceUpdate(decode(kind, data)?),
            "chain-update" => Self::ChainUpdate(decode(kind, data)?),
            "transaction-update" => Self::TransactionUpdate(decode(kind, data)?),
            "notification" => Self::Notification(decode(kind, data)?),
            "pong" => Self::Pong,
            "error" => {
                #[derive(Deserialize)]
                struct Data {
                    #[serde(default)]
                    message: String,
                }
                let data: Data = decode(kind, data)?;
                Self::Error {
                    message: data.message,
                }
            }
            other => return Err(CoreError::UnknownMessageType(other.to_string())),
        };
        Ok(payload)
    }
}

/// Immutable server→client event.
#[derive(Debug, Clone, PartialEq)]
pub struct Event {
    /// Target channel; `None` for direct replies to a single connection.
    pub channel: Option<ChannelName>,
    pub payload: EventPayload,
    /// Server timestamp (Unix milliseconds).
    pub timestamp_ms: i64,
}

impl Event {
    /// Event addressed to a channel, stamped now.
    pub fn new(channel: ChannelName, payload: EventPayload) -> Self {
        Self {
            channel: Some(channel),
            payload,
            timestamp_ms: now_ms(),
        }
    }

    /// Direct reply, not tied to a channel.
    pub fn direct(payload: EventPayload) -> Self {
        Self {
            channel: None,
            payload,
            timestamp_ms: now_ms(),
        }
    }

    pub fn event_type(&self) -> &'static str {
        self.payload.event_type()
    }

    pub fn to_envelope(&self) -> Result<Envelope> {
        Ok(Envelope {
            kind: self.payload.event_type().to_string(),
            channel: self.channel.as_ref().map(|c| c.as_str().to_string()),
            data: self.payload.data()?,
            timestamp: self.timestamp_ms,
        })
    }

    /// Serialize to the JSON text frame sent on the wire.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(&self.to_envelope()?)?)
    }

    pub fn from_envelope(envelope: Envelope) -> Result<Self> {
        let channel = envelope
            .channel
            .as_deref()
            .map(ChannelName::parse)
            .transpose()?;
        Ok(Self {
            channel,
            payload: EventPayload::from_wire(&envelope.kind, envelope.data)?,
            timestamp_ms: envelope.timestamp,
        })
    }

    /// Parse a server text frame.
    pub fn parse(text: &str) -> Result<Self> {
        Self::from_envelope(serde_json::from_str(text)?)
    }
}

/// Decode a `data` object, treating a missing object as empty.
pub(crate) fn decode<T: DeserializeOwned>(kind: &str, data: Value) -> Result<T> {
    let data = if data.is_null() { json!({}) } else { data };
    serde_json::from_value(data).map_err(|e| CoreError::InvalidPayload {
        kind: kind.to_string(),
        reason: e.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn sample_price() -> PriceUpdate {
        PriceUpdate {
            token_address: "0xabc".to_string(),
            price_usd: dec!(1.2345),
            change_24h_pct: Some(dec!(-2.5)),
            volume_24h_usd: None,
        }
    }

    #[test]
    fn test_event_envelope_shape() {
        let event = Event::new(
            ChannelName::price("0xabc"),
            EventPayload::PriceUpdate(sample_price()),
        );
        let value: Value = serde_json::from_str(&event.to_json().unwrap()).unwrap();

        assert_eq!(value["type"], "price-update");
        assert_eq!(value["channel"], "price:0xabc");
        assert_eq!(value["data"]["tokenAddress"], "0xabc");
        assert_eq!(value["data"]["priceUsd"], "1.2345");
        assert!(value["data"].get("volume24hUsd").is_none());
        assert!(value["timestamp"].as_i64().unwrap() > 0);
    }

    #[test]
    fn test_direct_event_has_no_channel() {
        let event = Event::direct(EventPayload::Authenticated { success: true });
        let value: Value = serde_json::from_str(&event.to_json().unwrap()).unwrap();

        assert_eq!(value["type"], "authenticated");
        assert_eq!(value["data"]["success"], true);
        assert!(value.get("channel").is_none());
    }

    #[test]
    fn test_parse_server_frame() {
        let raw = r#"{
            "type": "chain-update",
            "channel": "chain:11155931",
            "data": {"chainId": 11155931, "blockNumber": 42, "healthy": false},
            "timestamp": 1700000000000
        }"#;

        let event = Event::parse(raw).unwrap();
        assert_eq!(event.channel, Some(ChannelName::chain(11155931)));
        assert_eq!(event.timestamp_ms, 1700000000000);
        match event.payload {
            EventPayload::ChainUpdate(update) => {
                assert_eq!(update.block_number, 42);
                assert!(!update.healthy);
                assert_eq!(update.latency_ms, None);
            }
            other => panic!("unexpected payload: {other:?}"),
        }
    }

    #[test]
    fn test_parse_pong_without_data() {
        let event = Event::parse(r#"{"type":"pong","timestamp":1}"#).unwrap();
        assert_eq!(event.payload, EventPayload::Pong);
    }

    #[test]
    fn test_parse_unknown_type() {
        let err = Event::parse(r#"{"type":"order-book","data":{},"timestamp":1}"#).unwrap_err();
        assert!(matches!(err, CoreError::UnknownMessageType(_)));
    }

    #[test]
    fn test_transaction_status_wire_format() {
        let update = TransactionUpdate {
            hash: "0xdead".to_string(),
            address: "0xbeef".to_string(),
            chain_id: 1,
            status: TransactionStatus::Confirmed,
            block_number: Some(10),
        };
        let value = EventPayload::TransactionUpdate(update).data().unwrap();
        assert_eq!(value["status"], "confirmed");
        assert_eq!(value["blockNumber"], 10);
    }
}
