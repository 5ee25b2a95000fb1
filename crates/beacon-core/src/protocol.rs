//! Wire envelope and client→server control messages.
//!
//! Both directions share one envelope:
//! `{type: string, channel?: string, data: object, timestamp: number}`.

use crate::channel::{normalize_address, ChannelName};
use crate::error::{CoreError, Result};
use crate::event::decode;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// Current time in Unix milliseconds.
pub fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Wire envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel: Option<String>,
    #[serde(default)]
    pub data: Value,
    #[serde(default)]
    pub timestamp: i64,
}

/// Client→server control message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientMessage {
    /// Bind an opaque identity to the connection.
    Authenticate { identity: Option<String> },
    SubscribePrices { tokens: Vec<String> },
    SubscribeChain { chain_id: u64 },
    SubscribeTransactions { address: String },
    Unsubscribe { channel: String },
    Ping,
}

#[derive(Deserialize)]
struct AuthenticateData {
    #[serde(default)]
    identity: Option<String>,
}

#[derive(Deserialize)]
struct SubscribePricesData {
    tokens: Vec<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SubscribeChainData {
    chain_id: u64,
}

#[derive(Deserialize)]
struct SubscribeTransactionsData {
    address: String,
}

#[derive(Deserialize)]
struct UnsubscribeData {
    channel: String,
}

impl ClientMessage {
    /// Wire `type` tag.
    pub fn message_type(&self) -> &'static str {
        match self {
            Self::Authenticate { .. } => "authenticate",
            Self::SubscribePrices { .. } => "subscribe:prices",
            Self::SubscribeChain { .. } => "subscribe:chain",
            Self::SubscribeTransactions { .. } => "subscribe:transactions",
            Self::Unsubscribe { .. } => "unsubscribe",
            Self::Ping => "ping",
        }
    }

    /// Channels this message subscribes to (empty for non-subscribe messages).
    pub fn channels(&self) -> Vec<ChannelName> {
        match self {
            Self::SubscribePrices { tokens } => {
                tokens.iter().map(|t| ChannelName::price(t)).collect()
            }
            Self::SubscribeChain { chain_id } => vec![ChannelName::chain(*chain_id)],
            Self::SubscribeTransactions { address } => vec![ChannelName::transactions(address)],
            _ => Vec::new(),
        }
    }

    pub fn from_envelope(envelope: Envelope) -> Result<Self> {
        let kind = envelope.kind.as_str();
        let message = match kind {
            "authenticate" => {
                let data: AuthenticateData = decode(kind, envelope.data)?;
                Self::Authenticate {
                    identity: data.identity,
                }
            }
            "subscribe:prices" => {
                let data: SubscribePricesData = decode(kind, envelope.data)?;
                if data.tokens.iter().any(|t| t.trim().is_empty()) {
                    return Err(CoreError::InvalidPayload {
                        kind: kind.to_string(),
                        reason: "empty token address".to_string(),
                    });
                }
                Self::SubscribePrices {
                    tokens: data.tokens.iter().map(|t| normalize_address(t)).collect(),
                }
            }
            "subscribe:chain" => {
                let data: SubscribeChainData = decode(kind, envelope.data)?;
                Self::SubscribeChain {
                    chain_id: data.chain_id,
                }
            }
            "subscribe:transactions" => {
                let data: SubscribeTransactionsData = decode(kind, envelope.data)?;
                if data.address.trim().is_empty() {
                    return Err(CoreError::InvalidPayload {
                        kind: kind.to_string(),
                        reason: "empty address".to_string(),
                    });
                }
                Self::SubscribeTransactions {
                    address: normalize_address(&data.address),
                }
            }
            "unsubscribe" => {
                // Either `data.channel` or the envelope-level `channel` is accepted.
                let channel = match envelope.channel {
                    Some(channel) if envelope.data.get("channel").is_none() => channel,
                    _ => decode::<UnsubscribeData>(kind, envelope.data)?.channel,
                };
                Self::Unsubscribe { channel }
            }
            "ping" => Self::Ping,
            other => return Err(CoreError::UnknownMessageType(other.to_string())),
        };
        Ok(message)
    }

    /// Parse a client text frame.
    pub fn parse(text: &str) -> Result<Self> {
        Self::from_envelope(serde_json::from_str(text)?)
    }

    pub fn to_envelope(&self) -> Envelope {
        let data = match self {
            Self::Authenticate { identity } => match identity {
                Some(identity) => json!({ "identity": identity }),
                None => json!({}),
            },
            Self::SubscribePrices { tokens } => json!({ "tokens": tokens }),
            Self::SubscribeChain { chain_id } => json!({ "chainId": chain_id }),
            Self::SubscribeTransactions { address } => json!({ "address": address }),
            Self::Unsubscribe { channel } => json!({ "channel": channel }),
            Self::Ping => json!({}),
        };
        Envelope {
            kind: self.message_type().to_string(),
            channel: None,
            data,
            timestamp: now_ms(),
        }
    }

    /// Serialize to the JSON text frame sent on the wire.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(&self.to_envelope())?)
    }
}
