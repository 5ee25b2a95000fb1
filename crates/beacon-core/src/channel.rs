//! Channel and connection identifiers.
//!
//! Channels follow a `<kind>:<key>` naming convention. The global
//! announcement channel is the bare name `broadcast`.

use crate::error::{CoreError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Server-side connection identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ConnectionId(pub Uuid);

impl ConnectionId {
    /// Generate a fresh random id.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Channel category, derived from the name prefix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChannelKind {
    /// `price:<tokenAddress>`
    Price,
    /// `chain:<chainId>`
    Chain,
    /// `transactions:<address>`
    Transactions,
    /// `user:<userId>`
    User,
    /// `broadcast`
    Broadcast,
}

impl ChannelKind {
    /// Name prefix (without the separating colon).
    pub fn prefix(&self) -> &'static str {
        match self {
            Self::Price => "price",
            Self::Chain => "chain",
            Self::Transactions => "transactions",
            Self::User => "user",
            Self::Broadcast => ChannelName::BROADCAST,
        }
    }
}

/// Validated channel name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ChannelName(String);

impl ChannelName {
    /// Name of the global announcement channel.
    pub const BROADCAST: &'static str = "broadcast";

    /// `price:<tokenAddress>`
    pub fn price(token_address: &str) -> Self {
        Self(format!("price:{}", normalize_address(token_address)))
    }

    /// `chain:<chainId>`
    pub fn chain(chain_id: u64) -> Self {
        Self(format!("chain:{chain_id}"))
    }

    /// `transactions:<address>`
    pub fn transactions(address: &str) -> Self {
        Self(format!("transactions:{}", normalize_address(address)))
    }

    /// `user:<userId>`
    pub fn user(user_id: &str) -> Self {
        Self(format!("user:{}", user_id.trim()))
    }

    /// The global announcement channel.
    pub fn broadcast() -> Self {
        Self(Self::BROADCAST.to_string())
    }

    /// Parse and validate a raw channel name received from the wire.
    pub fn parse(raw: &str) -> Result<Self> {
        let raw = raw.trim();
        if raw == Self::BROADCAST {
            return Ok(Self::broadcast());
        }

        let Some((prefix, key)) = raw.split_once(':') else {
            return Err(CoreError::InvalidChannel(raw.to_string()));
        };
        if key.is_empty() {
            return Err(CoreError::InvalidChannel(raw.to_string()));
        }

        match prefix {
            "price" => Ok(Self::price(key)),
            "transactions" => Ok(Self::transactions(key)),
            "user" => Ok(Self::user(key)),
            "chain" => key
                .parse::<u64>()
                .map(Self::chain)
                .map_err(|_| CoreError::InvalidChannel(raw.to_string())),
            _ => Err(CoreError::InvalidChannel(raw.to_string())),
        }
    }

    /// Channel category.
    pub fn kind(&self) -> ChannelKind {
        match self.0.split_once(':').map(|(prefix, _)| prefix) {
            Some("price") => ChannelKind::Price,
            Some("chain") => ChannelKind::Chain,
            Some("transactions") => ChannelKind::Transactions,
            Some("user") => ChannelKind::User,
            _ => ChannelKind::Broadcast,
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ChannelName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for ChannelName {
    type Error = CoreError;

    fn try_from(value: String) -> Result<Self> {
        Self::parse(&value)
    }
}

impl From<ChannelName> for String {
    fn from(value: ChannelName) -> Self {
        value.0
    }
}

/// Addresses are case-insensitive hex; channels always use the lowercase form.
pub fn normalize_address(address: &str) -> String {
    address.trim().to_ascii_lowercase()
}
