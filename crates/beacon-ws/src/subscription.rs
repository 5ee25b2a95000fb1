//! Persistent subscription intent.
//!
//! The intent is what the application wants to be subscribed to, independent
//! of whether a connection currently exists. It is replayed in full after
//! every (re)connect, and a version counter lets the replay detect changes
//! made while it was in flight.

use beacon_core::{normalize_address, ChannelName, ClientMessage};

/// One subscription the client wants to hold.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ClientSubscription {
    /// Price feed for a single token address.
    Price(String),
    Chain(u64),
    Transactions(String),
}

impl ClientSubscription {
    pub fn price(token_address: &str) -> Self {
        Self::Price(normalize_address(token_address))
    }

    pub fn chain(chain_id: u64) -> Self {
        Self::Chain(chain_id)
    }

    pub fn transactions(address: &str) -> Self {
        Self::Transactions(normalize_address(address))
    }

    /// Server channel this subscription maps to.
    pub fn channel(&self) -> ChannelName {
        match self {
            Self::Price(token) => ChannelName::price(token),
            Self::Chain(chain_id) => ChannelName::chain(*chain_id),
            Self::Transactions(address) => ChannelName::transactions(address),
        }
    }

    pub fn subscribe_message(&self) -> ClientMessage {
        match self {
            Self::Price(token) => ClientMessage::SubscribePrices {
                tokens: vec![token.clone()],
            },
            Self::Chain(chain_id) => ClientMessage::SubscribeChain {
                chain_id: *chain_id,
            },
            Self::Transactions(address) => ClientMessage::SubscribeTransactions {
                address: address.clone(),
            },
        }
    }

    pub fn unsubscribe_message(&self) -> ClientMessage {
        ClientMessage::Unsubscribe {
            channel: self.channel().as_str().to_string(),
        }
    }
}

/// Point-in-time copy of the intent, used to diff against later changes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IntentSnapshot {
    pub identity: Option<String>,
    pub subscriptions: Vec<ClientSubscription>,
    pub version: u64,
}

/// Ordered, de-duplicated subscription set plus the stored identity.
#[derive(Debug, Default)]
pub struct SubscriptionIntent {
    identity: Option<String>,
    subscriptions: Vec<ClientSubscription>,
    version: u64,
}

impl SubscriptionIntent {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a subscription. Returns `false` if it was already present.
    pub fn insert(&mut self, subscription: ClientSubscription) -> bool {
        if self.subscriptions.contains(&subscription) {
            return false;
        }
        self.subscriptions.push(subscription);
        self.version += 1;
        true
    }

    /// Remove a subscription. Returns `false` if it was not present.
    pub fn remove(&mut self, subscription: &ClientSubscription) -> bool {
        let before = self.subscriptions.len();
        self.subscriptions.retain(|s| s != subscription);
        if self.subscriptions.len() == before {
            return false;
        }
        self.version += 1;
        true
    }

    /// Store the identity to authenticate with. Returns `false` if unchanged.
    pub fn set_identity(&mut self, identity: String) -> bool {
        if self.identity.as_deref() == Some(identity.as_str()) {
            return false;
        }
        self.identity = Some(identity);
        self.version += 1;
        true
    }

    pub fn identity(&self) -> Option<&str> {
        self.identity.as_deref()
    }

    pub fn subscriptions(&self) -> &[ClientSubscription] {
        &self.subscriptions
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn snapshot(&self) -> IntentSnapshot {
        IntentSnapshot {
            identity: self.identity.clone(),
            subscriptions: self.subscriptions.clone(),
            version: self.version,
        }
    }

    /// Full replay for a fresh connection: authenticate first, then every
    /// subscribe in insertion order.
    pub fn replay(&self) -> Vec<ClientMessage> {
        let mut messages = Vec::with_capacity(self.subscriptions.len() + 1);
        if let Some(identity) = &self.identity {
            messages.push(ClientMessage::Authenticate {
                identity: Some(identity.clone()),
            });
        }
        messages.extend(self.subscriptions.iter().map(ClientSubscription::subscribe_message));
        messages
    }

    /// Messages that move a connection holding `sent` to the current intent.
    pub fn diff(&self, sent: &IntentSnapshot) -> Vec<ClientMessage> {
        let mut messages = Vec::new();
        if self.identity != sent.identity {
            if let Some(identity) = &self.identity {
                messages.push(ClientMessage::Authenticate {
                    identity: Some(identity.clone()),
                });
            }
        }
        messages.extend(
            sent.subscriptions
                .iter()
                .filter(|s| !self.subscriptions.contains(s))
                .map(ClientSubscription::unsubscribe_message),
        );
        messages.extend(
            self.subscriptions
                .iter()
                .filter(|s| !sent.subscriptions.contains(s))
                .map(ClientSubscription::subscribe_message),
        );
        messages
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_dedupes_and_bumps_version() {
        let mut intent = SubscriptionIntent::new();
        assert!(intent.insert(ClientSubscription::chain(11155931)));
        assert!(!intent.insert(ClientSubscription::chain(11155931)));
        assert!(intent.insert(ClientSubscription::price("0xABC")));
        assert_eq!(intent.version(), 2);
        assert_eq!(
            intent.subscriptions(),
            &[
                ClientSubscription::Chain(11155931),
                ClientSubscription::Price("0xabc".to_string())
            ]
        );

        assert!(!intent.remove(&ClientSubscription::chain(1)));
        assert!(intent.remove(&ClientSubscription::chain(11155931)));
        assert_eq!(intent.version(), 3);
    }

    #[test]
    fn test_replay_authenticates_first() {
        let mut intent = SubscriptionIntent::new();
        intent.insert(ClientSubscription::chain(11155931));
        intent.insert(ClientSubscription::transactions("0xDEF"));
        intent.set_identity("user-1".to_string());

        let replay = intent.replay();
        assert_eq!(
            replay,
            vec![
                ClientMessage::Authenticate {
                    identity: Some("user-1".to_string())
                },
                ClientMessage::SubscribeChain { chain_id: 11155931 },
                ClientMessage::SubscribeTransactions {
                    address: "0xdef".to_string()
                },
            ]
        );
    }

    #[test]
    fn test_replay_without_identity_skips_authenticate() {
        let mut intent = SubscriptionIntent::new();
        intent.insert(ClientSubscription::price("0xaa"));
        assert_eq!(
            intent.replay(),
            vec![ClientMessage::SubscribePrices {
                tokens: vec!["0xaa".to_string()]
            }]
        );
    }

    #[test]
    fn test_diff_covers_changes_since_snapshot() {
        let mut intent = SubscriptionIntent::new();
        intent.insert(ClientSubscription::chain(1));
        intent.insert(ClientSubscription::chain(2));
        let sent = intent.snapshot();

        intent.remove(&ClientSubscription::chain(1));
        intent.insert(ClientSubscription::chain(3));
        intent.set_identity("user-9".to_string());

        assert_eq!(
            intent.diff(&sent),
            vec![
                ClientMessage::Authenticate {
                    identity: Some("user-9".to_string())
                },
                ClientMessage::Unsubscribe {
                    channel: "chain:1".to_string()
                },
                ClientMessage::SubscribeChain { chain_id: 3 },
            ]
        );
        assert!(intent.diff(&intent.snapshot()).is_empty());
    }

    #[test]
    fn test_set_identity_unchanged() {
        let mut intent = SubscriptionIntent::new();
        assert!(intent.set_identity("a".to_string()));
        assert!(!intent.set_identity("a".to_string()));
        assert_eq!(intent.identity(), Some("a"));
        assert_eq!(intent.version(), 1);
    }
}
