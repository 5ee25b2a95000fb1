//! Application-facing handle.
//!
//! Subscription changes land in the intent immediately. They are written to
//! the socket right away only while the client is `Open`; in any other state
//! the next replay carries them.

use crate::state::ClientState;
use crate::subscription::{ClientSubscription, SubscriptionIntent};
use beacon_core::ClientMessage;
use beacon_telemetry::Metrics;
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// State shared between the handle and the connection loop.
///
/// State transitions into and out of `Open` happen while `intent` is held,
/// so a change is either sent live or picked up by the replay, never lost.
pub(crate) struct Shared {
    pub(crate) intent: Mutex<SubscriptionIntent>,
    state_tx: watch::Sender<ClientState>,
    outbound_tx: mpsc::UnboundedSender<ClientMessage>,
    session: Mutex<CancellationToken>,
}

impl Shared {
    pub(crate) fn new(outbound_tx: mpsc::UnboundedSender<ClientMessage>) -> Self {
        let (state_tx, _) = watch::channel(ClientState::Idle);
        Self {
            intent: Mutex::new(SubscriptionIntent::new()),
            state_tx,
            outbound_tx,
            session: Mutex::new(CancellationToken::new()),
        }
    }

    pub(crate) fn state(&self) -> ClientState {
        *self.state_tx.borrow()
    }

    /// Callers moving into or out of `Open` must hold the intent lock.
    pub(crate) fn set_state(&self, state: ClientState) {
        let previous = self.state_tx.send_replace(state);
        if previous != state {
            debug!(from = %previous, to = %state, "Client state changed");
            Metrics::ws_client_state_set(state.as_str());
        }
    }

    /// Fresh cancellation token for a new run.
    pub(crate) fn new_session(&self) -> CancellationToken {
        let token = CancellationToken::new();
        *self.session.lock() = token.clone();
        token
    }

    fn cancel_session(&self) {
        self.session.lock().cancel();
    }

    fn send_if_open(&self, message: ClientMessage) {
        if self.state() == ClientState::Open {
            // The receiver lives as long as the manager; a send error only
            // means the manager was dropped, and the intent still holds the change.
            let _ = self.outbound_tx.send(message);
        }
    }
}

/// Cloneable handle for subscribing, authenticating and disconnecting.
#[derive(Clone)]
pub struct ClientHandle {
    shared: Arc<Shared>,
}

impl ClientHandle {
    pub(crate) fn new(shared: Arc<Shared>) -> Self {
        Self { shared }
    }

    pub fn state(&self) -> ClientState {
        self.shared.state()
    }

    /// Receiver that observes every state change.
    pub fn watch_state(&self) -> watch::Receiver<ClientState> {
        self.shared.state_tx.subscribe()
    }

    /// Add a subscription. Returns `false` if it was already held.
    pub fn subscribe(&self, subscription: ClientSubscription) -> bool {
        let mut intent = self.shared.intent.lock();
        if !intent.insert(subscription.clone()) {
            return false;
        }
        self.shared.send_if_open(subscription.subscribe_message());
        true
    }

    pub fn subscribe_prices<I, S>(&self, tokens: I) -> usize
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        tokens
            .into_iter()
            .filter(|token| self.subscribe(ClientSubscription::price(token.as_ref())))
            .count()
    }

    pub fn subscribe_chain(&self, chain_id: u64) -> bool {
        self.subscribe(ClientSubscription::chain(chain_id))
    }

    pub fn subscribe_transactions(&self, address: &str) -> bool {
        self.subscribe(ClientSubscription::transactions(address))
    }

    /// Remove a subscription. Returns `false` if it was not held.
    pub fn unsubscribe(&self, subscription: &ClientSubscription) -> bool {
        let mut intent = self.shared.intent.lock();
        if !intent.remove(subscription) {
            return false;
        }
        self.shared.send_if_open(subscription.unsubscribe_message());
        true
    }

    /// Store `identity` and authenticate with it now and after every reconnect.
    pub fn authenticate(&self, identity: impl Into<String>) {
        let identity = identity.into();
        let mut intent = self.shared.intent.lock();
        if intent.set_identity(identity.clone()) {
            self.shared.send_if_open(ClientMessage::Authenticate {
                identity: Some(identity),
            });
        }
    }

    pub fn subscriptions(&self) -> Vec<ClientSubscription> {
        self.shared.intent.lock().subscriptions().to_vec()
    }

    /// Stop the current run: closes an open connection with code 1000 and
    /// cancels any pending reconnect. No further attempts are made.
    pub fn disconnect(&self) {
        info!("Client disconnect requested");
        self.shared.cancel_session();
    }
}
