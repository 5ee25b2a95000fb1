//! Client control-message dispatch.

use crate::auth::IdentityVerifier;
use crate::error::HubResult;
use crate::hub::ChannelHub;
use beacon_core::{ChannelName, ClientMessage, ConnectionId, Event, EventPayload};
use std::sync::Arc;
use tracing::{debug, warn};

/// Applies inbound client messages to the hub.
#[derive(Clone)]
pub struct MessageDispatcher {
    hub: Arc<ChannelHub>,
    verifier: Arc<dyn IdentityVerifier>,
}

impl MessageDispatcher {
    pub fn new(hub: Arc<ChannelHub>, verifier: Arc<dyn IdentityVerifier>) -> Self {
        Self { hub, verifier }
    }

    pub fn hub(&self) -> &Arc<ChannelHub> {
        &self.hub
    }

    /// Handle one text frame. Malformed frames get an `error` reply and
    /// leave the connection open.
    pub fn handle_text(&self, id: ConnectionId, text: &str) -> HubResult<()> {
        match ClientMessage::parse(text) {
            Ok(message) => self.handle(id, message),
            Err(e) => {
                debug!(connection_id = %id, error = %e, "Rejected client frame");
                self.reply(
                    id,
                    EventPayload::Error {
                        message: e.to_string(),
                    },
                )
            }
        }
    }

    pub fn handle(&self, id: ConnectionId, message: ClientMessage) -> HubResult<()> {
        debug!(connection_id = %id, message_type = message.message_type(), "Client message");
        match message {
            ClientMessage::Authenticate { identity } => self.authenticate(id, identity.as_deref()),
            ClientMessage::SubscribePrices { .. }
            | ClientMessage::SubscribeChain { .. }
            | ClientMessage::SubscribeTransactions { .. } => {
                for channel in message.channels() {
                    self.hub.subscribe(id, &channel)?;
                }
                Ok(())
            }
            ClientMessage::Unsubscribe { channel } => match ChannelName::parse(&channel) {
                Ok(channel) => self.hub.unsubscribe(id, &channel).map(|_| ()),
                Err(e) => self.reply(
                    id,
                    EventPayload::Error {
                        message: e.to_string(),
                    },
                ),
            },
            ClientMessage::Ping => self.reply(id, EventPayload::Pong),
        }
    }

    /// Bind the verified identity and move the `user:` membership with it.
    fn authenticate(&self, id: ConnectionId, identity: Option<&str>) -> HubResult<()> {
        let user_id = match self.verifier.verify(identity) {
            Ok(user_id) => user_id,
            Err(e) => {
                warn!(connection_id = %id, error = %e, "Authentication failed");
                return self.reply(id, EventPayload::Authenticated { success: false });
            }
        };

        let previous = self.hub.registry().authenticate(id, &user_id)?;
        if let Some(previous) = previous.filter(|p| *p != user_id) {
            self.hub.unsubscribe(id, &ChannelName::user(&previous))?;
        }
        self.hub.subscribe(id, &ChannelName::user(&user_id))?;

        self.reply(id, EventPayload::Authenticated { success: true })
    }

    fn reply(&self, id: ConnectionId, payload: EventPayload) -> HubResult<()> {
        self.hub.send_to(id, Event::direct(payload))
    }
}
