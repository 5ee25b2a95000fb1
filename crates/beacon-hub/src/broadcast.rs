//! Typed event producers.
//!
//! Each producer maps a domain update onto its channel and hands it to
//! the hub. `run` drives the same producers from a `DomainEvent` queue.

use crate::hub::ChannelHub;
use beacon_core::{
    ChainUpdate, ChannelName, EventPayload, Notification, PriceUpdate, TransactionUpdate,
};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace};

/// Domain event emitted by upstream services.
#[derive(Debug, Clone, PartialEq)]
pub enum DomainEvent {
    Price(PriceUpdate),
    Chain(ChainUpdate),
    Transaction(TransactionUpdate),
    UserNotification {
        user_id: String,
        notification: Notification,
    },
    /// Global notice to every connection on `broadcast`.
    Announcement(Notification),
}

#[derive(Clone)]
pub struct Broadcaster {
    hub: Arc<ChannelHub>,
}

impl Broadcaster {
    pub fn new(hub: Arc<ChannelHub>) -> Self {
        Self { hub }
    }

    /// `price:<token>`
    pub fn publish_price(&self, update: PriceUpdate) -> usize {
        let channel = ChannelName::price(&update.token_address);
        self.hub.broadcast(&channel, EventPayload::PriceUpdate(update))
    }

    /// `chain:<chainId>`
    pub fn publish_chain(&self, update: ChainUpdate) -> usize {
        let channel = ChannelName::chain(update.chain_id);
        self.hub.broadcast(&channel, EventPayload::ChainUpdate(update))
    }

    /// `transactions:<address>`
    pub fn publish_transaction(&self, update: TransactionUpdate) -> usize {
        let channel = ChannelName::transactions(&update.address);
        self.hub
            .broadcast(&channel, EventPayload::TransactionUpdate(update))
    }

    /// `user:<userId>`
    pub fn notify_user(&self, user_id: &str, notification: Notification) -> usize {
        let channel = ChannelName::user(user_id);
        self.hub
            .broadcast(&channel, EventPayload::Notification(notification))
    }

    /// `broadcast`
    pub fn announce(&self, notification: Notification) -> usize {
        self.hub.broadcast(
            &ChannelName::broadcast(),
            EventPayload::Notification(notification),
        )
    }

    pub fn publish(&self, event: DomainEvent) -> usize {
        match event {
            DomainEvent::Price(update) => self.publish_price(update),
            DomainEvent::Chain(update) => self.publish_chain(update),
            DomainEvent::Transaction(update) => self.publish_transaction(update),
            DomainEvent::UserNotification {
                user_id,
                notification,
            } => self.notify_user(&user_id, notification),
            DomainEvent::Announcement(notification) => self.announce(notification),
        }
    }

    /// Consume domain events until the queue closes or shutdown fires.
    pub async fn run(self, mut rx: mpsc::Receiver<DomainEvent>, shutdown: CancellationToken) {
        info!("Broadcaster started");
        loop {
            tokio::select! {
                biased;

                _ = shutdown.cancelled() => {
                    debug!("Broadcaster shutdown requested");
                    break;
                }

                event = rx.recv() => {
                    let Some(event) = event else {
                        debug!("Domain event queue closed");
                        break;
                    };
                    let delivered = self.publish(event);
                    trace!(delivered, "Domain event published");
                }
            }
        }
        info!("Broadcaster stopped");
    }
}
