//! Channel hub: channel → member-set mapping and broadcast fan-out.
//!
//! Membership of a single channel is mutated under that channel's map
//! entry. `broadcast` snapshots the member set under the same entry and
//! releases it before touching any outbound queue.
//!
//! Lock order is always connection state first, then channel entry.

use crate::config::HubConfig;
use crate::error::{HubError, HubResult};
use crate::queue::{Frame, PushOutcome};
use crate::registry::{ConnectionRegistry, ConnectionState};
use beacon_core::{ChannelName, ConnectionId, Event, EventPayload};
use beacon_telemetry::Metrics;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

#[derive(Debug, Default)]
struct Channel {
    members: HashSet<ConnectionId>,
}

/// Pub/sub fan-out engine. Owns the connection registry.
pub struct ChannelHub {
    registry: ConnectionRegistry,
    channels: DashMap<ChannelName, Channel>,
    persistent: HashSet<ChannelName>,
}

impl ChannelHub {
    /// Create a hub. Persistent channels exist from the start and are never
    /// collected.
    pub fn new(registry: ConnectionRegistry, persistent: impl IntoIterator<Item = ChannelName>) -> Self {
        let persistent: HashSet<ChannelName> = persistent.into_iter().collect();
        let channels = DashMap::new();
        for name in &persistent {
            channels.insert(name.clone(), Channel::default());
        }
        Metrics::channels_set(channels.len());
        Self {
            registry,
            channels,
            persistent,
        }
    }

    pub fn from_config(config: &HubConfig) -> HubResult<Self> {
        let persistent = config
            .persistent_channels
            .iter()
            .map(|name| ChannelName::parse(name))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self::new(
            ConnectionRegistry::new(config.outbound_queue_capacity),
            persistent,
        ))
    }

    pub fn registry(&self) -> &ConnectionRegistry {
        &self.registry
    }

    /// Add `id` to `channel`.
    ///
    /// Returns `false` if it was already a member.
    pub fn subscribe(&self, id: ConnectionId, channel: &ChannelName) -> HubResult<bool> {
        let connection = self.registry.get(id)?;
        let mut inner = connection.lock();
        if !inner.state.is_live() {
            return Err(HubError::ConnectionNotFound(id));
        }
        if !inner.channels.insert(channel.clone()) {
            return Ok(false);
        }

        self.channels
            .entry(channel.clone())
            .or_default()
            .members
            .insert(id);
        drop(inner);

        Metrics::channels_set(self.channels.len());
        debug!(connection_id = %id, channel = %channel, "Subscribed");
        Ok(true)
    }

    /// Remove `id` from `channel`.
    ///
    /// Returns `false` if it was not a member.
    pub fn unsubscribe(&self, id: ConnectionId, channel: &ChannelName) -> HubResult<bool> {
        let connection = self.registry.get(id)?;
        let mut inner = connection.lock();
        if !inner.channels.remove(channel) {
            return Ok(false);
        }
        self.leave(id, channel);
        drop(inner);

        Metrics::channels_set(self.channels.len());
        debug!(connection_id = %id, channel = %channel, "Unsubscribed");
        Ok(true)
    }

    /// Caller holds the connection lock and has already dropped `channel`
    /// from the connection's own set.
    fn leave(&self, id: ConnectionId, channel: &ChannelName) {
        match self.channels.entry(channel.clone()) {
            Entry::Occupied(mut entry) => {
                let removed = entry.get_mut().members.remove(&id);
                if !removed {
                    error!(connection_id = %id, channel = %channel, "Membership out of sync: member missing");
                    debug_assert!(removed, "connection {id} missing from {channel}");
                }
                if entry.get().members.is_empty() && !self.persistent.contains(channel) {
                    entry.remove();
                }
            }
            Entry::Vacant(_) => {
                error!(connection_id = %id, channel = %channel, "Membership out of sync: channel missing");
                debug_assert!(false, "channel {channel} missing for connection {id}");
            }
        }
    }

    /// Deliver `payload` to every member of `channel` at call time.
    ///
    /// Never blocks on a slow member. Returns the number of members the
    /// event was enqueued to. Members whose queue is gone are closed after
    /// the fan-out completes.
    pub fn broadcast(&self, channel: &ChannelName, payload: EventPayload) -> usize {
        let event = Arc::new(Event::new(channel.clone(), payload));
        let event_type = event.event_type();

        let members: Vec<ConnectionId> = match self.channels.get(channel) {
            Some(entry) => entry.members.iter().copied().collect(),
            None => {
                Metrics::broadcast(event_type, 0);
                return 0;
            }
        };

        let mut delivered = 0;
        let mut failed = Vec::new();
        for id in members {
            // Closed between snapshot and delivery.
            let Ok(connection) = self.registry.get(id) else {
                continue;
            };
            match connection.push(Frame::Event(event.clone())) {
                Ok(PushOutcome::Queued) => delivered += 1,
                Ok(PushOutcome::DroppedOldest) => {
                    delivered += 1;
                    Metrics::frames_dropped(1);
                    warn!(
                        connection_id = %id,
                        channel = %channel,
                        queued = connection.queued(),
                        "Outbound queue full, dropped oldest frame"
                    );
                }
                Err(_) => failed.push(id),
            }
        }

        for id in failed {
            Metrics::delivery_failure();
            warn!(connection_id = %id, channel = %channel, "Delivery failed, closing connection");
            // Already gone is fine here.
            let _ = self.close(id);
        }

        Metrics::broadcast(event_type, delivered);
        debug!(channel = %channel, event_type, delivered, "Broadcast");
        delivered
    }

    /// Direct delivery to one connection (replies such as `pong`).
    pub fn send_to(&self, id: ConnectionId, event: Event) -> HubResult<()> {
        self.push_frame(id, Frame::Event(Arc::new(event))).map(|_| ())
    }

    pub(crate) fn push_frame(&self, id: ConnectionId, frame: Frame) -> HubResult<PushOutcome> {
        let connection = self.registry.get(id)?;
        match connection.push(frame) {
            Ok(outcome) => {
                if outcome == PushOutcome::DroppedOldest {
                    Metrics::frames_dropped(1);
                    warn!(connection_id = %id, "Outbound queue full, dropped oldest frame");
                }
                Ok(outcome)
            }
            Err(e) => {
                Metrics::delivery_failure();
                let _ = self.close(id);
                Err(e)
            }
        }
    }

    /// Close a connection: remove it from the registry and from every
    /// channel it belongs to, then close its outbound queue.
    pub fn close(&self, id: ConnectionId) -> HubResult<()> {
        let connection = self.registry.remove(id)?;

        let left = {
            let mut inner = connection.lock();
            inner.state = ConnectionState::Closing;
            let channels = std::mem::take(&mut inner.channels);
            for channel in &channels {
                self.leave(id, channel);
            }
            inner.state = ConnectionState::Closed;
            channels.len()
        };
        connection.close_queue();

        Metrics::connection_closed();
        Metrics::channels_set(self.channels.len());
        info!(connection_id = %id, channels = left, "Connection closed");
        Ok(())
    }

    /// Close every connection. Returns how many were closed.
    pub fn close_all(&self) -> usize {
        let closed = self
            .registry
            .ids()
            .into_iter()
            .filter(|id| self.close(*id).is_ok())
            .count();
        info!(closed, "Closed all connections");
        closed
    }

    /// Current members of `channel`.
    pub fn members(&self, channel: &ChannelName) -> Vec<ConnectionId> {
        self.channels
            .get(channel)
            .map(|entry| entry.members.iter().copied().collect())
            .unwrap_or_default()
    }

    pub fn is_member(&self, id: ConnectionId, channel: &ChannelName) -> bool {
        self.channels
            .get(channel)
            .is_some_and(|entry| entry.members.contains(&id))
    }

    pub fn has_channel(&self, channel: &ChannelName) -> bool {
        self.channels.contains_key(channel)
    }

    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }

    pub fn connection_count(&self) -> usize {
        self.registry.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::OutboundReceiver;
    use beacon_core::{Notification, NotificationLevel};

    fn hub(capacity: usize) -> ChannelHub {
        ChannelHub::new(
            ConnectionRegistry::new(capacity),
            [ChannelName::broadcast()],
        )
    }

    fn open(hub: &ChannelHub) -> (ConnectionId, OutboundReceiver) {
        let (id, rx) = hub.registry().open();
        hub.registry().activate(id).unwrap();
        (id, rx)
    }

    fn notice(title: &str) -> EventPayload {
        EventPayload::Notification(Notification::new(title, "body", NotificationLevel::Info))
    }

    /// Titles of all queued notification events.
    fn drain_titles(rx: &OutboundReceiver) -> Vec<String> {
        std::iter::from_fn(|| rx.try_recv())
            .filter_map(|frame| match frame {
                Frame::Event(event) => match &event.payload {
                    EventPayload::Notification(n) => Some(n.title.clone()),
                    _ => None,
                },
                Frame::Ping => None,
            })
            .collect()
    }

    #[test]
    fn test_broadcast_reaches_members_only() {
        let hub = hub(16);
        let channel = ChannelName::chain(11155931);
        let (member, member_rx) = open(&hub);
        let (_outsider, outsider_rx) = open(&hub);

        assert!(hub.subscribe(member, &channel).unwrap());
        assert_eq!(hub.broadcast(&channel, notice("e1")), 1);

        assert_eq!(drain_titles(&member_rx), vec!["e1"]);
        assert!(drain_titles(&outsider_rx).is_empty());
    }

    #[test]
    fn test_subscribe_unsubscribe_then_broadcast_delivers_nothing() {
        let hub = hub(16);
        let channel = ChannelName::price("0xabc");
        let (id, rx) = open(&hub);

        hub.subscribe(id, &channel).unwrap();
        assert!(hub.unsubscribe(id, &channel).unwrap());
        assert_eq!(hub.broadcast(&channel, notice("e1")), 0);
        assert!(drain_titles(&rx).is_empty());
    }

    #[test]
    fn test_broadcast_order_preserved_per_member() {
        let hub = hub(16);
        let channel = ChannelName::chain(1);
        let (a, a_rx) = open(&hub);
        let (b, b_rx) = open(&hub);
        hub.subscribe(a, &channel).unwrap();
        hub.subscribe(b, &channel).unwrap();

        hub.broadcast(&channel, notice("e1"));
        hub.broadcast(&channel, notice("e2"));

        assert_eq!(drain_titles(&a_rx), vec!["e1", "e2"]);
        assert_eq!(drain_titles(&b_rx), vec!["e1", "e2"]);
    }

    #[test]
    fn test_subscribe_is_idempotent() {
        let hub = hub(16);
        let channel = ChannelName::user("alice");
        let (id, _rx) = open(&hub);

        assert!(hub.subscribe(id, &channel).unwrap());
        assert!(!hub.subscribe(id, &channel).unwrap());
        assert_eq!(hub.members(&channel), vec![id]);
        assert!(!hub.unsubscribe(id, &ChannelName::user("bob")).unwrap());
    }

    #[test]
    fn test_empty_channel_collected_but_persistent_kept() {
        let hub = hub(16);
        let channel = ChannelName::transactions("0xBEEF");
        let broadcast = ChannelName::broadcast();
        let (id, _rx) = open(&hub);

        hub.subscribe(id, &channel).unwrap();
        hub.subscribe(id, &broadcast).unwrap();
        assert!(hub.has_channel(&channel));

        hub.unsubscribe(id, &channel).unwrap();
        hub.unsubscribe(id, &broadcast).unwrap();
        assert!(!hub.has_channel(&channel));
        assert!(hub.has_channel(&broadcast));
    }

    #[test]
    fn test_close_removes_all_memberships() {
        let hub = hub(16);
        let chain = ChannelName::chain(1);
        let price = ChannelName::price("0xabc");
        let (id, _rx) = open(&hub);
        hub.subscribe(id, &chain).unwrap();
        hub.subscribe(id, &price).unwrap();

        hub.close(id).unwrap();

        assert!(!hub.is_member(id, &chain));
        assert!(!hub.is_member(id, &price));
        assert!(!hub.has_channel(&chain));
        assert!(matches!(
            hub.subscribe(id, &chain),
            Err(HubError::ConnectionNotFound(_))
        ));
        assert!(matches!(hub.close(id), Err(HubError::ConnectionNotFound(_))));
        assert_eq!(hub.connection_count(), 0);
    }

    #[test]
    fn test_delivery_failure_closes_only_that_connection() {
        let hub = hub(16);
        let channel = ChannelName::chain(1);
        let (gone, gone_rx) = open(&hub);
        let (healthy, healthy_rx) = open(&hub);
        hub.subscribe(gone, &channel).unwrap();
        hub.subscribe(healthy, &channel).unwrap();

        drop(gone_rx);
        assert_eq!(hub.broadcast(&channel, notice("e1")), 1);

        assert!(!hub.registry().contains(gone));
        assert!(!hub.is_member(gone, &channel));
        assert!(hub.is_member(healthy, &channel));
        assert_eq!(drain_titles(&healthy_rx), vec!["e1"]);
    }

    #[test]
    fn test_undrained_queue_does_not_block_healthy_member() {
        let hub = hub(2);
        let channel = ChannelName::chain(1);
        let (stuck, stuck_rx) = open(&hub);
        let (healthy, healthy_rx) = open(&hub);
        hub.subscribe(stuck, &channel).unwrap();
        hub.subscribe(healthy, &channel).unwrap();

        let mut seen = Vec::new();
        for i in 0..10 {
            assert_eq!(hub.broadcast(&channel, notice(&i.to_string())), 2);
            seen.extend(drain_titles(&healthy_rx));
        }

        let expected: Vec<String> = (0..10).map(|i| i.to_string()).collect();
        assert_eq!(seen, expected);
        // Only the newest frames survive in the stuck queue.
        assert_eq!(drain_titles(&stuck_rx), vec!["8", "9"]);
    }

    #[test]
    fn test_send_to_direct_reply() {
        let hub = hub(16);
        let (id, rx) = open(&hub);

        hub.send_to(id, Event::direct(EventPayload::Pong)).unwrap();
        match rx.try_recv() {
            Some(Frame::Event(event)) => {
                assert_eq!(event.payload, EventPayload::Pong);
                assert!(event.channel.is_none());
            }
            other => panic!("unexpected frame: {other:?}"),
        }

        hub.close(id).unwrap();
        assert!(matches!(
            hub.send_to(id, Event::direct(EventPayload::Pong)),
            Err(HubError::ConnectionNotFound(_))
        ));
    }

    #[test]
    fn test_close_all() {
        let hub = hub(16);
        let (a, _a_rx) = open(&hub);
        let (_b, _b_rx) = open(&hub);
        hub.subscribe(a, &ChannelName::broadcast()).unwrap();

        assert_eq!(hub.close_all(), 2);
        assert_eq!(hub.connection_count(), 0);
        assert!(hub.members(&ChannelName::broadcast()).is_empty());
    }

    #[test]
    fn test_from_config_rejects_bad_persistent_channel() {
        let config = HubConfig {
            persistent_channels: vec!["nope:".to_string()],
            ..HubConfig::default()
        };
        assert!(matches!(
            ChannelHub::from_config(&config),
            Err(HubError::Protocol(_))
        ));
    }
}
