//! Server-side connection registry.
//!
//! The registry exclusively owns every live `Connection`. Channel member
//! sets only hold `ConnectionId`s and resolve them here at fan-out time.
//!
//! Lifecycle: `Connecting → Open → (Authenticated) → Closing → Closed`.
//! Once removed, every lookup of the id fails with `ConnectionNotFound`.

use crate::error::{HubError, HubResult};
use crate::queue::{outbound_queue, Frame, OutboundQueue, OutboundReceiver, PushOutcome};
use beacon_core::{ChannelName, ConnectionId};
use beacon_telemetry::Metrics;
use dashmap::DashMap;
use parking_lot::{Mutex, MutexGuard};
use std::collections::BTreeSet;
use std::sync::Arc;
use tokio::time::Instant;
use tracing::{debug, info};

/// Connection lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connecting,
    Open,
    Authenticated,
    Closing,
    Closed,
}

impl ConnectionState {
    /// Whether the connection accepts subscriptions and deliveries.
    pub fn is_live(&self) -> bool {
        matches!(self, Self::Connecting | Self::Open | Self::Authenticated)
    }
}

/// Mutable connection state guarded by one lock.
///
/// Lock order: `ConnectionInner` before any channel entry.
#[derive(Debug)]
pub(crate) struct ConnectionInner {
    pub(crate) state: ConnectionState,
    pub(crate) identity: Option<String>,
    pub(crate) channels: BTreeSet<ChannelName>,
}

#[derive(Debug, Clone, Copy)]
struct Liveness {
    last_seen: Instant,
    last_ping: Option<Instant>,
}

/// A live server-side connection.
#[derive(Debug)]
pub struct Connection {
    id: ConnectionId,
    opened_at: Instant,
    inner: Mutex<ConnectionInner>,
    liveness: Mutex<Liveness>,
    queue: OutboundQueue,
}

impl Connection {
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn state(&self) -> ConnectionState {
        self.inner.lock().state
    }

    pub fn identity(&self) -> Option<String> {
        self.inner.lock().identity.clone()
    }

    /// Channels this connection is currently a member of.
    pub fn channels(&self) -> Vec<ChannelName> {
        self.inner.lock().channels.iter().cloned().collect()
    }

    pub fn opened_at(&self) -> Instant {
        self.opened_at
    }

    /// Last time any inbound frame (or pong) was observed.
    pub fn last_seen(&self) -> Instant {
        self.liveness.lock().last_seen
    }

    pub fn last_ping(&self) -> Option<Instant> {
        self.liveness.lock().last_ping
    }

    pub(crate) fn record_ping(&self, at: Instant) {
        self.liveness.lock().last_ping = Some(at);
    }

    /// Frames currently waiting in the outbound queue.
    pub fn queued(&self) -> usize {
        self.queue.len()
    }

    pub(crate) fn lock(&self) -> MutexGuard<'_, ConnectionInner> {
        self.inner.lock()
    }

    pub(crate) fn push(&self, frame: Frame) -> HubResult<PushOutcome> {
        self.queue
            .push(frame)
            .map_err(|_| HubError::DeliveryFailure(self.id))
    }

    pub(crate) fn close_queue(&self) {
        self.queue.close();
    }
}

/// Registry of live connections.
pub struct ConnectionRegistry {
    connections: DashMap<ConnectionId, Arc<Connection>>,
    queue_capacity: usize,
}

impl ConnectionRegistry {
    /// Create a registry whose connections get `queue_capacity`-bounded queues.
    pub fn new(queue_capacity: usize) -> Self {
        Self {
            connections: DashMap::new(),
            queue_capacity,
        }
    }

    /// Register a new connection in `Connecting` state.
    ///
    /// Returns the id and the receiving half of its outbound queue, which
    /// the transport hands to the connection's writer task.
    pub fn open(&self) -> (ConnectionId, OutboundReceiver) {
        let id = ConnectionId::new();
        let (queue, receiver) = outbound_queue(self.queue_capacity);
        let now = Instant::now();
        let connection = Arc::new(Connection {
            id,
            opened_at: now,
            inner: Mutex::new(ConnectionInner {
                state: ConnectionState::Connecting,
                identity: None,
                channels: BTreeSet::new(),
            }),
            liveness: Mutex::new(Liveness {
                last_seen: now,
                last_ping: None,
            }),
            queue,
        });
        self.connections.insert(id, connection);
        Metrics::connection_opened();
        debug!(connection_id = %id, "Connection registered");
        (id, receiver)
    }

    /// `Connecting → Open`, once the transport is ready to write.
    pub fn activate(&self, id: ConnectionId) -> HubResult<()> {
        let connection = self.get(id)?;
        let mut inner = connection.lock();
        match inner.state {
            ConnectionState::Connecting => {
                inner.state = ConnectionState::Open;
                info!(connection_id = %id, "Connection open");
                Ok(())
            }
            ConnectionState::Open | ConnectionState::Authenticated => Ok(()),
            ConnectionState::Closing | ConnectionState::Closed => {
                Err(HubError::ConnectionNotFound(id))
            }
        }
    }

    /// Bind an identity to the connection.
    ///
    /// Idempotent; a second call overwrites the prior identity, which is
    /// returned so the caller can drop identity-scoped memberships.
    pub fn authenticate(&self, id: ConnectionId, identity: &str) -> HubResult<Option<String>> {
        let identity = identity.trim();
        if identity.is_empty() {
            return Err(HubError::AuthFailure("empty identity".to_string()));
        }

        let connection = self.get(id)?;
        let mut inner = connection.lock();
        if !inner.state.is_live() {
            return Err(HubError::ConnectionNotFound(id));
        }

        let previous = inner.identity.replace(identity.to_string());
        inner.state = ConnectionState::Authenticated;
        debug!(connection_id = %id, identity, "Connection authenticated");
        Ok(previous)
    }

    /// Record liveness (any inbound frame or pong).
    pub fn touch(&self, id: ConnectionId) -> HubResult<()> {
        let connection = self.get(id)?;
        connection.liveness.lock().last_seen = Instant::now();
        Ok(())
    }

    /// Look up a live connection.
    pub fn get(&self, id: ConnectionId) -> HubResult<Arc<Connection>> {
        self.connections
            .get(&id)
            .map(|entry| entry.value().clone())
            .ok_or(HubError::ConnectionNotFound(id))
    }

    pub fn contains(&self, id: ConnectionId) -> bool {
        self.connections.contains_key(&id)
    }

    /// Remove the connection. Membership cleanup is the hub's job.
    pub(crate) fn remove(&self, id: ConnectionId) -> HubResult<Arc<Connection>> {
        self.connections
            .remove(&id)
            .map(|(_, connection)| connection)
            .ok_or(HubError::ConnectionNotFound(id))
    }

    /// Snapshot of all live connections.
    pub fn snapshot(&self) -> Vec<Arc<Connection>> {
        self.connections
            .iter()
            .map(|entry| entry.value().clone())
            .collect()
    }

    pub fn ids(&self) -> Vec<ConnectionId> {
        self.connections.iter().map(|entry| *entry.key()).collect()
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }
}
