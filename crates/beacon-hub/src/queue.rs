//! Bounded per-connection outbound queue.
//!
//! Producers never block: when the queue is full the oldest frame is
//! evicted. A single writer task drains the receiving half. Dropping the
//! receiver closes the queue, so later pushes report a delivery failure.
//! Closing from either side cancels `closed_token`.

use beacon_core::Event;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

/// Frame waiting to be written to a socket.
#[derive(Debug, Clone)]
pub enum Frame {
    /// Serialized on the writer task.
    Event(Arc<Event>),
    /// Transport-level ping from the heartbeat monitor.
    Ping,
}

/// Result of a successful push.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushOutcome {
    Queued,
    /// Queue was full; the oldest frame was evicted to make room.
    DroppedOldest,
}

/// The receiving half is gone.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueClosed;

#[derive(Debug)]
struct QueueState {
    frames: VecDeque<Frame>,
    closed: bool,
    dropped: u64,
}

#[derive(Debug)]
struct Shared {
    state: Mutex<QueueState>,
    notify: Notify,
    capacity: usize,
    closed: CancellationToken,
}

/// Create a queue holding at most `capacity` frames (minimum 1).
pub fn outbound_queue(capacity: usize) -> (OutboundQueue, OutboundReceiver) {
    let capacity = capacity.max(1);
    let shared = Arc::new(Shared {
        state: Mutex::new(QueueState {
            frames: VecDeque::with_capacity(capacity.min(1024)),
            closed: false,
            dropped: 0,
        }),
        notify: Notify::new(),
        capacity,
        closed: CancellationToken::new(),
    });
    (
        OutboundQueue {
            shared: shared.clone(),
        },
        OutboundReceiver { shared },
    )
}

/// Producer half, owned by the connection.
#[derive(Debug, Clone)]
pub struct OutboundQueue {
    shared: Arc<Shared>,
}

impl OutboundQueue {
    /// Enqueue a frame without blocking.
    pub fn push(&self, frame: Frame) -> Result<PushOutcome, QueueClosed> {
        let outcome = {
            let mut state = self.shared.state.lock();
            if state.closed {
                return Err(QueueClosed);
            }

            let outcome = if state.frames.len() >= self.shared.capacity {
                state.frames.pop_front();
                state.dropped += 1;
                PushOutcome::DroppedOldest
            } else {
                PushOutcome::Queued
            };
            state.frames.push_back(frame);
            outcome
        };

        self.shared.notify.notify_one();
        Ok(outcome)
    }

    /// Close the queue. Frames already queued are still drained.
    pub fn close(&self) {
        self.shared.state.lock().closed = true;
        self.shared.notify.notify_one();
        self.shared.closed.cancel();
    }

    pub fn is_closed(&self) -> bool {
        self.shared.state.lock().closed
    }

    pub fn len(&self) -> usize {
        self.shared.state.lock().frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Total frames evicted by overflow.
    pub fn dropped(&self) -> u64 {
        self.shared.state.lock().dropped
    }

    pub fn capacity(&self) -> usize {
        self.shared.capacity
    }
}

/// Consumer half, owned by the connection's writer task.
#[derive(Debug)]
pub struct OutboundReceiver {
    shared: Arc<Shared>,
}

impl OutboundReceiver {
    /// Wait for the next frame. Returns `None` once closed and drained.
    pub async fn recv(&self) -> Option<Frame> {
        loop {
            {
                let mut state = self.shared.state.lock();
                if let Some(frame) = state.frames.pop_front() {
                    return Some(frame);
                }
                if state.closed {
                    return None;
                }
            }
            // Single consumer: a notify_one issued before we wait leaves a permit.
            self.shared.notify.notified().await;
        }
    }

    /// Take the next frame if one is ready.
    pub fn try_recv(&self) -> Option<Frame> {
        self.shared.state.lock().frames.pop_front()
    }

    /// Cancelled once the queue is closed.
    pub fn closed_token(&self) -> CancellationToken {
        self.shared.closed.clone()
    }
}

impl Drop for OutboundReceiver {
    fn drop(&mut self) {
        {
            let mut state = self.shared.state.lock();
            state.closed = true;
            state.frames.clear();
        }
        self.shared.closed.cancel();
    }
}
