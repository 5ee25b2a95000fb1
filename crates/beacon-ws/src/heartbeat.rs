//! Client-side heartbeat tracking.
//!
//! A `ping` goes out after the connection has been idle for the interval;
//! the matching `pong` must arrive within the timeout or the connection is
//! treated as abnormally closed.

use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

#[derive(Debug)]
pub struct ClientHeartbeat {
    interval: Duration,
    timeout: Duration,
    last_message: Instant,
    ping_sent_at: Option<Instant>,
}

impl ClientHeartbeat {
    pub fn new(interval_ms: u64, timeout_ms: u64) -> Self {
        Self {
            interval: Duration::from_millis(interval_ms),
            timeout: Duration::from_millis(timeout_ms),
            last_message: Instant::now(),
            ping_sent_at: None,
        }
    }

    /// Reset on every new connection.
    pub fn reset(&mut self) {
        self.last_message = Instant::now();
        self.ping_sent_at = None;
    }

    /// Any inbound frame counts as activity.
    pub fn record_message(&mut self) {
        self.last_message = Instant::now();
    }

    pub fn record_ping(&mut self) {
        self.ping_sent_at = Some(Instant::now());
    }

    pub fn record_pong(&mut self) {
        self.last_message = Instant::now();
        if let Some(sent) = self.ping_sent_at.take() {
            debug!(rtt_ms = sent.elapsed().as_millis() as u64, "Received pong");
        }
    }

    pub fn waiting_for_pong(&self) -> bool {
        self.ping_sent_at.is_some()
    }

    pub fn is_timed_out(&self) -> bool {
        self.ping_sent_at
            .is_some_and(|sent| sent.elapsed() > self.timeout)
    }

    pub fn should_send_ping(&self) -> bool {
        !self.waiting_for_pong() && self.last_message.elapsed() >= self.interval
    }

    /// How often the connection loop should evaluate the heartbeat.
    pub fn check_period(&self) -> Duration {
        (self.interval.min(self.timeout) / 2).max(Duration::from_millis(1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_ping_after_idle_interval() {
        let mut heartbeat = ClientHeartbeat::new(1_000, 500);
        assert!(!heartbeat.should_send_ping());

        tokio::time::advance(Duration::from_millis(600)).await;
        heartbeat.record_message();
        tokio::time::advance(Duration::from_millis(600)).await;
        assert!(!heartbeat.should_send_ping());

        tokio::time::advance(Duration::from_millis(400)).await;
        assert!(heartbeat.should_send_ping());
    }

    #[tokio::test(start_paused = true)]
    async fn test_missing_pong_times_out() {
        let mut heartbeat = ClientHeartbeat::new(1_000, 500);
        heartbeat.record_ping();
        assert!(!heartbeat.should_send_ping());

        tokio::time::advance(Duration::from_millis(500)).await;
        assert!(!heartbeat.is_timed_out());
        tokio::time::advance(Duration::from_millis(1)).await;
        assert!(heartbeat.is_timed_out());
    }

    #[tokio::test(start_paused = true)]
    async fn test_pong_clears_wait() {
        let mut heartbeat = ClientHeartbeat::new(1_000, 500);
        heartbeat.record_ping();
        tokio::time::advance(Duration::from_millis(100)).await;
        heartbeat.record_pong();
        assert!(!heartbeat.waiting_for_pong());

        tokio::time::advance(Duration::from_secs(5)).await;
        assert!(!heartbeat.is_timed_out());
        assert!(heartbeat.should_send_ping());
    }

    #[test]
    fn test_check_period() {
        assert_eq!(
            ClientHeartbeat::new(30_000, 10_000).check_period(),
            Duration::from_millis(5_000)
        );
        assert_eq!(
            ClientHeartbeat::new(1, 1).check_period(),
            Duration::from_millis(1)
        );
    }
}
