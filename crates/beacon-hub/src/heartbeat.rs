//! Server-side heartbeat monitor.
//!
//! Pings every open connection once per interval and reaps connections
//! that have been silent (no pong, no other inbound frame) for the
//! configured timeout. Sweeps run every `min(interval, timeout) / 2`. This is the only path that reclaims peers whose
//! network dropped without a close frame.

use crate::config::HeartbeatConfig;
use crate::hub::ChannelHub;
use crate::queue::Frame;
use crate::registry::ConnectionState;
use beacon_telemetry::Metrics;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Outcome of one sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub pinged: usize,
    pub reaped: usize,
}

pub struct HeartbeatMonitor {
    hub: Arc<ChannelHub>,
    interval: Duration,
    timeout: Duration,
    check_period: Duration,
}

impl HeartbeatMonitor {
    pub fn new(hub: Arc<ChannelHub>, config: &HeartbeatConfig) -> Self {
        Self {
            hub,
            interval: config.interval(),
            timeout: config.timeout(),
            check_period: config.check_period(),
        }
    }

    /// How often `run` sweeps.
    pub fn check_period(&self) -> Duration {
        self.check_period
    }

    /// Check every connection once.
    pub fn sweep(&self) -> SweepReport {
        let now = Instant::now();
        let mut report = SweepReport::default();

        for connection in self.hub.registry().snapshot() {
            let id = connection.id();
            let idle = now.saturating_duration_since(connection.last_seen());

            if idle >= self.timeout {
                if self.hub.close(id).is_ok() {
                    report.reaped += 1;
                    Metrics::heartbeat_reaped();
                    warn!(
                        connection_id = %id,
                        idle_ms = idle.as_millis() as u64,
                        "Heartbeat timeout, connection reaped"
                    );
                }
                continue;
            }

            if !matches!(
                connection.state(),
                ConnectionState::Open | ConnectionState::Authenticated
            ) {
                continue;
            }

            let last_ping = connection.last_ping().unwrap_or(connection.opened_at());
            let since_ping = now.saturating_duration_since(last_ping);
            if since_ping >= self.interval && self.hub.push_frame(id, Frame::Ping).is_ok() {
                connection.record_ping(now);
                report.pinged += 1;
            }
        }

        if report != SweepReport::default() {
            debug!(pinged = report.pinged, reaped = report.reaped, "Heartbeat sweep");
        }
        report
    }

    /// Sweep every `check_period` until shutdown.
    pub async fn run(self, shutdown: CancellationToken) {
        let mut ticker = tokio::time::interval(self.check_period());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!(
            interval_ms = self.interval.as_millis() as u64,
            timeout_ms = self.timeout.as_millis() as u64,
            "Heartbeat monitor started"
        );

        loop {
            tokio::select! {
                biased;

                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    self.sweep();
                }
            }
        }
        info!("Heartbeat monitor stopped");
    }
}
