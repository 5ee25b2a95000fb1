//! Prometheus metrics for Beacon.
//!
//! Covers:
//! - Hub connections, channels and fan-out
//! - Outbound queue overflow and delivery failures
//! - Heartbeat reaping
//! - Admission decisions and store fail-open
//! - Client reconnects
//!
//! # Panics
//!
//! Metric registration uses `unwrap()`. A registration failure means duplicate
//! metric names, which is a startup configuration error; it happens only during
//! static initialization, never at runtime.

use crate::error::TelemetryResult;
use once_cell::sync::Lazy;
use prometheus::{
    register_counter, register_counter_vec, register_gauge_vec, register_histogram_vec,
    register_int_gauge, Counter, CounterVec, Encoder, GaugeVec, HistogramVec, IntGauge,
    TextEncoder,
};

/// Currently registered server-side connections.
pub static HUB_CONNECTIONS: Lazy<IntGauge> = Lazy::new(|| {
    register_int_gauge!("beacon_hub_connections", "Open server-side connections").unwrap()
});

/// Channels with at least one member (plus persistent channels).
pub static HUB_CHANNELS: Lazy<IntGauge> = Lazy::new(|| {
    register_int_gauge!("beacon_hub_channels", "Live channels in the hub").unwrap()
});

/// Broadcast invocations.
/// Labels: event_type
pub static HUB_BROADCASTS_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "beacon_hub_broadcasts_total",
        "Total broadcast invocations",
        &["event_type"]
    )
    .unwrap()
});

/// Events enqueued to members.
/// Labels: event_type
pub static HUB_DELIVERIES_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "beacon_hub_deliveries_total",
        "Total events enqueued to channel members",
        &["event_type"]
    )
    .unwrap()
});

/// Frames evicted from full outbound queues.
pub static HUB_DROPPED_TOTAL: Lazy<Counter> = Lazy::new(|| {
    register_counter!(
        "beacon_hub_dropped_total",
        "Outbound frames dropped (drop-oldest on overflow)"
    )
    .unwrap()
});

/// Per-connection delivery failures.
pub static HUB_DELIVERY_FAILURES_TOTAL: Lazy<Counter> = Lazy::new(|| {
    register_counter!(
        "beacon_hub_delivery_failures_total",
        "Per-connection delivery failures"
    )
    .unwrap()
});

/// Connections reaped by the heartbeat monitor.
pub static HUB_HEARTBEAT_REAPED_TOTAL: Lazy<Counter> = Lazy::new(|| {
    register_counter!(
        "beacon_hub_heartbeat_reaped_total",
        "Connections closed after missing heartbeats"
    )
    .unwrap()
});

/// Admission decisions.
/// Labels: category, outcome (allowed/rejected/fail_open)
pub static RATE_LIMIT_DECISIONS_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "beacon_rate_limit_decisions_total",
        "Admission decisions by category",
        &["category", "outcome"]
    )
    .unwrap()
});

/// Quota store round-trip latency in milliseconds.
pub static RATE_LIMIT_STORE_LATENCY_MS: Lazy<HistogramVec> = Lazy::new(|| {
    register_histogram_vec!(
        "beacon_rate_limit_store_latency_ms",
        "Quota store round-trip latency in milliseconds",
        &["category"],
        vec![0.5, 1.0, 2.0, 5.0, 10.0, 25.0, 50.0, 100.0, 250.0, 500.0]
    )
    .unwrap()
});

/// Client connection state machine current state.
/// Labels: state (idle/connecting/open/reconnecting/gave_up)
pub static WS_CLIENT_STATE: Lazy<GaugeVec> = Lazy::new(|| {
    register_gauge_vec!(
        "beacon_ws_client_state",
        "Client connection state (1=active, 0=inactive)",
        &["state"]
    )
    .unwrap()
});

/// Client reconnect attempts.
/// Labels: reason
pub static WS_CLIENT_RECONNECT_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "beacon_ws_client_reconnect_total",
        "Total client reconnection attempts",
        &["reason"]
    )
    .unwrap()
});

/// Metrics facade for easy access.
pub struct Metrics;

impl Metrics {
    /// Record a connection opened.
    pub fn connection_opened() {
        HUB_CONNECTIONS.inc();
    }

    /// Record a connection closed.
    pub fn connection_closed() {
        HUB_CONNECTIONS.dec();
    }

    pub fn channels_set(count: usize) {
        HUB_CHANNELS.set(count as i64);
    }

    /// Record a broadcast and the number of members it reached.
    pub fn broadcast(event_type: &str, delivered: usize) {
        HUB_BROADCASTS_TOTAL.with_label_values(&[event_type]).inc();
        HUB_DELIVERIES_TOTAL
            .with_label_values(&[event_type])
            .inc_by(delivered as f64);
    }

    pub fn frames_dropped(count: u64) {
        HUB_DROPPED_TOTAL.inc_by(count as f64);
    }

    pub fn delivery_failure() {
        HUB_DELIVERY_FAILURES_TOTAL.inc();
    }

    pub fn heartbeat_reaped() {
        HUB_HEARTBEAT_REAPED_TOTAL.inc();
    }

    /// Record an admission decision.
    pub fn admission(category: &str, outcome: &str) {
        RATE_LIMIT_DECISIONS_TOTAL
            .with_label_values(&[category, outcome])
            .inc();
    }

    pub fn store_latency(category: &str, latency_ms: f64) {
        RATE_LIMIT_STORE_LATENCY_MS
            .with_label_values(&[category])
            .observe(latency_ms);
    }

    /// Set client state machine state.
    /// Only the active state is set to 1, all others to 0.
    pub fn ws_client_state_set(state: &str) {
        for s in &["idle", "connecting", "open", "reconnecting", "gave_up"] {
            WS_CLIENT_STATE.with_label_values(&[s]).set(0.0);
        }
        WS_CLIENT_STATE.with_label_values(&[state]).set(1.0);
    }

    pub fn ws_client_reconnect(reason: &str) {
        WS_CLIENT_RECONNECT_TOTAL.with_label_values(&[reason]).inc();
    }
}

/// Render the default registry in Prometheus text format.
pub fn render_metrics() -> TelemetryResult<String> {
    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();
    encoder.encode(&prometheus::gather(), &mut buffer)?;
    Ok(String::from_utf8(buffer)?)
}
