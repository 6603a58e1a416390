//! Prometheus metrics for the connection manager
//!
//! Counters for tick coalescing, command queue pressure, handler failures and
//! connection churn, labelled by feed.

use once_cell::sync::Lazy;
use prometheus::{
    register_int_counter_vec, register_int_gauge_vec, Encoder, IntCounterVec, IntGaugeVec,
    TextEncoder,
};

/// Labels used for metrics
const LABEL_FEED: &str = "feed";
const LABEL_REASON: &str = "reason";

/// Ticks received from the wire
static TICKS_RECEIVED: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "rtx_connector_ticks_received_total",
        "Total ticks received by the connector",
        &[LABEL_FEED]
    )
    .expect("Failed to register ticks_received_total metric")
});

/// Ticks overwritten by a newer tick for the same symbol before a flush
static TICKS_COALESCED: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "rtx_connector_ticks_coalesced_total",
        "Ticks superseded within a flush window",
        &[LABEL_FEED]
    )
    .expect("Failed to register ticks_coalesced_total metric")
});

/// Tick batches delivered to subscribers
static BATCHES_DELIVERED: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "rtx_connector_batches_delivered_total",
        "Tick batches delivered to subscribers",
        &[LABEL_FEED]
    )
    .expect("Failed to register batches_delivered_total metric")
});

/// Frames dropped because they could not be parsed
static MALFORMED_MESSAGES: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "rtx_connector_malformed_messages_total",
        "Inbound frames dropped as unparseable",
        &[LABEL_FEED]
    )
    .expect("Failed to register malformed_messages_total metric")
});

/// Outbound commands evicted from a full queue
static COMMANDS_DROPPED: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "rtx_connector_commands_dropped_total",
        "Queued commands dropped on overflow",
        &[LABEL_FEED]
    )
    .expect("Failed to register commands_dropped_total metric")
});

/// Commands waiting for a connection
static COMMAND_QUEUE_DEPTH: Lazy<IntGaugeVec> = Lazy::new(|| {
    register_int_gauge_vec!(
        "rtx_connector_command_queue_depth",
        "Outbound commands queued while disconnected",
        &[LABEL_FEED]
    )
    .expect("Failed to register command_queue_depth metric")
});

/// Subscriber handlers that returned an error or panicked
static HANDLER_ERRORS: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "rtx_connector_handler_errors_total",
        "Subscriber handler failures",
        &[LABEL_FEED]
    )
    .expect("Failed to register handler_errors_total metric")
});

/// Connection losses by close reason
static DISCONNECTS: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "rtx_connector_disconnects_total",
        "Connection losses by reason",
        &[LABEL_FEED, LABEL_REASON]
    )
    .expect("Failed to register disconnects_total metric")
});

/// WebSocket connection status (1 = connected, 0 = disconnected)
static WEBSOCKET_CONNECTED: Lazy<IntGaugeVec> = Lazy::new(|| {
    register_int_gauge_vec!(
        "rtx_connector_websocket_connected",
        "WebSocket connection status (1=connected, 0=disconnected)",
        &[LABEL_FEED]
    )
    .expect("Failed to register websocket_connected metric")
});

/// Handle for recording metrics for a specific feed
#[derive(Clone, Debug)]
pub struct ConnectorMetrics {
    feed: String,
}

impl ConnectorMetrics {
    pub fn new(feed: impl Into<String>) -> Self {
        Self { feed: feed.into() }
    }

    pub fn inc_ticks_received(&self) {
        TICKS_RECEIVED.with_label_values(&[&self.feed]).inc();
    }

    pub fn inc_ticks_coalesced(&self) {
        TICKS_COALESCED.with_label_values(&[&self.feed]).inc();
    }

    pub fn inc_batches_delivered(&self) {
        BATCHES_DELIVERED.with_label_values(&[&self.feed]).inc();
    }

    pub fn inc_malformed(&self) {
        MALFORMED_MESSAGES.with_label_values(&[&self.feed]).inc();
    }

    pub fn inc_commands_dropped(&self) {
        COMMANDS_DROPPED.with_label_values(&[&self.feed]).inc();
    }

    pub fn set_queue_depth(&self, depth: usize) {
        COMMAND_QUEUE_DEPTH
            .with_label_values(&[&self.feed])
            .set(depth as i64);
    }

    pub fn inc_handler_errors(&self) {
        HANDLER_ERRORS.with_label_values(&[&self.feed]).inc();
    }

    /// Record a lost connection; `reason` should be a short static label
    pub fn inc_disconnects(&self, reason: &str) {
        DISCONNECTS.with_label_values(&[&self.feed, reason]).inc();
    }

    pub fn set_connected(&self) {
        WEBSOCKET_CONNECTED.with_label_values(&[&self.feed]).set(1);
    }

    pub fn set_disconnected(&self) {
        WEBSOCKET_CONNECTED.with_label_values(&[&self.feed]).set(0);
    }
}

/// Encode all metrics to Prometheus text format
pub fn encode_metrics() -> Result<String, prometheus::Error> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer)?;
    String::from_utf8(buffer).map_err(|e| {
        prometheus::Error::Msg(format!("Failed to encode metrics as UTF-8: {}", e))
    })
}
