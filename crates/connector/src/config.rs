//! Runtime configuration for the connection manager

use rtx_metadata::{Feed, StreamConfig};
use std::time::Duration;
use tracing::warn;

#[derive(Debug, Clone, PartialEq)]
pub struct ManagerConfig {
    /// Feed name, used as the metrics label and in logs
    pub feed: String,
    pub flush_interval: Duration,
    pub heartbeat_interval: Duration,
    pub pong_timeout: Duration,
    pub reconnect_base: Duration,
    pub reconnect_cap: Duration,
    pub connect_timeout: Duration,
    pub command_queue_capacity: usize,
    pub tick_buffer_capacity: usize,
    pub stats_interval: Duration,
}

impl ManagerConfig {
    /// Defaults for every knob
    pub fn new(feed: impl Into<String>) -> Self {
        Self::from_stream(feed, &StreamConfig::default())
    }

    /// Build from a stream block, clamping out-of-range values
    pub fn from_stream(feed: impl Into<String>, stream: &StreamConfig) -> Self {
        let feed = feed.into();
        let (stream, clamped) = stream.clone().validated();
        if clamped {
            warn!(feed = %feed, ?stream, "Stream config out of range, clamped");
        }
        Self {
            feed,
            flush_interval: Duration::from_millis(stream.flush_interval_ms),
            heartbeat_interval: Duration::from_millis(stream.heartbeat_interval_ms.max(1)),
            pong_timeout: Duration::from_millis(stream.pong_timeout_ms.max(1)),
            reconnect_base: Duration::from_millis(stream.reconnect_base_ms),
            reconnect_cap: Duration::from_millis(stream.reconnect_cap_ms),
            connect_timeout: Duration::from_millis(stream.connect_timeout_ms.max(1)),
            command_queue_capacity: stream.command_queue_capacity,
            tick_buffer_capacity: stream.tick_buffer_capacity,
            stats_interval: Duration::from_secs(stream.stats_interval_secs.max(1)),
        }
    }

    pub fn from_feed(feed: &Feed) -> Self {
        Self::from_stream(feed.name.as_str(), &feed.stream)
    }
}
