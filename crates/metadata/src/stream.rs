use serde::{Deserialize, Serialize};

/// Default flush window for coalesced ticks in milliseconds
pub const DEFAULT_FLUSH_INTERVAL_MS: u64 = 100;
/// Minimum flush window (anything lower is a busy loop)
pub const MIN_FLUSH_INTERVAL_MS: u64 = 10;
/// Default app-level ping interval in milliseconds
pub const DEFAULT_HEARTBEAT_INTERVAL_MS: u64 = 30_000;
/// Default time to wait for a pong before the link is declared dead
pub const DEFAULT_PONG_TIMEOUT_MS: u64 = 10_000;
/// Default first reconnect delay in milliseconds
pub const DEFAULT_RECONNECT_BASE_MS: u64 = 1_000;
/// Default upper bound on reconnect delay in milliseconds
pub const DEFAULT_RECONNECT_CAP_MS: u64 = 30_000;
/// Default bound on a single connect attempt in milliseconds
pub const DEFAULT_CONNECT_TIMEOUT_MS: u64 = 10_000;
/// Default outbound command queue capacity while disconnected
pub const DEFAULT_COMMAND_QUEUE_CAPACITY: usize = 256;
/// Minimum outbound command queue capacity
pub const MIN_COMMAND_QUEUE_CAPACITY: usize = 1;
/// Default preallocated symbol slots in the tick buffer
pub const DEFAULT_TICK_BUFFER_CAPACITY: usize = 512;
/// Default interval between stats log lines in seconds
pub const DEFAULT_STATS_INTERVAL_SECS: u64 = 60;

fn default_flush_interval_ms() -> u64 {
    DEFAULT_FLUSH_INTERVAL_MS
}

fn default_heartbeat_interval_ms() -> u64 {
    DEFAULT_HEARTBEAT_INTERVAL_MS
}

fn default_pong_timeout_ms() -> u64 {
    DEFAULT_PONG_TIMEOUT_MS
}

fn default_reconnect_base_ms() -> u64 {
    DEFAULT_RECONNECT_BASE_MS
}

fn default_reconnect_cap_ms() -> u64 {
    DEFAULT_RECONNECT_CAP_MS
}

fn default_connect_timeout_ms() -> u64 {
    DEFAULT_CONNECT_TIMEOUT_MS
}

fn default_command_queue_capacity() -> usize {
    DEFAULT_COMMAND_QUEUE_CAPACITY
}

fn default_tick_buffer_capacity() -> usize {
    DEFAULT_TICK_BUFFER_CAPACITY
}

fn default_stats_interval_secs() -> u64 {
    DEFAULT_STATS_INTERVAL_SECS
}

/// Timing and capacity knobs for the connection manager
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamConfig {
    #[serde(default = "default_flush_interval_ms")]
    pub flush_interval_ms: u64,
    #[serde(default = "default_heartbeat_interval_ms")]
    pub heartbeat_interval_ms: u64,
    #[serde(default = "default_pong_timeout_ms")]
    pub pong_timeout_ms: u64,
    #[serde(default = "default_reconnect_base_ms")]
    pub reconnect_base_ms: u64,
    #[serde(default = "default_reconnect_cap_ms")]
    pub reconnect_cap_ms: u64,
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
    #[serde(default = "default_command_queue_capacity")]
    pub command_queue_capacity: usize,
    #[serde(default = "default_tick_buffer_capacity")]
    pub tick_buffer_capacity: usize,
    #[serde(default = "default_stats_interval_secs")]
    pub stats_interval_secs: u64,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            flush_interval_ms: default_flush_interval_ms(),
            heartbeat_interval_ms: default_heartbeat_interval_ms(),
            pong_timeout_ms: default_pong_timeout_ms(),
            reconnect_base_ms: default_reconnect_base_ms(),
            reconnect_cap_ms: default_reconnect_cap_ms(),
            connect_timeout_ms: default_connect_timeout_ms(),
            command_queue_capacity: default_command_queue_capacity(),
            tick_buffer_capacity: default_tick_buffer_capacity(),
            stats_interval_secs: default_stats_interval_secs(),
        }
    }
}

impl StreamConfig {
    /// Clamp values that would make the manager spin or never queue.
    /// Returns a tuple of (validated_config, was_clamped).
    pub fn validated(mut self) -> (Self, bool) {
        let mut clamped = false;
        if self.flush_interval_ms < MIN_FLUSH_INTERVAL_MS {
            self.flush_interval_ms = MIN_FLUSH_INTERVAL_MS;
            clamped = true;
        }
        if self.command_queue_capacity < MIN_COMMAND_QUEUE_CAPACITY {
            self.command_queue_capacity = MIN_COMMAND_QUEUE_CAPACITY;
            clamped = true;
        }
        if self.reconnect_base_ms == 0 {
            self.reconnect_base_ms = 1;
            clamped = true;
        }
        if self.reconnect_cap_ms < self.reconnect_base_ms {
            self.reconnect_cap_ms = self.reconnect_base_ms;
            clamped = true;
        }
        (self, clamped)
    }
}
