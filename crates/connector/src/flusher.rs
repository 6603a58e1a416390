//! Flush scheduler: drains the tick buffer on a fixed interval
//!
//! Each non-empty window produces exactly one `ticks_batch` event, priority
//! symbols first. The timer runs regardless of connection state and stops
//! only on shutdown.

use std::sync::Arc;
use std::time::Duration;
use tokio::select;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval, interval_at, Instant, MissedTickBehavior};
use tracing::{debug, info};

use crate::message::{Event, TickBatch};
use crate::priority::PrioritySet;
use crate::registry::Registry;
use crate::tick_buffer::{FlushStats, TickBuffer};

pub struct FlushScheduler {
    feed: String,
    buffer: Arc<TickBuffer>,
    priority: Arc<PrioritySet>,
    registry: Registry,
    flush_interval: Duration,
    stats_interval: Duration,
}

impl FlushScheduler {
    pub fn new(
        feed: impl Into<String>,
        buffer: Arc<TickBuffer>,
        priority: Arc<PrioritySet>,
        registry: Registry,
        flush_interval: Duration,
        stats_interval: Duration,
    ) -> Self {
        Self {
            feed: feed.into(),
            buffer,
            priority,
            registry,
            flush_interval,
            stats_interval,
        }
    }

    /// Drain once and deliver. Returns the batch size, 0 if nothing was buffered.
    pub fn flush_once(&self) -> usize {
        let Some(entries) = self.buffer.drain_ordered(&self.priority) else {
            return 0;
        };
        let size = entries.len();
        let delivery = self
            .registry
            .route(&Event::TicksBatch(TickBatch { entries }));
        debug!(
            size,
            delivered = delivery.delivered,
            failed = delivery.failed,
            "Delivered tick batch"
        );
        size
    }

    /// Run until `shutdown` flips to true or its sender is dropped
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let mut flush = interval(self.flush_interval);
        flush.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut stats = interval_at(Instant::now() + self.stats_interval, self.stats_interval);
        stats.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut last = self.buffer.stats();

        info!(
            feed = %self.feed,
            flush_interval_ms = self.flush_interval.as_millis() as u64,
            "Flush scheduler started"
        );

        loop {
            select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
                _ = flush.tick() => {
                    self.flush_once();
                }
                _ = stats.tick() => {
                    let now = self.buffer.stats();
                    log_stats(&self.feed, &last, &now);
                    last = now;
                }
            }
        }

        info!(feed = %self.feed, "Flush scheduler stopped");
    }

    pub fn spawn(self, shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        tokio::spawn(self.run(shutdown))
    }
}

fn log_stats(feed: &str, last: &FlushStats, now: &FlushStats) {
    info!(
        feed = %feed,
        received = now.ticks_received - last.ticks_received,
        coalesced = now.ticks_coalesced - last.ticks_coalesced,
        batches = now.batches_delivered - last.batches_delivered,
        "Tick stats"
    );
}
