//! Per-symbol overwrite buffer for ticks between flushes
//!
//! Slots live in a Vec indexed by a symbol map, so a flush window keeps
//! first-arrival order and the allocation is reused across flushes.

use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::message::TickUpdate;
use crate::metrics::ConnectorMetrics;
use crate::priority::PrioritySet;

/// Counters since the buffer was created
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FlushStats {
    pub ticks_received: u64,
    pub ticks_coalesced: u64,
    pub batches_delivered: u64,
}

#[derive(Debug, Default)]
struct Slots {
    index: HashMap<String, usize>,
    entries: Vec<TickUpdate>,
}

pub struct TickBuffer {
    slots: Mutex<Slots>,
    /// Last drained tick per symbol
    latest: RwLock<HashMap<String, TickUpdate>>,
    ticks_received: AtomicU64,
    ticks_coalesced: AtomicU64,
    batches_delivered: AtomicU64,
    metrics: ConnectorMetrics,
}

impl TickBuffer {
    pub fn new(capacity: usize, metrics: ConnectorMetrics) -> Self {
        Self {
            slots: Mutex::new(Slots {
                index: HashMap::with_capacity(capacity),
                entries: Vec::with_capacity(capacity),
            }),
            latest: RwLock::new(HashMap::with_capacity(capacity)),
            ticks_received: AtomicU64::new(0),
            ticks_coalesced: AtomicU64::new(0),
            batches_delivered: AtomicU64::new(0),
            metrics,
        }
    }

    /// Store a tick; a newer tick for the same symbol replaces the older one.
    /// Returns true if an earlier tick was overwritten.
    pub fn buffer_tick(&self, tick: TickUpdate) -> bool {
        self.ticks_received.fetch_add(1, Ordering::Relaxed);
        self.metrics.inc_ticks_received();

        let mut slots = self.slots.lock();
        let existing = slots.index.get(tick.symbol()).copied();
        if let Some(slot) = existing {
            slots.entries[slot] = tick;
            drop(slots);
            self.ticks_coalesced.fetch_add(1, Ordering::Relaxed);
            self.metrics.inc_ticks_coalesced();
            return true;
        }

        let slot = slots.entries.len();
        slots.index.insert(tick.symbol().to_string(), slot);
        slots.entries.push(tick);
        false
    }

    /// Take every buffered tick, priority symbols first. None if empty.
    pub fn drain_ordered(&self, priority: &PrioritySet) -> Option<Vec<TickUpdate>> {
        let mut batch = {
            let mut slots = self.slots.lock();
            if slots.entries.is_empty() {
                return None;
            }
            slots.index.clear();
            slots.entries.drain(..).collect::<Vec<_>>()
        };

        priority.order(&mut batch);

        {
            let mut latest = self.latest.write();
            for tick in &batch {
                latest.insert(tick.symbol().to_string(), tick.clone());
            }
        }

        self.batches_delivered.fetch_add(1, Ordering::Relaxed);
        self.metrics.inc_batches_delivered();
        Some(batch)
    }

    pub fn len(&self) -> usize {
        self.slots.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.lock().entries.is_empty()
    }

    /// Most recent tick delivered for `symbol`
    pub fn last_tick(&self, symbol: &str) -> Option<TickUpdate> {
        self.latest.read().get(symbol).cloned()
    }

    pub fn stats(&self) -> FlushStats {
        FlushStats {
            ticks_received: self.ticks_received.load(Ordering::Relaxed),
            ticks_coalesced: self.ticks_coalesced.load(Ordering::Relaxed),
            batches_delivered: self.batches_delivered.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn buffer() -> TickBuffer {
        TickBuffer::new(16, ConnectorMetrics::new("tick-buffer-test"))
    }

    fn tick(symbol: &str, bid: f64) -> TickUpdate {
        TickUpdate::new(symbol, bid, bid + 0.0002, None, 1_700_000_000_000, "test")
    }

    #[test]
    fn test_last_update_wins() {
        let buffer = buffer();
        let priority = PrioritySet::new();

        for i in 0..50 {
            buffer.buffer_tick(tick("X", 1.0 + i as f64));
        }

        let batch = buffer.drain_ordered(&priority).unwrap();
        assert_eq!(batch.len(), 1);
        assert_eq!(batch[0].symbol(), "X");
        assert_eq!(batch[0].bid(), 50.0);
    }

    #[test]
    fn test_one_entry_per_symbol() {
        let buffer = buffer();
        assert!(!buffer.buffer_tick(tick("EURUSD", 1.0)));
        assert!(!buffer.buffer_tick(tick("GBPUSD", 1.2)));
        assert!(buffer.buffer_tick(tick("EURUSD", 1.1)));
        assert_eq!(buffer.len(), 2);
    }

    #[test]
    fn test_empty_drain_returns_none() {
        let buffer = buffer();
        assert!(buffer.drain_ordered(&PrioritySet::new()).is_none());
        assert_eq!(buffer.stats().batches_delivered, 0);
    }

    #[test]
    fn test_drain_clears_buffer() {
        let buffer = buffer();
        let priority = PrioritySet::new();
        buffer.buffer_tick(tick("EURUSD", 1.0));
        assert!(buffer.drain_ordered(&priority).is_some());
        assert!(buffer.is_empty());
        assert!(buffer.drain_ordered(&priority).is_none());
    }

    #[test]
    fn test_arrival_order_kept_without_priority() {
        let buffer = buffer();
        for symbol in ["USDJPY", "EURUSD", "GBPUSD"] {
            buffer.buffer_tick(tick(symbol, 1.0));
        }
        buffer.buffer_tick(tick("USDJPY", 2.0));

        let batch = buffer.drain_ordered(&PrioritySet::new()).unwrap();
        let order: Vec<_> = batch.iter().map(|t| t.symbol()).collect();
        assert_eq!(order, vec!["USDJPY", "EURUSD", "GBPUSD"]);
    }

    #[test]
    fn test_priority_orders_drain() {
        let buffer = buffer();
        let priority = PrioritySet::new();
        priority.set(["EURUSD"]);

        buffer.buffer_tick(tick("GBPUSD", 1.25));
        buffer.buffer_tick(tick("EURUSD", 1.08));

        let batch = buffer.drain_ordered(&priority).unwrap();
        assert_eq!(batch[0].symbol(), "EURUSD");
        assert_eq!(batch[1].symbol(), "GBPUSD");
    }

    #[test]
    fn test_last_tick_tracks_delivered_prices() {
        let buffer = buffer();
        let priority = PrioritySet::new();
        assert!(buffer.last_tick("EURUSD").is_none());

        buffer.buffer_tick(tick("EURUSD", 1.08));
        buffer.drain_ordered(&priority);
        buffer.buffer_tick(tick("EURUSD", 1.09));

        assert_eq!(buffer.last_tick("EURUSD").unwrap().bid(), 1.08);
        buffer.drain_ordered(&priority);
        assert_eq!(buffer.last_tick("EURUSD").unwrap().bid(), 1.09);
    }

    #[test]
    fn test_stats() {
        let buffer = buffer();
        buffer.buffer_tick(tick("EURUSD", 1.0));
        buffer.buffer_tick(tick("EURUSD", 1.1));
        buffer.buffer_tick(tick("GBPUSD", 1.2));
        buffer.drain_ordered(&PrioritySet::new());

        assert_eq!(
            buffer.stats(),
            FlushStats {
                ticks_received: 3,
                ticks_coalesced: 1,
                batches_delivered: 1,
            }
        );
    }
}
