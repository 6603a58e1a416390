//! Symbols currently visible to the user. Orders batch output, never filters it.

use parking_lot::RwLock;
use std::collections::HashSet;
use std::sync::Arc;

use crate::message::TickUpdate;

#[derive(Debug, Default)]
pub struct PrioritySet {
    symbols: RwLock<Arc<HashSet<String>>>,
}

impl PrioritySet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the whole set atomically
    pub fn set<I, S>(&self, symbols: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let next: HashSet<String> = symbols.into_iter().map(Into::into).collect();
        *self.symbols.write() = Arc::new(next);
    }

    pub fn snapshot(&self) -> Arc<HashSet<String>> {
        self.symbols.read().clone()
    }

    pub fn contains(&self, symbol: &str) -> bool {
        self.symbols.read().contains(symbol)
    }

    /// Stable sort: priority symbols first, arrival order otherwise kept
    pub fn order(&self, entries: &mut [TickUpdate]) {
        let priority = self.snapshot();
        if priority.is_empty() {
            return;
        }
        entries.sort_by_key(|tick| !priority.contains(tick.symbol()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tick(symbol: &str) -> TickUpdate {
        TickUpdate::new(symbol, 1.0, 1.1, None, 0, "test")
    }

    fn symbols(entries: &[TickUpdate]) -> Vec<&str> {
        entries.iter().map(|t| t.symbol()).collect()
    }

    #[test]
    fn test_priority_symbols_sort_first() {
        let priority = PrioritySet::new();
        priority.set(["EURUSD"]);

        let mut entries = vec![tick("GBPUSD"), tick("EURUSD")];
        priority.order(&mut entries);
        assert_eq!(symbols(&entries), vec!["EURUSD", "GBPUSD"]);
    }

    #[test]
    fn test_order_is_stable_within_groups() {
        let priority = PrioritySet::new();
        priority.set(["XAUUSD", "EURUSD"]);

        let mut entries = vec![
            tick("GBPUSD"),
            tick("EURUSD"),
            tick("USDJPY"),
            tick("XAUUSD"),
            tick("AUDUSD"),
        ];
        priority.order(&mut entries);
        assert_eq!(
            symbols(&entries),
            vec!["EURUSD", "XAUUSD", "GBPUSD", "USDJPY", "AUDUSD"]
        );
    }

    #[test]
    fn test_never_filters() {
        let priority = PrioritySet::new();
        priority.set(["NOT_PRESENT"]);

        let mut entries = vec![tick("GBPUSD"), tick("EURUSD")];
        priority.order(&mut entries);
        assert_eq!(entries.len(), 2);
    }

    #[test]
    fn test_set_replaces_previous() {
        let priority = PrioritySet::new();
        priority.set(["EURUSD", "GBPUSD"]);
        priority.set(vec!["USDJPY".to_string()]);

        assert!(!priority.contains("EURUSD"));
        assert!(priority.contains("USDJPY"));
        assert_eq!(priority.snapshot().len(), 1);
    }
}
