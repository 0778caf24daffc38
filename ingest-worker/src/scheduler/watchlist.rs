//! Process-local watchlist
//!
//! Uppercase ticker set consulted by the feeds (subscription set) and the
//! per-ticker scheduler jobs. Mutations log a diff; iteration order is
//! set order, which callers must not rely on being stable across runs.

use std::collections::BTreeSet;

use parking_lot::RwLock;
use tracing::info;

use crate::schema::normalize_symbol;

#[derive(Default)]
pub struct Watchlist {
    symbols: RwLock<BTreeSet<String>>,
}

impl Watchlist {
    pub fn new(initial: &[String]) -> Self {
        let symbols: BTreeSet<String> = initial
            .iter()
            .map(|s| normalize_symbol(s))
            .filter(|s| !s.is_empty())
            .collect();
        info!("Watchlist initialized: {:?}", symbols);
        Self {
            symbols: RwLock::new(symbols),
        }
    }

    /// Replace the whole list. Returns `(added, removed)`.
    pub fn update(&self, symbols: &[String]) -> (Vec<String>, Vec<String>) {
        let next: BTreeSet<String> = symbols
            .iter()
            .map(|s| normalize_symbol(s))
            .filter(|s| !s.is_empty())
            .collect();

        let mut current = self.symbols.write();
        let added: Vec<String> = next.difference(&current).cloned().collect();
        let removed: Vec<String> = current.difference(&next).cloned().collect();
        *current = next;
        drop(current);

        if !added.is_empty() || !removed.is_empty() {
            info!("Watchlist updated: +{:?} -{:?}", added, removed);
        }
        (added, removed)
    }

    /// Add symbols; returns those actually new.
    pub fn add(&self, symbols: &[String]) -> Vec<String> {
        let mut current = self.symbols.write();
        let added: Vec<String> = symbols
            .iter()
            .map(|s| normalize_symbol(s))
            .filter(|s| !s.is_empty() && current.insert(s.clone()))
            .collect();
        drop(current);

        if !added.is_empty() {
            info!("Watchlist added: {:?}", added);
        }
        added
    }

    /// Remove symbols; returns those actually present.
    pub fn remove(&self, symbols: &[String]) -> Vec<String> {
        let mut current = self.symbols.write();
        let removed: Vec<String> = symbols
            .iter()
            .map(|s| normalize_symbol(s))
            .filter(|s| current.remove(s))
            .collect();
        drop(current);

        if !removed.is_empty() {
            info!("Watchlist removed: {:?}", removed);
        }
        removed
    }

    pub fn contains(&self, symbol: &str) -> bool {
        self.symbols.read().contains(&normalize_symbol(symbol))
    }

    /// Snapshot for iteration; jobs work off a copy so control-surface
    /// mutations mid-job do not shift the set underneath them.
    pub fn snapshot(&self) -> Vec<String> {
        self.symbols.read().iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.symbols.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.symbols.read().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_initializes_uppercased() {
        let watchlist = Watchlist::new(&["aapl".to_string(), " TSLA ".to_string()]);
        assert!(watchlist.contains("AAPL"));
        assert!(watchlist.contains("tsla"));
        assert_eq!(watchlist.len(), 2);
    }

    #[test]
    fn test_add_returns_only_new() {
        let watchlist = Watchlist::new(&["AAPL".to_string()]);
        let added = watchlist.add(&["aapl".to_string(), "NVDA".to_string()]);
        assert_eq!(added, vec!["NVDA"]);
    }

    #[test]
    fn test_remove_returns_only_present() {
        let watchlist = Watchlist::new(&["AAPL".to_string()]);
        let removed = watchlist.remove(&["AAPL".to_string(), "NVDA".to_string()]);
        assert_eq!(removed, vec!["AAPL"]);
        assert!(watchlist.is_empty());
    }

    #[test]
    fn test_update_diffs() {
        let watchlist = Watchlist::new(&["AAPL".to_string(), "TSLA".to_string()]);
        let (added, removed) = watchlist.update(&["TSLA".to_string(), "NVDA".to_string()]);
        assert_eq!(added, vec!["NVDA"]);
        assert_eq!(removed, vec!["AAPL"]);
        assert_eq!(watchlist.snapshot(), vec!["NVDA", "TSLA"]);
    }
}
