//! The finished, read-only result of aggregation.

use super::{AggregateStats, CallGraph, Histogram};
use crate::domain::EventIndex;

/// A function symbol that received samples
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Symbol {
    /// Image (binary or shared object) the symbol lives in
    pub image: String,
    pub name: String,
    /// Link-time start address
    pub start: u64,
    /// Length in bytes
    pub len: u64,
}

/// A symbol together with its histogram, ready for emission
#[derive(Debug, Clone)]
pub struct SymbolProfile {
    pub symbol: Symbol,
    pub histogram: Histogram,
    /// Sum over all events, the sort key
    pub total: u64,
}

/// Samples at one address of an image that no symbol covers
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnresolvedEntry {
    pub image: String,
    /// Raw sampled address
    pub address: u64,
    /// Period per event index
    pub counts: Vec<u64>,
}

impl UnresolvedEntry {
    #[must_use]
    pub fn count(&self, event: EventIndex) -> u64 {
        self.counts.get(event.as_usize()).copied().unwrap_or(0)
    }
}

/// Ordered output columns: the events with a non-zero total
///
/// Fixed once the header is written; every cost line carries exactly one
/// count per column, in this order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventSet {
    columns: Vec<(EventIndex, String)>,
}

impl EventSet {
    #[must_use]
    pub fn from_totals(names: &[String], totals: &[u64]) -> Self {
        let columns = names
            .iter()
            .enumerate()
            .filter(|(idx, _)| totals.get(*idx).copied().unwrap_or(0) > 0)
            .map(|(idx, name)| (EventIndex(idx), name.clone()))
            .collect();
        Self { columns }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.columns.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    /// Event indices in column order
    pub fn indices(&self) -> impl Iterator<Item = EventIndex> + '_ {
        self.columns.iter().map(|(idx, _)| *idx)
    }

    /// Event names in column order
    pub fn names(&self) -> impl Iterator<Item = &str> + '_ {
        self.columns.iter().map(|(_, name)| name.as_str())
    }

    #[must_use]
    pub fn contains(&self, event: EventIndex) -> bool {
        self.columns.iter().any(|(idx, _)| *idx == event)
    }
}

/// Everything the emitter needs, produced by
/// [`SampleAggregator::finalize_aggregation`](super::SampleAggregator::finalize_aggregation)
#[derive(Debug)]
pub struct AggregatedProfile {
    /// Event names by [`EventIndex`]
    pub events: Vec<String>,
    /// Total period per event, unresolved samples included
    pub totals: Vec<u64>,
    /// Sorted by total cost, heaviest first
    pub symbols: Vec<SymbolProfile>,
    /// Sorted by image, then address
    pub unresolved: Vec<UnresolvedEntry>,
    pub stats: AggregateStats,
    pub call_graph: CallGraph,
}

impl AggregatedProfile {
    #[must_use]
    pub fn event_set(&self) -> EventSet {
        EventSet::from_totals(&self.events, &self.totals)
    }

    /// Total period of one event by name
    #[must_use]
    pub fn total_for(&self, event: &str) -> u64 {
        self.events
            .iter()
            .position(|name| name == event)
            .and_then(|idx| self.totals.get(idx).copied())
            .unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_set_skips_empty_events() {
        let names = vec!["cycles".to_string(), "branches".to_string(), "cache-misses".to_string()];
        let set = EventSet::from_totals(&names, &[10, 0, 4]);
        assert_eq!(set.len(), 2);
        assert_eq!(set.names().collect::<Vec<_>>(), vec!["cycles", "cache-misses"]);
        assert_eq!(set.indices().collect::<Vec<_>>(), vec![EventIndex(0), EventIndex(2)]);
        assert!(!set.contains(EventIndex(1)));
    }

    #[test]
    fn test_event_set_tolerates_short_totals() {
        let names = vec!["cycles".to_string(), "late".to_string()];
        let set = EventSet::from_totals(&names, &[1]);
        assert_eq!(set.names().collect::<Vec<_>>(), vec!["cycles"]);
    }

    #[test]
    fn test_unresolved_count_defaults_to_zero() {
        let entry = UnresolvedEntry { image: "libx.so".into(), address: 0x10, counts: vec![4] };
        assert_eq!(entry.count(EventIndex(0)), 4);
        assert_eq!(entry.count(EventIndex(1)), 0);
    }
}
