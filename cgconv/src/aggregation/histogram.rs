//! Per-symbol instruction histograms.
//!
//! One dense column of counts per event type, indexed by byte offset from the
//! symbol start. Columns are allocated on first use and can grow when an
//! event type first shows up after the symbol was already hit.

// Offsets are bounded by the allocated column length, which fits in usize
#![allow(clippy::cast_possible_truncation)]

use std::collections::hash_map::Entry;
use std::collections::HashMap;

use crate::domain::{EventIndex, HistogramError, SymbolId};

const COUNT_BYTES: u64 = std::mem::size_of::<u64>() as u64;

/// Sample counts for one symbol
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Histogram {
    len: u64,
    columns: Vec<Vec<u64>>,
}

impl Histogram {
    /// Allocate `event_count` zeroed columns of `len` counts each
    ///
    /// # Errors
    /// `Allocation` if the storage cannot be reserved
    pub fn new(len: u64, event_count: usize) -> Result<Self, HistogramError> {
        let mut histogram = Self { len, columns: Vec::with_capacity(event_count) };
        histogram.reserve_events(event_count)?;
        Ok(histogram)
    }

    fn reserve_events(&mut self, event_count: usize) -> Result<(), HistogramError> {
        while self.columns.len() < event_count {
            self.columns.push(Self::alloc_column(self.len)?);
        }
        Ok(())
    }

    fn alloc_column(len: u64) -> Result<Vec<u64>, HistogramError> {
        let bytes = len.saturating_mul(COUNT_BYTES);
        let slots = usize::try_from(len).map_err(|_| HistogramError::Allocation { bytes })?;
        let mut column = Vec::new();
        column.try_reserve_exact(slots).map_err(|_| HistogramError::Allocation { bytes })?;
        column.resize(slots, 0);
        Ok(column)
    }

    /// Symbol length in bytes
    #[must_use]
    pub fn len(&self) -> u64 {
        self.len
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Number of allocated event columns
    #[must_use]
    pub fn event_count(&self) -> usize {
        self.columns.len()
    }

    /// Add `weight` to the count of `event` at `offset`
    ///
    /// # Errors
    /// `InvalidOffset` if `offset` is not inside the symbol, `Allocation` if a
    /// new event column cannot be allocated
    pub fn increment(
        &mut self,
        offset: u64,
        event: EventIndex,
        weight: u64,
    ) -> Result<(), HistogramError> {
        if offset >= self.len {
            return Err(HistogramError::InvalidOffset { offset, len: self.len });
        }
        self.reserve_events(event.as_usize() + 1)?;
        let slot = &mut self.columns[event.as_usize()][offset as usize];
        *slot = slot.saturating_add(weight);
        Ok(())
    }

    /// Count of `event` at `offset`, zero for columns never allocated
    #[must_use]
    pub fn count(&self, offset: u64, event: EventIndex) -> u64 {
        self.columns
            .get(event.as_usize())
            .and_then(|column| column.get(offset as usize))
            .copied()
            .unwrap_or(0)
    }

    /// True iff at least one event column is non-zero at `offset`
    #[must_use]
    pub fn has_any(&self, offset: u64) -> bool {
        offset < self.len && self.columns.iter().any(|column| column[offset as usize] != 0)
    }

    /// Offsets carrying cost, ascending
    pub fn cost_offsets(&self) -> impl Iterator<Item = u64> + '_ {
        (0..self.len).filter(move |&offset| self.has_any(offset))
    }

    /// Sum of one event column
    #[must_use]
    pub fn event_total(&self, event: EventIndex) -> u64 {
        self.columns.get(event.as_usize()).map_or(0, |column| column.iter().sum())
    }

    /// Sum over all columns
    #[must_use]
    pub fn total(&self) -> u64 {
        self.columns.iter().flatten().sum()
    }
}

/// Histograms of every symbol hit so far
#[derive(Debug, Default)]
pub struct HistogramStore {
    histograms: HashMap<SymbolId, Histogram>,
}

impl HistogramStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the histogram of `symbol`, allocating it on first use
    ///
    /// Idempotent: an existing histogram is returned as is, with missing
    /// event columns added.
    ///
    /// # Errors
    /// `Allocation` if the storage cannot be reserved
    pub fn ensure(
        &mut self,
        symbol: SymbolId,
        len: u64,
        event_count: usize,
    ) -> Result<&mut Histogram, HistogramError> {
        match self.histograms.entry(symbol) {
            Entry::Occupied(entry) => {
                let histogram = entry.into_mut();
                histogram.reserve_events(event_count)?;
                Ok(histogram)
            }
            Entry::Vacant(entry) => Ok(entry.insert(Histogram::new(len, event_count)?)),
        }
    }

    /// Add `weight` at `offset` for `event` of an already ensured symbol
    ///
    /// # Errors
    /// `InvalidOffset` if the offset is outside the symbol or the symbol has
    /// no histogram
    pub fn increment(
        &mut self,
        symbol: SymbolId,
        offset: u64,
        event: EventIndex,
        weight: u64,
    ) -> Result<(), HistogramError> {
        match self.histograms.get_mut(&symbol) {
            Some(histogram) => histogram.increment(offset, event, weight),
            None => Err(HistogramError::InvalidOffset { offset, len: 0 }),
        }
    }

    #[must_use]
    pub fn has_any(&self, symbol: SymbolId, offset: u64) -> bool {
        self.histograms.get(&symbol).is_some_and(|h| h.has_any(offset))
    }

    #[must_use]
    pub fn get(&self, symbol: SymbolId) -> Option<&Histogram> {
        self.histograms.get(&symbol)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.histograms.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.histograms.is_empty()
    }
}

impl IntoIterator for HistogramStore {
    type Item = (SymbolId, Histogram);
    type IntoIter = std::collections::hash_map::IntoIter<SymbolId, Histogram>;

    fn into_iter(self) -> Self::IntoIter {
        self.histograms.into_iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CYCLES: EventIndex = EventIndex(0);
    const MISSES: EventIndex = EventIndex(1);

    #[test]
    fn test_increment_accumulates() {
        let mut h = Histogram::new(10, 1).unwrap();
        h.increment(2, CYCLES, 5).unwrap();
        h.increment(2, CYCLES, 3).unwrap();
        assert_eq!(h.count(2, CYCLES), 8);
        assert_eq!(h.total(), 8);
    }

    #[test]
    fn test_offset_past_end_is_rejected() {
        let mut h = Histogram::new(10, 1).unwrap();
        assert_eq!(
            h.increment(10, CYCLES, 1),
            Err(HistogramError::InvalidOffset { offset: 10, len: 10 })
        );
        assert!(h.increment(9, CYCLES, 1).is_ok());
    }

    #[test]
    fn test_has_any_checks_every_column() {
        let mut h = Histogram::new(8, 2).unwrap();
        h.increment(3, MISSES, 1).unwrap();
        assert!(h.has_any(3));
        assert!(!h.has_any(2));
        assert!(!h.has_any(8), "out of range is never cost-bearing");
        assert_eq!(h.cost_offsets().collect::<Vec<_>>(), vec![3]);
    }

    #[test]
    fn test_late_event_grows_columns() {
        let mut h = Histogram::new(4, 1).unwrap();
        assert_eq!(h.event_count(), 1);
        h.increment(1, EventIndex(2), 7).unwrap();
        assert_eq!(h.event_count(), 3);
        assert_eq!(h.count(1, EventIndex(2)), 7);
        assert_eq!(h.count(1, EventIndex(5)), 0);
        assert_eq!(h.event_total(EventIndex(2)), 7);
    }

    #[test]
    fn test_store_ensure_is_idempotent() {
        let mut store = HistogramStore::new();
        let sym = SymbolId(0);
        store.ensure(sym, 10, 1).unwrap().increment(4, CYCLES, 2).unwrap();
        store.ensure(sym, 10, 2).unwrap();
        assert_eq!(store.len(), 1);
        let h = store.get(sym).unwrap();
        assert_eq!(h.count(4, CYCLES), 2, "re-ensuring keeps existing counts");
        assert_eq!(h.event_count(), 2);
    }

    #[test]
    fn test_store_increment_and_has_any() {
        let mut store = HistogramStore::new();
        let sym = SymbolId(3);
        assert!(store.increment(sym, 0, CYCLES, 1).is_err(), "not ensured yet");
        store.ensure(sym, 16, 1).unwrap();
        store.increment(sym, 15, CYCLES, 1).unwrap();
        assert!(store.has_any(sym, 15));
        assert!(!store.has_any(sym, 14));
        assert!(!store.has_any(SymbolId(4), 15));
    }

    #[test]
    fn test_oversized_symbol_fails_allocation() {
        let result = Histogram::new(u64::MAX / 2, 1);
        assert!(matches!(result, Err(HistogramError::Allocation { .. })));
    }
}
