//! # Sample Aggregator
//!
//! Consumes samples one at a time and accumulates them into histograms keyed
//! by symbol and byte offset.
//!
//! ## Ingestion Steps
//!
//! 1. CPU and DSO filters (`Filtered`)
//! 2. Symbol lookup; misses go to the unresolved bucket of the image
//!    (`UnresolvedAddress`, still counted)
//! 3. Call-chain edges (`CallChain` is fatal)
//! 4. Histogram update weighted by the sample period (`InvalidOffset` skips
//!    the sample, `Allocation` is fatal)
//! 5. Run-wide totals per event
//!
//! Histogram updates commute, so the final profile does not depend on the
//! order samples arrive in.

use log::debug;
use std::collections::{BTreeMap, HashMap};

use super::{
    AggregatedProfile, CallGraph, CpuFilter, DsoFilter, HistogramStore, Symbol, SymbolProfile,
    UnresolvedEntry,
};
use crate::domain::{CpuId, EventIndex, HistogramError, IngestError, SymbolId};
use crate::symbolization::{SymbolInfo, SymbolLookup};

/// One profiler sample as handed over by the driver
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sample {
    pub event: EventIndex,
    pub cpu: Option<CpuId>,
    /// Image the sampled instruction belongs to
    pub image: String,
    /// Link-time address when the symbol is known, raw address otherwise
    pub address: u64,
    /// Event count this sample stands for (at least 1)
    pub period: u64,
    /// Caller return addresses, innermost first
    pub callchain: Vec<u64>,
}

/// Counters for the end-of-run summary
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AggregateStats {
    /// Samples counted, unresolved ones included
    pub samples: u64,
    pub filtered: u64,
    pub unresolved: u64,
    /// Samples dropped for an offset outside their symbol
    pub skipped: u64,
}

pub struct SampleAggregator<L> {
    lookup: L,
    cpu_filter: Option<CpuFilter>,
    dso_filter: Option<DsoFilter>,

    events: Vec<String>,
    totals: Vec<u64>,

    symbols: Vec<Symbol>,
    /// image → symbol start → id
    symbol_ids: HashMap<String, HashMap<u64, SymbolId>>,
    histograms: HistogramStore,
    unresolved: BTreeMap<(String, u64), Vec<u64>>,
    call_graph: CallGraph,
    stats: AggregateStats,
}

impl<L: SymbolLookup> SampleAggregator<L> {
    pub fn new(lookup: L) -> Self {
        Self {
            lookup,
            cpu_filter: None,
            dso_filter: None,
            events: Vec::new(),
            totals: Vec::new(),
            symbols: Vec::new(),
            symbol_ids: HashMap::new(),
            histograms: HistogramStore::new(),
            unresolved: BTreeMap::new(),
            call_graph: CallGraph::new(),
            stats: AggregateStats::default(),
        }
    }

    #[must_use]
    pub fn with_cpu_filter(mut self, filter: CpuFilter) -> Self {
        self.cpu_filter = Some(filter);
        self
    }

    #[must_use]
    pub fn with_dso_filter(mut self, filter: DsoFilter) -> Self {
        self.dso_filter = Some(filter);
        self
    }

    /// Index of an event type, registering it on first sight
    pub fn register_event(&mut self, name: &str) -> EventIndex {
        if let Some(idx) = self.events.iter().position(|e| e == name) {
            return EventIndex(idx);
        }
        self.events.push(name.to_string());
        self.totals.push(0);
        EventIndex(self.events.len() - 1)
    }

    #[must_use]
    pub fn events(&self) -> &[String] {
        &self.events
    }

    /// The symbol lookup, for drivers that translate perf's `symbol+offset`
    pub fn lookup_mut(&mut self) -> &mut L {
        &mut self.lookup
    }

    #[must_use]
    pub fn stats(&self) -> &AggregateStats {
        &self.stats
    }

    /// Account one sample
    ///
    /// # Errors
    /// Every outcome other than a histogram update is reported; only those
    /// for which [`IngestError::is_fatal`] holds must stop the run.
    pub fn ingest(&mut self, sample: &Sample) -> Result<(), IngestError> {
        if !self.accepts(sample) {
            self.stats.filtered += 1;
            return Err(IngestError::Filtered);
        }
        let event = sample.event.as_usize();
        if event >= self.events.len() {
            return Err(IngestError::UnknownEvent(sample.event));
        }
        let period = sample.period.max(1);

        let Self { lookup, symbols, symbol_ids, .. } = self;
        let Some(info) = lookup.lookup_symbol(&sample.image, sample.address) else {
            let counts =
                self.unresolved.entry((sample.image.clone(), sample.address)).or_default();
            if counts.len() <= event {
                counts.resize(event + 1, 0);
            }
            counts[event] = counts[event].saturating_add(period);
            self.stats.unresolved += 1;
            self.record(event, period);
            return Err(IngestError::UnresolvedAddress {
                image: sample.image.clone(),
                address: sample.address,
            });
        };
        let offset = sample.address.wrapping_sub(info.start);
        let symbol = intern(symbols, symbol_ids, &sample.image, info);

        if let Err(source) = CallGraph::check_depth(&sample.callchain) {
            return Err(IngestError::CallChain { symbol: self.symbol_name(symbol), source });
        }

        let len = self.symbols[symbol.as_usize()].len;
        let updated = self
            .histograms
            .ensure(symbol, len, self.events.len())
            .and_then(|histogram| histogram.increment(offset, sample.event, period));
        match updated {
            Ok(()) => {}
            Err(HistogramError::InvalidOffset { offset, len }) => {
                self.stats.skipped += 1;
                return Err(IngestError::InvalidOffset {
                    symbol: self.symbol_name(symbol),
                    offset,
                    len,
                });
            }
            Err(HistogramError::Allocation { bytes }) => {
                return Err(IngestError::Allocation { symbol: self.symbol_name(symbol), bytes });
            }
        }

        // Only samples that landed in a histogram contribute call edges
        if let Err(source) = self.call_graph.append(symbol, &sample.callchain, period) {
            return Err(IngestError::CallChain { symbol: self.symbol_name(symbol), source });
        }

        self.record(event, period);
        Ok(())
    }

    fn accepts(&self, sample: &Sample) -> bool {
        let cpu_ok = self.cpu_filter.as_ref().map_or(true, |f| f.allows(sample.cpu));
        let dso_ok = self.dso_filter.as_ref().map_or(true, |f| f.allows(&sample.image));
        if !(cpu_ok && dso_ok) {
            debug!("Filtered sample at {:#x} in {} (cpu {:?})", sample.address, sample.image, sample.cpu);
        }
        cpu_ok && dso_ok
    }

    fn record(&mut self, event: usize, period: u64) {
        self.totals[event] = self.totals[event].saturating_add(period);
        self.stats.samples += 1;
    }

    fn symbol_name(&self, symbol: SymbolId) -> String {
        self.symbols[symbol.as_usize()].name.clone()
    }

    /// End ingestion and hand over the profile, symbols sorted by total cost
    #[must_use]
    pub fn finalize_aggregation(self) -> AggregatedProfile {
        let Self { events, totals, symbols: arena, histograms, unresolved, call_graph, stats, .. } =
            self;

        let mut symbols: Vec<SymbolProfile> = histograms
            .into_iter()
            .map(|(id, histogram)| SymbolProfile {
                symbol: arena[id.as_usize()].clone(),
                total: histogram.total(),
                histogram,
            })
            .collect();
        symbols.sort_by(|a, b| {
            b.total
                .cmp(&a.total)
                .then_with(|| a.symbol.image.cmp(&b.symbol.image))
                .then(a.symbol.start.cmp(&b.symbol.start))
        });

        let unresolved = unresolved
            .into_iter()
            .map(|((image, address), counts)| UnresolvedEntry { image, address, counts })
            .collect();

        AggregatedProfile { events, totals, symbols, unresolved, stats, call_graph }
    }
}

fn intern(
    symbols: &mut Vec<Symbol>,
    symbol_ids: &mut HashMap<String, HashMap<u64, SymbolId>>,
    image: &str,
    info: &SymbolInfo,
) -> SymbolId {
    if let Some(&id) = symbol_ids.get(image).and_then(|by_start| by_start.get(&info.start)) {
        return id;
    }
    let id = SymbolId(u32::try_from(symbols.len()).unwrap_or(u32::MAX));
    symbols.push(Symbol {
        image: image.to_string(),
        name: info.name.clone(),
        start: info.start,
        len: info.len,
    });
    symbol_ids.entry(image.to_string()).or_default().insert(info.start, id);
    id
}
