//! Sample aggregation
//!
//! This module turns a stream of perf samples into per-symbol histograms,
//! separated from the output format so the emitter only ever sees a finished,
//! sorted profile.
//!
//! ```text
//! Sample ──► filters ──► symbol lookup ──► call graph ──► HistogramStore
//!                              │
//!                              └──(no symbol)──► unresolved bucket
//! ```
//!
//! [`SampleAggregator::finalize_aggregation`] consumes the aggregator, so
//! emission cannot start while samples are still being ingested.

pub mod aggregator;
pub mod call_graph;
pub mod filter;
pub mod histogram;
pub mod profile;

pub use aggregator::{AggregateStats, Sample, SampleAggregator};
pub use call_graph::{CallGraph, MAX_CALLCHAIN_DEPTH};
pub use filter::{CpuFilter, DsoFilter, MAX_NR_CPUS};
pub use histogram::{Histogram, HistogramStore};
pub use profile::{AggregatedProfile, EventSet, Symbol, SymbolProfile, UnresolvedEntry};
