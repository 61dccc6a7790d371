//! # cgconv - perf to callgrind converter
//!
//! cgconv turns the samples of a `perf record` session into a callgrind
//! profile that `callgrind_annotate` and KCachegrind can display, with cost
//! attributed to individual instructions and source lines.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │            perf.data (via perf script) / perf script text       │
//! └───────────────────────┬─────────────────────────────────────────┘
//!                         │ sample records
//!                         ▼
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                        cgconv (This Crate)                      │
//! │                                                                 │
//! │  ┌──────────────┐   ┌──────────────┐   ┌──────────────┐         │
//! │  │ perf_script  │──▶│ Aggregation  │──▶│    Export    │         │
//! │  │   (reader)   │   │ (histograms) │   │ (callgrind)  │         │
//! │  └──────────────┘   └──────┬───────┘   └──────┬───────┘         │
//! │                            │                  │                 │
//! │                            ▼                  ▼                 │
//! │                     ┌──────────────┐   ┌──────────────┐         │
//! │                     │ Symbol table │   │ Source lines │         │
//! │                     │   (.symtab)  │   │   (DWARF)    │         │
//! │                     └──────────────┘   └──────────────┘         │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Module Structure
//!
//! - [`perf_script`]: parse `perf script` text into records and samples
//! - [`aggregation`]: per-symbol histograms, filters, call-chain edges
//!   - ingestion ends with `finalize_aggregation()`, which sorts symbols by cost
//! - [`export`]: callgrind writer with delta-encoded cost lines
//! - [`symbolization`]: ELF symbol tables and DWARF line lookup
//!   - uses `object`, `gimli` and `addr2line`
//! - [`convert`]: the driver tying the stages together
//! - [`preflight`]: input/output checks with actionable messages
//! - [`cli`]: command-line arguments
//! - [`domain`]: newtypes and error types
//!
//! ## Typical Usage
//!
//! ```bash
//! perf record -g ./app
//! cgconv -i perf.data -o callgrind.out
//! callgrind_annotate callgrind.out
//! ```

pub mod aggregation;
pub mod cli;
pub mod convert;
pub mod domain;
pub mod export;
pub mod perf_script;
pub mod preflight;
pub mod symbolization;
