//! Profile export
//!
//! Writes an [`AggregatedProfile`](crate::aggregation::AggregatedProfile) in
//! the callgrind format understood by `callgrind_annotate` and KCachegrind.

pub mod callgrind;
pub mod cursor;

pub use callgrind::{emit, CostEmitter, EmitStats};
pub use cursor::{EncodingCursor, LinePosition, Step};
