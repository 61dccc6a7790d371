//! Domain model for cgconv
//!
//! This module contains core domain types and errors that provide:
//! - Compile-time safety via newtype pattern
//! - Self-documenting function signatures
//! - Structured error handling

pub mod errors;
pub mod types;

// Re-export common types for convenience
pub use types::{CpuId, EventIndex, SymbolId};

pub use errors::{
    CallChainError, ConvertError, FilterParseError, HistogramError, IngestError, ParseError,
    ResolverError,
};
