//! Domain types providing compile-time safety and self-documentation
//!
//! These newtype wrappers prevent common bugs like passing a CPU number where
//! an event column is expected, and make function signatures more expressive.

use std::fmt;

/// Event type index
///
/// Position of an event type (cycles, cache-misses, ...) in the order the
/// events were first seen in the input. This is NOT the output column: the
/// emitted event set only contains events with at least one sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EventIndex(pub usize);

impl EventIndex {
    /// Index as a plain `usize` for slice access
    #[must_use]
    pub fn as_usize(self) -> usize {
        self.0
    }
}

impl fmt::Display for EventIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Event#{}", self.0)
    }
}

/// Symbol handle
///
/// Dense index into the aggregator's symbol arena. Only meaningful for the
/// aggregator that handed it out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SymbolId(pub u32);

impl SymbolId {
    #[must_use]
    pub fn as_usize(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for SymbolId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Symbol#{}", self.0)
    }
}

/// CPU ID
///
/// Represents a CPU core ID (0, 1, 2, ...).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CpuId(pub u32);

impl fmt::Display for CpuId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CPU:{}", self.0)
    }
}
