//! Structured error types for cgconv
//!
//! Using thiserror for automatic Display implementation and error chaining.
//!
//! Only [`ConvertError`] ever reaches the driver. The other enums describe
//! outcomes that are absorbed locally (resolution failures, skipped samples)
//! or converted into a fatal [`ConvertError`].

use std::io;
use std::path::PathBuf;
use thiserror::Error;

use super::types::EventIndex;

/// Fatal errors that abort a conversion run
#[derive(Error, Debug)]
pub enum ConvertError {
    #[error("Cannot open input {path}: {source}")]
    InputUnavailable {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Cannot open {path} for output: {source}")]
    OutputUnavailable {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Failed to read perf session: {0}")]
    Session(String),

    #[error(transparent)]
    Parse(#[from] ParseError),

    #[error("Inconsistent profile data: {0}")]
    Consistency(String),

    #[error("Failed to allocate histogram for {symbol} ({bytes} bytes)")]
    Allocation { symbol: String, bytes: u64 },

    #[error("Corrupt call chain for {symbol}: {source}")]
    CallChain {
        symbol: String,
        #[source]
        source: CallChainError,
    },

    #[error(transparent)]
    Io(#[from] io::Error),
}

impl ConvertError {
    /// True when the input (file or perf session) could not be opened
    #[must_use]
    pub fn is_input_failure(&self) -> bool {
        matches!(self, Self::InputUnavailable { .. } | Self::Session(_))
    }

    /// True when the output stream could not be opened
    #[must_use]
    pub fn is_output_failure(&self) -> bool {
        matches!(self, Self::OutputUnavailable { .. })
    }
}

/// Outcome of ingesting a single sample that did not update a histogram
#[derive(Error, Debug)]
pub enum IngestError {
    #[error("Sample filtered out")]
    Filtered,

    /// The sample was still counted in the unresolved bucket of its image
    #[error("No symbol covers {address:#x} in {image}")]
    UnresolvedAddress { image: String, address: u64 },

    #[error("Offset {offset:#x} outside {symbol} (length {len:#x})")]
    InvalidOffset { symbol: String, offset: u64, len: u64 },

    #[error("Corrupt call chain for {symbol}: {source}")]
    CallChain {
        symbol: String,
        #[source]
        source: CallChainError,
    },

    #[error("Failed to allocate histogram for {symbol} ({bytes} bytes)")]
    Allocation { symbol: String, bytes: u64 },

    #[error("Sample refers to unregistered {0}")]
    UnknownEvent(EventIndex),
}

impl IngestError {
    /// Whether this outcome must abort the run
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::CallChain { .. } | Self::Allocation { .. } | Self::UnknownEvent(_))
    }
}

impl From<IngestError> for ConvertError {
    fn from(err: IngestError) -> Self {
        match err {
            IngestError::CallChain { symbol, source } => Self::CallChain { symbol, source },
            IngestError::Allocation { symbol, bytes } => Self::Allocation { symbol, bytes },
            other => Self::Consistency(other.to_string()),
        }
    }
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum HistogramError {
    #[error("Offset {offset:#x} is outside the symbol (length {len:#x})")]
    InvalidOffset { offset: u64, len: u64 },

    #[error("Cannot allocate {bytes} bytes of histogram storage")]
    Allocation { bytes: u64 },
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum CallChainError {
    #[error("Chain depth {depth} exceeds the maximum of {max}")]
    TooDeep { depth: usize, max: usize },
}

/// Failures opening a binary image for source-line resolution
///
/// These are recoverable: the emitter degrades to unknown locations.
#[derive(Error, Debug)]
pub enum ResolverError {
    #[error("Image not found: {0}")]
    NotFound(PathBuf),

    #[error("Not an executable object file: {0}")]
    NotExecutable(PathBuf),

    #[error(transparent)]
    Io(#[from] io::Error),
}

#[derive(Error, Debug, PartialEq, Eq)]
#[error("Invalid {what} list '{list}': {reason}")]
pub struct FilterParseError {
    pub what: &'static str,
    pub list: String,
    pub reason: String,
}

#[derive(Error, Debug, PartialEq, Eq)]
#[error("Malformed perf script record at line {line}: {message}")]
pub struct ParseError {
    pub line: usize,
    pub message: String,
}
