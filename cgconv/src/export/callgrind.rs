//! # Callgrind Cost Emitter
//!
//! Writes the profile as
//!
//! ```text
//! positions: instr line
//! events: cycles cache-misses
//!
//! ob=/usr/bin/app
//! fn=app::parse
//! fl=src/parse.rs
//! 0x4010a2 10 5 0
//! +5 +2 3 1
//! fl=src/lexer.rs
//! +8 -40 1 0
//! ```
//!
//! The first cost line of a symbol is absolute (`0x` address, line). All
//! later ones carry an address delta and a signed line delta relative to the
//! [`EncodingCursor`], or an absolute `0` when the line is unknown. Inline
//! call sites of the first address are written as zero-cost lines in the
//! caller's file just before it.
//!
//! Samples without a symbol follow as one block per (image, address):
//! `fn=` is the raw address and a single `0 0` line carries the counts.

use log::{debug, warn};
use std::collections::HashSet;
use std::io::Write;

use super::{EncodingCursor, LinePosition};
use crate::aggregation::{AggregatedProfile, EventSet, Histogram, SymbolProfile, UnresolvedEntry};
use crate::domain::{ConvertError, EventIndex};
use crate::symbolization::{AddressResolver, ImageResolver, Resolution};

/// What was written, for the end-of-run summary
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EmitStats {
    pub symbols: usize,
    pub cost_lines: usize,
    pub inline_markers: usize,
    pub unresolved_blocks: usize,
    /// Images no source lines could be read from
    pub images_without_lines: usize,
}

/// The image currently open in the resolver
struct OpenImage<I> {
    name: String,
    handle: Option<I>,
}

pub struct CostEmitter<R: AddressResolver, W: Write> {
    out: W,
    resolver: R,
    events: EventSet,
    cursor: EncodingCursor,
    image: Option<OpenImage<R::Image>>,
    failed_images: HashSet<String>,
    header_written: bool,
    stats: EmitStats,
}

impl<R: AddressResolver, W: Write> CostEmitter<R, W> {
    pub fn new(out: W, resolver: R, events: EventSet) -> Self {
        Self {
            out,
            resolver,
            events,
            cursor: EncodingCursor::new(),
            image: None,
            failed_images: HashSet::new(),
            header_written: false,
            stats: EmitStats::default(),
        }
    }

    /// Header pass: position format and the event columns
    ///
    /// # Errors
    /// Write failures, or `Consistency` if called twice.
    pub fn write_header(&mut self) -> Result<(), ConvertError> {
        if self.header_written {
            return Err(ConvertError::Consistency("header written twice".to_string()));
        }
        writeln!(self.out, "positions: instr line")?;
        write!(self.out, "events:")?;
        for name in self.events.names() {
            write!(self.out, " {name}")?;
        }
        writeln!(self.out)?;
        self.header_written = true;
        Ok(())
    }

    /// Body pass for one symbol; the histogram is dropped once written
    ///
    /// # Errors
    /// Write failures; `Consistency` when the histogram has counts in a
    /// column the header did not declare or the cursor would move backwards.
    pub fn emit_symbol(&mut self, profile: SymbolProfile) -> Result<(), ConvertError> {
        self.require_header()?;
        let SymbolProfile { symbol, histogram, .. } = profile;
        self.check_columns(&symbol.name, &histogram)?;

        let mut offsets = histogram.cost_offsets().peekable();
        if offsets.peek().is_none() {
            return Ok(());
        }

        self.switch_image(&symbol.image);
        writeln!(self.out)?;
        writeln!(self.out, "ob={}", symbol.image)?;
        writeln!(self.out, "fn={}", symbol.name)?;

        let mut first = true;
        for offset in offsets {
            let address = symbol.start.wrapping_add(offset);
            let resolution = self.resolve(address);
            if first {
                self.write_inline_markers(&resolution)?;
                let file = resolution.file();
                let line = resolution.line();
                writeln!(self.out, "fl={}", file.unwrap_or_default())?;
                write!(self.out, "{address:#x} {}", line.unwrap_or(0))?;
                self.cursor.anchor(file, line, address);
                first = false;
            } else {
                let step = self.cursor.advance(resolution.file(), resolution.line(), address)?;
                if let Some(file) = &step.file {
                    writeln!(self.out, "fl={file}")?;
                }
                match step.line {
                    LinePosition::Delta(delta) => {
                        write!(self.out, "+{} {delta:+}", step.offset_delta)?;
                    }
                    LinePosition::Unknown => write!(self.out, "+{} 0", step.offset_delta)?,
                }
            }
            self.write_counts(|event| histogram.count(offset, event))?;
            self.stats.cost_lines += 1;
        }

        self.stats.symbols += 1;
        Ok(())
    }

    /// Self-contained block for samples no symbol covered
    ///
    /// # Errors
    /// Write failures; `Consistency` for counts outside the header columns.
    pub fn emit_unresolved(&mut self, entry: &UnresolvedEntry) -> Result<(), ConvertError> {
        self.require_header()?;
        for (idx, &count) in entry.counts.iter().enumerate() {
            if count > 0 && !self.events.contains(EventIndex(idx)) {
                return Err(ConvertError::Consistency(format!(
                    "unresolved address {:#x} in {} has counts for undeclared {}",
                    entry.address,
                    entry.image,
                    EventIndex(idx)
                )));
            }
        }
        writeln!(self.out)?;
        writeln!(self.out, "ob={}", entry.image)?;
        writeln!(self.out, "fn={:#x}", entry.address)?;
        write!(self.out, "0 0")?;
        self.write_counts(|event| entry.count(event))?;
        self.stats.unresolved_blocks += 1;
        Ok(())
    }

    /// Close the open image and flush the output
    ///
    /// # Errors
    /// Flush failure
    pub fn finish(mut self) -> Result<EmitStats, ConvertError> {
        self.image = None;
        self.out.flush()?;
        Ok(self.stats)
    }

    fn require_header(&self) -> Result<(), ConvertError> {
        if self.header_written {
            Ok(())
        } else {
            Err(ConvertError::Consistency("cost lines before the header".to_string()))
        }
    }

    fn check_columns(&self, symbol: &str, histogram: &Histogram) -> Result<(), ConvertError> {
        for idx in 0..histogram.event_count() {
            let event = EventIndex(idx);
            if !self.events.contains(event) && histogram.event_total(event) > 0 {
                return Err(ConvertError::Consistency(format!(
                    "{symbol} has counts for {event} which the header does not declare"
                )));
            }
        }
        Ok(())
    }

    /// Keep at most one image open, re-opening only on a change
    fn switch_image(&mut self, image: &str) {
        if self.image.as_ref().is_some_and(|open| open.name == image) {
            return;
        }
        // Close before opening the next one
        self.image = None;
        let handle = match self.resolver.open_image(image) {
            Ok(handle) => Some(handle),
            Err(e) => {
                if self.failed_images.insert(image.to_string()) {
                    self.stats.images_without_lines += 1;
                    if image.starts_with('[') {
                        debug!("No source lines for {image}: {e}");
                    } else {
                        warn!("No source lines for {image}: {e}");
                    }
                }
                None
            }
        };
        self.image = Some(OpenImage { name: image.to_string(), handle });
    }

    fn resolve(&self, address: u64) -> Resolution {
        self.image
            .as_ref()
            .and_then(|open| open.handle.as_ref())
            .map_or(Resolution::Unresolved, |handle| handle.resolve(address))
    }

    fn write_inline_markers(&mut self, resolution: &Resolution) -> Result<(), ConvertError> {
        for frame in resolution.inlined_by() {
            writeln!(self.out, "fl={}", frame.file.as_deref().unwrap_or_default())?;
            write!(self.out, "0 0")?;
            self.write_counts(|_| 0)?;
            self.stats.inline_markers += 1;
        }
        Ok(())
    }

    /// One count per declared column, then the line end
    fn write_counts(&mut self, count: impl Fn(EventIndex) -> u64) -> Result<(), ConvertError> {
        for event in self.events.indices() {
            write!(self.out, " {}", count(event))?;
        }
        writeln!(self.out)?;
        Ok(())
    }
}

/// Write a whole profile: header, every symbol in order, then the
/// unresolved blocks
///
/// # Errors
/// See [`CostEmitter`]; the first error aborts and leaves a partial output.
pub fn emit<R: AddressResolver, W: Write>(
    out: W,
    resolver: R,
    profile: AggregatedProfile,
) -> Result<EmitStats, ConvertError> {
    let mut emitter = CostEmitter::new(out, resolver, profile.event_set());
    emitter.write_header()?;
    for symbol in profile.symbols {
        emitter.emit_symbol(symbol)?;
    }
    for entry in &profile.unresolved {
        emitter.emit_unresolved(entry)?;
    }
    emitter.finish()
}
