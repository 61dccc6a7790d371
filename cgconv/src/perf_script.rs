//! Reader for `perf script` text output
//!
//! Two layouts are accepted. Without call chains every sample is a single
//! line:
//!
//! ```text
//! [003]     250000 cycles:            4011a6 compute+0x16 (/usr/bin/app)
//! ```
//!
//! With call chains (`perf record -g`) the header line is followed by one
//! indented line per frame, innermost first, and a blank line:
//!
//! ```text
//! app 4242 [003] 1234.567890:     250000 cycles:
//!         4011a6 compute+0x16 (/usr/bin/app)
//!         401302 main+0x42 (/usr/bin/app)
//! ```
//!
//! Tokens perf may add (command, pid, timestamp) are ignored. The period is
//! the numeric token right before the event name and defaults to 1.

use log::debug;
use std::io::{self, BufRead};

use crate::aggregation::{Sample, SampleAggregator};
use crate::domain::{ConvertError, CpuId, ParseError};
use crate::symbolization::SymbolLookup;

/// One frame of a sample
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PerfFrame {
    /// Runtime instruction pointer
    pub ip: u64,
    /// Symbol name and offset into it, when perf knew both
    pub symbol: Option<(String, u64)>,
    pub dso: String,
}

/// One sample record, frames innermost first
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PerfRecord {
    /// Input line of the record header
    pub line: usize,
    pub cpu: Option<CpuId>,
    pub period: u64,
    pub event: String,
    pub frames: Vec<PerfFrame>,
}

impl PerfRecord {
    /// Turn the record into a [`Sample`] for `aggregator`
    ///
    /// Addresses are taken as symbol start plus perf's offset, which is the
    /// link-time address the symbol table and debug info use. When the symbol
    /// is unknown the runtime address is kept and the sample ends up in the
    /// unresolved bucket of its image.
    pub fn to_sample<L: SymbolLookup>(&self, aggregator: &mut SampleAggregator<L>) -> Option<Sample> {
        let (top, callers) = self.frames.split_first()?;
        let event = aggregator.register_event(&self.event);
        let lookup = aggregator.lookup_mut();
        let address = link_address(lookup, top);
        let callchain = callers.iter().map(|frame| link_address(lookup, frame)).collect();
        Some(Sample {
            event,
            cpu: self.cpu,
            image: top.dso.clone(),
            address,
            period: self.period,
            callchain,
        })
    }
}

fn link_address<L: SymbolLookup>(lookup: &mut L, frame: &PerfFrame) -> u64 {
    frame
        .symbol
        .as_ref()
        .and_then(|(name, offset)| {
            lookup.locate_symbol(&frame.dso, name).map(|start| start.wrapping_add(*offset))
        })
        .unwrap_or(frame.ip)
}

/// Iterator over the records of a `perf script` stream
pub struct PerfScriptReader<R> {
    lines: io::Lines<R>,
    line_no: usize,
    /// Header line read while finishing the previous record
    pending: Option<String>,
    current: Option<PerfRecord>,
    /// Swallow frame lines of a record that failed to parse
    discard: bool,
}

impl<R: BufRead> PerfScriptReader<R> {
    pub fn new(reader: R) -> Self {
        Self { lines: reader.lines(), line_no: 0, pending: None, current: None, discard: false }
    }

    fn next_line(&mut self) -> Option<io::Result<String>> {
        if let Some(line) = self.pending.take() {
            return Some(Ok(line));
        }
        let line = self.lines.next()?;
        self.line_no += 1;
        Some(line)
    }

    fn error(&self, message: impl Into<String>) -> ConvertError {
        ParseError { line: self.line_no, message: message.into() }.into()
    }

    fn finish_record(&mut self) -> Option<Result<PerfRecord, ConvertError>> {
        let record = self.current.take()?;
        if record.frames.is_empty() {
            return Some(Err(ParseError {
                line: record.line,
                message: "sample without instruction pointer".to_string(),
            }
            .into()));
        }
        Some(Ok(record))
    }
}

impl<R: BufRead> Iterator for PerfScriptReader<R> {
    type Item = Result<PerfRecord, ConvertError>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let line = match self.next_line() {
                None => return self.finish_record(),
                Some(Err(e)) => return Some(Err(e.into())),
                Some(Ok(line)) => line,
            };
            let text = line.trim_end();

            if text.trim_start().is_empty() || text.starts_with('#') {
                self.discard = false;
                if let Some(done) = self.finish_record() {
                    return Some(done);
                }
                continue;
            }

            if text.starts_with(char::is_whitespace) {
                if self.discard {
                    continue;
                }
                let Some(current) = self.current.as_mut() else {
                    self.discard = true;
                    return Some(Err(self.error("stack frame outside of a sample")));
                };
                match parse_frame(text) {
                    Ok(frame) => current.frames.push(frame),
                    Err(message) => {
                        self.current = None;
                        self.discard = true;
                        return Some(Err(self.error(message)));
                    }
                }
                continue;
            }

            if self.current.is_some() {
                self.pending = Some(line);
                return self.finish_record();
            }
            self.discard = false;
            match parse_header(text, self.line_no) {
                Ok(record) => self.current = Some(record),
                Err(message) => {
                    self.discard = true;
                    return Some(Err(self.error(message)));
                }
            }
        }
    }
}

fn is_timestamp(token: &str) -> bool {
    token
        .strip_suffix(':')
        .is_some_and(|t| t.contains('.') && t.bytes().all(|b| b.is_ascii_digit() || b == b'.'))
}

/// `[comm pid] [cpu] [timestamp:] [period] event: [ip sym+off (dso)]`
fn parse_header(text: &str, line: usize) -> Result<PerfRecord, String> {
    let mut cpu = None;
    let mut previous: Option<&str> = None;
    let mut rest = text;

    loop {
        let trimmed = rest.trim_start();
        let Some(token) = trimmed.split_whitespace().next() else {
            return Err("no event name".to_string());
        };
        rest = &trimmed[token.len()..];

        if let Some(inner) = token.strip_prefix('[').and_then(|t| t.strip_suffix(']')) {
            if let Ok(id) = inner.parse() {
                cpu = Some(CpuId(id));
                previous = Some(token);
                continue;
            }
        }
        if is_timestamp(token) {
            previous = Some(token);
            continue;
        }
        if let Some(event) = token.strip_suffix(':') {
            if event.is_empty() {
                return Err("empty event name".to_string());
            }
            let period = previous.and_then(|p| p.parse().ok()).unwrap_or(1);
            let mut record = PerfRecord {
                line,
                cpu,
                period,
                event: event.to_string(),
                frames: Vec::new(),
            };
            if !rest.trim().is_empty() {
                record.frames.push(parse_frame(rest)?);
            }
            debug!("Sample at line {line}: {} x{}", record.event, record.period);
            return Ok(record);
        }
        previous = Some(token);
    }
}

/// `ip [symbol[+0xoffset]] (dso)`
fn parse_frame(text: &str) -> Result<PerfFrame, String> {
    let text = text.trim();
    let (before, dso) = match (text.rfind('('), text.strip_suffix(')')) {
        (Some(open), Some(inner)) => (&text[..open], &inner[open + 1..]),
        _ => return Err(format!("frame without image: '{text}'")),
    };
    let mut parts = before.split_whitespace();
    let ip_text = parts.next().ok_or_else(|| format!("frame without address: '{text}'"))?;
    let ip = u64::from_str_radix(ip_text.trim_start_matches("0x"), 16)
        .map_err(|e| format!("bad address '{ip_text}': {e}"))?;

    let symbol_text = parts.collect::<Vec<_>>().join(" ");
    let symbol = match symbol_text.rsplit_once('+') {
        Some((name, offset)) if !name.is_empty() && name != "[unknown]" => {
            offset
                .strip_prefix("0x")
                .and_then(|hex| u64::from_str_radix(hex, 16).ok())
                .map(|offset| (name.to_string(), offset))
        }
        _ => None,
    };

    Ok(PerfFrame { ip, symbol, dso: dso.to_string() })
}
