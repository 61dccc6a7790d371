//! # Conversion Driver
//!
//! Runs a whole conversion: open the input, aggregate every sample, then
//! emit the callgrind profile.
//!
//! ```text
//! perf.data ──▶ perf script ─┐
//! perf script text ──────────┼─▶ PerfScriptReader ─▶ SampleAggregator
//! stdin ─────────────────────┘                             │
//!                                    finalize_aggregation()│
//!                                                          ▼
//!                      callgrind.out ◀── CostEmitter ◀── AggregatedProfile
//! ```
//!
//! The output file is created before any sample is read, so a run that
//! cannot write fails fast.

use log::{debug, info, warn};
use std::fmt;
use std::fs::File;
use std::io::{self, BufRead, BufReader, BufWriter, Read, Seek};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};

use crate::aggregation::{CpuFilter, DsoFilter, SampleAggregator};
use crate::domain::{ConvertError, IngestError};
use crate::export::{emit, EmitStats};
use crate::perf_script::PerfScriptReader;
use crate::symbolization::{DwarfResolver, ElfSymbolTables, ImagePaths};

/// Magic at the start of a `perf.data` file
const PERF_DATA_MAGIC: &[u8; 8] = b"PERFILE2";

/// Fields requested from `perf script`, in the layout the reader expects
const PERF_SCRIPT_FIELDS: &str = "event,cpu,period,ip,sym,symoff,dso";

/// Everything one conversion needs
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConvertConfig {
    /// `perf.data` or `perf script` text; `-` is stdin
    pub input: PathBuf,
    pub output: PathBuf,
    pub cpus: Option<CpuFilter>,
    pub dsos: Option<DsoFilter>,
    /// Root directory images are looked up under
    pub symfs: Option<PathBuf>,
    /// Uncompressed kernel image used for `[kernel.kallsyms]` samples
    pub vmlinux: Option<PathBuf>,
    /// Skip malformed records instead of failing
    pub force: bool,
}

impl ConvertConfig {
    #[must_use]
    pub fn new(input: impl Into<PathBuf>, output: impl Into<PathBuf>) -> Self {
        Self {
            input: input.into(),
            output: output.into(),
            cpus: None,
            dsos: None,
            symfs: None,
            vmlinux: None,
            force: false,
        }
    }

    #[must_use]
    pub fn reads_stdin(&self) -> bool {
        self.input.as_os_str() == "-"
    }

    #[must_use]
    pub fn image_paths(&self) -> ImagePaths {
        ImagePaths::new(self.symfs.clone()).with_vmlinux(self.vmlinux.clone())
    }
}

/// Result of a successful conversion
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConvertSummary {
    /// `(event, total period)` in first-seen order
    pub totals: Vec<(String, u64)>,
    pub samples: u64,
    pub filtered: u64,
    pub unresolved: u64,
    pub skipped: u64,
    /// Malformed records dropped under `--force`
    pub malformed: u64,
    pub call_edges: usize,
    pub emitted: EmitStats,
}

impl fmt::Display for ConvertSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "{} samples ({} filtered, {} unresolved, {} skipped, {} malformed)",
            self.samples, self.filtered, self.unresolved, self.skipped, self.malformed
        )?;
        for (event, total) in &self.totals {
            writeln!(f, "  {event:<24} {total:>16}")?;
        }
        write!(
            f,
            "{} functions, {} cost lines, {} unresolved blocks, {} call edges",
            self.emitted.symbols,
            self.emitted.cost_lines,
            self.emitted.unresolved_blocks,
            self.call_edges
        )
    }
}

/// The opened input stream, plus the `perf script` child feeding it
struct Input {
    reader: Box<dyn BufRead>,
    child: Option<Child>,
}

fn open_input(config: &ConvertConfig) -> Result<Input, ConvertError> {
    if config.reads_stdin() {
        return Ok(Input { reader: Box::new(BufReader::new(io::stdin())), child: None });
    }

    let path = &config.input;
    let unavailable = |source: io::Error| ConvertError::InputUnavailable { path: path.clone(), source };
    let mut file = File::open(path).map_err(unavailable)?;
    let mut magic = [0u8; 8];
    let is_perf_data = match file.read_exact(&mut magic) {
        Ok(()) => &magic == PERF_DATA_MAGIC,
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => false,
        Err(e) => return Err(unavailable(e)),
    };

    if !is_perf_data {
        file.rewind().map_err(unavailable)?;
        return Ok(Input { reader: Box::new(BufReader::new(file)), child: None });
    }
    drop(file);
    spawn_perf_script(path, config.vmlinux.as_deref())
}

fn spawn_perf_script(path: &Path, vmlinux: Option<&Path>) -> Result<Input, ConvertError> {
    info!("Reading {} through perf script", path.display());
    let mut command = Command::new("perf");
    command.arg("script").arg("-F").arg(PERF_SCRIPT_FIELDS).arg("--no-demangle");
    if let Some(vmlinux) = vmlinux {
        command.arg("--vmlinux").arg(vmlinux);
    }
    let mut child = command
        .arg("-i")
        .arg(path)
        .stdout(Stdio::piped())
        .spawn()
        .map_err(|e| ConvertError::Session(format!("cannot run perf script: {e}")))?;
    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| ConvertError::Session("perf script has no output pipe".to_string()))?;
    Ok(Input { reader: Box::new(BufReader::new(stdout)), child: Some(child) })
}

fn create_output(path: &Path) -> Result<BufWriter<File>, ConvertError> {
    File::create(path)
        .map(BufWriter::new)
        .map_err(|source| ConvertError::OutputUnavailable { path: path.to_path_buf(), source })
}

/// Convert one profiling session
///
/// # Errors
/// `InputUnavailable`/`Session` when the samples cannot be read,
/// `OutputUnavailable` when the output cannot be created, and any fatal
/// aggregation or emission error. The output may be left partially written.
pub fn convert(config: &ConvertConfig) -> Result<ConvertSummary, ConvertError> {
    let Input { reader, mut child } = open_input(config)?;
    let out = create_output(&config.output)?;

    let mut aggregator = SampleAggregator::new(ElfSymbolTables::with_paths(config.image_paths()));
    if let Some(cpus) = &config.cpus {
        aggregator = aggregator.with_cpu_filter(cpus.clone());
    }
    if let Some(dsos) = &config.dsos {
        aggregator = aggregator.with_dso_filter(dsos.clone());
    }

    let mut malformed = 0;
    for record in PerfScriptReader::new(reader) {
        let record = match record {
            Ok(record) => record,
            Err(ConvertError::Parse(e)) if config.force => {
                warn!("Skipping: {e}");
                malformed += 1;
                continue;
            }
            Err(e) => return Err(e),
        };
        let Some(sample) = record.to_sample(&mut aggregator) else {
            continue;
        };
        match aggregator.ingest(&sample) {
            Ok(()) | Err(IngestError::Filtered) => {}
            Err(e) if e.is_fatal() => return Err(e.into()),
            Err(e @ IngestError::InvalidOffset { .. }) => warn!("Skipping sample: {e}"),
            Err(e) => debug!("{e}"),
        }
    }

    if let Some(child) = child.as_mut() {
        let status = child.wait()?;
        if !status.success() {
            return Err(ConvertError::Session(format!("perf script failed: {status}")));
        }
    }

    let profile = aggregator.finalize_aggregation();
    info!(
        "Aggregated {} samples into {} functions and {} unresolved addresses",
        profile.stats.samples,
        profile.symbols.len(),
        profile.unresolved.len()
    );
    let mut summary = ConvertSummary {
        totals: profile.events.iter().cloned().zip(profile.totals.iter().copied()).collect(),
        samples: profile.stats.samples,
        filtered: profile.stats.filtered,
        unresolved: profile.stats.unresolved,
        skipped: profile.stats.skipped,
        malformed,
        call_edges: profile.call_graph.edge_count(),
        emitted: EmitStats::default(),
    };

    summary.emitted = emit(out, DwarfResolver::with_paths(config.image_paths()), profile)?;
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_missing_input_is_input_failure() {
        let dir = tempfile::tempdir().unwrap();
        let config = ConvertConfig::new(dir.path().join("nope.data"), dir.path().join("out"));
        let err = convert(&config).unwrap_err();
        assert!(err.is_input_failure(), "{err}");
    }

    #[test]
    fn test_unwritable_output_is_output_failure() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("perf.txt");
        std::fs::write(&input, "").unwrap();
        let config = ConvertConfig::new(&input, dir.path().join("missing/dir/out"));
        let err = convert(&config).unwrap_err();
        assert!(err.is_output_failure(), "{err}");
    }

    #[test]
    fn test_short_text_input_is_not_perf_data() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("perf.txt");
        std::fs::write(&input, "#\n").unwrap();
        let opened = open_input(&ConvertConfig::new(&input, "unused")).unwrap();
        assert!(opened.child.is_none());
    }

    #[test]
    fn test_unresolved_text_input() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("perf.txt");
        let output = dir.path().join("callgrind.out");
        let mut file = File::create(&input).unwrap();
        writeln!(file, "[000]     3 cycles:   401000 [unknown] ([unknown])").unwrap();
        writeln!(file, "[001]     2 cycles:   401000 [unknown] ([unknown])").unwrap();
        drop(file);

        let summary = convert(&ConvertConfig::new(&input, &output)).unwrap();
        assert_eq!(summary.samples, 2);
        assert_eq!(summary.totals, vec![("cycles".to_string(), 5)]);
        assert_eq!(
            std::fs::read_to_string(&output).unwrap(),
            "positions: instr line\nevents: cycles\n\nob=[unknown]\nfn=0x401000\n0 0 5\n"
        );
    }

    #[test]
    fn test_force_skips_malformed_records() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("perf.txt");
        let output = dir.path().join("callgrind.out");
        std::fs::write(&input, "[000] 3 cycles: nothex x+0x1 (/a)\n[000] 1 cycles: 10 [unknown] (/a)\n")
            .unwrap();

        let mut config = ConvertConfig::new(&input, &output);
        assert!(matches!(convert(&config), Err(ConvertError::Parse(_))));

        config.force = true;
        let summary = convert(&config).unwrap();
        assert_eq!(summary.malformed, 1);
        assert_eq!(summary.unresolved, 1);
    }

    #[test]
    fn test_summary_display() {
        let summary = ConvertSummary {
            totals: vec![("cycles".to_string(), 42)],
            samples: 3,
            ..ConvertSummary::default()
        };
        let text = summary.to_string();
        assert!(text.starts_with("3 samples (0 filtered"));
        assert!(text.contains("cycles"));
        assert!(text.contains("42"));
    }
}
