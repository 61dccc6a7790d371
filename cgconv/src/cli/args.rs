//! CLI argument definitions

use clap::Parser;
use std::path::PathBuf;

use crate::aggregation::{CpuFilter, DsoFilter};
use crate::convert::ConvertConfig;

#[derive(Parser, Debug)]
#[command(
    name = "cgconv",
    about = "Convert perf samples into a callgrind profile",
    after_help = "\
EXAMPLES:
    cgconv                                   perf.data -> callgrind.out
    cgconv -i perf.data -o app.callgrind     Explicit input and output
    perf script -F event,cpu,period,ip,sym,symoff,dso | cgconv -i -
    cgconv -C 0-3 -d app,libfoo.so           Only CPUs 0-3, two images
    cgconv -k /boot/vmlinux-$(uname -r)      Symbolize kernel samples"
)]
pub struct Args {
    /// perf.data file, or `perf script` output (`-` for stdin)
    #[arg(short, long, value_name = "FILE", default_value = "perf.data")]
    pub input: PathBuf,

    /// Callgrind output file
    #[arg(short, long, value_name = "FILE", default_value = "callgrind.out")]
    pub output: PathBuf,

    /// Only consider samples from these images (path or file name)
    #[arg(short, long, value_name = "DSO,...")]
    pub dsos: Option<DsoFilter>,

    /// Only consider samples taken on these CPUs, e.g. 0-3,6
    #[arg(short = 'C', long = "cpu", value_name = "LIST")]
    pub cpus: Option<CpuFilter>,

    /// Look up binaries relative to this directory
    #[arg(long, value_name = "DIR")]
    pub symfs: Option<PathBuf>,

    /// Uncompressed kernel image to symbolize [kernel.kallsyms] samples with
    #[arg(short = 'k', long, value_name = "FILE")]
    pub vmlinux: Option<PathBuf>,

    /// Skip malformed input records instead of failing
    #[arg(short, long)]
    pub force: bool,

    /// Suppress the summary
    #[arg(short, long)]
    pub quiet: bool,
}

impl Args {
    #[must_use]
    pub fn to_config(&self) -> ConvertConfig {
        ConvertConfig {
            input: self.input.clone(),
            output: self.output.clone(),
            cpus: self.cpus.clone(),
            dsos: self.dsos.clone(),
            symfs: self.symfs.clone(),
            vmlinux: self.vmlinux.clone(),
            force: self.force,
        }
    }
}
