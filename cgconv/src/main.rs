//! # cgconv - Main Entry Point
//!
//! Parses arguments, checks the input and output, runs the conversion and
//! prints the summary to stderr.

use anyhow::{Context, Result};
use clap::Parser;
use log::info;

use cgconv::cli::Args;
use cgconv::convert::convert;
use cgconv::domain::ConvertError;
use cgconv::preflight::run_preflight_checks;

// Exit codes
const EXIT_SUCCESS: i32 = 0;
const EXIT_ERROR: i32 = 1;
const EXIT_USAGE: i32 = 2;
const EXIT_NOINPUT: i32 = 66;
const EXIT_CANTCREAT: i32 = 73;

fn main() {
    env_logger::init();
    let args = match Args::try_parse() {
        Ok(args) => args,
        Err(e) if e.use_stderr() => {
            let _ = e.print();
            std::process::exit(EXIT_USAGE);
        }
        // --help and --version
        Err(e) => e.exit(),
    };
    std::process::exit(match run(&args) {
        Ok(()) => EXIT_SUCCESS,
        Err(e) => {
            let code = exit_code_for(&e);
            eprintln!("error: {e:#}");
            code
        }
    });
}

fn exit_code_for(err: &anyhow::Error) -> i32 {
    match err.downcast_ref::<ConvertError>() {
        Some(e) if e.is_input_failure() => EXIT_NOINPUT,
        Some(e) if e.is_output_failure() => EXIT_CANTCREAT,
        _ => EXIT_ERROR,
    }
}

fn run(args: &Args) -> Result<()> {
    let config = args.to_config();
    run_preflight_checks(&config)?;

    info!("Converting {} into {}", config.input.display(), config.output.display());
    let summary = convert(&config)
        .with_context(|| format!("Conversion into {} failed", config.output.display()))?;

    if !args.quiet {
        eprintln!("{summary}");
        eprintln!("Wrote {}", config.output.display());
    }
    Ok(())
}
