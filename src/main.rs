//! Main entry point for the omics read preparation tools.
//!
//! Subcommands:
//! 1. `derep` removes replicated read pairs from paired FASTQ files.
//! 2. `interleave` merges forward and reverse reads into one stream.
//! 3. `fastq2fasta` converts FASTQ to FASTA.
//! 4. `read-counts` tabulates reads per sample.
//! 5. `prep` collects raw read files into per-sample directories.

// Modules defined within the project
mod cli;
mod config;
mod derep;
mod io;
mod pipeline;
mod utils;

use cli::{run_cli, Cli};

// External Crate Imports
use anyhow::{Error, Result};
use clap::Parser;
use io::fastq::FastqError;
use pipeline::PrepError;
use utils::parallel::ParallelError;

/// Class name of the first recognised error in the chain.
fn error_kind(err: &Error) -> &'static str {
    for cause in err.chain() {
        if let Some(e) = cause.downcast_ref::<FastqError>() {
            return e.kind();
        }
        if let Some(e) = cause.downcast_ref::<PrepError>() {
            return e.kind();
        }
        if let Some(e) = cause.downcast_ref::<ParallelError>() {
            return e.kind();
        }
        if cause.downcast_ref::<std::io::Error>().is_some() {
            return "IOError";
        }
    }
    "Error"
}

/// Main function: parses arguments and hands off to the selected command.
fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = cli.run_config();

    env_logger::Builder::new()
        .filter_level(config.log_level())
        .parse_default_env()
        .init();

    match run_cli(cli, &config) {
        Ok(()) => Ok(()),
        Err(e) if config.traceback => Err(e),
        Err(e) => {
            eprintln!("{}: {:#}", error_kind(&e), e);
            std::process::exit(1);
        }
    }
}
