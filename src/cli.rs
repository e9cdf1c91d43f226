use anyhow::{Context, Result};
use clap::{ArgAction, Parser, Subcommand};
use log::{debug, info};
use std::fs::File;
use std::io;
use std::path::PathBuf;

use crate::config::RunConfig;
use crate::derep::{self, DerepOptions, DEFAULT_INFIX};
use crate::io::{display_name, open_input, Sink};
use crate::pipeline::prep::{self, parse_suffixes, DEFAULT_SUFFIXES};
use crate::pipeline::read_counts::{self, DEFAULT_READS_FILE};
use crate::pipeline::{fastq_to_fasta, interleave, PrepOptions};

#[derive(Parser, Debug)]
#[command(name = "omics", author, version, about = "Tools to prepare paired-end sequencing reads", long_about = None)]
pub struct Cli {
    /// Show more progress information, repeat for more detail
    #[arg(short, long, action = ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Only report warnings and errors
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Number of threads to use, all cores by default
    #[arg(short, long, global = true)]
    pub threads: Option<usize>,

    /// Show the full error chain instead of a one-line message
    #[arg(long, global = true)]
    pub traceback: bool,

    #[command(subcommand)]
    pub command: Commands,
}

impl Cli {
    pub fn run_config(&self) -> RunConfig {
        RunConfig::from_flags(self.verbose, self.quiet, self.threads, self.traceback)
    }
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Find and remove replicated reads from paired fastq files
    Derep {
        /// Forward reads fastq file
        forward_reads: PathBuf,

        /// Reverse reads fastq file
        reverse_reads: PathBuf,

        /// Run sanity checks on input
        #[arg(short, long)]
        check: bool,

        /// Infix to construct output filenames
        #[arg(short, long, default_value = DEFAULT_INFIX)]
        infix: String,

        /// Output directory, must exist
        #[arg(short, long, default_value = ".")]
        out_dir: PathBuf,

        /// Write the list of removed replicated reads to this file
        #[arg(long, value_name = "FILE")]
        replicates_list: Option<PathBuf>,

        /// Write run statistics as JSON to this file
        #[arg(long, value_name = "FILE")]
        stats: Option<PathBuf>,

        /// Overwrite existing output files
        #[arg(short, long)]
        force: bool,
    },

    /// Interleave reads from forward and reverse fasta/fastq files
    Interleave {
        forward_reads: PathBuf,

        reverse_reads: PathBuf,

        /// Run sanity checks on input
        #[arg(short, long)]
        check: bool,

        /// Output file, stdout by default
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Overwrite an existing output file
        #[arg(short, long)]
        force: bool,
    },

    /// Convert fastq into fasta
    Fastq2fasta {
        /// Fastq file to convert, stdin by default
        #[arg(value_name = "FILE")]
        input: Option<PathBuf>,

        /// Output file, stdout by default
        #[arg(short, long, value_name = "FILE")]
        output: Option<PathBuf>,

        /// Overwrite an existing output file
        #[arg(short, long)]
        force: bool,

        /// Skip the check that the input is in fastq format
        #[arg(long)]
        no_check: bool,
    },

    /// Count reads per sample
    ReadCounts {
        /// Per-sample directories or fasta/fastq files
        #[arg(default_value = ".")]
        source: Vec<PathBuf>,

        /// Reads file searched for in each directory
        #[arg(short, long, value_name = "FILE", default_value = DEFAULT_READS_FILE)]
        file_name: String,

        /// Write the table to this file instead of stdout
        #[arg(short, long, value_name = "PATH")]
        out_txt: Option<PathBuf>,
    },

    /// Prepare raw fastq files as per-sample forward/reverse files
    Prep {
        /// Fastq(.gz) files or directories containing them
        #[arg(default_value = ".")]
        rawreads: Vec<PathBuf>,

        /// Directory in which sample directories are created
        #[arg(long, default_value = ".")]
        dest: PathBuf,

        /// Overwrite existing files
        #[arg(short, long)]
        force: bool,

        /// Keep data from different lanes separate
        #[arg(long = "keep-lanes-separate")]
        keep_lanes: bool,

        /// File names start with run and sample identifiers
        #[arg(long)]
        multi_run: bool,

        /// Comma-separated list of raw read file suffixes
        #[arg(long, value_name = "LIST", default_value = DEFAULT_SUFFIXES)]
        suffix: String,
    },
}

/// Main entry point for CLI
pub fn run_cli(cli: Cli, config: &RunConfig) -> Result<()> {
    debug!(
        "Run configuration: {}",
        serde_json::to_string(config).unwrap_or_default()
    );

    match cli.command {
        Commands::Derep {
            forward_reads,
            reverse_reads,
            check,
            infix,
            out_dir,
            replicates_list,
            stats,
            force,
        } => {
            let opts = DerepOptions {
                check,
                infix,
                out_dir,
                replicates_list,
                stats,
                force,
                ..DerepOptions::new(forward_reads, reverse_reads)
            };
            derep::run(&opts, config)?;
        }

        Commands::Interleave {
            forward_reads,
            reverse_reads,
            check,
            output,
            force,
        } => {
            let mut out = Sink::open(output.as_deref(), force)?;
            let pairs = interleave(
                open_input(&forward_reads)?,
                &display_name(&forward_reads),
                open_input(&reverse_reads)?,
                &display_name(&reverse_reads),
                &mut out,
                check,
            )?;
            out.finish()?;
            info!("Interleaved {} read pairs", pairs);
        }

        Commands::Fastq2fasta {
            input,
            output,
            force,
            no_check,
        } => {
            let mut out = Sink::open(output.as_deref(), force)?;
            let records = match &input {
                Some(path) => fastq_to_fasta(open_input(path)?, &display_name(path), &mut out, !no_check)?,
                None => {
                    let stdin = io::stdin();
                    fastq_to_fasta(stdin.lock(), "<stdin>", &mut out, !no_check)?
                }
            };
            out.finish()?;
            debug!("Converted {} records", records);
        }

        Commands::ReadCounts {
            source,
            file_name,
            out_txt,
        } => {
            let files = read_counts::collect_sources(&source, &file_name)?;
            let counts = read_counts::count_samples(files, config)?;
            match out_txt {
                Some(path) => {
                    let file = File::create(&path)
                        .with_context(|| format!("Failed to open file for writing: {}", path.display()))?;
                    read_counts::write_counts(&counts, file)?;
                }
                None => read_counts::write_counts(&counts, io::stdout().lock())?,
            }
        }

        Commands::Prep {
            rawreads,
            dest,
            force,
            keep_lanes,
            multi_run,
            suffix,
        } => {
            let opts = PrepOptions {
                rawreads,
                dest,
                force,
                keep_lanes,
                multi_run,
                suffixes: parse_suffixes(&suffix),
            };
            prep::run(&opts, config)?;
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_derep_arguments() {
        let cli = Cli::try_parse_from([
            "omics",
            "-vv",
            "derep",
            "fwd.fastq",
            "rev.fastq",
            "--check",
            "--replicates-list",
            "dupes.txt",
            "-o",
            "out",
        ])
        .unwrap();
        assert_eq!(cli.run_config().verbosity, 3);
        match cli.command {
            Commands::Derep {
                check,
                infix,
                out_dir,
                replicates_list,
                ..
            } => {
                assert!(check);
                assert_eq!(infix, ".derep");
                assert_eq!(out_dir, PathBuf::from("out"));
                assert_eq!(replicates_list, Some(PathBuf::from("dupes.txt")));
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn test_global_options_after_subcommand() {
        let cli = Cli::try_parse_from(["omics", "prep", "raw", "--threads", "3", "--traceback"]).unwrap();
        let config = cli.run_config();
        assert_eq!(config.threads, 3);
        assert!(config.traceback);
    }
}
