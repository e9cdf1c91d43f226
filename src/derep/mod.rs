//! Removal of replicated read pairs from paired FASTQ files.
//!
//! Two sequential passes over the inputs:
//! 1. index every pair by its [`index::pair_key`], remembering the byte offset of
//!    the best-quality copy first in each duplicate group;
//! 2. re-read both files and write every pair whose offset is not in the
//!    exclusion set built from that index.
//!
//! Outputs are staged and only moved into place after the second pass
//! succeeds.

pub mod index;
pub mod writer;

pub use index::{build_filter, find_duplicates};
pub use writer::filter_write;

use crate::config::RunConfig;
use crate::io::fastq::{FastqError, PairedReader, RecordReader, SeqFormat};
use crate::io::{
    check_output, derived_output_path, display_name, ensure_dir, open_input, resolved_path, StagedOutput,
};
use itertools::Itertools;
use log::{debug, info};
use serde::{Deserialize, Serialize};
use std::io::{BufRead, Write};
use std::path::{Path, PathBuf};
use std::time::Instant;

/// Infix placed between stem and suffix of output file names.
pub const DEFAULT_INFIX: &str = ".derep";

/// Options of a de-duplication run.
#[derive(Debug, Clone)]
pub struct DerepOptions {
    pub forward_reads: PathBuf,
    pub reverse_reads: PathBuf,
    pub check: bool,
    pub infix: String,
    pub out_dir: PathBuf,
    pub replicates_list: Option<PathBuf>,
    pub stats: Option<PathBuf>,
    pub force: bool,
}

impl DerepOptions {
    pub fn new(forward_reads: impl Into<PathBuf>, reverse_reads: impl Into<PathBuf>) -> Self {
        DerepOptions {
            forward_reads: forward_reads.into(),
            reverse_reads: reverse_reads.into(),
            check: false,
            infix: DEFAULT_INFIX.to_string(),
            out_dir: PathBuf::from("."),
            replicates_list: None,
            stats: None,
            force: false,
        }
    }

    pub fn forward_output(&self) -> PathBuf {
        derived_output_path(&self.out_dir, &self.forward_reads, &self.infix)
    }

    pub fn reverse_output(&self) -> PathBuf {
        derived_output_path(&self.out_dir, &self.reverse_reads, &self.infix)
    }
}

/// Summary of a finished run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DerepStats {
    pub total_pairs: u64,
    pub distinct_keys: u64,
    pub duplicate_pairs: u64,
    pub kept_pairs: u64,
    pub forward_output: PathBuf,
    pub reverse_output: PathBuf,
    pub processing_time_seconds: f64,
}

fn open_pairs(
    fwd: &Path,
    rev: &Path,
    check: bool,
) -> Result<PairedReader<Box<dyn BufRead + Send>, Box<dyn BufRead + Send>>, FastqError> {
    let fwd_reader =
        RecordReader::new(open_input(fwd)?, display_name(fwd), SeqFormat::Fastq).with_check(check);
    let rev_reader =
        RecordReader::new(open_input(rev)?, display_name(rev), SeqFormat::Fastq).with_check(check);
    Ok(PairedReader::new(fwd_reader, rev_reader))
}

/// Every file a run reads or writes must be a different file.
fn check_distinct_paths(opts: &DerepOptions, fwd_out: &Path, rev_out: &Path) -> Result<(), FastqError> {
    let mut files: Vec<(&str, &Path)> = vec![
        ("forward input", opts.forward_reads.as_path()),
        ("reverse input", opts.reverse_reads.as_path()),
        ("forward output", fwd_out),
        ("reverse output", rev_out),
    ];
    if let Some(path) = &opts.replicates_list {
        files.push(("replicates list", path.as_path()));
    }
    if let Some(path) = &opts.stats {
        files.push(("statistics file", path.as_path()));
    }

    let resolved: Vec<PathBuf> = files.iter().map(|(_, path)| resolved_path(path)).collect();
    for (i, j) in (0..files.len()).tuple_combinations() {
        if resolved[i] == resolved[j] {
            return Err(FastqError::FileSystem {
                path: files[j].1.to_path_buf(),
                reason: format!("The {} would be the same file as the {}", files[j].0, files[i].0),
            });
        }
    }
    Ok(())
}

/// Run both passes and write the de-duplicated files.
pub fn run(opts: &DerepOptions, config: &RunConfig) -> Result<DerepStats, FastqError> {
    let start_time = Instant::now();
    ensure_dir(&opts.out_dir)?;
    let fwd_out_path = opts.forward_output();
    let rev_out_path = opts.reverse_output();
    check_distinct_paths(opts, &fwd_out_path, &rev_out_path)?;
    check_output(&fwd_out_path, opts.force)?;
    check_output(&rev_out_path, opts.force)?;

    let index = find_duplicates(open_pairs(&opts.forward_reads, &opts.reverse_reads, opts.check)?)?;
    debug!("total paired-read count: {}", index.total_pairs());
    debug!("replicated paired-reads: {}", index.duplicate_pairs());

    let refuse = build_filter(&index);

    let mut fwd_out = StagedOutput::create(&fwd_out_path, opts.force)?;
    let mut rev_out = StagedOutput::create(&rev_out_path, opts.force)?;
    let mut dupe_log = match &opts.replicates_list {
        Some(path) => Some(StagedOutput::create(path, true)?),
        None => None,
    };
    debug!(
        "writing dereplicated output to {} and {}",
        fwd_out_path.display(),
        rev_out_path.display()
    );

    let summary = filter_write(
        &refuse,
        open_pairs(&opts.forward_reads, &opts.reverse_reads, opts.check)?,
        &mut fwd_out,
        &mut rev_out,
        dupe_log.as_mut().map(|log| log as &mut dyn Write),
    )?;

    let forward_output = fwd_out.commit()?;
    let reverse_output = rev_out.commit()?;
    if let Some(log) = dupe_log {
        log.commit()?;
    }

    let stats = DerepStats {
        total_pairs: index.total_pairs(),
        distinct_keys: index.distinct_keys(),
        duplicate_pairs: summary.removed,
        kept_pairs: summary.kept,
        forward_output,
        reverse_output,
        processing_time_seconds: start_time.elapsed().as_secs_f64(),
    };
    info!(
        "{} of {} read pairs kept, {} replicates removed",
        stats.kept_pairs, stats.total_pairs, stats.duplicate_pairs
    );

    if let Some(path) = &opts.stats {
        let mut out = StagedOutput::create(path, true)?;
        serde_json::to_writer_pretty(&mut out, &stats).map_err(std::io::Error::from)?;
        out.commit()?;
        debug!("statistics written to {}", path.display());
    }
    debug!("derep finished using config {:?}", config);

    Ok(stats)
}
