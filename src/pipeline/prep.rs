//! Collect raw Illumina read files into per-sample directories.
//!
//! Raw files are expected to be named like
//! `<sample>[_<index>][_S<n>]_L<lane>_R<1|2>_<fnum>.fastq[.gz]`, or with a
//! leading `<run>_` for multi-run data. Files are grouped per sample (and
//! optionally per lane), and all forward resp. reverse files of a group are
//! concatenated, decompressing where needed, into `<dest>/<sample>/fwd.fastq`
//! and `rev.fastq`. Every output file is written by its own task.

use crate::config::RunConfig;
use crate::io::fastq::FastqError;
use crate::io::open_input;
use crate::utils::parallel::{run_independent, ParallelError};
use itertools::Itertools;
use log::{debug, error, info, trace};
use regex::Regex;
use std::collections::BTreeSet;
use std::fmt;
use std::fs::{self, File};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use thiserror::Error;

pub const FORWARD_READS_FILE: &str = "fwd.fastq";
pub const REVERSE_READS_FILE: &str = "rev.fastq";

/// Suffixes searched for in directories when none are given.
pub const DEFAULT_SUFFIXES: &str = "fastq,fastq.gz";

static RAW_READS_FILE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^(?P<sampleid>[^_]+)(_(?P<index>[-a-zA-Z]+))?(_S(?P<snum>\d+))?_L(?P<lane>\d+)_R(?P<dir>[12])_(?P<fnum>\d+)\.(?P<suffix>.*)",
    )
    .expect("valid raw reads file pattern")
});

static MULTI_RUN_FILE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^(?P<runid>[^_]+)_(?P<sampleid>[^_]+)(_(?P<index>[-a-zA-Z]+))?(_S(?P<snum>\d+))?_L(?P<lane>\d+)_R(?P<dir>[12])_(?P<fnum>\d+)\.(?P<suffix>.*)",
    )
    .expect("valid multi-run file pattern")
});

static DIRECTION: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"_R(?P<dir>[12])_").expect("valid direction pattern"));

// --- Error Type ---
#[derive(Error, Debug)]
pub enum PrepError {
    #[error(
        "The name of file {} does not follow the supported pattern:\n  \
         <sample>_<index>_S<n>_L<nnn>_R(1|2)_<nnn>.fastq[.gz]\n\
         or with --multi-run\n  \
         <run>_<sample>_<index>_S<n>_L<nnn>_R(1|2)_<nnn>.fastq[.gz]\n\
         You may need to manually set up your sample directories.",
        .0.display()
    )]
    FileNameDoesNotMatch(PathBuf),

    #[error("Output file exists already (use --force to overwrite): {}", .0.display())]
    FileExists(PathBuf),

    #[error("File or directory not found: {}", .0.display())]
    NotFound(PathBuf),

    #[error("No files found")]
    NoFiles,

    #[error("Failed to write {0} output file(s)")]
    TasksFailed(usize),

    #[error(transparent)]
    Input(#[from] FastqError),

    #[error(transparent)]
    Parallel(#[from] ParallelError),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

impl PrepError {
    pub fn kind(&self) -> &'static str {
        match self {
            PrepError::FileNameDoesNotMatch(_) => "FileNameDoesNotMatch",
            PrepError::FileExists(_) | PrepError::NotFound(_) | PrepError::NoFiles => {
                "FileSystemError"
            }
            PrepError::TasksFailed(_) => "PrepError",
            PrepError::Input(e) => e.kind(),
            PrepError::Parallel(e) => e.kind(),
            PrepError::Io(_) => "IOError",
        }
    }
}

/// Options of a prep run.
#[derive(Debug, Clone)]
pub struct PrepOptions {
    pub rawreads: Vec<PathBuf>,
    pub dest: PathBuf,
    pub force: bool,
    pub keep_lanes: bool,
    pub multi_run: bool,
    pub suffixes: Vec<String>,
}

impl Default for PrepOptions {
    fn default() -> Self {
        PrepOptions {
            rawreads: vec![PathBuf::from(".")],
            dest: PathBuf::from("."),
            force: false,
            keep_lanes: false,
            multi_run: false,
            suffixes: parse_suffixes(DEFAULT_SUFFIXES),
        }
    }
}

/// Split a comma-separated suffix list, ignoring leading dots.
pub fn parse_suffixes(list: &str) -> Vec<String> {
    list.split(',')
        .map(|s| s.trim().trim_start_matches('.').to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

/// Fields parsed from a raw reads file name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawReadName {
    pub run: Option<String>,
    pub sample: String,
    pub lane: String,
    pub direction: Direction,
    pub file_number: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Direction {
    Forward,
    Reverse,
}

impl Direction {
    fn from_digit(d: &str) -> Option<Self> {
        match d {
            "1" => Some(Direction::Forward),
            "2" => Some(Direction::Reverse),
            _ => None,
        }
    }

    pub fn file_name(self) -> &'static str {
        match self {
            Direction::Forward => FORWARD_READS_FILE,
            Direction::Reverse => REVERSE_READS_FILE,
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Forward => write!(f, "fwd"),
            Direction::Reverse => write!(f, "rev"),
        }
    }
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

pub fn parse_raw_name(name: &str, multi_run: bool) -> Option<RawReadName> {
    let pattern = if multi_run { &MULTI_RUN_FILE } else { &RAW_READS_FILE };
    let caps = pattern.captures(name)?;
    Some(RawReadName {
        run: caps.name("runid").map(|m| m.as_str().to_string()),
        sample: caps["sampleid"].to_string(),
        lane: caps["lane"].to_string(),
        direction: Direction::from_digit(&caps["dir"])?,
        file_number: caps["fnum"].parse().ok()?,
    })
}

/// Read direction from a file name, more permissive than [`parse_raw_name`].
pub fn sample_direction(path: &Path) -> Option<Direction> {
    let name = file_name(path);
    let caps = DIRECTION.captures(&name)?;
    Direction::from_digit(&caps["dir"])
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
enum KeyPart {
    Num(u64),
    Text(String),
}

/// Sort key: sample first, then lanes before direction when lanes are kept
/// separate, direction first otherwise. Unparseable names sort by name.
fn sort_key(path: &Path, opts: &PrepOptions) -> (String, Vec<KeyPart>) {
    let name = file_name(path);
    let key = match parse_raw_name(&name, opts.multi_run) {
        None => (name.clone(), vec![KeyPart::Num(0), KeyPart::Text(String::new())]),
        Some(raw) => {
            let run = KeyPart::Text(raw.run.clone().unwrap_or_default());
            let lane = KeyPart::Num(raw.lane.parse().unwrap_or(0));
            let dir = KeyPart::Num(raw.direction as u64);
            let mut rest = if opts.keep_lanes {
                vec![run, lane, dir]
            } else {
                vec![dir, run, lane]
            };
            rest.push(KeyPart::Num(raw.file_number as u64));
            (raw.sample, rest)
        }
    };
    trace!("parsed: {} -> {:?}", path.display(), key);
    key
}

/// Sample directory name for a file: the sample id, plus run and lane (without
/// leading zeros) when lanes are kept separate.
fn group_key(path: &Path, opts: &PrepOptions) -> Result<String, PrepError> {
    let raw = parse_raw_name(&file_name(path), opts.multi_run)
        .ok_or_else(|| PrepError::FileNameDoesNotMatch(path.to_path_buf()))?;
    let mut parts = vec![raw.sample];
    if opts.keep_lanes {
        if let Some(run) = raw.run {
            parts.push(run);
        }
        let lane = raw.lane.trim_start_matches('0');
        parts.push(if lane.is_empty() { "0".to_string() } else { lane.to_string() });
    }
    Ok(parts.join("_"))
}

/// Files of one sample, in concatenation order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SampleGroup {
    pub sample: String,
    pub files: Vec<PathBuf>,
}

/// Sort files and group them by sample.
pub fn group(files: Vec<PathBuf>, opts: &PrepOptions) -> Result<Vec<SampleGroup>, PrepError> {
    let keyed: Vec<(String, PathBuf)> = files
        .into_iter()
        .sorted_by_cached_key(|p| (sort_key(p, opts), p.clone()))
        .map(|p| group_key(&p, opts).map(|key| (key, p)))
        .collect::<Result<_, PrepError>>()?;

    let mut groups = Vec::new();
    for (sample, chunk) in &keyed.into_iter().chunk_by(|(key, _)| key.clone()) {
        groups.push(SampleGroup {
            sample,
            files: chunk.map(|(_, p)| p).collect(),
        });
    }
    Ok(groups)
}

/// One output file to be assembled from a series of inputs.
#[derive(Debug, Clone)]
pub struct CopyTask {
    pub sample: String,
    pub direction: Direction,
    pub outfile: PathBuf,
    pub series: Vec<PathBuf>,
}

/// Create the sample directory and plan one task per read direction.
pub fn plan_sample(group: &SampleGroup, dest: &Path, force: bool) -> Result<Vec<CopyTask>, PrepError> {
    let destdir = dest.join(&group.sample);
    fs::create_dir_all(&destdir)?;

    for direction in [Direction::Forward, Direction::Reverse] {
        let outfile = destdir.join(direction.file_name());
        if outfile.is_file() && !force {
            return Err(PrepError::FileExists(outfile));
        }
    }

    let mut tasks: Vec<CopyTask> = Vec::new();
    for path in &group.files {
        let direction =
            sample_direction(path).ok_or_else(|| PrepError::FileNameDoesNotMatch(path.clone()))?;
        match tasks.iter_mut().find(|t| t.direction == direction) {
            Some(task) => task.series.push(path.clone()),
            None => tasks.push(CopyTask {
                sample: group.sample.clone(),
                direction,
                outfile: destdir.join(direction.file_name()),
                series: vec![path.clone()],
            }),
        }
    }
    Ok(tasks)
}

/// Concatenate a task's inputs into its output file. Returns bytes written.
pub fn extract_and_copy(task: &CopyTask) -> Result<u64, PrepError> {
    let mut out = BufWriter::with_capacity(4 * 1024 * 1024, File::create(&task.outfile)?);
    let mut total = 0;
    for input in &task.series {
        let action = if input.extension().map_or(false, |e| e == "gz") {
            "extr"
        } else {
            "copy"
        };
        debug!(
            "{}: {} {} >> {}",
            task.sample,
            action,
            input.display(),
            task.outfile.display()
        );
        let mut reader = open_input(input)?;
        total += io::copy(&mut reader, &mut out)?;
    }
    out.flush()?;
    Ok(total)
}

/// Expand command line arguments into the set of raw read files.
pub fn find_files(opts: &PrepOptions) -> Result<Vec<PathBuf>, PrepError> {
    let mut files = BTreeSet::new();
    for path in &opts.rawreads {
        if path.is_dir() {
            for entry in fs::read_dir(path)? {
                let entry_path = entry?.path();
                let name = file_name(&entry_path);
                let matches = opts
                    .suffixes
                    .iter()
                    .any(|suf| name.len() > suf.len() + 1 && name.ends_with(&format!(".{}", suf)));
                if entry_path.is_file() && matches {
                    files.insert(entry_path);
                }
            }
        } else if path.is_file() {
            files.insert(path.clone());
        } else {
            return Err(PrepError::NotFound(path.clone()));
        }
    }
    if files.is_empty() {
        return Err(PrepError::NoFiles);
    }
    Ok(files.into_iter().collect())
}

/// Run prep over all raw read files. Returns the number of samples.
pub fn run(opts: &PrepOptions, config: &RunConfig) -> Result<usize, PrepError> {
    let files = find_files(opts)?;
    info!("Found {} read files.", files.len());
    for f in &files {
        trace!("  -> {}", f.display());
    }
    debug!("Using {} threads.", config.threads);

    let groups = group(files, opts)?;
    let mut tasks = Vec::new();
    for g in &groups {
        tasks.extend(plan_sample(g, &opts.dest, opts.force)?);
    }

    let outcomes = run_independent(tasks, config.threads, extract_and_copy)?;
    let mut failed = 0;
    for outcome in &outcomes {
        let task = &outcome.item;
        match &outcome.result {
            Ok(bytes) => debug!("Done: {} {} ({} bytes)", task.sample, task.direction, bytes),
            Err(e) => {
                failed += 1;
                error!("Failed to write: {}: {}: {}", task.sample, task.direction, e);
            }
        }
    }
    if failed > 0 {
        return Err(PrepError::TasksFailed(failed));
    }

    info!("Processed {} samples", groups.len());
    Ok(groups.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::write::GzEncoder;
    use flate2::Compression;
    use tempfile::tempdir;

    fn paths(names: &[&str]) -> Vec<PathBuf> {
        names.iter().map(PathBuf::from).collect()
    }

    #[test]
    fn test_parse_raw_name() {
        let raw = parse_raw_name("66145_CATTGAC_S1_L007_R1_001.fastq.gz", false).unwrap();
        assert_eq!(raw.sample, "66145");
        assert_eq!(raw.lane, "007");
        assert_eq!(raw.direction, Direction::Forward);
        assert_eq!(raw.file_number, 1);
        assert_eq!(raw.run, None);

        let multi = parse_raw_name("run7_66145_S1_L002_R2_003.fastq", true).unwrap();
        assert_eq!(multi.run.as_deref(), Some("run7"));
        assert_eq!(multi.sample, "66145");
        assert_eq!(multi.direction, Direction::Reverse);

        assert!(parse_raw_name("reads.fastq", false).is_none());
    }

    #[test]
    fn test_group_merges_lanes() {
        let files = paths(&[
            "s2_L001_R2_001.fastq",
            "s1_S1_L002_R1_001.fastq",
            "s1_S1_L001_R2_001.fastq",
            "s1_S1_L001_R1_002.fastq",
            "s1_S1_L001_R1_001.fastq",
            "s2_L001_R1_001.fastq",
        ]);
        let groups = group(files, &PrepOptions::default()).unwrap();
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].sample, "s1");
        assert_eq!(
            groups[0].files,
            paths(&[
                "s1_S1_L001_R1_001.fastq",
                "s1_S1_L001_R1_002.fastq",
                "s1_S1_L002_R1_001.fastq",
                "s1_S1_L001_R2_001.fastq",
            ])
        );
        assert_eq!(groups[1].sample, "s2");
    }

    #[test]
    fn test_group_keeps_lanes_separate() {
        let files = paths(&[
            "s1_L002_R1_001.fastq",
            "s1_L001_R2_001.fastq",
            "s1_L001_R1_001.fastq",
            "s1_L002_R2_001.fastq",
        ]);
        let opts = PrepOptions {
            keep_lanes: true,
            ..PrepOptions::default()
        };
        let groups = group(files, &opts).unwrap();
        let samples: Vec<&str> = groups.iter().map(|g| g.sample.as_str()).collect();
        assert_eq!(samples, vec!["s1_1", "s1_2"]);
        assert_eq!(
            groups[0].files,
            paths(&["s1_L001_R1_001.fastq", "s1_L001_R2_001.fastq"])
        );
    }

    #[test]
    fn test_multi_run_lanes_include_run() {
        let files = paths(&["r2_s1_L001_R1_001.fastq", "r1_s1_L001_R1_001.fastq"]);
        let opts = PrepOptions {
            keep_lanes: true,
            multi_run: true,
            ..PrepOptions::default()
        };
        let samples: Vec<String> = group(files, &opts).unwrap().into_iter().map(|g| g.sample).collect();
        assert_eq!(samples, vec!["s1_r1_1", "s1_r2_1"]);
    }

    #[test]
    fn test_unparseable_name() {
        let err = group(paths(&["reads.fastq"]), &PrepOptions::default()).unwrap_err();
        assert_eq!(err.kind(), "FileNameDoesNotMatch");
    }

    #[test]
    fn test_run_concatenates_and_decompresses() {
        let raw = tempdir().unwrap();
        let dest = tempdir().unwrap();
        fs::write(raw.path().join("s1_L001_R1_001.fastq"), "@a\nA\n+\nI\n").unwrap();
        let gz = raw.path().join("s1_L001_R1_002.fastq.gz");
        let mut encoder = GzEncoder::new(File::create(&gz).unwrap(), Compression::default());
        encoder.write_all(b"@b\nC\n+\nI\n").unwrap();
        encoder.finish().unwrap();
        fs::write(raw.path().join("s1_L001_R2_001.fastq"), "@a\nG\n+\nI\n").unwrap();
        fs::write(raw.path().join("notes.txt"), "ignored").unwrap();

        let opts = PrepOptions {
            rawreads: vec![raw.path().to_path_buf()],
            dest: dest.path().to_path_buf(),
            ..PrepOptions::default()
        };
        let config = RunConfig::from_flags(0, false, Some(2), false);
        assert_eq!(run(&opts, &config).unwrap(), 1);

        let sample_dir = dest.path().join("s1");
        assert_eq!(
            fs::read_to_string(sample_dir.join(FORWARD_READS_FILE)).unwrap(),
            "@a\nA\n+\nI\n@b\nC\n+\nI\n"
        );
        assert_eq!(
            fs::read_to_string(sample_dir.join(REVERSE_READS_FILE)).unwrap(),
            "@a\nG\n+\nI\n"
        );

        // outputs exist now
        let err = run(&opts, &config).unwrap_err();
        assert!(matches!(err, PrepError::FileExists(_)));

        let forced = PrepOptions { force: true, ..opts };
        assert_eq!(run(&forced, &config).unwrap(), 1);
        assert_eq!(
            fs::read_to_string(sample_dir.join(REVERSE_READS_FILE)).unwrap(),
            "@a\nG\n+\nI\n"
        );
    }

    #[test]
    fn test_failed_copy_does_not_stop_other_tasks() {
        let raw = tempdir().unwrap();
        let dest = tempdir().unwrap();
        fs::write(raw.path().join("s1_L001_R1_001.fastq"), "@a\nA\n+\nI\n").unwrap();
        fs::write(raw.path().join("s1_L001_R2_001.fastq"), "@a\nG\n+\nI\n").unwrap();
        fs::write(raw.path().join("s2_L001_R1_001.fastq.gz"), "not gzip data").unwrap();
        fs::write(raw.path().join("s2_L001_R2_001.fastq"), "@b\nT\n+\nI\n").unwrap();

        let opts = PrepOptions {
            rawreads: vec![raw.path().to_path_buf()],
            dest: dest.path().to_path_buf(),
            ..PrepOptions::default()
        };
        let config = RunConfig::from_flags(0, false, Some(2), false);
        let err = run(&opts, &config).unwrap_err();
        assert!(matches!(err, PrepError::TasksFailed(1)));
        assert_eq!(err.kind(), "PrepError");

        assert_eq!(
            fs::read_to_string(dest.path().join("s1").join(FORWARD_READS_FILE)).unwrap(),
            "@a\nA\n+\nI\n"
        );
        assert_eq!(
            fs::read_to_string(dest.path().join("s1").join(REVERSE_READS_FILE)).unwrap(),
            "@a\nG\n+\nI\n"
        );
        assert_eq!(
            fs::read_to_string(dest.path().join("s2").join(REVERSE_READS_FILE)).unwrap(),
            "@b\nT\n+\nI\n"
        );
    }

    #[test]
    fn test_find_files_errors() {
        let dir = tempdir().unwrap();
        let opts = PrepOptions {
            rawreads: vec![dir.path().to_path_buf()],
            ..PrepOptions::default()
        };
        assert!(matches!(find_files(&opts), Err(PrepError::NoFiles)));

        let opts = PrepOptions {
            rawreads: vec![dir.path().join("missing")],
            ..PrepOptions::default()
        };
        assert!(matches!(find_files(&opts), Err(PrepError::NotFound(_))));
    }

    #[test]
    fn test_parse_suffixes() {
        assert_eq!(parse_suffixes("fastq,.fastq.gz, fq"), vec!["fastq", "fastq.gz", "fq"]);
    }
}
