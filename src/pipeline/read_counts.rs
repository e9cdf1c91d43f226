//! Per-sample read counting.

use crate::config::RunConfig;
use crate::utils::parallel::run_independent;
use anyhow::{anyhow, Context, Result};
use log::{debug, info, warn};
use needletail::parse_fastx_file;
use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

/// Default name of the per-sample forward reads file.
pub const DEFAULT_READS_FILE: &str = "fwd.fastq";

fn sample_name(path: &Path) -> String {
    let resolved = fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf());
    resolved
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

/// Resolve command line sources into `(sample, file)` pairs.
///
/// A directory contributes `<dir>/<file_name>` under the directory's name,
/// a plain file is its own sample.
pub fn collect_sources(sources: &[PathBuf], file_name: &str) -> Result<Vec<(String, PathBuf)>> {
    let mut files = Vec::new();
    for source in sources {
        if source.is_dir() {
            let file = source.join(file_name);
            if file.is_file() {
                files.push((sample_name(source), file));
            } else {
                warn!("File not found in directory {}: {}", source.display(), file.display());
            }
        } else if source.is_file() {
            files.push((sample_name(source), source.clone()));
        } else {
            return Err(anyhow!("File or directory not found: {}", source.display()));
        }
    }
    files.sort();
    files.dedup();
    if files.is_empty() {
        return Err(anyhow!("No files found"));
    }
    Ok(files)
}

/// Count the records of a FASTA/FASTQ file, compressed or not.
pub fn count_reads(path: &Path) -> Result<u64> {
    let mut reader = parse_fastx_file(path)
        .with_context(|| format!("Failed to open or parse file: {}", path.display()))?;
    let mut count = 0;
    while let Some(record) = reader.next() {
        record.with_context(|| {
            format!("Failed to parse record {} in file {}", count + 1, path.display())
        })?;
        count += 1;
    }
    Ok(count)
}

/// Count every file on the configured pool, keeping one count per sample.
pub fn count_samples(files: Vec<(String, PathBuf)>, config: &RunConfig) -> Result<BTreeMap<String, u64>> {
    let outcomes = run_independent(files, config.threads, |(_, path)| count_reads(path))?;

    let mut counts = BTreeMap::new();
    let mut failed = 0;
    for outcome in outcomes {
        let (sample, path) = outcome.item;
        match outcome.result {
            Ok(n) => {
                debug!("{}: {} reads in {}", sample, n, path.display());
                if counts.contains_key(&sample) {
                    warn!("Ambiguous sample id: {} -- keeping only one read count", sample);
                } else {
                    counts.insert(sample, n);
                }
            }
            Err(_) => failed += 1,
        }
    }
    if failed > 0 {
        return Err(anyhow!("Failed to count reads in {} file(s)", failed));
    }
    info!("Counted reads for {} samples", counts.len());
    Ok(counts)
}

/// Write `sample<TAB>count` rows sorted by sample.
pub fn write_counts<W: Write>(counts: &BTreeMap<String, u64>, out: W) -> Result<()> {
    let mut writer = csv::WriterBuilder::new()
        .delimiter(b'\t')
        .has_headers(false)
        .from_writer(out);
    for (sample, count) in counts {
        writer.write_record([sample.as_str(), count.to_string().as_str()])?;
    }
    writer.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::write::GzEncoder;
    use flate2::Compression;
    use tempfile::tempdir;

    #[test]
    fn test_count_fastq_fasta_and_gz() {
        let dir = tempdir().unwrap();
        let fq = dir.path().join("a.fastq");
        fs::write(&fq, "@a\nAC\n+\nII\n@b\nGG\n+\nII\n").unwrap();
        let fa = dir.path().join("b.fasta");
        fs::write(&fa, ">a\nAC\n>b\nGG\n>c\nTT\n").unwrap();
        let gz = dir.path().join("c.fastq.gz");
        let mut encoder = GzEncoder::new(fs::File::create(&gz).unwrap(), Compression::default());
        encoder.write_all(b"@a\nAC\n+\nII\n").unwrap();
        encoder.finish().unwrap();

        assert_eq!(count_reads(&fq).unwrap(), 2);
        assert_eq!(count_reads(&fa).unwrap(), 3);
        assert_eq!(count_reads(&gz).unwrap(), 1);
    }

    #[test]
    fn test_truncated_file_is_an_error() {
        let dir = tempdir().unwrap();
        let fq = dir.path().join("bad.fastq");
        fs::write(&fq, "@a\nACGT\n+\nII").unwrap();
        assert!(count_reads(&fq).is_err());
    }

    #[test]
    fn test_samples_from_directories() {
        let dir = tempdir().unwrap();
        for (sample, reads) in [("s1", 1), ("s2", 2)] {
            let sdir = dir.path().join(sample);
            fs::create_dir(&sdir).unwrap();
            fs::write(sdir.join("fwd.fastq"), "@a\nAC\n+\nII\n".repeat(reads)).unwrap();
        }
        fs::create_dir(dir.path().join("empty")).unwrap();

        let sources = vec![
            dir.path().join("s2"),
            dir.path().join("s1"),
            dir.path().join("empty"),
        ];
        let files = collect_sources(&sources, DEFAULT_READS_FILE).unwrap();
        assert_eq!(files.len(), 2);

        let config = RunConfig::from_flags(0, false, Some(2), false);
        let counts = count_samples(files, &config).unwrap();

        let mut out = Vec::new();
        write_counts(&counts, &mut out).unwrap();
        assert_eq!(String::from_utf8(out).unwrap(), "s1\t1\ns2\t2\n");
    }

    #[test]
    fn test_missing_source() {
        let dir = tempdir().unwrap();
        assert!(collect_sources(&[dir.path().join("nope")], DEFAULT_READS_FILE).is_err());
        assert!(collect_sources(&[], DEFAULT_READS_FILE).is_err());
    }
}
