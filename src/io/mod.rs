//! Input/Output operations module.
//!
//! Opening read files (plain or gzip-compressed), deriving output file names,
//! and staging outputs so that a failed run never leaves partial files behind.

pub mod fastq; // Record reader state machine and error taxonomy

use fastq::FastqError;
use flate2::read::MultiGzDecoder;
use std::fs::File;
use std::io::{self, BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

const IO_BUFFER_SIZE: usize = 4 * 1024 * 1024;

fn is_gzip(path: &Path) -> bool {
    path.extension().map_or(false, |ext| ext == "gz")
}

/// Open a sequence file for buffered reading, decompressing `.gz` files.
pub fn open_input(path: &Path) -> Result<Box<dyn BufRead + Send>, FastqError> {
    let file = File::open(path).map_err(|e| FastqError::FileSystem {
        path: path.to_path_buf(),
        reason: format!("unable to read input ({})", e),
    })?;
    if is_gzip(path) {
        Ok(Box::new(BufReader::with_capacity(
            IO_BUFFER_SIZE,
            MultiGzDecoder::new(file),
        )))
    } else {
        Ok(Box::new(BufReader::with_capacity(IO_BUFFER_SIZE, file)))
    }
}

/// Display name for a path in diagnostics.
pub fn display_name(path: &Path) -> String {
    path.display().to_string()
}

/// Build `<out_dir>/<stem><infix><suffix>` from an input file name.
///
/// A trailing `.gz` is dropped first since outputs are written uncompressed,
/// so `reads.fastq.gz` with infix `.derep` becomes `reads.derep.fastq`.
pub fn derived_output_path(out_dir: &Path, input: &Path, infix: &str) -> PathBuf {
    let name = input
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let name = if is_gzip(input) {
        name.trim_end_matches(".gz").to_string()
    } else {
        name
    };
    let base = Path::new(&name);
    let stem = base
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let suffix = base
        .extension()
        .map(|e| format!(".{}", e.to_string_lossy()))
        .unwrap_or_default();
    out_dir.join(format!("{}{}{}", stem, infix, suffix))
}

/// Fail unless `dir` is an existing directory.
pub fn ensure_dir(dir: &Path) -> Result<(), FastqError> {
    if dir.is_dir() {
        Ok(())
    } else {
        Err(FastqError::FileSystem {
            path: dir.to_path_buf(),
            reason: "Directory does not exist".to_string(),
        })
    }
}

/// An output file that only appears at its final path once committed.
///
/// Data goes to a temporary file in the destination directory. Dropping a
/// `StagedOutput` without calling [`StagedOutput::commit`] removes it.
pub struct StagedOutput {
    writer: BufWriter<NamedTempFile>,
    target: PathBuf,
    force: bool,
}

/// Fail if `target` exists and `force` is not set.
pub fn check_output(target: &Path, force: bool) -> Result<(), FastqError> {
    if target.exists() && !force {
        return Err(FastqError::FileSystem {
            path: target.to_path_buf(),
            reason: "Output file exists already (use --force to overwrite)".to_string(),
        });
    }
    Ok(())
}

/// Absolute form of `path` with its directory resolved, for comparing paths
/// that may not exist yet.
pub fn resolved_path(path: &Path) -> PathBuf {
    let dir = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    match (std::fs::canonicalize(dir), path.file_name()) {
        (Ok(dir), Some(name)) => dir.join(name),
        _ => path.to_path_buf(),
    }
}

impl StagedOutput {
    pub fn create(target: &Path, force: bool) -> Result<Self, FastqError> {
        check_output(target, force)?;
        let dir = match target.parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
            _ => PathBuf::from("."),
        };
        ensure_dir(&dir)?;
        let tmp = NamedTempFile::new_in(&dir).map_err(|e| FastqError::FileSystem {
            path: dir.clone(),
            reason: format!("unable to create output file ({})", e),
        })?;
        Ok(StagedOutput {
            writer: BufWriter::with_capacity(IO_BUFFER_SIZE, tmp),
            target: target.to_path_buf(),
            force,
        })
    }

    /// Flush and move the data to the target path.
    pub fn commit(self) -> Result<PathBuf, FastqError> {
        let target = self.target;
        let tmp = self.writer.into_inner().map_err(|e| e.into_error())?;
        let persisted = if self.force {
            tmp.persist(&target)
        } else {
            tmp.persist_noclobber(&target)
        };
        persisted.map_err(|e| FastqError::FileSystem {
            path: target.clone(),
            reason: format!("unable to write output ({})", e.error),
        })?;
        Ok(target)
    }
}

impl Write for StagedOutput {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.writer.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.writer.flush()
    }
}

/// Destination for commands that default to standard output.
pub enum Sink {
    Stdout(BufWriter<io::Stdout>),
    File(StagedOutput),
}

impl Sink {
    /// `None` selects standard output.
    pub fn open(path: Option<&Path>, force: bool) -> Result<Self, FastqError> {
        match path {
            Some(p) => Ok(Sink::File(StagedOutput::create(p, force)?)),
            None => Ok(Sink::Stdout(BufWriter::new(io::stdout()))),
        }
    }

    pub fn finish(self) -> Result<(), FastqError> {
        match self {
            Sink::Stdout(mut w) => Ok(w.flush()?),
            Sink::File(staged) => staged.commit().map(|_| ()),
        }
    }
}

impl Write for Sink {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            Sink::Stdout(w) => w.write(buf),
            Sink::File(w) => w.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            Sink::Stdout(w) => w.flush(),
            Sink::File(w) => w.flush(),
        }
    }
}
