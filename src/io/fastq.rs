//! Line-oriented FASTQ/FASTA record reading.
//!
//! Records are assembled by a small state machine (`Head -> Seq -> Plus ->
//! Score -> Head`, or `Head -> Seq -> Head` for FASTA) that keeps every line
//! verbatim, line terminator included, so records can be written back out
//! byte for byte. Each record is tagged with the byte offset of its header
//! line in the (decompressed) input stream.

use log::warn;
use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use thiserror::Error;

// --- Error Type ---
#[derive(Error, Debug)]
pub enum FastqError {
    /// Input does not follow the record structure.
    #[error("expected {expected} in {path}: {line:?}")]
    Format {
        path: String,
        expected: &'static str,
        line: String,
    },

    #[error("{0} input is not supported here, not implemented")]
    UnsupportedFormat(&'static str),

    #[error("{reason}: {}", .path.display())]
    FileSystem { path: PathBuf, reason: String },

    #[error("illegal internal state reached: {0}")]
    InternalState(String),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

impl FastqError {
    /// Name of the error class, used for one-line diagnostics.
    pub fn kind(&self) -> &'static str {
        match self {
            FastqError::Format { .. } => "FormatError",
            FastqError::UnsupportedFormat(_) => "UnsupportedFormatError",
            FastqError::FileSystem { .. } => "FileSystemError",
            FastqError::InternalState(_) => "InternalStateError",
            FastqError::Io(_) => "IOError",
        }
    }

    fn format(path: &str, expected: &'static str, line: &[u8]) -> Self {
        FastqError::Format {
            path: path.to_string(),
            expected,
            line: String::from_utf8_lossy(line).into_owned(),
        }
    }
}

/// Sequence file flavour, identified by the first byte of a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeqFormat {
    Fastq,
    Fasta,
}

impl SeqFormat {
    pub fn marker(self) -> u8 {
        match self {
            SeqFormat::Fastq => b'@',
            SeqFormat::Fasta => b'>',
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            SeqFormat::Fastq => "FASTQ",
            SeqFormat::Fasta => "FASTA",
        }
    }

    pub fn from_marker(byte: u8) -> Option<Self> {
        match byte {
            b'@' => Some(SeqFormat::Fastq),
            b'>' => Some(SeqFormat::Fasta),
            _ => None,
        }
    }
}

/// Peek at the first byte of a stream to decide its format.
///
/// Nothing is consumed from `reader`.
pub fn detect_format<R: BufRead>(reader: &mut R, name: &str) -> Result<SeqFormat, FastqError> {
    let buf = reader.fill_buf()?;
    let Some(&first) = buf.first() else {
        return Err(FastqError::Format {
            path: name.to_string(),
            expected: "a header line, file empty?",
            line: String::new(),
        });
    };
    SeqFormat::from_marker(first).ok_or_else(|| {
        let head = &buf[..buf.len().min(20)];
        FastqError::format(name, "'>' or '@' as first character", head)
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LineState {
    Head,
    Seq,
    Plus,
    Score,
}

impl LineState {
    fn next(self, format: SeqFormat) -> Self {
        match (self, format) {
            (LineState::Head, _) => LineState::Seq,
            (LineState::Seq, SeqFormat::Fasta) => LineState::Head,
            (LineState::Seq, SeqFormat::Fastq) => LineState::Plus,
            (LineState::Plus, _) => LineState::Score,
            (LineState::Score, _) => LineState::Head,
        }
    }
}

/// One sequence record with its raw lines.
///
/// For FASTA records `sep` and `qual` are empty.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Record {
    pub header: Vec<u8>,
    pub seq: Vec<u8>,
    pub sep: Vec<u8>,
    pub qual: Vec<u8>,
}

/// Strip a trailing `\n` or `\r\n`.
pub fn trim_line(line: &[u8]) -> &[u8] {
    let line = line.strip_suffix(b"\n").unwrap_or(line);
    line.strip_suffix(b"\r").unwrap_or(line)
}

impl Record {
    pub fn header(&self) -> &[u8] {
        trim_line(&self.header)
    }

    pub fn seq(&self) -> &[u8] {
        trim_line(&self.seq)
    }

    pub fn qual(&self) -> &[u8] {
        trim_line(&self.qual)
    }

    /// Write all lines exactly as they were read.
    pub fn write_to<W: Write + ?Sized>(&self, out: &mut W) -> io::Result<()> {
        out.write_all(&self.header)?;
        out.write_all(&self.seq)?;
        out.write_all(&self.sep)?;
        out.write_all(&self.qual)
    }
}

#[derive(Default)]
struct PartialRecord {
    header: Option<Vec<u8>>,
    seq: Option<Vec<u8>>,
    sep: Option<Vec<u8>>,
    qual: Option<Vec<u8>>,
}

impl PartialRecord {
    /// Most recently filled line of an unfinished record.
    fn last_line(&self) -> &[u8] {
        [&self.qual, &self.sep, &self.seq, &self.header]
            .into_iter()
            .find_map(|line| line.as_deref())
            .unwrap_or_default()
    }

    fn finish(self, format: SeqFormat) -> Result<Record, FastqError> {
        match (format, self.header, self.seq, self.sep, self.qual) {
            (SeqFormat::Fastq, Some(header), Some(seq), Some(sep), Some(qual)) => Ok(Record {
                header,
                seq,
                sep,
                qual,
            }),
            (SeqFormat::Fasta, Some(header), Some(seq), None, None) => Ok(Record {
                header,
                seq,
                ..Record::default()
            }),
            _ => Err(FastqError::InternalState(format!(
                "{} record completed with missing lines",
                format.name()
            ))),
        }
    }
}

/// Streaming record reader over a single input.
pub struct RecordReader<R> {
    inner: R,
    name: String,
    format: SeqFormat,
    check: bool,
    require_complete: bool,
    pos: u64,
    failed: bool,
}

impl<R: BufRead> RecordReader<R> {
    pub fn new(inner: R, name: impl Into<String>, format: SeqFormat) -> Self {
        RecordReader {
            inner,
            name: name.into(),
            format,
            check: false,
            require_complete: false,
            pos: 0,
            failed: false,
        }
    }

    /// Enable structural validation of every record.
    pub fn with_check(mut self, check: bool) -> Self {
        self.check = check;
        self
    }

    /// Treat a trailing incomplete record as an error even without checks.
    pub fn require_complete(mut self, yes: bool) -> Self {
        self.require_complete = yes;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// True once no more bytes can be read.
    pub fn is_exhausted(&mut self) -> io::Result<bool> {
        Ok(self.inner.fill_buf()?.is_empty())
    }

    /// Read the next complete record together with its starting offset.
    ///
    /// Returns `Ok(None)` at end of input. A trailing incomplete record is an
    /// error in check mode (or with [`Self::require_complete`]) and is
    /// dropped with a warning otherwise.
    pub fn next_record(&mut self) -> Result<Option<(u64, Record)>, FastqError> {
        let start = self.pos;
        let mut state = LineState::Head;
        let mut partial = PartialRecord::default();

        loop {
            let mut line = Vec::new();
            let n = self.inner.read_until(b'\n', &mut line)?;
            if n == 0 {
                if state == LineState::Head {
                    return Ok(None);
                }
                if self.check || self.require_complete {
                    return Err(FastqError::format(
                        &self.name,
                        "a complete record at end of file",
                        partial.last_line(),
                    ));
                }
                warn!(
                    "{}: dropping incomplete record at end of file (offset {})",
                    self.name, start
                );
                return Ok(None);
            }
            self.pos += n as u64;

            match state {
                LineState::Head => {
                    if self.check {
                        self.check_header(&line)?;
                    }
                    partial.header = Some(line);
                }
                LineState::Seq => partial.seq = Some(line),
                LineState::Plus => {
                    if self.check && trim_line(&line) != b"+" {
                        return Err(FastqError::format(&self.name, "'+' separator line", &line));
                    }
                    partial.sep = Some(line);
                }
                LineState::Score => {
                    if self.check {
                        let seq_len = partial.seq.as_deref().map(|s| trim_line(s).len());
                        if seq_len != Some(trim_line(&line).len()) {
                            return Err(FastqError::format(
                                &self.name,
                                "quality string as long as the sequence",
                                &line,
                            ));
                        }
                    }
                    partial.qual = Some(line);
                }
            }

            state = state.next(self.format);
            if state == LineState::Head {
                return partial.finish(self.format).map(|rec| Some((start, rec)));
            }
        }
    }

    fn check_header(&self, line: &[u8]) -> Result<(), FastqError> {
        let first = line.first().copied();
        if self.format == SeqFormat::Fastq && first == Some(b'>') {
            return Err(FastqError::UnsupportedFormat("FASTA"));
        }
        if first != Some(self.format.marker()) {
            let expected = match self.format {
                SeqFormat::Fastq => "FASTQ header starting with '@'",
                SeqFormat::Fasta => "FASTA header starting with '>'",
            };
            return Err(FastqError::format(&self.name, expected, line));
        }
        Ok(())
    }
}

impl<R: BufRead> Iterator for RecordReader<R> {
    type Item = Result<(u64, Record), FastqError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }
        let item = self.next_record().transpose();
        if matches!(item, Some(Err(_))) {
            self.failed = true;
        }
        item
    }
}

/// Forward and reverse mate of one fragment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadPair {
    pub fwd: Record,
    pub rev: Record,
}

/// Reads two mate files in lock-step.
///
/// The yielded offset is the forward stream position of the pair's header.
/// When one file holds more records than the other, the extra records are
/// ignored with a warning.
pub struct PairedReader<F, R> {
    fwd: RecordReader<F>,
    rev: RecordReader<R>,
    finished: bool,
}

impl<F: BufRead, R: BufRead> PairedReader<F, R> {
    pub fn new(fwd: RecordReader<F>, rev: RecordReader<R>) -> Self {
        PairedReader {
            fwd,
            rev,
            finished: false,
        }
    }

    pub fn next_pair(&mut self) -> Result<Option<(u64, ReadPair)>, FastqError> {
        if self.finished {
            return Ok(None);
        }
        let fwd = self.fwd.next_record()?;
        let rev = match fwd {
            Some(_) => self.rev.next_record()?,
            None => None,
        };
        match (fwd, rev) {
            (Some((offset, fwd)), Some((_, rev))) => Ok(Some((offset, ReadPair { fwd, rev }))),
            (Some(_), None) => {
                self.finished = true;
                warn!(
                    "{} has more records than {}, extra records ignored",
                    self.fwd.name(),
                    self.rev.name()
                );
                Ok(None)
            }
            (None, _) => {
                self.finished = true;
                if !self.rev.is_exhausted()? {
                    warn!(
                        "{} has more records than {}, extra records ignored",
                        self.rev.name(),
                        self.fwd.name()
                    );
                }
                Ok(None)
            }
        }
    }
}

impl<F: BufRead, R: BufRead> Iterator for PairedReader<F, R> {
    type Item = Result<(u64, ReadPair), FastqError>;

    fn next(&mut self) -> Option<Self::Item> {
        let item = self.next_pair().transpose();
        if matches!(item, Some(Err(_))) {
            self.finished = true;
        }
        item
    }
}
