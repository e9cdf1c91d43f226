//! Interleave forward and reverse reads into a single stream.

use crate::io::fastq::{detect_format, FastqError, PairedReader, RecordReader, SeqFormat};
use std::io::{BufRead, Write};

/// Write forward and reverse records alternately to `out`.
///
/// Both inputs must be of the same format (FASTQ or FASTA), detected from
/// their first byte. Returns the number of pairs written.
pub fn interleave<F, R, W>(
    mut fwd: F,
    fwd_name: &str,
    mut rev: R,
    rev_name: &str,
    out: &mut W,
    check: bool,
) -> Result<u64, FastqError>
where
    F: BufRead,
    R: BufRead,
    W: Write + ?Sized,
{
    let format = detect_format(&mut fwd, fwd_name)?;
    let rev_format = detect_format(&mut rev, rev_name)?;
    if format != rev_format {
        return Err(FastqError::Format {
            path: rev_name.to_string(),
            expected: match format {
                SeqFormat::Fastq => "FASTQ like the forward reads",
                SeqFormat::Fasta => "FASTA like the forward reads",
            },
            line: rev_format.name().to_string(),
        });
    }

    let pairs = PairedReader::new(
        RecordReader::new(fwd, fwd_name, format).with_check(check),
        RecordReader::new(rev, rev_name, format).with_check(check),
    );

    let mut count = 0;
    for item in pairs {
        let (_, pair) = item?;
        pair.fwd.write_to(out)?;
        pair.rev.write_to(out)?;
        count += 1;
    }
    Ok(count)
}
