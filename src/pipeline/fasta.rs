//! FASTQ to FASTA conversion.

use crate::io::fastq::{FastqError, RecordReader, SeqFormat};
use std::io::{BufRead, Write};

/// Convert FASTQ records from `input` to FASTA on `output`.
///
/// The `@` of each header becomes `>`, the sequence line is copied and the
/// separator and quality lines are dropped. An input whose line count is not
/// a multiple of four is rejected even when `check` is off.
pub fn fastq_to_fasta<R, W>(input: R, name: &str, output: &mut W, check: bool) -> Result<u64, FastqError>
where
    R: BufRead,
    W: Write + ?Sized,
{
    let records = RecordReader::new(input, name, SeqFormat::Fastq)
        .with_check(check)
        .require_complete(true);

    let mut count = 0;
    for item in records {
        let (_, rec) = item?;
        output.write_all(b">")?;
        output.write_all(rec.header.get(1..).unwrap_or_default())?;
        output.write_all(&rec.seq)?;
        count += 1;
    }
    Ok(count)
}
