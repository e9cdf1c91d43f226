//! Second pass: write every pair not in the exclusion set.

use super::index::pair_key;
use crate::io::fastq::{FastqError, ReadPair};
use std::collections::HashSet;
use std::io::Write;

/// Counts from the rewrite pass.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct FilterSummary {
    pub kept: u64,
    pub removed: u64,
}

/// Copy kept pairs to the outputs in input order.
///
/// Removed pairs are optionally listed in `dupe_log` as
/// `<forward header>\t<pair key as 16 hex digits>`.
pub fn filter_write<I, W1, W2>(
    refuse: &HashSet<u64>,
    pairs: I,
    fwd_out: &mut W1,
    rev_out: &mut W2,
    mut dupe_log: Option<&mut dyn Write>,
) -> Result<FilterSummary, FastqError>
where
    I: IntoIterator<Item = Result<(u64, ReadPair), FastqError>>,
    W1: Write + ?Sized,
    W2: Write + ?Sized,
{
    let mut summary = FilterSummary::default();
    for item in pairs {
        let (offset, pair) = item?;
        if refuse.contains(&offset) {
            summary.removed += 1;
            if let Some(log) = dupe_log.as_mut() {
                log.write_all(pair.fwd.header())?;
                writeln!(log, "\t{:016x}", pair_key(&pair))?;
            }
        } else {
            summary.kept += 1;
            pair.fwd.write_to(fwd_out)?;
            pair.rev.write_to(rev_out)?;
        }
    }
    Ok(summary)
}
