//! First pass: pair keys, quality scores and the duplicate index.

use crate::io::fastq::{FastqError, ReadPair, Record};
use std::collections::{HashMap, HashSet};
use std::hash::Hasher;
use twox_hash::XxHash64;

/// Number of leading colon-separated header fields that identify the
/// instrument, run, flow cell and lane of a read.
const HEADER_KEY_FIELDS: usize = 4;

const PAIR_KEY_SEED: u64 = 0;

fn header_coordinates(rec: &Record) -> impl Iterator<Item = &[u8]> {
    rec.header().split(|&b| b == b':').take(HEADER_KEY_FIELDS)
}

/// Duplicate-detection key of a read pair.
///
/// XXH64 (seed 0) over the leading header fields of both mates followed by
/// both trimmed sequences. Every component is terminated by a tab byte so
/// that shifting bytes between fields changes the key. Distinct pairs that
/// collide on the 64-bit value land in the same duplicate group.
pub fn pair_key(pair: &ReadPair) -> u64 {
    let mut hasher = XxHash64::with_seed(PAIR_KEY_SEED);
    for rec in [&pair.fwd, &pair.rev] {
        for field in header_coordinates(rec) {
            hasher.write(field);
            hasher.write_u8(b':');
        }
        hasher.write_u8(b'\t');
    }
    hasher.write(pair.fwd.seq());
    hasher.write_u8(b'\t');
    hasher.write(pair.rev.seq());
    hasher.write_u8(b'\t');
    hasher.finish()
}

/// Mean of the raw ASCII values of both quality strings together.
pub fn mean_quality_score(pair: &ReadPair) -> f64 {
    let fwd = pair.fwd.qual();
    let rev = pair.rev.qual();
    let len = fwd.len() + rev.len();
    if len == 0 {
        return 0.0;
    }
    let sum: u64 = fwd.iter().chain(rev).map(|&b| b as u64).sum();
    sum as f64 / len as f64
}

/// All pairs sharing a key. `offsets[0]` is always the best-quality copy.
#[derive(Debug, Clone, PartialEq)]
pub struct DuplicateGroup {
    pub best_score: f64,
    pub offsets: Vec<u64>,
}

impl DuplicateGroup {
    fn new(score: f64, offset: u64) -> Self {
        DuplicateGroup {
            best_score: score,
            offsets: vec![offset],
        }
    }

    /// Only a strictly better score replaces the current best, so on ties the
    /// earliest pair survives. A replaced best moves to the end of the list.
    fn add(&mut self, score: f64, offset: u64) {
        if score > self.best_score {
            let demoted = std::mem::replace(&mut self.offsets[0], offset);
            self.offsets.push(demoted);
            self.best_score = score;
        } else {
            self.offsets.push(offset);
        }
    }
}

/// Key to duplicate group mapping built during the first pass.
#[derive(Debug, Default)]
pub struct DuplicateIndex {
    groups: HashMap<u64, DuplicateGroup>,
    total_pairs: u64,
}

impl DuplicateIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: u64, score: f64, offset: u64) {
        self.total_pairs += 1;
        self.groups
            .entry(key)
            .and_modify(|group| group.add(score, offset))
            .or_insert_with(|| DuplicateGroup::new(score, offset));
    }

    pub fn groups(&self) -> impl Iterator<Item = &DuplicateGroup> {
        self.groups.values()
    }

    pub fn total_pairs(&self) -> u64 {
        self.total_pairs
    }

    pub fn distinct_keys(&self) -> u64 {
        self.groups.len() as u64
    }

    pub fn duplicate_pairs(&self) -> u64 {
        self.total_pairs - self.distinct_keys()
    }
}

/// Consume every pair once and index it by key.
pub fn find_duplicates<I>(pairs: I) -> Result<DuplicateIndex, FastqError>
where
    I: IntoIterator<Item = Result<(u64, ReadPair), FastqError>>,
{
    let mut index = DuplicateIndex::new();
    for item in pairs {
        let (offset, pair) = item?;
        index.insert(pair_key(&pair), mean_quality_score(&pair), offset);
    }
    Ok(index)
}

/// Offsets of every group member except the best one.
pub fn build_filter(index: &DuplicateIndex) -> HashSet<u64> {
    index
        .groups()
        .flat_map(|group| group.offsets.iter().skip(1).copied())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rec(header: &str, seq: &str, qual: &str) -> Record {
        Record {
            header: format!("{}\n", header).into_bytes(),
            seq: format!("{}\n", seq).into_bytes(),
            sep: b"+\n".to_vec(),
            qual: format!("{}\n", qual).into_bytes(),
        }
    }

    fn pair(tile: &str, seq: &str, qual: &str) -> ReadPair {
        ReadPair {
            fwd: rec(&format!("@M1:7:FC:1:{} 1:N:0:1", tile), seq, qual),
            rev: rec(&format!("@M1:7:FC:1:{} 2:N:0:1", tile), "GGCC", qual),
        }
    }

    #[test]
    fn test_pair_key_uses_leading_header_fields_and_sequences() {
        let a = pair("1101:10:20", "ACGT", "IIII");
        // different tile coordinates and qualities, same lane and sequences
        let b = pair("2202:99:1", "ACGT", "####");
        assert_eq!(pair_key(&a), pair_key(&b));

        let c = pair("1101:10:20", "ACGA", "IIII");
        assert_ne!(pair_key(&a), pair_key(&c));

        let mut d = a.clone();
        d.fwd.header = b"@M1:7:FC:2:1101:10:20 1:N:0:1\n".to_vec();
        assert_ne!(pair_key(&a), pair_key(&d));
    }

    #[test]
    fn test_pair_key_is_stable() {
        let a = pair("1101:10:20", "ACGT", "IIII");
        assert_eq!(pair_key(&a), pair_key(&a.clone()));
    }

    #[test]
    fn test_mean_quality_ignores_line_ends() {
        let p = ReadPair {
            fwd: rec("@a", "AC", "II"),
            rev: rec("@a", "AC", "##"),
        };
        assert_eq!(mean_quality_score(&p), (73.0 * 2.0 + 35.0 * 2.0) / 4.0);

        let empty = ReadPair {
            fwd: rec("@a", "", ""),
            rev: rec("@a", "", ""),
        };
        assert_eq!(mean_quality_score(&empty), 0.0);
    }

    #[test]
    fn test_group_ordering() {
        let mut index = DuplicateIndex::new();
        index.insert(1, 30.0, 0);
        index.insert(1, 30.0, 100); // tie, first seen stays best
        index.insert(1, 40.0, 200); // new best, old best demoted to the end
        index.insert(1, 10.0, 300);

        let group = index.groups().next().unwrap();
        assert_eq!(group.best_score, 40.0);
        assert_eq!(group.offsets, vec![200, 100, 0, 300]);
        assert_eq!(index.total_pairs(), 4);
        assert_eq!(index.duplicate_pairs(), 3);
    }

    #[test]
    fn test_build_filter_keeps_best() {
        let mut index = DuplicateIndex::new();
        index.insert(1, 30.0, 0);
        index.insert(2, 20.0, 50);
        index.insert(1, 35.0, 100);
        index.insert(2, 10.0, 150);
        index.insert(3, 10.0, 200);

        let refuse = build_filter(&index);
        assert_eq!(refuse, HashSet::from([0, 150]));
        assert_eq!(index.total_pairs() - refuse.len() as u64, index.distinct_keys());
    }

    #[test]
    fn test_find_duplicates_propagates_errors() {
        let items = vec![
            Ok((0, pair("1:1:1", "ACGT", "IIII"))),
            Err(FastqError::InternalState("boom".to_string())),
        ];
        assert!(find_duplicates(items).is_err());
    }
}
