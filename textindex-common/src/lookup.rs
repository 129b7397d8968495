use log::debug;

use crate::common_config::CONFIG;
use crate::error::{IndexError, Result};
use crate::index::Index;
use crate::meta::ChunkRecord;

/// Number of bit positions in which `a` and `b` differ.
#[inline]
pub fn hamming_distance(a: u64, b: u64) -> u32 {
    (a ^ b).count_ones()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LookupOptions {
    /// Inclusive Hamming cutoff for the approximate fallback.
    pub max_distance: u32,
}

impl Default for LookupOptions {
    fn default() -> Self {
        Self {
            max_distance: CONFIG.max_hamming_distance,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchKind {
    Exact,
    Fuzzy,
    None,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkMatch {
    pub index: usize,
    pub record: ChunkRecord,
    pub distance: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LookupOutcome {
    pub kind: MatchKind,
    /// Matches in chunk-index order.
    pub matches: Vec<ChunkMatch>,
}

impl LookupOutcome {
    pub fn is_empty(&self) -> bool {
        self.matches.is_empty()
    }

    pub fn records(&self) -> Vec<ChunkRecord> {
        self.matches.iter().map(|m| m.record).collect()
    }
}

/// Chunks whose fingerprint equals `query`, or, when there are none, every
/// chunk within the default Hamming distance of it.
pub fn lookup(index: &Index, query: u64) -> Result<Vec<ChunkRecord>> {
    Ok(lookup_with(index, query, &LookupOptions::default())?.records())
}

pub fn lookup_with(index: &Index, query: u64, options: &LookupOptions) -> Result<LookupOutcome> {
    if query == 0 {
        return Err(IndexError::invalid(
            "fingerprint is required (zero means no query)",
        ));
    }

    let exact = index.bucket(query);
    if !exact.is_empty() {
        debug!("[lookup] {:x}: {} exact match(es)", query, exact.len());
        return Ok(LookupOutcome {
            kind: MatchKind::Exact,
            matches: resolve(index, exact.iter().map(|&i| (i, 0))),
        });
    }

    // Exhaustive scan over distinct fingerprints; cost grows with the index.
    let mut hits: Vec<(usize, u32)> = Vec::new();
    for (&fingerprint, bucket) in index.fingerprint_index() {
        let distance = hamming_distance(query, fingerprint);
        if distance <= options.max_distance {
            hits.extend(bucket.iter().map(|&i| (i, distance)));
        }
    }
    hits.sort_unstable_by_key(|&(i, _)| i);
    debug!(
        "[lookup] {:x}: no exact match, {} fuzzy match(es) within {} bits",
        query,
        hits.len(),
        options.max_distance
    );

    let kind = if hits.is_empty() {
        MatchKind::None
    } else {
        MatchKind::Fuzzy
    };
    Ok(LookupOutcome {
        kind,
        matches: resolve(index, hits.into_iter()),
    })
}

fn resolve(index: &Index, hits: impl Iterator<Item = (usize, u32)>) -> Vec<ChunkMatch> {
    hits.filter_map(|(i, distance)| {
        index.chunk(i).map(|record| ChunkMatch {
            index: i,
            record: *record,
            distance,
        })
    })
    .collect()
}
