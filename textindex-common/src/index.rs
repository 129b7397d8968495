// index.rs – the immutable chunk index and the accumulator that assembles it

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use bincode::{Decode, Encode};

use crate::chunker::validate_chunk_size;
use crate::error::{IndexError, Result};
use crate::meta::ChunkRecord;

/// Similarity index over one source file.
///
/// Positions in `chunks` are chunk indices; `fingerprint_index` maps every
/// distinct fingerprint to the ascending list of chunk indices carrying it.
/// An `Index` is never mutated after construction.
#[derive(Debug, Clone, PartialEq, Eq, Encode, Decode)]
pub struct Index {
    source_path: PathBuf,
    chunk_size: usize,
    chunks: Vec<ChunkRecord>,
    fingerprint_index: BTreeMap<u64, Vec<usize>>,
}

impl Index {
    /// Builds an index from records already in file order. The records
    /// must tile `[0, len)` exactly.
    pub fn from_records(
        source_path: impl Into<PathBuf>,
        chunk_size: usize,
        records: impl IntoIterator<Item = ChunkRecord>,
    ) -> Result<Self> {
        let mut acc = IndexAccumulator::new(source_path, chunk_size)?;
        for record in records {
            acc.push(record)?;
        }
        Ok(acc.finish())
    }

    pub fn source_path(&self) -> &Path {
        &self.source_path
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    pub fn chunks(&self) -> &[ChunkRecord] {
        &self.chunks
    }

    pub fn chunk(&self, index: usize) -> Option<&ChunkRecord> {
        self.chunks.get(index)
    }

    pub fn fingerprint_index(&self) -> &BTreeMap<u64, Vec<usize>> {
        &self.fingerprint_index
    }

    /// Chunk indices stored under `fingerprint`, empty when absent.
    pub fn bucket(&self, fingerprint: u64) -> &[usize] {
        self.fingerprint_index
            .get(&fingerprint)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    pub fn distinct_fingerprints(&self) -> usize {
        self.fingerprint_index.len()
    }

    /// Length of the source covered by the chunks.
    pub fn source_len(&self) -> u64 {
        self.chunks.last().map(ChunkRecord::end).unwrap_or(0)
    }

    /// Checks every structural invariant. Used on load, where a violation
    /// means the encoding cannot be trusted.
    pub fn validate(&self) -> Result<()> {
        if self.chunk_size == 0 {
            return Err(IndexError::Decode("chunk size is zero".into()));
        }

        let mut expected_offset = 0u64;
        let last = self.chunks.len().saturating_sub(1);
        for (i, c) in self.chunks.iter().enumerate() {
            if c.offset != expected_offset {
                return Err(IndexError::Decode(format!(
                    "chunk {i} starts at {} but previous chunk ends at {expected_offset}",
                    c.offset
                )));
            }
            if c.size == 0 || c.size > self.chunk_size {
                return Err(IndexError::Decode(format!(
                    "chunk {i} has size {} (chunk size {})",
                    c.size, self.chunk_size
                )));
            }
            if i != last && c.size != self.chunk_size {
                return Err(IndexError::Decode(format!(
                    "non-final chunk {i} is short ({} of {} bytes)",
                    c.size, self.chunk_size
                )));
            }
            expected_offset = c.checked_end().ok_or_else(|| {
                IndexError::Decode(format!(
                    "chunk {i} at offset {} with size {} runs past the end of the address space",
                    c.offset, c.size
                ))
            })?;
        }

        let mut seen = vec![false; self.chunks.len()];
        for (&fingerprint, bucket) in &self.fingerprint_index {
            if bucket.is_empty() {
                return Err(IndexError::Decode(format!(
                    "empty bucket for fingerprint {fingerprint:x}"
                )));
            }
            for &i in bucket {
                let Some(c) = self.chunks.get(i) else {
                    return Err(IndexError::Decode(format!(
                        "bucket {fingerprint:x} references chunk {i} of {}",
                        self.chunks.len()
                    )));
                };
                if c.fingerprint != fingerprint {
                    return Err(IndexError::Decode(format!(
                        "chunk {i} has fingerprint {:x} but is filed under {fingerprint:x}",
                        c.fingerprint
                    )));
                }
                if std::mem::replace(&mut seen[i], true) {
                    return Err(IndexError::Decode(format!(
                        "chunk {i} is filed more than once"
                    )));
                }
            }
        }
        if let Some(i) = seen.iter().position(|s| !s) {
            return Err(IndexError::Decode(format!(
                "chunk {i} is missing from the fingerprint index"
            )));
        }
        Ok(())
    }
}

/// Single-owner builder for an [`Index`]. Records must arrive in file
/// order; the first record that does not continue the tiling is rejected.
#[derive(Debug)]
pub struct IndexAccumulator {
    index: Index,
    closed: bool,
}

impl IndexAccumulator {
    pub fn new(source_path: impl Into<PathBuf>, chunk_size: usize) -> Result<Self> {
        validate_chunk_size(chunk_size)?;
        Ok(Self {
            index: Index {
                source_path: source_path.into(),
                chunk_size,
                chunks: Vec::new(),
                fingerprint_index: BTreeMap::new(),
            },
            closed: false,
        })
    }

    pub fn len(&self) -> usize {
        self.index.chunks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.chunks.is_empty()
    }

    /// Appends the next record and files its position under its fingerprint.
    pub fn push(&mut self, record: ChunkRecord) -> Result<usize> {
        let chunk_size = self.index.chunk_size;
        if record.size == 0 || record.size > chunk_size {
            return Err(IndexError::Pipeline(format!(
                "chunk at offset {} has size {} (chunk size {chunk_size})",
                record.offset, record.size
            )));
        }
        if self.closed {
            return Err(IndexError::Pipeline(format!(
                "chunk at offset {} follows a short final chunk",
                record.offset
            )));
        }
        let expected = self.index.source_len();
        if record.offset != expected {
            return Err(IndexError::Pipeline(format!(
                "chunk at offset {} does not continue the tiling at {expected}",
                record.offset
            )));
        }

        if record.checked_end().is_none() {
            return Err(IndexError::Pipeline(format!(
                "chunk at offset {} with size {} overflows the source length",
                record.offset, record.size
            )));
        }

        let position = self.index.chunks.len();
        self.index.chunks.push(record);
        self.index
            .fingerprint_index
            .entry(record.fingerprint)
            .or_default()
            .push(position);
        self.closed = record.size < chunk_size;
        Ok(position)
    }

    pub fn finish(self) -> Index {
        self.index
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn records(sizes: &[usize], fingerprints: &[u64]) -> Vec<ChunkRecord> {
        let mut offset = 0;
        sizes
            .iter()
            .zip(fingerprints)
            .map(|(&size, &fp)| {
                let r = ChunkRecord::new(offset, size, fp);
                offset += size as u64;
                r
            })
            .collect()
    }

    #[test]
    fn shared_fingerprints_share_a_bucket() {
        let index =
            Index::from_records("a.txt", 10, records(&[10, 10, 10, 3], &[7, 9, 7, 1])).unwrap();
        assert_eq!(index.bucket(7), &[0, 2]);
        assert_eq!(index.bucket(9), &[1]);
        assert_eq!(index.bucket(42), &[] as &[usize]);
        assert_eq!(index.distinct_fingerprints(), 3);
        assert_eq!(index.source_len(), 33);
        index.validate().unwrap();
    }

    #[test]
    fn empty_index_is_valid() {
        let index = Index::from_records("empty.txt", 4096, Vec::new()).unwrap();
        assert!(index.is_empty());
        assert!(index.fingerprint_index().is_empty());
        index.validate().unwrap();
    }

    #[test]
    fn gaps_and_overlaps_are_rejected() {
        let gap = vec![ChunkRecord::new(0, 10, 1), ChunkRecord::new(11, 10, 2)];
        assert!(Index::from_records("a", 10, gap).is_err());

        let overlap = vec![ChunkRecord::new(0, 10, 1), ChunkRecord::new(5, 10, 2)];
        assert!(Index::from_records("a", 10, overlap).is_err());
    }

    #[test]
    fn nothing_may_follow_a_short_chunk() {
        let recs = vec![ChunkRecord::new(0, 4, 1), ChunkRecord::new(4, 10, 2)];
        assert!(matches!(
            Index::from_records("a", 10, recs),
            Err(IndexError::Pipeline(_))
        ));
    }

    #[test]
    fn accumulator_refuses_ranges_past_u64_max() {
        let mut acc = IndexAccumulator::new("a", usize::MAX).unwrap();
        assert!(acc.is_empty());
        acc.push(ChunkRecord::new(0, usize::MAX, 1)).unwrap();
        assert!(!acc.is_empty());
        assert!(matches!(
            acc.push(ChunkRecord::new(usize::MAX as u64, 1, 2)),
            Err(IndexError::Pipeline(_))
        ));
        assert_eq!(acc.len(), 1);
    }

    #[test]
    fn oversized_and_empty_chunks_are_rejected() {
        assert!(Index::from_records("a", 10, vec![ChunkRecord::new(0, 11, 1)]).is_err());
        assert!(Index::from_records("a", 10, vec![ChunkRecord::new(0, 0, 1)]).is_err());
    }

    #[test]
    fn validate_catches_misfiled_buckets() {
        let mut index =
            Index::from_records("a", 10, records(&[10, 10], &[1, 2])).unwrap();
        index.fingerprint_index.insert(3, vec![1]);
        assert!(matches!(index.validate(), Err(IndexError::Decode(_))));

        let mut index =
            Index::from_records("a", 10, records(&[10, 10], &[1, 2])).unwrap();
        index.fingerprint_index.remove(&2);
        assert!(matches!(index.validate(), Err(IndexError::Decode(_))));

        let mut index =
            Index::from_records("a", 10, records(&[10, 10], &[1, 1])).unwrap();
        index.fingerprint_index.insert(1, vec![0, 1, 5]);
        assert!(matches!(index.validate(), Err(IndexError::Decode(_))));
    }
}
