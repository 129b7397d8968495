use bincode::{Decode, Encode};

/// Metadata for one chunk of the indexed source. Chunk bytes are never
/// stored; they are re-read from the source at `offset`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Encode, Decode)]
pub struct ChunkRecord {
    pub offset: u64,
    pub size: usize,
    pub fingerprint: u64,
}

impl ChunkRecord {
    pub fn new(offset: u64, size: usize, fingerprint: u64) -> Self {
        Self {
            offset,
            size,
            fingerprint,
        }
    }

    /// Exclusive end of the byte range covered by this chunk.
    pub fn end(&self) -> u64 {
        self.offset.saturating_add(self.size as u64)
    }

    /// `None` when the range runs past `u64::MAX`.
    pub fn checked_end(&self) -> Option<u64> {
        self.offset.checked_add(self.size as u64)
    }
}
