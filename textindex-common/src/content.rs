use std::fs::File;
use std::io::{BufReader, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use crate::error::{IoContext, Result};
use crate::meta::ChunkRecord;

/// Re-reads chunk bytes from the indexed source. Holds the file open so
/// several matches can be resolved with one open.
pub struct SourceReader {
    path: PathBuf,
    file: BufReader<File>,
}

impl SourceReader {
    pub fn open(path: &Path) -> Result<Self> {
        let file = File::open(path)
            .io_context(|| format!("error opening source file {}", path.display()))?;
        Ok(Self {
            path: path.to_path_buf(),
            file: BufReader::new(file),
        })
    }

    /// Up to `size` bytes at `offset`. A source that shrank since indexing
    /// yields only the bytes still present.
    pub fn read_range(&mut self, offset: u64, size: usize) -> Result<Vec<u8>> {
        self.file
            .seek(SeekFrom::Start(offset))
            .io_context(|| format!("error seeking to {offset} in {}", self.path.display()))?;
        let mut data = Vec::with_capacity(size);
        (&mut self.file)
            .take(size as u64)
            .read_to_end(&mut data)
            .io_context(|| format!("error reading chunk at {offset} in {}", self.path.display()))?;
        Ok(data)
    }

    pub fn read_chunk(&mut self, record: &ChunkRecord) -> Result<Vec<u8>> {
        self.read_range(record.offset, record.size)
    }
}

pub fn read_chunk_content(path: &Path, offset: u64, size: usize) -> Result<Vec<u8>> {
    SourceReader::open(path)?.read_range(offset, size)
}
