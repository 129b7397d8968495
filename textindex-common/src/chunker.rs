//! Fixed-size tiling of a byte stream.
//!
//! A [`Chunker`] is a lazy iterator; restarting means constructing a new one
//! over a fresh reader.

use std::io::{self, Read};

use crate::error::{IndexError, Result};

/// Largest buffer reserved before a chunk's bytes arrive; bigger chunks
/// grow as they fill.
const MAX_PREALLOC: usize = 8 * 1024 * 1024;

/// One tile of the source: sequence number, byte offset and owned bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    pub seq: u64,
    pub offset: u64,
    pub data: Vec<u8>,
}

pub struct Chunker<R> {
    reader: R,
    chunk_size: usize,
    next_seq: u64,
    offset: u64,
    done: bool,
}

impl<R: Read> Chunker<R> {
    pub fn new(reader: R, chunk_size: usize) -> Result<Self> {
        validate_chunk_size(chunk_size)?;
        Ok(Self {
            reader,
            chunk_size,
            next_seq: 0,
            offset: 0,
            done: false,
        })
    }

    /// Bytes consumed from the reader so far.
    pub fn bytes_read(&self) -> u64 {
        self.offset
    }
}

impl<R: Read> Iterator for Chunker<R> {
    type Item = io::Result<Chunk>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }

        // Nothing is allocated until the first byte shows the source is not
        // exhausted.
        let mut first = [0u8; 1];
        let filled = loop {
            match self.reader.read(&mut first) {
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                other => break other,
            }
        };
        match filled {
            Ok(0) => {
                self.done = true;
                return None;
            }
            Ok(_) => {}
            Err(e) => {
                self.done = true;
                return Some(Err(e));
            }
        }

        // `take` + `read_to_end` keeps reading through short reads until the
        // chunk is full or the source is exhausted.
        let mut data = Vec::with_capacity(self.chunk_size.min(MAX_PREALLOC));
        data.push(first[0]);
        match (&mut self.reader)
            .take(self.chunk_size as u64 - 1)
            .read_to_end(&mut data)
        {
            Ok(_) => {
                let n = data.len();
                if n < self.chunk_size {
                    self.done = true;
                }
                let chunk = Chunk {
                    seq: self.next_seq,
                    offset: self.offset,
                    data,
                };
                self.next_seq += 1;
                self.offset += n as u64;
                Some(Ok(chunk))
            }
            Err(e) => {
                self.done = true;
                Some(Err(e))
            }
        }
    }
}

pub fn validate_chunk_size(chunk_size: usize) -> Result<()> {
    if chunk_size == 0 {
        return Err(IndexError::invalid(
            "chunk size must be positive (e.g. 1024)",
        ));
    }
    Ok(())
}

/// Number of chunks a source of `len` bytes tiles into.
pub fn chunk_count(len: u64, chunk_size: usize) -> u64 {
    len.div_ceil(chunk_size as u64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    /// Hands out at most `step` bytes per `read` call.
    struct Trickle<'a> {
        data: &'a [u8],
        step: usize,
    }

    impl Read for Trickle<'_> {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            let n = self.step.min(buf.len()).min(self.data.len());
            buf[..n].copy_from_slice(&self.data[..n]);
            self.data = &self.data[n..];
            Ok(n)
        }
    }

    fn collect(data: &[u8], chunk_size: usize) -> Vec<Chunk> {
        Chunker::new(data, chunk_size)
            .unwrap()
            .collect::<io::Result<Vec<_>>>()
            .unwrap()
    }

    #[test]
    fn zero_chunk_size_is_rejected() {
        let err = Chunker::new(&b"abc"[..], 0).err().unwrap();
        assert!(matches!(err, IndexError::InvalidParameter(_)));
    }

    #[test]
    fn thirty_five_bytes_by_ten() {
        let data = vec![b'x'; 35];
        let chunks = collect(&data, 10);
        let offsets: Vec<u64> = chunks.iter().map(|c| c.offset).collect();
        assert_eq!(offsets, vec![0, 10, 20, 30]);
        assert_eq!(chunks.last().unwrap().data.len(), 5);
        assert_eq!(chunks.iter().map(|c| c.seq).collect::<Vec<_>>(), vec![0, 1, 2, 3]);
    }

    #[test]
    fn exact_multiple_has_no_trailing_chunk() {
        let chunks = collect(&[7u8; 40], 10);
        assert_eq!(chunks.len(), 4);
        assert!(chunks.iter().all(|c| c.data.len() == 10));
    }

    #[test]
    fn empty_source_yields_nothing() {
        assert!(collect(&[], 16).is_empty());
    }

    #[test]
    fn huge_chunk_size_reserves_only_what_arrives() {
        assert!(collect(&[], usize::MAX).is_empty());
        let chunks = collect(b"abc", usize::MAX);
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].data, b"abc");
        assert!(chunks[0].data.capacity() <= MAX_PREALLOC);
    }

    /// Interrupts every other call.
    struct Flaky<'a> {
        data: &'a [u8],
        interrupt: bool,
    }

    impl Read for Flaky<'_> {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            self.interrupt = !self.interrupt;
            if self.interrupt {
                return Err(io::Error::from(io::ErrorKind::Interrupted));
            }
            let n = buf.len().min(self.data.len()).min(2);
            buf[..n].copy_from_slice(&self.data[..n]);
            self.data = &self.data[n..];
            Ok(n)
        }
    }

    #[test]
    fn interrupted_reads_are_retried() {
        let data = b"interrupted but complete";
        let chunks: Vec<Chunk> = Chunker::new(Flaky { data, interrupt: false }, 5)
            .unwrap()
            .collect::<io::Result<_>>()
            .unwrap();
        let joined: Vec<u8> = chunks.into_iter().flat_map(|c| c.data).collect();
        assert_eq!(joined, data);
    }

    #[test]
    fn short_reads_still_fill_chunks() {
        let data: Vec<u8> = (0..=255u8).cycle().take(1000).collect();
        let trickle = Trickle { data: &data, step: 3 };
        let chunks: Vec<Chunk> = Chunker::new(trickle, 64)
            .unwrap()
            .collect::<io::Result<_>>()
            .unwrap();
        assert_eq!(chunks.len(), 16);
        assert!(chunks[..15].iter().all(|c| c.data.len() == 64));
        assert_eq!(chunks[15].data.len(), 1000 - 15 * 64);
        let joined: Vec<u8> = chunks.into_iter().flat_map(|c| c.data).collect();
        assert_eq!(joined, data);
    }

    proptest! {
        #[test]
        fn prop_chunks_tile_the_source(len in 0usize..5000, chunk_size in 1usize..700) {
            let data: Vec<u8> = (0..len).map(|i| (i % 251) as u8).collect();
            let chunks = collect(&data, chunk_size);

            prop_assert_eq!(chunks.len() as u64, chunk_count(len as u64, chunk_size));
            let mut expected = 0u64;
            for chunk in &chunks {
                prop_assert_eq!(chunk.offset, expected);
                prop_assert!(!chunk.data.is_empty());
                prop_assert!(chunk.data.len() <= chunk_size);
                expected += chunk.data.len() as u64;
            }
            prop_assert_eq!(expected, len as u64);
            if let Some((last, rest)) = chunks.split_last() {
                prop_assert!(rest.iter().all(|c| c.data.len() == chunk_size));
                let tail = len % chunk_size;
                prop_assert_eq!(last.data.len(), if tail == 0 { chunk_size } else { tail });
            }
        }
    }
}
