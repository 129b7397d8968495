//! On-disk framing for an [`Index`].
//!
//! Layout: `b"TXIX"` magic, `u16` format version, `u64` payload length,
//! 32-byte BLAKE3 digest of the payload, then the bincode payload. All
//! integers are little endian.

use std::fs;
use std::io::{self, Write};
use std::path::Path;

use bincode::config::standard;
use log::debug;
use tempfile::NamedTempFile;

use crate::error::{IndexError, IoContext, Result};
use crate::index::Index;

pub const MAGIC: [u8; 4] = *b"TXIX";
pub const FORMAT_VERSION: u16 = 1;
pub const HEADER_LEN: usize = 4 + 2 + 8 + 32;

/// Decode budget per payload byte. A fingerprint bucket entry needs at
/// least 2 encoded bytes and claims 32 bytes in memory; twice that leaves
/// headroom for the per-field claims bincode makes while decoding.
const DECODE_EXPANSION: usize = 32;
const DECODE_SLACK: usize = 4096;

pub fn save(index: &Index) -> Result<Vec<u8>> {
    let payload =
        bincode::encode_to_vec(index, standard()).map_err(|e| IndexError::Encode(e.to_string()))?;
    Ok(frame(&payload))
}

fn frame(payload: &[u8]) -> Vec<u8> {
    let digest = blake3::hash(payload);

    let mut out = Vec::with_capacity(HEADER_LEN + payload.len());
    out.extend_from_slice(&MAGIC);
    out.extend_from_slice(&FORMAT_VERSION.to_le_bytes());
    out.extend_from_slice(&(payload.len() as u64).to_le_bytes());
    out.extend_from_slice(digest.as_bytes());
    out.extend_from_slice(payload);
    out
}

/// Decodes with a size limit proportional to the payload, so declared
/// container lengths the payload cannot back fail before allocation.
fn decode_payload(payload: &[u8]) -> Result<(Index, usize)> {
    let budget = payload
        .len()
        .saturating_mul(DECODE_EXPANSION)
        .saturating_add(DECODE_SLACK);
    let decoded = if budget <= 1 << 20 {
        decode_within::<{ 1 << 20 }>(payload)
    } else if budget <= 1 << 26 {
        decode_within::<{ 1 << 26 }>(payload)
    } else if budget <= 1 << 31 {
        decode_within::<{ 1 << 31 }>(payload)
    } else {
        decode_within::<{ usize::MAX }>(payload)
    };
    decoded.map_err(|e| IndexError::Decode(e.to_string()))
}

fn decode_within<const LIMIT: usize>(
    payload: &[u8],
) -> std::result::Result<(Index, usize), bincode::error::DecodeError> {
    bincode::decode_from_slice(payload, standard().with_limit::<LIMIT>())
}

pub fn load(bytes: &[u8]) -> Result<Index> {
    if bytes.len() < HEADER_LEN {
        return Err(IndexError::Decode(format!(
            "truncated header: {} of {HEADER_LEN} bytes",
            bytes.len()
        )));
    }
    let (header, payload) = bytes.split_at(HEADER_LEN);

    if header[0..4] != MAGIC {
        return Err(IndexError::Decode("not a textindex file (bad magic)".into()));
    }
    let version = u16::from_le_bytes([header[4], header[5]]);
    if version != FORMAT_VERSION {
        return Err(IndexError::Decode(format!(
            "unsupported format version {version}"
        )));
    }
    let mut len_buf = [0u8; 8];
    len_buf.copy_from_slice(&header[6..14]);
    let declared = u64::from_le_bytes(len_buf);
    if declared != payload.len() as u64 {
        return Err(IndexError::Decode(format!(
            "payload is {} bytes, header declares {declared}",
            payload.len()
        )));
    }

    let digest = blake3::hash(payload);
    if digest.as_bytes()[..] != header[14..HEADER_LEN] {
        return Err(IndexError::Decode(format!(
            "checksum mismatch: header {}, payload {}",
            hex::encode(&header[14..HEADER_LEN]),
            digest.to_hex()
        )));
    }

    let (index, consumed) = decode_payload(payload)?;
    if consumed != payload.len() {
        return Err(IndexError::Decode(format!(
            "{} trailing bytes after index payload",
            payload.len() - consumed
        )));
    }

    index.validate()?;
    Ok(index)
}

/// Writes the index through a temporary file in the destination directory
/// and renames it into place, so a failure never leaves a partial file at
/// `path`.
pub fn save_to_path(index: &Index, path: &Path) -> Result<()> {
    let bytes = save(index)?;
    let dir = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };

    let mut tmp = NamedTempFile::new_in(dir)
        .io_context(|| format!("error creating temporary index file in {}", dir.display()))?;
    tmp.write_all(&bytes)
        .and_then(|_| tmp.as_file().sync_all())
        .io_context(|| format!("error writing index file {}", path.display()))?;
    tmp.persist(path)
        .map_err(|e| IndexError::io(format!("error saving index file {}", path.display()), e.error))?;

    debug!(
        "[persist] wrote {} bytes ({} chunks) to {}",
        bytes.len(),
        index.len(),
        path.display()
    );
    Ok(())
}

pub fn load_from_path(path: &Path) -> Result<Index> {
    let bytes = match fs::read(path) {
        Ok(b) => b,
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            return Err(IndexError::NotFound(path.to_path_buf()))
        }
        Err(e) => {
            return Err(IndexError::io(
                format!("error opening index file {}", path.display()),
                e,
            ))
        }
    };
    load(&bytes)
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;
    use std::path::PathBuf;

    use super::*;
    use crate::meta::ChunkRecord;

    type RawIndex = (PathBuf, usize, Vec<ChunkRecord>, BTreeMap<u64, Vec<usize>>);

    /// Frames an arbitrary index body with a correct header and digest.
    fn framed(raw: RawIndex) -> Vec<u8> {
        frame(&bincode::encode_to_vec(raw, standard()).unwrap())
    }

    fn raw(
        chunk_size: usize,
        chunks: Vec<ChunkRecord>,
        buckets: Vec<(u64, Vec<usize>)>,
    ) -> RawIndex {
        (
            PathBuf::from("a"),
            chunk_size,
            chunks,
            buckets.into_iter().collect(),
        )
    }

    fn sample() -> Index {
        Index::from_records(
            "corpus/jungle_book.txt",
            16,
            vec![
                ChunkRecord::new(0, 16, 0xdead_beef),
                ChunkRecord::new(16, 16, 0xfeed),
                ChunkRecord::new(32, 16, 0xdead_beef),
                ChunkRecord::new(48, 2, 0x1),
            ],
        )
        .unwrap()
    }

    #[test]
    fn header_is_laid_out_as_documented() {
        let bytes = save(&sample()).unwrap();
        assert_eq!(&bytes[0..4], b"TXIX");
        assert_eq!(u16::from_le_bytes([bytes[4], bytes[5]]), FORMAT_VERSION);
        let mut len = [0u8; 8];
        len.copy_from_slice(&bytes[6..14]);
        assert_eq!(u64::from_le_bytes(len) as usize, bytes.len() - HEADER_LEN);
    }

    #[test]
    fn flipped_payload_bit_is_a_checksum_error() {
        let mut bytes = save(&sample()).unwrap();
        let last = bytes.len() - 1;
        bytes[last] ^= 0x40;
        let err = load(&bytes).unwrap_err();
        assert!(err.to_string().contains("checksum"), "{err}");
    }

    #[test]
    fn raw_layout_matches_the_index_encoding() {
        let index = sample();
        let mut body = raw(
            16,
            index.chunks().to_vec(),
            vec![(0xdead_beef, vec![0, 2]), (0xfeed, vec![1]), (0x1, vec![3])],
        );
        body.0 = PathBuf::from("corpus/jungle_book.txt");
        assert_eq!(load(&framed(body)).unwrap(), index);
    }

    #[test]
    fn forged_container_length_is_a_decode_error() {
        for declared in [1u64 << 60, 1 << 30, 1 << 20] {
            let mut payload = vec![1, b'a', 10, 253];
            payload.extend_from_slice(&declared.to_le_bytes());
            assert!(
                matches!(load(&frame(&payload)), Err(IndexError::Decode(_))),
                "declared {declared}"
            );
        }
    }

    #[test]
    fn offset_overflow_is_a_decode_error() {
        let body = raw(
            usize::MAX,
            vec![
                ChunkRecord::new(0, usize::MAX, 1),
                ChunkRecord::new(usize::MAX as u64, 1, 2),
            ],
            vec![(1, vec![0]), (2, vec![1])],
        );
        assert!(matches!(load(&framed(body)), Err(IndexError::Decode(_))));
    }

    #[test]
    fn inconsistent_payloads_fail_to_load() {
        let cases = vec![
            (
                "bucket past the chunks",
                raw(10, vec![ChunkRecord::new(0, 10, 1)], vec![(1, vec![0, 3])]),
            ),
            (
                "chunk missing from the buckets",
                raw(
                    10,
                    vec![ChunkRecord::new(0, 10, 1), ChunkRecord::new(10, 5, 2)],
                    vec![(1, vec![0])],
                ),
            ),
            (
                "offset gap",
                raw(
                    10,
                    vec![ChunkRecord::new(0, 10, 1), ChunkRecord::new(11, 5, 2)],
                    vec![(1, vec![0]), (2, vec![1])],
                ),
            ),
            ("zero chunk size", raw(0, Vec::new(), vec![])),
        ];
        for (name, body) in cases {
            assert!(
                matches!(load(&framed(body)), Err(IndexError::Decode(_))),
                "{name}"
            );
        }
    }

    #[test]
    fn wrong_version_is_rejected() {
        let mut bytes = save(&sample()).unwrap();
        bytes[4] = 9;
        assert!(matches!(load(&bytes), Err(IndexError::Decode(_))));
    }
}
