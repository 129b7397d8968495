pub mod common_config;
pub mod error;

pub mod meta;
pub use meta::ChunkRecord;

pub mod chunker;
pub use chunker::{chunk_count, validate_chunk_size, Chunk, Chunker};

pub mod fingerprint;
pub use fingerprint::{format_fingerprint, parse_fingerprint, simhash};

pub mod index;
pub use index::{Index, IndexAccumulator};

pub mod lookup;
pub use lookup::{hamming_distance, lookup, lookup_with, ChunkMatch, LookupOptions, LookupOutcome, MatchKind};

pub mod persist;
pub use persist::{load, load_from_path, save, save_to_path};

pub mod content;
pub use content::{read_chunk_content, SourceReader};

pub mod diagnostics;
pub use diagnostics::{emit_summary, DiagnosticSink, HashLogFile, MemorySink};

pub mod chunk_table;
pub use chunk_table::{read_chunk_table, write_chunk_table, ChunkTable, CHUNK_TABLE_SCHEMA};

pub use error::{IndexError, Result};

use std::time::Duration;

#[derive(Debug, Clone, Default)]
pub struct BuildReport {
    pub chunks: u64,
    pub distinct_fingerprints: u64,
    pub bytes_read: u64,
    pub workers: usize,
    pub elapsed: Duration,
}
