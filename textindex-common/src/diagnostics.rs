//! Best-effort build diagnostics.
//!
//! A sink receives the first few chunk records of a finished build. Sinks
//! are optional and their failures are logged, never propagated.

use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

use log::{debug, warn};

use crate::fingerprint::format_fingerprint;
use crate::index::Index;
use crate::meta::ChunkRecord;

pub trait DiagnosticSink {
    fn record_summary(&mut self, records: &[ChunkRecord]) -> io::Result<()>;
}

/// `<hex fingerprint>=><offset>` per record.
pub fn hash_log_line(record: &ChunkRecord) -> String {
    format!("{}=>{}", format_fingerprint(record.fingerprint), record.offset)
}

/// Recreates a text file holding one [`hash_log_line`] per record.
#[derive(Debug, Clone)]
pub struct HashLogFile {
    path: PathBuf,
}

impl HashLogFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl DiagnosticSink for HashLogFile {
    fn record_summary(&mut self, records: &[ChunkRecord]) -> io::Result<()> {
        let mut writer = BufWriter::new(File::create(&self.path)?);
        for record in records {
            writeln!(writer, "{}", hash_log_line(record))?;
        }
        writer.flush()
    }
}

/// Keeps the lines in memory.
#[derive(Debug, Default, Clone)]
pub struct MemorySink {
    pub lines: Vec<String>,
}

impl DiagnosticSink for MemorySink {
    fn record_summary(&mut self, records: &[ChunkRecord]) -> io::Result<()> {
        self.lines.extend(records.iter().map(hash_log_line));
        Ok(())
    }
}

/// Sends the first `min(limit, len)` records to `sink`, if any.
pub fn emit_summary(sink: Option<&mut dyn DiagnosticSink>, index: &Index, limit: usize) {
    let Some(sink) = sink else {
        return;
    };
    let records = &index.chunks()[..limit.min(index.len())];
    match sink.record_summary(records) {
        Ok(()) => debug!("[diagnostics] wrote {} record(s)", records.len()),
        Err(e) => warn!("[diagnostics] could not write build summary: {e}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Broken;

    impl DiagnosticSink for Broken {
        fn record_summary(&mut self, _: &[ChunkRecord]) -> io::Result<()> {
            Err(io::Error::new(io::ErrorKind::PermissionDenied, "read-only"))
        }
    }

    fn index_of(n: usize) -> Index {
        Index::from_records(
            "a",
            1,
            (0..n).map(|i| ChunkRecord::new(i as u64, 1, 0x100 + i as u64)),
        )
        .unwrap()
    }

    #[test]
    fn takes_min_of_limit_and_count() {
        for (n, expected) in [(0, 0), (3, 3), (10, 10), (11, 10), (25, 10)] {
            let mut sink = MemorySink::default();
            emit_summary(Some(&mut sink), &index_of(n), 10);
            assert_eq!(sink.lines.len(), expected, "{n} chunks");
        }
    }

    #[test]
    fn line_format() {
        assert_eq!(hash_log_line(&ChunkRecord::new(30, 5, 0xabc)), "abc=>30");
    }

    #[test]
    fn failing_or_missing_sink_is_harmless() {
        emit_summary(Some(&mut Broken), &index_of(4), 10);
        emit_summary(None, &index_of(4), 10);
    }
}
