// --- textindex-build/src/indexer.rs ---

use std::{
    collections::BTreeMap,
    fs::File,
    io::{BufReader, Read},
    path::{Path, PathBuf},
    thread,
    time::Instant,
};

use crossbeam_channel::{bounded, Receiver, Sender};
use log::{debug, info};
use rayon::ThreadPoolBuilder;

use textindex_common::{
    chunk_count,
    common_config::CONFIG,
    diagnostics::{emit_summary, DiagnosticSink},
    error::{IndexError, IoContext, Result},
    save_to_path, simhash, validate_chunk_size, BuildReport, Chunk, ChunkRecord, Chunker, Index,
    IndexAccumulator,
};

const READ_BUFFER_SIZE: usize = 1024 * 1024;

/// Tuning for one build. Defaults come from [`CONFIG`].
#[derive(Debug, Clone)]
pub struct BuildOptions {
    pub chunk_size: usize,
    pub workers: usize,
    pub job_queue_depth: usize,
    pub result_queue_depth: usize,
    /// Chunks dispatched but not yet aggregated.
    pub max_chunks_in_flight: usize,
    pub diagnostic_records: usize,
}

impl Default for BuildOptions {
    fn default() -> Self {
        Self {
            chunk_size: CONFIG.default_chunk_size,
            workers: CONFIG.max_core_in_fingerprint,
            job_queue_depth: CONFIG.job_queue_depth,
            result_queue_depth: CONFIG.result_queue_depth,
            max_chunks_in_flight: CONFIG.max_chunks_in_flight,
            diagnostic_records: CONFIG.diagnostic_records,
        }
    }
}

impl BuildOptions {
    pub fn with_chunk_size(chunk_size: usize) -> Self {
        Self {
            chunk_size,
            ..Self::default()
        }
    }

    pub fn validate(&self) -> Result<()> {
        validate_chunk_size(self.chunk_size)?;
        for (name, value) in [
            ("workers", self.workers),
            ("job queue depth", self.job_queue_depth),
            ("result queue depth", self.result_queue_depth),
            ("chunks in flight", self.max_chunks_in_flight),
        ] {
            if value == 0 {
                return Err(IndexError::invalid(format!("{name} must be positive")));
            }
        }
        Ok(())
    }
}

struct Fingerprinted {
    seq: u64,
    record: ChunkRecord,
}

/// Builds an index over the file at `source`.
pub fn build_index(source: &Path, options: &BuildOptions) -> Result<(Index, BuildReport)> {
    if source.as_os_str().is_empty() {
        return Err(IndexError::invalid("input file is required"));
    }
    options.validate()?;

    let file = File::open(source)
        .io_context(|| format!("error opening {}; check the file path and try again", source.display()))?;
    let len = file
        .metadata()
        .io_context(|| format!("error getting file info for {}", source.display()))?
        .len();
    debug!(
        "[indexer] {} is {} bytes, expecting {} chunks",
        source.display(),
        len,
        chunk_count(len, options.chunk_size)
    );

    let reader = BufReader::with_capacity(READ_BUFFER_SIZE, file);
    build_from_reader(reader, source, options)
}

/// Runs the pipeline over any reader. `source_path` is only recorded in
/// the index.
///
/// Stages: one reader thread slices the source and sends jobs into a
/// bounded queue; a fixed pool of workers fingerprints them and sends
/// results into a second bounded queue; a single aggregator reorders results
/// by sequence number and owns the index until it is frozen. The reader must
/// take a credit before each chunk and the aggregator hands it back once the
/// chunk is filed, so at most `max_chunks_in_flight` chunks are ever held.
pub fn build_from_reader<R: Read + Send>(
    reader: R,
    source_path: impl Into<PathBuf>,
    options: &BuildOptions,
) -> Result<(Index, BuildReport)> {
    options.validate()?;
    let source_path = source_path.into();
    let started = Instant::now();
    let chunker = Chunker::new(reader, options.chunk_size)?;

    let (tx_job, rx_job) = bounded::<Chunk>(options.job_queue_depth);
    let (tx_result, rx_result) = bounded::<Fingerprinted>(options.result_queue_depth);
    let (tx_credit, rx_credit) = bounded::<()>(options.max_chunks_in_flight);
    for _ in 0..options.max_chunks_in_flight {
        tx_credit
            .try_send(())
            .map_err(|e| IndexError::Pipeline(format!("credit window: {e}")))?;
    }

    let fingerprint_pool = ThreadPoolBuilder::new()
        .num_threads(options.workers)
        .thread_name(|i| format!("textindex-fp-{i}"))
        .build()
        .map_err(|e| IndexError::Pipeline(format!("worker pool: {e}")))?;

    let chunk_size = options.chunk_size;
    let (index, bytes_read) = thread::scope(|scope| {
        let reader_handle = scope.spawn(move || read_chunks(chunker, tx_job, rx_credit));
        let aggregator_handle =
            scope.spawn(move || aggregate(rx_result, tx_credit, source_path, chunk_size));

        fingerprint_pool.scope(|s| {
            for worker in 0..options.workers {
                let rx_job = rx_job.clone();
                let tx_result = tx_result.clone();
                s.spawn(move |_| fingerprint_chunks(worker, rx_job, tx_result));
            }
        });
        // Stage one: every worker has exited. Closing our ends lets the
        // aggregator see the end of the result stream and unblocks a reader
        // still waiting to hand out jobs.
        drop(tx_result);
        drop(rx_job);

        // Stage two: the aggregator has drained everything in flight.
        let aggregated = aggregator_handle
            .join()
            .map_err(|_| IndexError::Pipeline("aggregator thread panicked".into()))?;
        let read = reader_handle
            .join()
            .map_err(|_| IndexError::Pipeline("reader thread panicked".into()))?;

        settle(read, aggregated)
    })?;

    let report = BuildReport {
        chunks: index.len() as u64,
        distinct_fingerprints: index.distinct_fingerprints() as u64,
        bytes_read,
        workers: options.workers,
        elapsed: started.elapsed(),
    };
    info!(
        "[indexer] {} chunks ({} distinct fingerprints) from {} bytes in {:?}",
        report.chunks, report.distinct_fingerprints, report.bytes_read, report.elapsed
    );
    Ok((index, report))
}

/// Picks the root cause when stages fail. A reader that stopped only
/// because the pipeline behind it closed defers to the aggregator's error.
fn settle(read: Result<u64>, aggregated: Result<Index>) -> Result<(Index, u64)> {
    match (read, aggregated) {
        (Ok(bytes_read), Ok(index)) => Ok((index, bytes_read)),
        (Err(IndexError::Pipeline(_)), Err(e)) => Err(e),
        (Err(e), _) | (Ok(_), Err(e)) => Err(e),
    }
}

fn read_chunks<R: Read>(
    mut chunker: Chunker<R>,
    tx_job: Sender<Chunk>,
    rx_credit: Receiver<()>,
) -> Result<u64> {
    loop {
        if rx_credit.recv().is_err() {
            return Err(IndexError::Pipeline(
                "aggregator stopped before the source was read".into(),
            ));
        }
        let chunk = match chunker.next() {
            None => break,
            Some(chunk) => chunk.io_context(|| {
                format!("error reading file at offset {}", chunker.bytes_read())
            })?,
        };
        debug!(
            "[reader] sending chunk {} ({} bytes at offset {})",
            chunk.seq,
            chunk.data.len(),
            chunk.offset
        );
        if tx_job.send(chunk).is_err() {
            return Err(IndexError::Pipeline("fingerprint workers stopped".into()));
        }
    }
    Ok(chunker.bytes_read())
}

fn fingerprint_chunks(worker: usize, rx_job: Receiver<Chunk>, tx_result: Sender<Fingerprinted>) {
    while let Ok(Chunk { seq, offset, data }) = rx_job.recv() {
        let record = ChunkRecord::new(offset, data.len(), simhash(&data));
        debug!(
            "[worker {}] chunk {} at offset {} -> {:x}",
            worker, seq, offset, record.fingerprint
        );
        if tx_result.send(Fingerprinted { seq, record }).is_err() {
            debug!("[worker {}] aggregator gone, stopping", worker);
            break;
        }
    }
}

fn aggregate(
    rx_result: Receiver<Fingerprinted>,
    tx_credit: Sender<()>,
    source_path: PathBuf,
    chunk_size: usize,
) -> Result<Index> {
    let mut acc = IndexAccumulator::new(source_path, chunk_size)?;
    let mut pending: BTreeMap<u64, ChunkRecord> = BTreeMap::new();
    let mut next_seq = 0u64;

    while let Ok(Fingerprinted { seq, record }) = rx_result.recv() {
        pending.insert(seq, record);
        while let Some(record) = pending.remove(&next_seq) {
            acc.push(record)?;
            next_seq += 1;
            // The reader may already be done and gone.
            let _ = tx_credit.send(());
        }
    }

    if acc.is_empty() {
        debug!("[aggregator] source produced no chunks");
    }
    if let Some((&seq, _)) = pending.iter().next() {
        return Err(IndexError::Pipeline(format!(
            "chunk {next_seq} never arrived ({} later chunks stranded from {seq})",
            pending.len()
        )));
    }
    debug!("[aggregator] filed {} chunks", acc.len());
    Ok(acc.finish())
}

/// Default index file name: `<file name of source>.idx` in the working
/// directory.
pub fn default_output_path(source: &Path) -> Result<PathBuf> {
    let name = source
        .file_name()
        .ok_or_else(|| IndexError::invalid(format!("{} has no file name", source.display())))?;
    let mut out = name.to_os_string();
    out.push(".idx");
    Ok(PathBuf::from(out))
}

/// Build and persist in one step: build, write atomically, then hand the
/// first records to the diagnostic sink.
pub fn index_file(
    source: &Path,
    output: Option<&Path>,
    options: &BuildOptions,
    sink: Option<&mut dyn DiagnosticSink>,
) -> Result<(PathBuf, Index, BuildReport)> {
    if source.as_os_str().is_empty() {
        return Err(IndexError::invalid("input file is required"));
    }
    let output = match output {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => default_output_path(source)?,
    };
    options.validate()?;

    info!(
        "[indexer] indexing {} (chunk size: {} bytes)",
        source.display(),
        options.chunk_size
    );
    let (index, report) = build_index(source, options)?;
    save_to_path(&index, &output)?;
    emit_summary(sink, &index, options.diagnostic_records);
    Ok((output, index, report))
}
