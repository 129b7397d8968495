use std::cmp::max;

use log::debug;
use once_cell::sync::Lazy;
use sysinfo::{CpuRefreshKind, MemoryRefreshKind, RefreshKind, System};

pub const DEFAULT_CHUNK_SIZE: usize = 4096;
pub const DEFAULT_MAX_HAMMING_DISTANCE: u32 = 10;
pub const DEFAULT_DIAGNOSTIC_RECORDS: usize = 10;

/// Overrides the detected worker count, e.g. `TEXTINDEX_WORKERS=2`.
pub const WORKERS_ENV: &str = "TEXTINDEX_WORKERS";

#[derive(Debug, Clone)]
pub struct StrategicConfig {
    pub cores: usize,
    pub total_memory: u64,
    pub max_core_in_fingerprint: usize,
    pub job_queue_depth: usize,
    pub result_queue_depth: usize,
    pub max_chunks_in_flight: usize,
    pub default_chunk_size: usize,
    pub max_hamming_distance: u32,
    pub diagnostic_records: usize,
}

pub static CONFIG: Lazy<StrategicConfig> = Lazy::new(strategic_config);

fn strategic_config() -> StrategicConfig {
    let refresh = RefreshKind::nothing()
        .with_cpu(CpuRefreshKind::nothing())
        .with_memory(MemoryRefreshKind::everything());
    let mut sys = System::new_with_specifics(refresh);
    sys.refresh_memory();

    let total_memory = sys.total_memory();
    let cores = match sys.cpus().len() {
        0 => std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1),
        n => n,
    };

    let max_core_in_fingerprint = std::env::var(WORKERS_ENV)
        .ok()
        .and_then(|v| v.trim().parse::<usize>().ok())
        .filter(|&n| n > 0)
        .unwrap_or(cores);

    // jobs ~2x workers, results ~10x.
    let job_queue_depth = max_core_in_fingerprint * 2;
    let result_queue_depth = max_core_in_fingerprint * 10;
    let max_chunks_in_flight = max(64, max_core_in_fingerprint * 16);

    debug!(
        "[strategic_config] detected {} cores and {} MiB memory",
        cores,
        total_memory / (1024 * 1024)
    );
    debug!(
        "[strategic_config] workers: {}, job queue: {}, result queue: {}, in flight: {}",
        max_core_in_fingerprint, job_queue_depth, result_queue_depth, max_chunks_in_flight
    );

    StrategicConfig {
        cores,
        total_memory,
        max_core_in_fingerprint,
        job_queue_depth,
        result_queue_depth,
        max_chunks_in_flight,
        default_chunk_size: DEFAULT_CHUNK_SIZE,
        max_hamming_distance: DEFAULT_MAX_HAMMING_DISTANCE,
        diagnostic_records: DEFAULT_DIAGNOSTIC_RECORDS,
    }
}
