// textindex-cli/src/main.rs

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, bail, Context, Result};
use clap::{Parser, Subcommand};
use log::debug;

use textindex_build::{index_file, BuildOptions};
use textindex_common::{
    common_config::CONFIG, format_fingerprint, load_from_path, lookup_with, parse_fingerprint,
    simhash, write_chunk_table, DiagnosticSink, HashLogFile, IndexError, LookupOptions, MatchKind,
    SourceReader,
};

#[derive(Parser)]
#[command(name = "textindex")]
#[command(about = "TextIndex: fast & scalable SimHash text indexer", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Index a text file in fixed-size chunks
    Index {
        #[arg(short, long)]
        input: PathBuf,

        /// Chunk size in bytes
        #[arg(short = 's', long, default_value_t = CONFIG.default_chunk_size as i64, allow_negative_numbers = true)]
        chunk_size: i64,

        /// Index file to write (default: <input file name>.idx)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Where to write the first chunk fingerprints and offsets
        #[arg(long, default_value = "hashlogs.txt")]
        hash_log: PathBuf,

        #[arg(long)]
        no_hash_log: bool,

        /// Fingerprint workers (default: available cores)
        #[arg(short, long)]
        workers: Option<usize>,
    },

    /// Look up chunks by SimHash fingerprint (hexadecimal)
    Lookup {
        #[arg(short, long)]
        input: PathBuf,

        #[arg(short = 'q', long = "hash")]
        hash: String,

        /// Maximum Hamming distance for approximate matches
        #[arg(long)]
        max_distance: Option<u32>,
    },

    /// Print the SimHash fingerprint of a text or file
    Fingerprint {
        #[arg(long, conflicts_with = "file", required_unless_present = "file")]
        text: Option<String>,

        #[arg(long)]
        file: Option<PathBuf>,
    },

    /// List the chunk records of an index
    List {
        #[arg(short, long)]
        input: PathBuf,
    },

    /// Export the chunk records of an index as an Arrow IPC file
    Export {
        #[arg(short, long)]
        input: PathBuf,

        #[arg(short, long)]
        output: PathBuf,
    },
}

fn main() -> Result<()> {
    env_logger::init();
    let cli = Cli::parse();

    match cli.command {
        Commands::Index {
            input,
            chunk_size,
            output,
            hash_log,
            no_hash_log,
            workers,
        } => run_index(
            &input,
            chunk_size,
            output.as_deref(),
            (!no_hash_log).then_some(hash_log),
            workers,
        )?,

        Commands::Lookup {
            input,
            hash,
            max_distance,
        } => run_lookup(&input, &hash, max_distance)?,

        Commands::Fingerprint { text, file } => {
            let bytes = match (text, file) {
                (Some(text), _) => text.into_bytes(),
                (None, Some(file)) => fs::read(&file)
                    .with_context(|| format!("error reading {}", file.display()))?,
                (None, None) => bail!("either --text or --file is required"),
            };
            println!("{}", format_fingerprint(simhash(&bytes)));
        }

        Commands::List { input } => {
            let index = open_index(&input)?;
            println!("Source:                {}", index.source_path().display());
            println!("Chunk size:            {} bytes", index.chunk_size());
            println!("Chunks:                {}", index.len());
            println!("Distinct fingerprints: {}", index.distinct_fingerprints());
            for (i, chunk) in index.chunks().iter().enumerate() {
                println!(
                    "{:>8}  offset {:>12}  size {:>8}  {:016x}",
                    i, chunk.offset, chunk.size, chunk.fingerprint
                );
            }
        }

        Commands::Export { input, output } => {
            let index = open_index(&input)?;
            write_chunk_table(&index, &output)
                .with_context(|| format!("error exporting {}", output.display()))?;
            println!("Exported {} chunk(s) to {}", index.len(), output.display());
        }
    }

    Ok(())
}

fn run_index(
    input: &Path,
    chunk_size: i64,
    output: Option<&Path>,
    hash_log: Option<PathBuf>,
    workers: Option<usize>,
) -> Result<()> {
    let chunk_size = usize::try_from(chunk_size)
        .ok()
        .filter(|&s| s > 0)
        .ok_or_else(|| {
            anyhow!("invalid chunk size: {chunk_size}. Provide a valid chunk size (e.g. 1024)")
        })?;

    let mut options = BuildOptions::with_chunk_size(chunk_size);
    if let Some(workers) = workers {
        options.workers = workers;
    }

    let mut sink = hash_log.map(HashLogFile::new);
    println!(
        "Indexing {} (chunk size: {} bytes)...",
        input.display(),
        chunk_size
    );
    let (written, _index, report) = index_file(
        input,
        output,
        &options,
        sink.as_mut().map(|s| s as &mut dyn DiagnosticSink),
    )
    .context("indexing failed")?;

    println!("\n✅ Indexing complete:");
    println!("📄 Chunks indexed:          {}", report.chunks);
    println!("🔑 Distinct fingerprints:   {}", report.distinct_fingerprints);
    println!("📥 Bytes read:              {}", report.bytes_read);
    println!("🧵 Workers:                 {}", report.workers);
    println!("⏱️  Elapsed:                 {:.2?}", report.elapsed);
    println!("💾 Saved to:                {}", written.display());
    if let Some(sink) = &sink {
        println!("🧾 Hash log:                {}", sink.path().display());
    }
    Ok(())
}

fn open_index(path: &Path) -> Result<textindex_common::Index> {
    match load_from_path(path) {
        Ok(index) => Ok(index),
        Err(IndexError::NotFound(p)) => bail!(
            "no index at {}. Ensure the file was indexed before looking up",
            p.display()
        ),
        Err(e) => Err(e).with_context(|| format!("error loading index {}", path.display())),
    }
}

fn run_lookup(input: &Path, hash: &str, max_distance: Option<u32>) -> Result<()> {
    if input.as_os_str().is_empty() {
        bail!("index file is required");
    }
    let query = parse_fingerprint(hash).context("invalid SimHash value")?;
    if query == 0 {
        bail!("no fingerprint supplied: a non-zero SimHash value is required");
    }

    let index = open_index(input)?;
    let mut options = LookupOptions::default();
    if let Some(d) = max_distance {
        options.max_distance = d;
    }
    let outcome = lookup_with(&index, query, &options)?;
    debug!(
        "[lookup] {} -> {:?} ({} chunk(s))",
        format_fingerprint(query),
        outcome.kind,
        outcome.matches.len()
    );

    if outcome.kind == MatchKind::None {
        println!("No matches found for query.");
        bail!(
            "SimHash {} not found. Ensure the file was indexed before looking up",
            format_fingerprint(query)
        );
    }

    let mut source = SourceReader::open(index.source_path())
        .context("the indexed source file is no longer readable")?;
    for (i, m) in outcome.matches.iter().enumerate() {
        let content = source.read_chunk(&m.record)?;
        match outcome.kind {
            MatchKind::Fuzzy => println!(
                "Query found in chunk at byte offset: {} (distance {})",
                m.record.offset, m.distance
            ),
            _ => println!("Query found in chunk at byte offset: {}", m.record.offset),
        }
        println!("Chunk content:");
        println!("{}", String::from_utf8_lossy(&content));
        if i + 1 < outcome.matches.len() {
            println!("\n---");
        }
    }

    println!("\n---");
    println!("\nQuery found {} indexed chunk(s).", outcome.matches.len());
    Ok(())
}
