// chunk_table.rs – Arrow IPC export of the chunk records, readable by DuckDB, Polars, DataFusion

use std::collections::HashMap;
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::Path;
use std::sync::Arc;

use arrow::array::{Array, ArrayRef, UInt64Array, UInt64Builder};
use arrow::datatypes::{DataType, Field, Schema};
use arrow::ipc::reader::FileReader;
use arrow::ipc::writer::FileWriter;
use arrow::record_batch::RecordBatch;
use log::debug;
use once_cell::sync::Lazy;

use crate::error::{IndexError, IoContext, Result};
use crate::index::Index;
use crate::meta::ChunkRecord;

pub const META_SOURCE_PATH: &str = "source_path";
pub const META_CHUNK_SIZE: &str = "chunk_size";

pub static CHUNK_TABLE_SCHEMA: Lazy<Arc<Schema>> = Lazy::new(|| {
    Arc::new(Schema::new(vec![
        Field::new("offset", DataType::UInt64, false),
        Field::new("size", DataType::UInt64, false),
        Field::new("fingerprint", DataType::UInt64, false),
    ]))
});

/// Chunk records read back from an exported table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkTable {
    pub source_path: Option<String>,
    pub chunk_size: Option<usize>,
    pub records: Vec<ChunkRecord>,
}

pub fn build_chunk_batch(index: &Index) -> Result<RecordBatch> {
    let n = index.len();
    let mut offsets = UInt64Builder::with_capacity(n);
    let mut sizes = UInt64Builder::with_capacity(n);
    let mut fingerprints = UInt64Builder::with_capacity(n);

    for record in index.chunks() {
        offsets.append_value(record.offset);
        sizes.append_value(record.size as u64);
        fingerprints.append_value(record.fingerprint);
    }

    let metadata = HashMap::from([
        (
            META_SOURCE_PATH.to_string(),
            index.source_path().to_string_lossy().into_owned(),
        ),
        (META_CHUNK_SIZE.to_string(), index.chunk_size().to_string()),
    ]);
    let schema = Schema::new_with_metadata(CHUNK_TABLE_SCHEMA.fields().clone(), metadata);

    let columns: Vec<ArrayRef> = vec![
        Arc::new(offsets.finish()),
        Arc::new(sizes.finish()),
        Arc::new(fingerprints.finish()),
    ];
    Ok(RecordBatch::try_new(Arc::new(schema), columns)?)
}

pub fn write_chunk_table(index: &Index, path: &Path) -> Result<()> {
    let batch = build_chunk_batch(index)?;
    let file = File::create(path)
        .io_context(|| format!("error creating chunk table {}", path.display()))?;
    let mut writer = FileWriter::try_new(BufWriter::new(file), &batch.schema())?;
    writer.write(&batch)?;
    writer.finish()?;
    debug!(
        "[chunk_table] exported {} rows to {}",
        batch.num_rows(),
        path.display()
    );
    Ok(())
}

pub fn read_chunk_table(path: &Path) -> Result<ChunkTable> {
    let file = File::open(path)
        .io_context(|| format!("error opening chunk table {}", path.display()))?;
    let reader = FileReader::try_new(BufReader::new(file), None)?;
    let schema = reader.schema();
    let metadata = schema.metadata();

    let source_path = metadata.get(META_SOURCE_PATH).cloned();
    let chunk_size = metadata
        .get(META_CHUNK_SIZE)
        .map(|v| {
            v.parse::<usize>()
                .map_err(|e| IndexError::Decode(format!("bad chunk_size metadata '{v}': {e}")))
        })
        .transpose()?;

    let mut records = Vec::new();
    for batch in reader {
        let batch = batch?;
        let offsets = u64_column(&batch, "offset")?;
        let sizes = u64_column(&batch, "size")?;
        let fingerprints = u64_column(&batch, "fingerprint")?;
        for row in 0..batch.num_rows() {
            records.push(ChunkRecord::new(
                offsets.value(row),
                sizes.value(row) as usize,
                fingerprints.value(row),
            ));
        }
    }

    Ok(ChunkTable {
        source_path,
        chunk_size,
        records,
    })
}

fn u64_column<'a>(batch: &'a RecordBatch, name: &str) -> Result<&'a UInt64Array> {
    let column = batch
        .column_by_name(name)
        .ok_or_else(|| IndexError::Decode(format!("missing '{name}' column")))?;
    if column.null_count() > 0 {
        return Err(IndexError::Decode(format!("'{name}' column has nulls")));
    }
    column
        .as_any()
        .downcast_ref::<UInt64Array>()
        .ok_or_else(|| IndexError::Decode(format!("'{name}' is not UInt64")))
}
