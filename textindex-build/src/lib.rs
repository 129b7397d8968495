// textindex-build/src/lib.rs

pub mod indexer;

pub use indexer::{build_from_reader, build_index, default_output_path, index_file, BuildOptions};
