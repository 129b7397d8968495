use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum IndexError {
    /// Rejected before any I/O or computation took place.
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    #[error("index not found: {}", .0.display())]
    NotFound(PathBuf),

    /// Truncated, corrupted or internally inconsistent index encoding.
    #[error("decode error: {0}")]
    Decode(String),

    #[error("encode error: {0}")]
    Encode(String),

    #[error("pipeline error: {0}")]
    Pipeline(String),

    #[error("arrow error: {0}")]
    Arrow(#[from] arrow::error::ArrowError),
}

// Convenient crate-wide result type
pub type Result<T> = std::result::Result<T, IndexError>;

impl IndexError {
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        IndexError::Io {
            context: context.into(),
            source,
        }
    }

    pub fn invalid(msg: impl Into<String>) -> Self {
        IndexError::InvalidParameter(msg.into())
    }
}

/// Attaches an operation description to a raw `std::io::Error`.
pub trait IoContext<T> {
    fn io_context<C, F>(self, f: F) -> Result<T>
    where
        C: Into<String>,
        F: FnOnce() -> C;
}

impl<T> IoContext<T> for std::io::Result<T> {
    fn io_context<C, F>(self, f: F) -> Result<T>
    where
        C: Into<String>,
        F: FnOnce() -> C,
    {
        self.map_err(|e| IndexError::io(f(), e))
    }
}
