//! Error types for vidbridge-media.

use std::io;
use thiserror::Error;

/// Result type for vidbridge-media operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for box parsing and NAL extraction.
///
/// Every variant aborts the current parse or read attempt. Nothing in this
/// crate swallows one of these mid-stream.
#[derive(Debug, Error)]
pub enum Error {
    /// The stream ended before the expected bytes were available.
    #[error("End of stream")]
    EndOfStream,

    /// A 64-bit length had its top bit set and would not fit a signed value.
    #[error("Integer overflow reading {byte_count}-byte unsigned value")]
    IntegerOverflow { byte_count: usize },

    /// The computed remaining size of a box was zero or smaller than its header.
    #[error("Unsupported box size {size} for box {tag}")]
    UnsupportedBoxSize { tag: String, size: u64 },

    /// A structural assumption about the stream was violated.
    #[error("Unexpected: {0}")]
    Unexpected(String),

    /// I/O error other than a short read.
    #[error("I/O error: {0}")]
    Io(io::Error),
}

impl Error {
    /// Create an unexpected-structure error.
    pub fn unexpected(msg: impl Into<String>) -> Self {
        Self::Unexpected(msg.into())
    }

    /// Whether this error means the source simply ran dry.
    pub fn is_end_of_stream(&self) -> bool {
        matches!(self, Self::EndOfStream)
    }
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::UnexpectedEof => Self::EndOfStream,
            _ => Self::Io(err),
        }
    }
}
