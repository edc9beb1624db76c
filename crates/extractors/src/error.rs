// Error - error types shared by every format loader

use std::io;

use thiserror::Error;
use zone_shared::util::BufferError;

/// Result type alias for zone extraction
pub type Result<T> = std::result::Result<T, ZoneError>;

#[derive(Error, Debug)]
pub enum ZoneError {
    /// I/O error reading or writing a file
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Bad magic, header or index inside a stream or entry
    #[error("Invalid format: {0}")]
    Format(String),

    /// A cursor read ran past the end of its buffer
    #[error("Truncated buffer: {0}")]
    Truncated(#[from] BufferError),

    /// Archive entry, sidecar file or whole zone absent
    #[error("Not found: {0}")]
    NotFound(String),

    /// Chunk sizes disagree with the declared sizes while inflating
    #[error("Compression error: {0}")]
    Compression(String),

    /// A fragment handle resolved to a record of the wrong kind
    #[error("Fragment {handle} is {found}, expected {expected}")]
    WrongKind {
        handle: i32,
        expected: &'static str,
        found: &'static str,
    },
}

impl ZoneError {
    pub fn format(msg: impl Into<String>) -> Self {
        ZoneError::Format(msg.into())
    }

    pub fn not_found(what: impl Into<String>) -> Self {
        ZoneError::NotFound(what.into())
    }

    /// Whether this error only means "this family does not apply"
    pub fn is_not_found(&self) -> bool {
        matches!(self, ZoneError::NotFound(_))
    }
}
