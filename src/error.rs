use std::io;

use crate::boxes::FourCC;

/// Failure reported by a [`crate::reader::RandomAccessReader`].
#[derive(thiserror::Error, Debug)]
pub enum ReaderError {
    /// The requested window does not lie inside the readable data.
    #[error("read of {count} bytes at offset {offset} is outside the data (length {length})")]
    OutOfBounds { offset: u64, count: usize, length: u64 },

    /// The underlying storage failed.
    #[error("io: {0}")]
    Io(#[from] io::Error),
}

/// Failure decoding a single box header.
#[derive(thiserror::Error, Debug)]
pub enum HeaderError {
    /// The header offset is not inside the enclosing range.
    #[error("offset {offset} is outside the parent range {parent_start}..{parent_end}")]
    OffsetOutsideParent { offset: u64, parent_start: u64, parent_end: u64 },

    /// A box declared size 0 but there is no parent range to expand into.
    #[error("box declares size 0 without an enclosing parent range")]
    ZeroSizeWithoutParent,

    /// The reader could not supply every byte of a header field.
    #[error("truncated header field: expected {expected} bytes, found {actual}")]
    TruncatedField { expected: usize, actual: usize },

    /// The declared size is smaller than the header itself.
    #[error("invalid box size {total_size} (header occupies {header_size} bytes)")]
    InvalidSize { total_size: u64, header_size: u64 },

    /// The box would end past its parent (or past the data for top-level boxes).
    #[error("box ends at {expected_end}, beyond the parent end {parent_end}")]
    ExceedsParent { expected_end: u64, parent_end: u64 },

    #[error(transparent)]
    Reader(#[from] ReaderError),
}

/// Fatal error that ends a parse session.
#[derive(thiserror::Error, Debug)]
pub enum ParseError {
    /// Header decoding failed in strict mode.
    #[error("header at offset {offset}: {source}")]
    Header {
        offset: u64,
        #[source]
        source: HeaderError,
    },

    /// Reader failures are fatal in every mode.
    #[error(transparent)]
    Reader(#[from] ReaderError),

    /// A payload decoder hit an unrecoverable reader failure.
    #[error("decoding {box_type} at offset {offset}: {source}")]
    Decode {
        offset: u64,
        box_type: FourCC,
        #[source]
        source: anyhow::Error,
    },

    /// A traversal guard tripped while structural errors abort the walk.
    #[error("{code}: {message}")]
    Guard { code: String, message: String },

    /// The caller's cancellation token fired.
    #[error("parse cancelled")]
    Cancelled,
}

impl ParseError {
    pub(crate) fn from_header(offset: u64, source: HeaderError) -> Self {
        match source {
            HeaderError::Reader(e) => ParseError::Reader(e),
            source => ParseError::Header { offset, source },
        }
    }
}

pub type Result<T> = std::result::Result<T, ParseError>;

/// Failure loading or saving a research log file.
#[derive(thiserror::Error, Debug)]
pub enum ResearchLogError {
    #[error("research log io: {0}")]
    Io(#[from] io::Error),

    #[error("research log is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
}
