//! Ingestion-boundary error taxonomy
//!
//! Two failure granularities exist when turning an upstream batch into
//! records:
//! - `ParseError`: a single row is unusable; it is skipped and counted.
//! - `ValidationError`: the batch as a whole is unusable; nothing is merged.

use thiserror::Error;

/// Why a single row was rejected.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ParseErrorKind {
    #[error("wrong column count: expected at least {expected}, got {actual}")]
    ColumnCount { expected: usize, actual: usize },

    #[error("missing value for column {column}")]
    MissingField { column: String },

    #[error("invalid timestamp: {0}")]
    InvalidTimestamp(String),

    #[error("invalid number: {0}")]
    InvalidNumber(String),

    #[error("non-finite value")]
    NonFinite,

    #[error("timestamp {timestamp} not aligned to {interval_secs}s interval")]
    Misaligned { timestamp: i64, interval_secs: i64 },

    #[error("unknown row type marker: {0}")]
    UnknownRowType(String),

    #[error("row belongs to a table without column {column}")]
    UnmappedTable { column: String },
}

/// A row-level failure. Non-fatal to the batch.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("line {line}: {kind}")]
pub struct ParseError {
    /// 1-based line (or row) number inside the batch
    pub line: usize,
    pub kind: ParseErrorKind,
}

impl ParseError {
    pub fn new(line: usize, kind: ParseErrorKind) -> Self {
        Self { line, kind }
    }
}

/// A batch-level failure. The batch is rejected without merging and the
/// watermark stays where it was.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("batch has no header row")]
    MissingHeader,

    #[error("required column {column} missing from header")]
    MissingColumn { column: String },

    #[error("batch contained {rows} data rows but none were valid")]
    NoValidRows { rows: usize },

    #[error("batch is not valid UTF-8")]
    InvalidEncoding,

    #[error("batch rejected: {0}")]
    Other(String),
}
