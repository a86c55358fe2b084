//! Query error taxonomy
//!
//! `QueryError` is `Clone` because a single failed computation is handed to
//! every caller waiting on the same fingerprint.

use persistence::StoreError;
use thiserror::Error;
use tokio::task::JoinError;
use types::ids::SourceId;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum QueryError {
    #[error("invalid range: start {start} is after end {end}")]
    InvalidRange { start: i64, end: i64 },

    #[error("range of {span_secs}s is too large for fine resolution (max {max_secs}s)")]
    FineRangeTooLarge { span_secs: i64, max_secs: i64 },

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("no dataset registered for source {0}")]
    UnknownSource(SourceId),

    #[error("store error: {message}")]
    Store { message: String },

    #[error("query computation aborted: {0}")]
    Aborted(String),
}

impl From<StoreError> for QueryError {
    fn from(err: StoreError) -> Self {
        QueryError::Store {
            message: err.to_string(),
        }
    }
}

impl From<JoinError> for QueryError {
    fn from(err: JoinError) -> Self {
        QueryError::Aborted(err.to_string())
    }
}
