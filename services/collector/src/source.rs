//! Upstream batch source contract
//!
//! A source publishes batches identified by an embedded timestamp and
//! sequence number. Collectors only ever talk to a source through
//! `BatchSource`: list what is available, fetch one batch, parse its rows.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;
use types::errors::{ParseError, ValidationError};
use types::record::RawRecord;

/// Reference to one upstream batch.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BatchRef {
    /// Name as published upstream (e.g. the file name)
    pub name: String,
    /// Publication timestamp embedded in the name (Unix seconds)
    pub timestamp: i64,
    /// Publisher sequence number
    pub sequence: u64,
    /// Where to fetch it from (path, URL, ...)
    pub location: String,
}

impl BatchRef {
    /// Ordering key: newest timestamp first, sequence breaks ties.
    pub fn order_key(&self) -> (i64, u64) {
        (self.timestamp, self.sequence)
    }
}

/// Rows decoded from a batch before validation.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParsedBatch {
    pub records: Vec<RawRecord>,
    /// Rows that could not be decoded
    pub parse_errors: Vec<ParseError>,
    /// Data rows seen, valid or not
    pub data_rows: usize,
}

// ── Errors ──────────────────────────────────────────────────────────

/// Failure while listing or fetching batches.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FetchError {
    #[error("upstream request timed out")]
    Timeout,

    #[error("upstream unavailable: {0}")]
    Unavailable(String),

    #[error("rate limited by upstream (retry after {retry_after:?})")]
    RateLimited { retry_after: Option<Duration> },

    #[error("batch not found: {0}")]
    NotFound(String),

    #[error("fatal fetch error: {0}")]
    Fatal(String),
}

impl FetchError {
    /// Transient errors are worth retrying with backoff.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            FetchError::Timeout | FetchError::Unavailable(_) | FetchError::RateLimited { .. }
        )
    }

    /// Server-requested delay before the next attempt, if any.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            FetchError::RateLimited { retry_after } => *retry_after,
            _ => None,
        }
    }
}

// ── Source Trait ────────────────────────────────────────────────────

#[async_trait]
pub trait BatchSource: Send + Sync {
    /// Stable name used in logs and status.
    fn name(&self) -> &str;

    /// Batches currently available upstream, in any order.
    async fn list_batches(&self) -> Result<Vec<BatchRef>, FetchError>;

    /// Raw (decompressed) bytes of one batch.
    async fn fetch(&self, batch: &BatchRef) -> Result<Vec<u8>, FetchError>;

    /// Decode rows. Malformed rows become `ParseError`s; a structurally
    /// unusable batch is a `ValidationError`.
    fn parse(&self, batch: &BatchRef, bytes: &[u8]) -> Result<ParsedBatch, ValidationError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        assert!(FetchError::Timeout.is_transient());
        assert!(FetchError::Unavailable("503".into()).is_transient());
        assert!(FetchError::RateLimited { retry_after: None }.is_transient());
        assert!(!FetchError::NotFound("x".into()).is_transient());
        assert!(!FetchError::Fatal("schema".into()).is_transient());
    }

    #[test]
    fn test_retry_after_only_for_rate_limit() {
        let rl = FetchError::RateLimited {
            retry_after: Some(Duration::from_secs(3)),
        };
        assert_eq!(rl.retry_after(), Some(Duration::from_secs(3)));
        assert_eq!(FetchError::Timeout.retry_after(), None);
    }

    #[test]
    fn test_batch_order_key() {
        let a = BatchRef {
            name: "a".into(),
            timestamp: 300,
            sequence: 2,
            location: "a".into(),
        };
        let b = BatchRef {
            sequence: 5,
            ..a.clone()
        };
        assert!(b.order_key() > a.order_key());
    }
}
