//! SourceCollector: one fetch → validate → merge cycle per source
//!
//! Merge ordering is what makes a cycle crash-safe:
//! 1. Filter the batch to rows newer than the watermark
//! 2. Append the survivors as one durable segment
//! 3. Only then advance the watermark
//!
//! A crash or failed watermark write between 2 and 3 leaves rows on disk
//! beyond the watermark. The next merge filters against the newer of the
//! watermark and the newest stored row, then rolls the watermark forward,
//! so re-fetching never duplicates data.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::ingestion::{BatchValidator, ValidatedBatch};
use crate::retry::{RetryExhausted, RetryPolicy};
use crate::source::{BatchRef, BatchSource, FetchError};
use persistence::{DatasetSpec, StoreError, TimeSeriesStore};
use types::errors::ValidationError;
use types::ids::DatasetKey;
use types::record::RawRecord;

// ── Errors ──────────────────────────────────────────────────────────

#[derive(Error, Debug)]
pub enum CollectorError {
    #[error("fetch failed after {attempts} attempt(s): {error}")]
    Fetch { error: FetchError, attempts: u32 },

    #[error("batch {batch} rejected: {error}")]
    Validation {
        batch: String,
        error: ValidationError,
    },

    #[error("store write failed: {0}")]
    Store(#[from] StoreError),

    #[error("merge task failed: {0}")]
    Task(String),
}

/// Coarse classification used in cycle summaries and status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    TransientFetch,
    FatalFetch,
    Validation,
    StoreWrite,
    Internal,
}

impl CollectorError {
    pub fn kind(&self) -> FailureKind {
        match self {
            CollectorError::Fetch { error, .. } if error.is_transient() => FailureKind::TransientFetch,
            CollectorError::Fetch { .. } => FailureKind::FatalFetch,
            CollectorError::Validation { .. } => FailureKind::Validation,
            CollectorError::Store(_) => FailureKind::StoreWrite,
            CollectorError::Task(_) => FailureKind::Internal,
        }
    }
}

impl From<RetryExhausted> for CollectorError {
    fn from(e: RetryExhausted) -> Self {
        CollectorError::Fetch {
            error: e.error,
            attempts: e.attempts,
        }
    }
}

// ── Reports ─────────────────────────────────────────────────────────

/// Result of `merge`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MergeOutcome {
    pub appended: usize,
    /// Rows at or below the watermark, already merged earlier
    pub already_present: usize,
    pub watermark_before: Option<i64>,
    pub watermark_after: Option<i64>,
}

/// What one `run` did.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunReport {
    /// Newest batch seen upstream, if any
    pub batch: Option<BatchRef>,
    pub fetch_attempts: u32,
    pub rows_parsed: usize,
    pub rows_skipped: usize,
    pub rows_deduplicated: usize,
    pub rows_already_present: usize,
    pub rows_appended: usize,
    pub watermark_before: Option<i64>,
    pub watermark_after: Option<i64>,
}

/// A fetched, parsed and validated batch.
#[derive(Debug, Clone)]
pub struct FetchedBatch {
    pub batch: BatchRef,
    pub validated: ValidatedBatch,
    pub attempts: u32,
}

// ── Collector Trait ─────────────────────────────────────────────────

/// Anything the scheduler can drive once per cycle.
#[async_trait]
pub trait Collector: Send + Sync {
    fn name(&self) -> &str;

    /// Watermark shown in status before the first run.
    fn current_watermark(&self) -> Option<i64> {
        None
    }

    async fn run(&self) -> Result<RunReport, CollectorError>;
}

// ── Source Collector ────────────────────────────────────────────────

pub struct SourceCollector {
    source: Arc<dyn BatchSource>,
    dataset: DatasetKey,
    store: Arc<TimeSeriesStore>,
    retry: RetryPolicy,
    validator: BatchValidator,
    /// Serialises merges, including blocking merges that outlive a
    /// cancelled `run`.
    merge_lock: Arc<Mutex<()>>,
    merges: AtomicU64,
}

impl SourceCollector {
    /// Build a collector writing into `dataset`, registering it if needed.
    pub fn new(
        source: Arc<dyn BatchSource>,
        dataset: DatasetSpec,
        store: Arc<TimeSeriesStore>,
        retry: RetryPolicy,
    ) -> Result<Self, CollectorError> {
        store.register(dataset.clone())?;
        Ok(Self {
            source,
            validator: BatchValidator::new(dataset.interval_secs),
            dataset: dataset.key,
            store,
            retry,
            merge_lock: Arc::new(Mutex::new(())),
            merges: AtomicU64::new(0),
        })
    }

    pub fn dataset(&self) -> &DatasetKey {
        &self.dataset
    }

    pub fn watermark(&self) -> Result<Option<i64>, CollectorError> {
        Ok(self.store.watermark(&self.dataset)?)
    }

    /// Fetch the newest available batch. `Ok(None)` means the source has
    /// nothing published.
    pub async fn fetch_latest(&self) -> Result<Option<FetchedBatch>, CollectorError> {
        let label = format!("{}:list", self.source.name());
        let (batches, list_attempts) = self
            .retry
            .run(&label, || self.source.list_batches())
            .await?;

        let latest = match batches.into_iter().max_by_key(BatchRef::order_key) {
            Some(batch) => batch,
            None => return Ok(None),
        };

        let label = format!("{}:{}", self.source.name(), latest.name);
        let (bytes, fetch_attempts) = self
            .retry
            .run(&label, || self.source.fetch(&latest))
            .await
            .map_err(|e| CollectorError::Fetch {
                error: e.error,
                attempts: list_attempts + e.attempts - 1,
            })?;

        let validation = |error: ValidationError| CollectorError::Validation {
            batch: latest.name.clone(),
            error,
        };
        let parsed = self.source.parse(&latest, &bytes).map_err(validation)?;
        let validated = self
            .validator
            .validate(&latest.name, parsed)
            .map_err(validation)?;

        Ok(Some(FetchedBatch {
            attempts: list_attempts + fetch_attempts - 1,
            batch: latest,
            validated,
        }))
    }

    /// Whether `records` contain anything beyond the current watermark.
    pub fn is_new(&self, records: &[RawRecord]) -> Result<bool, CollectorError> {
        let watermark = self.watermark()?;
        Ok(match records.iter().map(|r| r.timestamp).max() {
            Some(max_ts) => watermark.map_or(true, |wm| max_ts > wm),
            None => false,
        })
    }

    /// Filter, append and advance the watermark. Synchronous and blocking.
    pub fn merge(&self, records: Vec<RawRecord>) -> Result<MergeOutcome, CollectorError> {
        self.merges.fetch_add(1, Ordering::Relaxed);
        merge_into(&self.store, &self.dataset, records)
    }

    /// Number of merges started so far.
    pub fn merges(&self) -> u64 {
        self.merges.load(Ordering::Relaxed)
    }
}

/// Append rows newer than everything already stored, then advance the
/// watermark to the newest stored timestamp.
///
/// Rows committed by an earlier merge whose watermark write failed count as
/// already present; the watermark is rolled forward over them here.
pub fn merge_into(
    store: &TimeSeriesStore,
    dataset: &DatasetKey,
    records: Vec<RawRecord>,
) -> Result<MergeOutcome, CollectorError> {
    let watermark_before = store.watermark(dataset)?;
    let committed = watermark_before.max(store.max_timestamp(dataset)?);
    let total = records.len();
    let fresh: Vec<RawRecord> = records
        .into_iter()
        .filter(|r| committed.map_or(true, |ts| r.timestamp > ts))
        .collect();
    let already_present = total - fresh.len();

    let newest = fresh.iter().map(|r| r.timestamp).max();
    let appended = store.append(dataset, fresh)?;

    let watermark_after = match newest.max(committed) {
        Some(ts) if watermark_before.map_or(true, |wm| ts > wm) => {
            if newest.is_none() {
                info!(
                    dataset = %dataset,
                    watermark = ts,
                    "Rolling watermark forward over stored rows"
                );
            }
            Some(store.advance_watermark(dataset, ts)?)
        }
        _ => watermark_before,
    };

    debug!(
        dataset = %dataset,
        appended,
        already_present,
        watermark_before = ?watermark_before,
        watermark_after = ?watermark_after,
        "Merge complete"
    );

    Ok(MergeOutcome {
        appended,
        already_present,
        watermark_before,
        watermark_after,
    })
}

#[async_trait]
impl Collector for SourceCollector {
    fn name(&self) -> &str {
        self.source.name()
    }

    fn current_watermark(&self) -> Option<i64> {
        self.watermark().ok().flatten()
    }

    async fn run(&self) -> Result<RunReport, CollectorError> {
        let fetched = match self.fetch_latest().await? {
            Some(fetched) => fetched,
            None => {
                let watermark = self.watermark()?;
                info!(source = self.name(), "No batches published");
                return Ok(RunReport {
                    batch: None,
                    fetch_attempts: 1,
                    rows_parsed: 0,
                    rows_skipped: 0,
                    rows_deduplicated: 0,
                    rows_already_present: 0,
                    rows_appended: 0,
                    watermark_before: watermark,
                    watermark_after: watermark,
                });
            }
        };

        let FetchedBatch {
            batch,
            validated,
            attempts,
        } = fetched;
        let rows_parsed = validated.records.len() + validated.duplicates;
        let rows_skipped = validated.row_errors.len();
        let rows_deduplicated = validated.duplicates;

        if !self.is_new(&validated.records)? {
            let watermark = self.watermark()?;
            debug!(source = self.name(), batch = %batch.name, "Batch already merged");
            return Ok(RunReport {
                batch: Some(batch),
                fetch_attempts: attempts,
                rows_parsed,
                rows_skipped,
                rows_deduplicated,
                rows_already_present: validated.records.len(),
                rows_appended: 0,
                watermark_before: watermark,
                watermark_after: watermark,
            });
        }

        // The blocking merge runs to completion even if this future is
        // dropped by a deadline; the owned guard keeps the next merge out
        // until it has finished.
        let guard = Arc::clone(&self.merge_lock).lock_owned().await;
        self.merges.fetch_add(1, Ordering::Relaxed);
        let store = Arc::clone(&self.store);
        let dataset = self.dataset.clone();
        let records = validated.records;
        let outcome = tokio::task::spawn_blocking(move || {
            let _guard = guard;
            merge_into(&store, &dataset, records)
        })
        .await
        .map_err(|e| CollectorError::Task(e.to_string()))??;

        info!(
            source = self.name(),
            batch = %batch.name,
            appended = outcome.appended,
            already_present = outcome.already_present,
            skipped = rows_skipped,
            watermark = ?outcome.watermark_after,
            "Collector run complete"
        );

        Ok(RunReport {
            batch: Some(batch),
            fetch_attempts: attempts,
            rows_parsed,
            rows_skipped,
            rows_deduplicated,
            rows_already_present: outcome.already_present,
            rows_appended: outcome.appended,
            watermark_before: outcome.watermark_before,
            watermark_after: outcome.watermark_after,
        })
    }
}
