//! Collection Service
//!
//! Pulls batches from upstream sources, validates them at the ingestion
//! boundary and merges them idempotently into the time-series store.
//!
//! # Modules
//! - `source`: Upstream batch contract and fetch error taxonomy
//! - `directory`: Drop-directory source adapter (CSV, optionally zstd)
//! - `ingestion`: Batch validation (finite values, alignment, in-batch dedup)
//! - `retry`: Shared retry policy with exponential backoff
//! - `collector`: SourceCollector fetch → validate → merge cycle
//! - `scheduler`: Concurrent cycles with per-collector deadlines
//! - `status`: Per-source health registry

pub mod collector;
pub mod directory;
pub mod ingestion;
pub mod retry;
pub mod scheduler;
pub mod source;
pub mod status;

pub use collector::{Collector, CollectorError, FailureKind, RunReport, SourceCollector};
pub use retry::RetryPolicy;
pub use scheduler::{CycleSummary, Outcome, Scheduler, SchedulerConfig, SchedulerError, SchedulerState};
pub use source::{BatchRef, BatchSource, FetchError, ParsedBatch};
pub use status::{SourceStatus, StatusRegistry};
