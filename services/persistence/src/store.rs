//! TimeSeriesStore: resolution-partitioned, append-only datasets
//!
//! Layout on disk:
//! ```text
//! <root>/<source>/<resolution>/dataset.json     manifest
//! <root>/<source>/<resolution>/watermark.json   durable watermark
//! <root>/<source>/<resolution>/seg-00000001.bin immutable segments
//! ```

use crate::partition::{DatasetSpec, Partition, PartitionSnapshot};
use crate::rollup::{rollup_records, RollupRow};
use crate::scan::{Scan, ScanFilter};
use crate::segment::{FsyncPolicy, SegmentError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};
use thiserror::Error;
use tracing::{debug, info, warn};
use types::ids::{DatasetKey, SourceId};
use types::record::RawRecord;
use types::resolution::Resolution;
use types::time::is_aligned;

pub const MANIFEST_FILE: &str = "dataset.json";

// ── Errors ──────────────────────────────────────────────────────────

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Corrupt segment {path} at byte offset {offset}: {detail}")]
    Corrupt {
        path: PathBuf,
        offset: u64,
        detail: String,
    },

    #[error("Unknown dataset: {0}")]
    UnknownDataset(DatasetKey),

    #[error("Dataset {key} is registered with interval {existing}s, not {requested}s")]
    IntervalMismatch {
        key: DatasetKey,
        existing: i64,
        requested: i64,
    },

    #[error("Timestamp {timestamp} is not aligned to the {interval_secs}s interval of {key}")]
    Misaligned {
        key: DatasetKey,
        timestamp: i64,
        interval_secs: i64,
    },

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
}

impl From<SegmentError> for StoreError {
    fn from(err: SegmentError) -> Self {
        match err {
            SegmentError::Io(e) => StoreError::Io(e),
            SegmentError::Serialization(msg) => StoreError::Serialization(msg),
            other => StoreError::Corrupt {
                path: PathBuf::new(),
                offset: 0,
                detail: other.to_string(),
            },
        }
    }
}

// ── Configuration ───────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Root directory holding every dataset.
    pub root: PathBuf,
    pub fsync: FsyncPolicy,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("./data"),
            fsync: FsyncPolicy::EveryAppend,
        }
    }
}

impl StoreConfig {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            ..Self::default()
        }
    }

    pub fn with_fsync(mut self, fsync: FsyncPolicy) -> Self {
        self.fsync = fsync;
        self
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct DatasetManifest {
    #[serde(flatten)]
    spec: DatasetSpec,
    created_at: DateTime<Utc>,
}

// ── Store ───────────────────────────────────────────────────────────

pub struct TimeSeriesStore {
    config: StoreConfig,
    partitions: RwLock<BTreeMap<DatasetKey, Arc<Partition>>>,
}

impl TimeSeriesStore {
    /// Open (or create) a store rooted at `config.root` and recover every
    /// dataset found under it.
    pub fn open(config: StoreConfig) -> Result<Self, StoreError> {
        fs::create_dir_all(&config.root)?;

        let mut partitions = BTreeMap::new();
        for manifest_path in discover_manifests(&config.root)? {
            let raw = fs::read(&manifest_path)?;
            let manifest: DatasetManifest = serde_json::from_slice(&raw)
                .map_err(|e| StoreError::Serialization(format!("{}: {}", manifest_path.display(), e)))?;
            let dir = dataset_dir(&config.root, &manifest.spec.key);
            let (partition, metrics) = Partition::open(&dir, manifest.spec.clone(), config.fsync)?;
            if !metrics.corrupt_segments.is_empty() {
                warn!(
                    dataset = %manifest.spec.key,
                    corrupt = metrics.corrupt_segments.len(),
                    "Dataset opened with quarantined segments"
                );
            }
            partitions.insert(manifest.spec.key.clone(), Arc::new(partition));
        }

        info!(
            root = %config.root.display(),
            datasets = partitions.len(),
            "Time-series store opened"
        );

        Ok(Self {
            config,
            partitions: RwLock::new(partitions),
        })
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    /// Register a dataset, creating its directory and manifest. Registering
    /// an existing dataset with the same interval is a no-op.
    pub fn register(&self, spec: DatasetSpec) -> Result<(), StoreError> {
        if spec.interval_secs <= 0 {
            return Err(StoreError::InvalidArgument(format!(
                "interval must be positive, got {}",
                spec.interval_secs
            )));
        }

        let mut partitions = self.partitions.write().unwrap_or_else(|e| e.into_inner());
        if let Some(existing) = partitions.get(&spec.key) {
            let existing = existing.spec().interval_secs;
            if existing != spec.interval_secs {
                return Err(StoreError::IntervalMismatch {
                    key: spec.key,
                    existing,
                    requested: spec.interval_secs,
                });
            }
            return Ok(());
        }

        let dir = dataset_dir(&self.config.root, &spec.key);
        fs::create_dir_all(&dir)?;
        let manifest = DatasetManifest {
            spec: spec.clone(),
            created_at: Utc::now(),
        };
        let json = serde_json::to_vec_pretty(&manifest)
            .map_err(|e| StoreError::Serialization(e.to_string()))?;
        let tmp = dir.join(format!("{}.tmp", MANIFEST_FILE));
        fs::write(&tmp, json)?;
        fs::rename(&tmp, dir.join(MANIFEST_FILE))?;

        let (partition, _) = Partition::open(&dir, spec.clone(), self.config.fsync)?;
        info!(dataset = %spec.key, interval_secs = spec.interval_secs, "Dataset registered");
        partitions.insert(spec.key, Arc::new(partition));
        Ok(())
    }

    fn partition(&self, key: &DatasetKey) -> Result<Arc<Partition>, StoreError> {
        let partitions = self.partitions.read().unwrap_or_else(|e| e.into_inner());
        partitions
            .get(key)
            .cloned()
            .ok_or_else(|| StoreError::UnknownDataset(key.clone()))
    }

    fn snapshot(&self, key: &DatasetKey) -> Result<Arc<PartitionSnapshot>, StoreError> {
        Ok(self.partition(key)?.snapshot())
    }

    pub fn spec(&self, key: &DatasetKey) -> Result<DatasetSpec, StoreError> {
        Ok(self.partition(key)?.spec().clone())
    }

    /// Append a batch as one atomic segment. Returns the number of records
    /// written; an empty batch writes nothing.
    pub fn append(&self, key: &DatasetKey, records: Vec<RawRecord>) -> Result<usize, StoreError> {
        let partition = self.partition(key)?;
        if records.is_empty() {
            return Ok(0);
        }
        let interval_secs = partition.spec().interval_secs;
        if let Some(bad) = records.iter().find(|r| !is_aligned(r.timestamp, interval_secs)) {
            return Err(StoreError::Misaligned {
                key: key.clone(),
                timestamp: bad.timestamp,
                interval_secs,
            });
        }
        let written = partition.append(records)?;
        debug!(dataset = %key, records = written, "Append complete");
        Ok(written)
    }

    /// Records with `start <= timestamp < end`, in ingestion order.
    pub fn scan_range(
        &self,
        key: &DatasetKey,
        start: i64,
        end: i64,
        filter: &ScanFilter,
    ) -> Result<Scan, StoreError> {
        Ok(Scan::new(self.snapshot(key)?, start, end, filter.clone()))
    }

    /// Records whose interval `[t, t + interval)` overlaps `[start, end)`.
    pub fn scan_overlapping(
        &self,
        key: &DatasetKey,
        start: i64,
        end: i64,
        filter: &ScanFilter,
    ) -> Result<Scan, StoreError> {
        let partition = self.partition(key)?;
        let interval = partition.spec().interval_secs;
        let from = start.saturating_sub(interval - 1);
        Ok(Scan::new(partition.snapshot(), from, end, filter.clone()))
    }

    /// Windowed average over `[start, end)` in buckets of `bucket_secs`.
    pub fn rollup(
        &self,
        key: &DatasetKey,
        start: i64,
        end: i64,
        bucket_secs: i64,
        filter: &ScanFilter,
    ) -> Result<Vec<RollupRow>, StoreError> {
        if bucket_secs <= 0 {
            return Err(StoreError::InvalidArgument(format!(
                "bucket must be positive, got {}",
                bucket_secs
            )));
        }
        let interval = self.spec(key)?.interval_secs;
        let scan = self.scan_overlapping(key, start, end, filter)?;
        Ok(rollup_records(scan.keep_last(), interval, start, end, bucket_secs))
    }

    pub fn watermark(&self, key: &DatasetKey) -> Result<Option<i64>, StoreError> {
        Ok(self.snapshot(key)?.watermark)
    }

    /// Advance the watermark to `max(current, timestamp)`; returns the
    /// effective value.
    pub fn advance_watermark(&self, key: &DatasetKey, timestamp: i64) -> Result<i64, StoreError> {
        Ok(self.partition(key)?.advance_watermark(timestamp)?)
    }

    /// `(first_timestamp, last_timestamp + interval)` of stored data.
    pub fn date_range(&self, key: &DatasetKey) -> Result<Option<(i64, i64)>, StoreError> {
        let partition = self.partition(key)?;
        let snapshot = partition.snapshot();
        let interval = partition.spec().interval_secs;
        Ok(snapshot
            .min_timestamp
            .zip(snapshot.max_timestamp)
            .map(|(first, last)| (first, last + interval)))
    }

    pub fn record_count(&self, key: &DatasetKey) -> Result<usize, StoreError> {
        Ok(self.snapshot(key)?.record_count)
    }

    /// Greatest stored record timestamp, whether or not the watermark has
    /// caught up with it.
    pub fn max_timestamp(&self, key: &DatasetKey) -> Result<Option<i64>, StoreError> {
        Ok(self.snapshot(key)?.max_timestamp)
    }

    pub fn datasets(&self) -> Vec<DatasetSpec> {
        let partitions = self.partitions.read().unwrap_or_else(|e| e.into_inner());
        partitions.values().map(|p| p.spec().clone()).collect()
    }

    pub fn datasets_for(&self, source: &SourceId) -> Vec<DatasetSpec> {
        self.datasets()
            .into_iter()
            .filter(|spec| &spec.key.source == source)
            .collect()
    }
}

fn dataset_dir(root: &Path, key: &DatasetKey) -> PathBuf {
    root.join(key.source.as_str()).join(key.resolution.as_str())
}

fn discover_manifests(root: &Path) -> io::Result<Vec<PathBuf>> {
    let mut found = Vec::new();
    for source in fs::read_dir(root)? {
        let source = source?;
        if !source.file_type()?.is_dir() {
            continue;
        }
        for resolution in Resolution::all() {
            let manifest = source.path().join(resolution.as_str()).join(MANIFEST_FILE);
            if manifest.exists() {
                found.push(manifest);
            }
        }
    }
    found.sort();
    Ok(found)
}

// ── Tests ───────────────────────────────────────────────────────────
