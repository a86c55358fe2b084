//! One dataset partition: `<root>/<source>/<resolution>/`.
//!
//! Readers take the current `Arc<PartitionSnapshot>` under a short read lock
//! and then work lock-free. The single writer path serialises on `writer`,
//! writes a new segment to disk and only then swaps in a new snapshot that
//! shares every existing segment by `Arc`.

use crate::recovery::{recover_dataset, RecoveryMetrics};
use crate::segment::{write_segment, FsyncPolicy, Segment, SegmentError};
use crate::watermark::Watermark;
use serde::{Deserialize, Serialize};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, RwLock};
use tracing::debug;
use types::ids::DatasetKey;
use types::record::RawRecord;

/// Identity and sampling interval of a dataset.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DatasetSpec {
    pub key: DatasetKey,
    pub interval_secs: i64,
}

impl DatasetSpec {
    pub fn new(key: DatasetKey, interval_secs: i64) -> Self {
        Self { key, interval_secs }
    }
}

/// Immutable view of a partition at one point in time.
#[derive(Debug, Default)]
pub struct PartitionSnapshot {
    pub segments: Vec<Arc<Segment>>,
    pub watermark: Option<i64>,
    pub record_count: usize,
    pub min_timestamp: Option<i64>,
    pub max_timestamp: Option<i64>,
}

impl PartitionSnapshot {
    pub fn from_segments(segments: Vec<Arc<Segment>>, watermark: Option<i64>) -> Self {
        let record_count = segments.iter().map(|s| s.len()).sum();
        let min_timestamp = segments.iter().map(|s| s.header.min_timestamp).min();
        let max_timestamp = segments.iter().map(|s| s.header.max_timestamp).max();
        Self {
            segments,
            watermark,
            record_count,
            min_timestamp,
            max_timestamp,
        }
    }

    fn with_segment(&self, segment: Arc<Segment>) -> Self {
        let mut segments = self.segments.clone();
        segments.push(segment);
        Self::from_segments(segments, self.watermark)
    }

    fn with_watermark(&self, watermark: Option<i64>) -> Self {
        Self {
            segments: self.segments.clone(),
            watermark,
            record_count: self.record_count,
            min_timestamp: self.min_timestamp,
            max_timestamp: self.max_timestamp,
        }
    }
}

struct WriterState {
    next_index: u64,
    watermark: Watermark,
}

pub struct Partition {
    spec: DatasetSpec,
    dir: PathBuf,
    fsync: FsyncPolicy,
    snapshot: RwLock<Arc<PartitionSnapshot>>,
    writer: Mutex<WriterState>,
}

impl Partition {
    /// Recover the partition directory and publish its first snapshot.
    pub fn open(
        dir: &Path,
        spec: DatasetSpec,
        fsync: FsyncPolicy,
    ) -> io::Result<(Self, RecoveryMetrics)> {
        let recovered = recover_dataset(dir, fsync)?;
        let snapshot = PartitionSnapshot::from_segments(recovered.segments, recovered.watermark.get());
        let partition = Self {
            spec,
            dir: dir.to_path_buf(),
            fsync,
            snapshot: RwLock::new(Arc::new(snapshot)),
            writer: Mutex::new(WriterState {
                next_index: recovered.next_index,
                watermark: recovered.watermark,
            }),
        };
        Ok((partition, recovered.metrics))
    }

    pub fn spec(&self) -> &DatasetSpec {
        &self.spec
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn snapshot(&self) -> Arc<PartitionSnapshot> {
        let guard = self.snapshot.read().unwrap_or_else(|e| e.into_inner());
        Arc::clone(&*guard)
    }

    fn publish(&self, next: PartitionSnapshot) {
        let mut guard = self.snapshot.write().unwrap_or_else(|e| e.into_inner());
        *guard = Arc::new(next);
    }

    fn lock_writer(&self) -> MutexGuard<'_, WriterState> {
        self.writer.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Persist `records` as one new segment and publish it.
    pub fn append(&self, records: Vec<RawRecord>) -> Result<usize, SegmentError> {
        if records.is_empty() {
            return Ok(0);
        }
        let mut writer = self.lock_writer();
        let index = writer.next_index;
        let segment = write_segment(&self.dir, index, records, self.fsync)?;
        writer.next_index += 1;

        let count = segment.len();
        debug!(
            dataset = %self.spec.key,
            segment = index,
            records = count,
            min_ts = segment.header.min_timestamp,
            max_ts = segment.header.max_timestamp,
            "Segment committed"
        );

        let next = self.snapshot().with_segment(Arc::new(segment));
        self.publish(next);
        Ok(count)
    }

    /// Advance the watermark to `max(current, timestamp)`.
    pub fn advance_watermark(&self, timestamp: i64) -> io::Result<i64> {
        let mut writer = self.lock_writer();
        let before = writer.watermark.get();
        let effective = writer.watermark.advance(timestamp)?;
        if before != Some(effective) {
            let next = self.snapshot().with_watermark(Some(effective));
            self.publish(next);
        }
        Ok(effective)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;
    use types::ids::SourceId;

    fn open(dir: &Path) -> Partition {
        let spec = DatasetSpec::new(DatasetKey::fine(SourceId::new("grid")), 300);
        Partition::open(dir, spec, FsyncPolicy::Never).unwrap().0
    }

    #[test]
    fn test_append_publishes_new_snapshot() {
        let tmp = TempDir::new().unwrap();
        let p = open(tmp.path());
        let before = p.snapshot();

        p.append(vec![RawRecord::new(0, "U1", 1.0), RawRecord::new(300, "U1", 2.0)])
            .unwrap();

        let after = p.snapshot();
        assert_eq!(before.record_count, 0);
        assert_eq!(after.record_count, 2);
        assert_eq!(after.min_timestamp, Some(0));
        assert_eq!(after.max_timestamp, Some(300));
    }

    #[test]
    fn test_empty_append_writes_nothing() {
        let tmp = TempDir::new().unwrap();
        let p = open(tmp.path());
        assert_eq!(p.append(Vec::new()).unwrap(), 0);
        assert!(p.snapshot().segments.is_empty());
    }

    #[test]
    fn test_watermark_visible_in_snapshot() {
        let tmp = TempDir::new().unwrap();
        let p = open(tmp.path());
        p.advance_watermark(600).unwrap();
        assert_eq!(p.advance_watermark(300).unwrap(), 600);
        assert_eq!(p.snapshot().watermark, Some(600));
    }

    #[test]
    fn test_segment_indices_continue_after_reopen() {
        let tmp = TempDir::new().unwrap();
        {
            let p = open(tmp.path());
            p.append(vec![RawRecord::new(0, "U1", 1.0)]).unwrap();
        }
        let p = open(tmp.path());
        p.append(vec![RawRecord::new(300, "U1", 1.0)]).unwrap();
        let indices: Vec<u64> = p.snapshot().segments.iter().map(|s| s.index).collect();
        assert_eq!(indices, vec![1, 2]);
    }
}
