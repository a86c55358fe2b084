//! Server-side windowed averaging.
//!
//! A rollup folds raw samples into `(bucket_start, entity)` cells without
//! shipping the rows to the caller. Each sample contributes `rate × overlap`
//! to every bucket its interval touches, clipped to the query window.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use types::ids::EntityId;
use types::record::RawRecord;
use types::time::split_into_buckets;

/// One `(bucket, entity)` cell of a rollup.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RollupRow {
    pub bucket_start: i64,
    pub entity_id: EntityId,
    /// Σ rate × overlap_seconds
    pub rate_seconds: f64,
    /// Part of `rate_seconds` from positive rates
    pub positive_rate_seconds: f64,
    /// Part of `rate_seconds` from negative rates (≤ 0)
    pub negative_rate_seconds: f64,
    /// Seconds of the bucket covered by a sample
    pub covered_secs: i64,
    pub samples: u64,
    /// `rate_seconds / covered_secs`
    pub mean_rate: f64,
}

#[derive(Default)]
struct Cell {
    rate_seconds: f64,
    positive: f64,
    negative: f64,
    covered_secs: i64,
    samples: u64,
}

/// Resolve duplicate `(timestamp, entity)` rows, keeping the last one seen.
///
/// Input must be in ingestion order. The surviving row takes the position of
/// the first occurrence.
pub fn dedup_keep_last<I>(records: I) -> Vec<RawRecord>
where
    I: IntoIterator<Item = RawRecord>,
{
    let mut out: Vec<RawRecord> = Vec::new();
    let mut seen: HashMap<(i64, EntityId), usize> = HashMap::new();
    for record in records {
        let key = (record.timestamp, record.entity_id.clone());
        match seen.get(&key) {
            Some(&idx) => out[idx] = record,
            None => {
                seen.insert(key, out.len());
                out.push(record);
            }
        }
    }
    out
}

/// Fold `records` into buckets of `bucket_secs` over `[start, end)`.
///
/// Input must hold at most one row per `(timestamp, entity)`; see
/// `Scan::keep_last`. Rows are ordered by `(bucket_start, entity_id)`.
pub fn rollup_records<I>(
    records: I,
    interval_secs: i64,
    start: i64,
    end: i64,
    bucket_secs: i64,
) -> Vec<RollupRow>
where
    I: IntoIterator<Item = RawRecord>,
{
    let mut cells: BTreeMap<(i64, EntityId), Cell> = BTreeMap::new();

    for record in records {
        for (bucket, secs) in
            split_into_buckets(record.timestamp, interval_secs, bucket_secs, start, end)
        {
            let cell = cells
                .entry((bucket, record.entity_id.clone()))
                .or_default();
            let contribution = record.value * secs as f64;
            cell.rate_seconds += contribution;
            if contribution >= 0.0 {
                cell.positive += contribution;
            } else {
                cell.negative += contribution;
            }
            cell.covered_secs += secs;
            cell.samples += 1;
        }
    }

    cells
        .into_iter()
        .map(|((bucket_start, entity_id), cell)| RollupRow {
            bucket_start,
            entity_id,
            rate_seconds: cell.rate_seconds,
            positive_rate_seconds: cell.positive,
            negative_rate_seconds: cell.negative,
            covered_secs: cell.covered_secs,
            samples: cell.samples,
            mean_rate: if cell.covered_secs > 0 {
                cell.rate_seconds / cell.covered_secs as f64
            } else {
                0.0
            },
        })
        .collect()
}
