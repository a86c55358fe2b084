//! Range scans over a published partition snapshot.
//!
//! A `Scan` owns the `Arc` snapshot it was created from, so appends that
//! publish after the scan started are invisible to it and nothing it yields
//! can be torn.
//!
//! `Scan::keep_last` resolves duplicate `(timestamp, entity)` rows. Only
//! segments whose timestamp ranges intersect can share a key, so they are
//! grouped and resolved one group at a time.

use crate::partition::PartitionSnapshot;
use crate::rollup::dedup_keep_last;
use std::collections::BTreeSet;
use std::sync::Arc;
use types::ids::EntityId;
use types::record::RawRecord;

/// Row filter applied during a scan.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScanFilter {
    /// Restrict to these entities; `None` keeps every entity.
    pub entities: Option<BTreeSet<EntityId>>,
}

impl ScanFilter {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn entities<I, E>(entities: I) -> Self
    where
        I: IntoIterator<Item = E>,
        E: Into<EntityId>,
    {
        Self {
            entities: Some(entities.into_iter().map(Into::into).collect()),
        }
    }

    pub fn matches(&self, record: &RawRecord) -> bool {
        match &self.entities {
            Some(set) => set.contains(&record.entity_id),
            None => true,
        }
    }
}

/// Iterator over records with `start <= timestamp < end`, in ingestion order
/// (segment index, then row order inside the segment).
pub struct Scan {
    snapshot: Arc<PartitionSnapshot>,
    start: i64,
    end: i64,
    filter: ScanFilter,
    next_segment: usize,
    current: usize,
    row: usize,
    row_end: usize,
}

impl Scan {
    pub(crate) fn new(
        snapshot: Arc<PartitionSnapshot>,
        start: i64,
        end: i64,
        filter: ScanFilter,
    ) -> Self {
        Self {
            snapshot,
            start,
            end,
            filter,
            next_segment: 0,
            current: 0,
            row: 0,
            row_end: 0,
        }
    }

    /// Move to the next segment whose timestamp range overlaps the window.
    fn advance_segment(&mut self) -> bool {
        if self.start >= self.end {
            return false;
        }
        while self.next_segment < self.snapshot.segments.len() {
            let idx = self.next_segment;
            self.next_segment += 1;

            if !self.snapshot.segments[idx].overlaps(self.start, self.end) {
                continue;
            }
            let (row, row_end) = self.row_bounds(idx);
            self.current = idx;
            self.row = row;
            self.row_end = row_end;
            if self.row < self.row_end {
                return true;
            }
        }
        false
    }

    /// Row range of segment `idx` inside the window.
    fn row_bounds(&self, idx: usize) -> (usize, usize) {
        let (start, end) = (self.start, self.end);
        let records = &self.snapshot.segments[idx].records;
        (
            records.partition_point(|r| r.timestamp < start),
            records.partition_point(|r| r.timestamp < end),
        )
    }

    fn rows_in(&self, idx: usize) -> impl Iterator<Item = &RawRecord> + '_ {
        let (row, row_end) = self.row_bounds(idx);
        self.snapshot.segments[idx].records[row..row_end]
            .iter()
            .filter(move |record| self.filter.matches(record))
    }

    /// Resolve duplicate `(timestamp, entity)` rows, keeping the one
    /// ingested last.
    pub fn keep_last(self) -> KeepLast {
        let groups = overlap_groups(&self.snapshot, self.start, self.end);
        KeepLast {
            scan: self,
            groups: groups.into_iter(),
            buffer: Vec::new().into_iter(),
            max_buffered: 0,
        }
    }
}

/// Segment positions touching `[start, end)`, grouped so that segments whose
/// `[min, max]` timestamp ranges intersect, directly or through a chain, land
/// in the same group. Groups come out by ascending time; members keep
/// ingestion order.
fn overlap_groups(snapshot: &PartitionSnapshot, start: i64, end: i64) -> Vec<Vec<usize>> {
    if start >= end {
        return Vec::new();
    }
    let mut selected: Vec<usize> = (0..snapshot.segments.len())
        .filter(|&idx| snapshot.segments[idx].overlaps(start, end))
        .collect();
    selected.sort_by_key(|&idx| (snapshot.segments[idx].header.min_timestamp, idx));

    let mut groups: Vec<Vec<usize>> = Vec::new();
    let mut reach = i64::MIN;
    for idx in selected {
        let header = &snapshot.segments[idx].header;
        match groups.last_mut() {
            Some(group) if header.min_timestamp <= reach => {
                group.push(idx);
                reach = reach.max(header.max_timestamp);
            }
            _ => {
                groups.push(vec![idx]);
                reach = header.max_timestamp;
            }
        }
    }
    for group in &mut groups {
        group.sort_unstable();
    }
    groups
}

/// Deduplicated view of a `Scan`; see `Scan::keep_last`.
///
/// Holds at most one group of overlapping segments in memory at a time.
pub struct KeepLast {
    scan: Scan,
    groups: std::vec::IntoIter<Vec<usize>>,
    buffer: std::vec::IntoIter<RawRecord>,
    max_buffered: usize,
}

impl KeepLast {
    /// Largest number of rows held at once so far.
    pub fn max_buffered(&self) -> usize {
        self.max_buffered
    }
}

impl Iterator for KeepLast {
    type Item = RawRecord;

    fn next(&mut self) -> Option<RawRecord> {
        loop {
            if let Some(record) = self.buffer.next() {
                return Some(record);
            }
            let group = self.groups.next()?;
            let scan = &self.scan;
            let resolved = dedup_keep_last(
                group
                    .iter()
                    .flat_map(|&idx| scan.rows_in(idx))
                    .cloned(),
            );
            self.max_buffered = self.max_buffered.max(resolved.len());
            self.buffer = resolved.into_iter();
        }
    }
}

impl Iterator for Scan {
    type Item = RawRecord;

    fn next(&mut self) -> Option<RawRecord> {
        loop {
            while self.row < self.row_end {
                let record = &self.snapshot.segments[self.current].records[self.row];
                self.row += 1;
                if self.filter.matches(record) {
                    return Some(record.clone());
                }
            }
            if !self.advance_segment() {
                return None;
            }
        }
    }
}
