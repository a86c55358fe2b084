//! Aggregation engine
//!
//! Executes a `QueryPlan` against the store. Rows are enriched with their
//! category one at a time through the dimension table, so memory follows the
//! number of result groups rather than the number of scanned rows.
//!
//! Every sample contributes `rate × overlap_seconds` to its group, where the
//! overlap is taken between the sample interval `[t, t + I)` and the group's
//! window. Summing samples without weighting would make totals depend on the
//! sampling interval.

use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::debug;

use crate::dimension::DimensionTable;
use crate::error::QueryError;
use crate::planner::{PlanPath, Planner, QueryPlan};
use crate::request::AggregateRequest;
use crate::table::{AggregateRow, AggregateTable, COMPLETE_COVERAGE};
use persistence::{ScanFilter, TimeSeriesStore};
use types::ids::{DatasetKey, EntityId, SourceId};
use types::resolution::Resolution;
use types::time::{overlap, split_into_buckets, SECONDS_PER_HOUR};

/// `(bucket_start, category, entity)`; absent parts are not grouped on.
type GroupKey = (Option<i64>, Option<String>, Option<EntityId>);

#[derive(Debug, Default)]
struct Accumulator {
    rate_seconds: f64,
    positive: f64,
    negative: f64,
    covered_secs: i64,
    samples: u64,
}

impl Accumulator {
    fn add(&mut self, positive: f64, negative: f64, covered_secs: i64, samples: u64) {
        self.rate_seconds += positive + negative;
        self.positive += positive;
        self.negative += negative;
        self.covered_secs += covered_secs;
        self.samples += samples;
    }
}

#[derive(Default)]
struct Grouping {
    cells: BTreeMap<GroupKey, Accumulator>,
    /// Entities seen per non-time group, across all buckets
    entities: HashMap<(Option<String>, Option<EntityId>), BTreeSet<EntityId>>,
}

impl Grouping {
    #[allow(clippy::too_many_arguments)]
    fn add(
        &mut self,
        plan: &QueryPlan,
        bucket: Option<i64>,
        category: &str,
        entity: &EntityId,
        positive: f64,
        negative: f64,
        covered_secs: i64,
        samples: u64,
    ) {
        let category = plan.group_by_category.then(|| category.to_string());
        let entity_key = plan.group_by_entity.then(|| entity.clone());
        self.entities
            .entry((category.clone(), entity_key.clone()))
            .or_default()
            .insert(entity.clone());
        self.cells
            .entry((bucket, category, entity_key))
            .or_default()
            .add(positive, negative, covered_secs, samples);
    }
}

/// First and last covered instants of one dataset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ResolutionRange {
    pub start: i64,
    pub end: i64,
}

/// `GetDateRange(source)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DateRange {
    pub source: SourceId,
    pub start: Option<i64>,
    pub end: Option<i64>,
    pub resolutions: BTreeMap<Resolution, ResolutionRange>,
}

pub struct QueryEngine {
    store: Arc<TimeSeriesStore>,
    dimensions: Arc<DimensionTable>,
    planner: Planner,
    executions: AtomicU64,
}

impl QueryEngine {
    pub fn new(store: Arc<TimeSeriesStore>, dimensions: Arc<DimensionTable>, planner: Planner) -> Self {
        Self {
            store,
            dimensions,
            planner,
            executions: AtomicU64::new(0),
        }
    }

    pub fn store(&self) -> &Arc<TimeSeriesStore> {
        &self.store
    }

    pub fn dimensions(&self) -> &DimensionTable {
        &self.dimensions
    }

    /// Number of plans executed so far.
    pub fn executions(&self) -> u64 {
        self.executions.load(Ordering::Relaxed)
    }

    pub fn plan(&self, request: &AggregateRequest) -> Result<QueryPlan, QueryError> {
        self.planner.plan(request, &self.store)
    }

    pub fn query_aggregate(&self, request: &AggregateRequest) -> Result<AggregateTable, QueryError> {
        let plan = self.plan(request)?;
        self.execute(&plan)
    }

    pub fn execute(&self, plan: &QueryPlan) -> Result<AggregateTable, QueryError> {
        self.executions.fetch_add(1, Ordering::Relaxed);
        let mut table = AggregateTable::empty(plan);
        if plan.is_empty_window() {
            return Ok(table);
        }

        let filter = ScanFilter {
            entities: (!plan.filters.entities.is_empty()).then(|| plan.filters.entities.clone()),
        };
        let mut grouping = Grouping::default();
        let mut scanned = 0usize;

        match plan.path {
            PlanPath::RawScan => {
                let scan = self
                    .store
                    .scan_overlapping(&plan.dataset, plan.start, plan.end, &filter)?;
                for record in scan.keep_last() {
                    scanned += 1;
                    let category = self.dimensions.category(&record.entity_id);
                    if !category_selected(plan, category) {
                        continue;
                    }
                    let pieces: Vec<(Option<i64>, i64)> = match plan.bucket_secs {
                        Some(bucket_secs) => split_into_buckets(
                            record.timestamp,
                            plan.interval_secs,
                            bucket_secs,
                            plan.start,
                            plan.end,
                        )
                        .into_iter()
                        .map(|(bucket, secs)| (Some(bucket), secs))
                        .collect(),
                        None => {
                            let secs = overlap(
                                record.timestamp,
                                record.end(plan.interval_secs),
                                plan.start,
                                plan.end,
                            );
                            if secs > 0 {
                                vec![(None, secs)]
                            } else {
                                Vec::new()
                            }
                        }
                    };
                    for (bucket, secs) in pieces {
                        let contribution = record.value * secs as f64;
                        grouping.add(
                            plan,
                            bucket,
                            category,
                            &record.entity_id,
                            contribution.max(0.0),
                            contribution.min(0.0),
                            secs,
                            1,
                        );
                    }
                }
            }
            PlanPath::Rollup => {
                let bucket_secs = plan.bucket_secs.ok_or_else(|| {
                    QueryError::InvalidRequest("rollup plan without a time bucket".to_string())
                })?;
                let rows = self
                    .store
                    .rollup(&plan.dataset, plan.start, plan.end, bucket_secs, &filter)?;
                for row in rows {
                    scanned += 1;
                    let category = self.dimensions.category(&row.entity_id);
                    if !category_selected(plan, category) {
                        continue;
                    }
                    grouping.add(
                        plan,
                        Some(row.bucket_start),
                        category,
                        &row.entity_id,
                        row.positive_rate_seconds,
                        row.negative_rate_seconds,
                        row.covered_secs,
                        row.samples,
                    );
                }
            }
        }

        table.rows = build_rows(plan, grouping);
        debug!(
            dataset = %plan.dataset,
            path = ?plan.path,
            scanned,
            rows = table.rows.len(),
            "Query executed"
        );
        Ok(table)
    }

    /// Earliest and latest covered time across the source's datasets.
    pub fn date_range(&self, source: &SourceId) -> Result<DateRange, QueryError> {
        let specs = self.store.datasets_for(source);
        if specs.is_empty() {
            return Err(QueryError::UnknownSource(source.clone()));
        }

        let mut resolutions = BTreeMap::new();
        for spec in specs {
            let key = DatasetKey::new(source.clone(), spec.key.resolution);
            if let Some((start, end)) = self.store.date_range(&key)? {
                resolutions.insert(spec.key.resolution, ResolutionRange { start, end });
            }
        }

        Ok(DateRange {
            source: source.clone(),
            start: resolutions.values().map(|r| r.start).min(),
            end: resolutions.values().map(|r| r.end).max(),
            resolutions,
        })
    }
}

fn category_selected(plan: &QueryPlan, category: &str) -> bool {
    plan.filters.categories.is_empty() || plan.filters.categories.contains(category)
}

fn build_rows(plan: &QueryPlan, grouping: Grouping) -> Vec<AggregateRow> {
    let Grouping { cells, entities } = grouping;
    cells
        .into_iter()
        .map(|((bucket_start, category, entity_id), acc)| {
            let window_secs = match (bucket_start, plan.bucket_secs) {
                (Some(bucket), Some(width)) => {
                    overlap(bucket, bucket.saturating_add(width), plan.start, plan.end)
                }
                _ => plan.end.saturating_sub(plan.start),
            };
            let entity_count = entities
                .get(&(category.clone(), entity_id.clone()))
                .map_or(1, |set| set.len().max(1));
            let expected_secs = window_secs as f64 * entity_count as f64;
            let coverage = if expected_secs > 0.0 {
                acc.covered_secs as f64 / expected_secs
            } else {
                0.0
            };
            let hours = SECONDS_PER_HOUR as f64;
            AggregateRow {
                bucket_start,
                category,
                entity_id,
                net: acc.rate_seconds / hours,
                positive: acc.positive / hours,
                negative: acc.negative / hours,
                mean_rate: if acc.covered_secs > 0 {
                    acc.rate_seconds / acc.covered_secs as f64
                } else {
                    0.0
                },
                samples: acc.samples,
                coverage,
                complete: coverage >= COMPLETE_COVERAGE,
            }
        })
        .collect()
}
