//! Resolution planner
//!
//! Picks the dataset a request is answered from and how:
//! - `Auto` uses fine data for spans up to `fine_max_range_secs`, coarse
//!   data beyond that
//! - explicit `Fine` is honoured only up to `live_max_range_secs`
//! - coarse requests bucketed by hour or day use the store rollup, so
//!   long ranges never ship raw rows out of the store

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::error::QueryError;
use crate::request::{AggregateRequest, Filters, GroupDimension, ResolutionChoice, TimeBucket};
use persistence::TimeSeriesStore;
use types::ids::{DatasetKey, SourceId};
use types::resolution::Resolution;
use types::time::SECONDS_PER_DAY;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlannerConfig {
    /// Longest span `Auto` answers from fine data.
    pub fine_max_range_secs: i64,
    /// Longest span an explicit `Fine` request may cover. Defaults to
    /// `fine_max_range_secs`.
    pub live_max_range_secs: Option<i64>,
}

impl Default for PlannerConfig {
    fn default() -> Self {
        Self {
            fine_max_range_secs: 7 * SECONDS_PER_DAY,
            live_max_range_secs: None,
        }
    }
}

impl PlannerConfig {
    pub fn live_max_range(&self) -> i64 {
        self.live_max_range_secs.unwrap_or(self.fine_max_range_secs)
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.fine_max_range_secs <= 0 {
            return Err("planner.fine_max_range_secs must be positive".to_string());
        }
        if matches!(self.live_max_range_secs, Some(v) if v <= 0) {
            return Err("planner.live_max_range_secs must be positive".to_string());
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanPath {
    /// Stream raw rows and aggregate in the engine
    RawScan,
    /// Use the store's server-side windowed average
    Rollup,
}

/// A request resolved against the store's datasets.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryPlan {
    pub dataset: DatasetKey,
    pub interval_secs: i64,
    pub start: i64,
    pub end: i64,
    pub path: PlanPath,
    /// Bucket width when grouping by time
    pub bucket_secs: Option<i64>,
    pub time_bucket: Option<TimeBucket>,
    pub group_by_category: bool,
    pub group_by_entity: bool,
    pub filters: Filters,
}

impl QueryPlan {
    pub fn source(&self) -> &SourceId {
        &self.dataset.source
    }

    pub fn resolution(&self) -> Resolution {
        self.dataset.resolution
    }

    pub fn is_empty_window(&self) -> bool {
        self.start >= self.end
    }

    /// Cache key. Built from the resolved plan so requests that differ only
    /// in filter order, group order or `Auto` vs the resolution it picked
    /// share one entry.
    pub fn fingerprint(&self) -> QueryFingerprint {
        let mut group_by = Vec::new();
        if let Some(bucket) = self.time_bucket {
            group_by.push(GroupDimension::Time(bucket));
        }
        if self.group_by_category {
            group_by.push(GroupDimension::Category);
        }
        if self.group_by_entity {
            group_by.push(GroupDimension::Entity);
        }
        QueryFingerprint {
            source: self.dataset.source.clone(),
            start: self.start,
            end: self.end,
            resolution: self.dataset.resolution,
            path: self.path,
            filters: self.filters.clone(),
            group_by,
        }
    }
}

/// Deterministic cache key of a planned query.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct QueryFingerprint {
    pub source: SourceId,
    pub start: i64,
    pub end: i64,
    pub resolution: Resolution,
    pub path: PlanPath,
    pub filters: Filters,
    pub group_by: Vec<GroupDimension>,
}

impl QueryFingerprint {
    /// SHA-256 hex digest, for logs and response headers.
    pub fn digest(&self) -> String {
        let canonical = serde_json::to_vec(self).unwrap_or_default();
        let hash = Sha256::digest(&canonical);
        hash.iter().map(|b| format!("{:02x}", b)).collect()
    }
}

#[derive(Debug, Clone, Default)]
pub struct Planner {
    config: PlannerConfig,
}

impl Planner {
    pub fn new(config: PlannerConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &PlannerConfig {
        &self.config
    }

    pub fn plan(
        &self,
        request: &AggregateRequest,
        store: &TimeSeriesStore,
    ) -> Result<QueryPlan, QueryError> {
        if request.start > request.end {
            return Err(QueryError::InvalidRange {
                start: request.start,
                end: request.end,
            });
        }
        // Saturates for windows wider than i64 can express.
        let span = request.end.saturating_sub(request.start);

        let mut time_bucket = None;
        let mut group_by_category = false;
        let mut group_by_entity = false;
        for dim in &request.group_by {
            match dim {
                GroupDimension::Time(bucket) => {
                    if time_bucket.is_some_and(|b| b != *bucket) {
                        return Err(QueryError::InvalidRequest(
                            "at most one time bucket may be requested".to_string(),
                        ));
                    }
                    time_bucket = Some(*bucket);
                }
                GroupDimension::Category => group_by_category = true,
                GroupDimension::Entity => group_by_entity = true,
            }
        }

        let available: Vec<Resolution> = store
            .datasets_for(&request.source)
            .into_iter()
            .map(|spec| spec.key.resolution)
            .collect();
        if available.is_empty() {
            return Err(QueryError::UnknownSource(request.source.clone()));
        }

        let resolution = match request.resolution {
            ResolutionChoice::Fine => {
                let max = self.config.live_max_range();
                if span > max {
                    return Err(QueryError::FineRangeTooLarge {
                        span_secs: span,
                        max_secs: max,
                    });
                }
                Resolution::Fine
            }
            ResolutionChoice::Coarse => Resolution::Coarse,
            ResolutionChoice::Auto => {
                let preferred = if span <= self.config.fine_max_range_secs {
                    Resolution::Fine
                } else {
                    Resolution::Coarse
                };
                // Fall back to fine only for spans it is allowed to serve.
                if available.contains(&preferred) {
                    preferred
                } else if preferred == Resolution::Fine {
                    Resolution::Coarse
                } else {
                    return Err(QueryError::FineRangeTooLarge {
                        span_secs: span,
                        max_secs: self.config.fine_max_range_secs,
                    });
                }
            }
        };
        if !available.contains(&resolution) {
            return Err(QueryError::UnknownSource(request.source.clone()));
        }

        let dataset = DatasetKey::new(request.source.clone(), resolution);
        let interval_secs = store.spec(&dataset)?.interval_secs;
        let bucket_secs = time_bucket.map(|b| b.bucket_secs(interval_secs));

        let path = match (resolution, time_bucket) {
            (Resolution::Coarse, Some(TimeBucket::Hour | TimeBucket::Day)) => PlanPath::Rollup,
            _ => PlanPath::RawScan,
        };

        let plan = QueryPlan {
            dataset,
            interval_secs,
            start: request.start,
            end: request.end,
            path,
            bucket_secs,
            time_bucket,
            group_by_category,
            group_by_entity,
            filters: request.filters.clone(),
        };
        debug!(
            dataset = %plan.dataset,
            span_secs = span,
            path = ?plan.path,
            bucket_secs = ?plan.bucket_secs,
            "Query planned"
        );
        Ok(plan)
    }
}
