//! Aggregate request model
//!
//! Requests are plain serde structs so the gateway can decode them straight
//! from query parameters or JSON.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use types::ids::{EntityId, SourceId};
use types::time::{SECONDS_PER_DAY, SECONDS_PER_HOUR};

/// Time bucketing for a `Time` group dimension.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TimeBucket {
    /// The dataset's own sampling interval
    Native,
    Hour,
    Day,
}

impl TimeBucket {
    pub fn bucket_secs(&self, interval_secs: i64) -> i64 {
        match self {
            TimeBucket::Native => interval_secs,
            TimeBucket::Hour => SECONDS_PER_HOUR,
            TimeBucket::Day => SECONDS_PER_DAY,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GroupDimension {
    Time(TimeBucket),
    Category,
    Entity,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResolutionChoice {
    #[default]
    Auto,
    Fine,
    Coarse,
}

/// Row filters. An empty set means "no restriction".
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Filters {
    pub entities: BTreeSet<EntityId>,
    pub categories: BTreeSet<String>,
}

impl Filters {
    pub fn is_empty(&self) -> bool {
        self.entities.is_empty() && self.categories.is_empty()
    }

    pub fn with_entities<I, E>(mut self, entities: I) -> Self
    where
        I: IntoIterator<Item = E>,
        E: Into<EntityId>,
    {
        self.entities.extend(entities.into_iter().map(Into::into));
        self
    }

    pub fn with_categories<I, S>(mut self, categories: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.categories.extend(categories.into_iter().map(Into::into));
        self
    }
}

/// `QueryAggregate(start, end, groupBy, filters, resolution)` for one source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AggregateRequest {
    pub source: SourceId,
    /// Inclusive window start (Unix seconds)
    pub start: i64,
    /// Exclusive window end (Unix seconds)
    pub end: i64,
    #[serde(default)]
    pub group_by: Vec<GroupDimension>,
    #[serde(default)]
    pub filters: Filters,
    #[serde(default)]
    pub resolution: ResolutionChoice,
}

impl AggregateRequest {
    pub fn new(source: impl Into<SourceId>, start: i64, end: i64) -> Self {
        Self {
            source: source.into(),
            start,
            end,
            group_by: Vec::new(),
            filters: Filters::default(),
            resolution: ResolutionChoice::Auto,
        }
    }

    pub fn group_by(mut self, dimension: GroupDimension) -> Self {
        self.group_by.push(dimension);
        self
    }

    pub fn filters(mut self, filters: Filters) -> Self {
        self.filters = filters;
        self
    }

    pub fn resolution(mut self, resolution: ResolutionChoice) -> Self {
        self.resolution = resolution;
        self
    }
}
