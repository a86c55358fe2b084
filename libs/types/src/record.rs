//! Raw time-series records
//!
//! A `RawRecord` is one instantaneous-rate sample for one entity. Records are
//! immutable once appended to a dataset.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::ids::EntityId;
use crate::time::rate_to_quantity;

/// One sample of an instantaneous rate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawRecord {
    /// Interval start, Unix seconds (UTC)
    pub timestamp: i64,
    /// Entity the sample belongs to
    pub entity_id: EntityId,
    /// Instantaneous rate (units per hour); may be negative for
    /// bidirectional quantities
    pub value: f64,
    /// Source-specific extra columns, kept verbatim.
    /// BTreeMap keeps the encoded form deterministic.
    pub attributes: BTreeMap<String, String>,
}

impl RawRecord {
    pub fn new(timestamp: i64, entity_id: impl Into<EntityId>, value: f64) -> Self {
        Self {
            timestamp,
            entity_id: entity_id.into(),
            value,
            attributes: BTreeMap::new(),
        }
    }

    /// Attach a source-specific attribute.
    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }

    /// End of the interval this sample covers.
    pub fn end(&self, interval_secs: i64) -> i64 {
        self.timestamp + interval_secs
    }

    /// Quantity over the full sample interval (`value × interval_hours`).
    pub fn quantity(&self, interval_secs: i64) -> f64 {
        rate_to_quantity(self.value, interval_secs)
    }

    /// Deduplication key: one sample per entity per interval.
    pub fn key(&self) -> (i64, &EntityId) {
        (self.timestamp, &self.entity_id)
    }
}
