//! Typed aggregate result table
//!
//! Every table carries its schema, even when it has no rows, so an empty
//! window renders as an empty but correctly shaped result.

use serde::{Deserialize, Serialize};

use crate::planner::{PlanPath, QueryPlan};
use types::ids::EntityId;
use types::resolution::Resolution;

/// Rows whose coverage reaches this are reported complete.
pub const COMPLETE_COVERAGE: f64 = 1.0 - 1e-9;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ColumnType {
    Timestamp,
    Text,
    Float,
    Integer,
    Boolean,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Column {
    pub name: &'static str,
    #[serde(rename = "type")]
    pub kind: ColumnType,
}

impl Column {
    const fn new(name: &'static str, kind: ColumnType) -> Self {
        Self { name, kind }
    }
}

const METRIC_COLUMNS: [Column; 7] = [
    Column::new("net", ColumnType::Float),
    Column::new("positive", ColumnType::Float),
    Column::new("negative", ColumnType::Float),
    Column::new("mean_rate", ColumnType::Float),
    Column::new("samples", ColumnType::Integer),
    Column::new("coverage", ColumnType::Float),
    Column::new("complete", ColumnType::Boolean),
];

/// One aggregated group.
///
/// Quantities are in rate × hours. `positive` and `negative` split `net` by
/// the sign of the underlying rate (e.g. discharge vs charge).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregateRow {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bucket_start: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub entity_id: Option<EntityId>,
    pub net: f64,
    pub positive: f64,
    pub negative: f64,
    /// Interval-weighted mean rate over the covered time
    pub mean_rate: f64,
    pub samples: u64,
    /// Covered seconds over expected seconds
    pub coverage: f64,
    pub complete: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AggregateTable {
    pub columns: Vec<Column>,
    pub rows: Vec<AggregateRow>,
    pub resolution: Resolution,
    pub path: PlanPath,
    /// `[start, end)`
    pub window: (i64, i64),
}

impl AggregateTable {
    /// Empty table with the schema `plan` implies.
    pub fn empty(plan: &QueryPlan) -> Self {
        Self {
            columns: Self::schema(plan),
            rows: Vec::new(),
            resolution: plan.resolution(),
            path: plan.path,
            window: (plan.start, plan.end),
        }
    }

    pub fn schema(plan: &QueryPlan) -> Vec<Column> {
        let mut columns = Vec::with_capacity(3 + METRIC_COLUMNS.len());
        if plan.time_bucket.is_some() {
            columns.push(Column::new("bucket_start", ColumnType::Timestamp));
        }
        if plan.group_by_category {
            columns.push(Column::new("category", ColumnType::Text));
        }
        if plan.group_by_entity {
            columns.push(Column::new("entity_id", ColumnType::Text));
        }
        columns.extend(METRIC_COLUMNS.iter().cloned());
        columns
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn column_names(&self) -> Vec<&'static str> {
        self.columns.iter().map(|c| c.name).collect()
    }

    pub fn total_net(&self) -> f64 {
        self.rows.iter().map(|r| r.net).sum()
    }

    pub fn total_positive(&self) -> f64 {
        self.rows.iter().map(|r| r.positive).sum()
    }

    pub fn total_negative(&self) -> f64 {
        self.rows.iter().map(|r| r.negative).sum()
    }
}
