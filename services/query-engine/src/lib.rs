//! Aggregate Query Engine
//!
//! Answers `QueryAggregate` requests over the time-series store: the planner
//! picks a resolution and execution path, the engine integrates rates over
//! the window with dimension enrichment, and `QueryService` fronts it with a
//! TTL + single-flight result cache.

pub mod cache;
pub mod dimension;
pub mod engine;
pub mod error;
pub mod planner;
pub mod request;
pub mod service;
pub mod table;

pub use cache::{CacheConfig, CacheStats, ResultCache};
pub use dimension::DimensionTable;
pub use engine::{DateRange, QueryEngine, ResolutionRange};
pub use error::QueryError;
pub use planner::{PlanPath, Planner, PlannerConfig, QueryFingerprint, QueryPlan};
pub use request::{AggregateRequest, Filters, GroupDimension, ResolutionChoice, TimeBucket};
pub use service::{AggregateCache, QueryService};
pub use table::{AggregateRow, AggregateTable, Column, ColumnType};
