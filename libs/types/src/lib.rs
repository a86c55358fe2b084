//! Types library for the gridwatch pipeline
//!
//! Shared definitions used by the store, the collectors, the query engine
//! and the gateway.
//!
//! # Modules
//! - `ids`: Identifiers (SourceId, EntityId, DatasetKey)
//! - `resolution`: Fine/coarse sampling resolutions
//! - `record`: Raw instantaneous-rate samples
//! - `dimension`: Entity → category reference rows
//! - `time`: Interval and bucket arithmetic
//! - `errors`: Ingestion-boundary error taxonomy

pub mod dimension;
pub mod errors;
pub mod ids;
pub mod record;
pub mod resolution;
pub mod time;
