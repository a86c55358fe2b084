//! Query service facade
//!
//! One `QueryService` is built at startup and shared by every request
//! handler. It plans each request, keys the cache on the plan fingerprint and
//! runs cache misses on the blocking pool.

use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

use crate::cache::{CacheConfig, CacheStats, ResultCache};
use crate::engine::{DateRange, QueryEngine};
use crate::error::QueryError;
use crate::planner::QueryFingerprint;
use crate::request::AggregateRequest;
use crate::table::AggregateTable;
use types::ids::SourceId;

pub type AggregateCache = ResultCache<QueryFingerprint, AggregateTable, QueryError>;

pub struct QueryService {
    engine: Arc<QueryEngine>,
    cache: AggregateCache,
    ttl: Duration,
}

impl QueryService {
    pub fn new(engine: Arc<QueryEngine>, config: CacheConfig) -> Self {
        let ttl = config.ttl();
        info!(
            ttl_ms = config.ttl_ms,
            max_entries = config.max_entries,
            "Query service ready"
        );
        Self {
            engine,
            cache: ResultCache::new(config),
            ttl,
        }
    }

    pub fn engine(&self) -> &Arc<QueryEngine> {
        &self.engine
    }

    pub fn cache(&self) -> &AggregateCache {
        &self.cache
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    pub async fn query_aggregate(
        &self,
        request: &AggregateRequest,
    ) -> Result<Arc<AggregateTable>, QueryError> {
        let plan = self.engine.plan(request)?;
        if plan.is_empty_window() {
            return Ok(Arc::new(AggregateTable::empty(&plan)));
        }

        let fingerprint = plan.fingerprint();
        debug!(fingerprint = %fingerprint.digest(), "Aggregate query");
        let engine = Arc::clone(&self.engine);
        self.cache
            .get_or_compute(fingerprint, self.ttl, move || async move {
                tokio::task::spawn_blocking(move || engine.execute(&plan)).await?
            })
            .await
    }

    pub fn date_range(&self, source: &SourceId) -> Result<DateRange, QueryError> {
        self.engine.date_range(source)
    }

    /// Drop cached results for one source.
    pub fn invalidate_source(&self, source: &SourceId) -> usize {
        self.cache.invalidate_where(|key| &key.source == source)
    }
}
