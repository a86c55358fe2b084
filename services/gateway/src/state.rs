use crate::config::AppConfig;
use anyhow::Context;
use collector::directory::DirectorySource;
use collector::{Scheduler, SourceCollector, StatusRegistry};
use persistence::TimeSeriesStore;
use query_engine::{DimensionTable, Planner, QueryEngine, QueryService};
use std::sync::Arc;
use tracing::info;

/// Process-wide services, built once at startup and cloned into handlers.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<TimeSeriesStore>,
    pub queries: Arc<QueryService>,
    pub status: Arc<StatusRegistry>,
    pub scheduler: Arc<Scheduler>,
}

impl AppState {
    pub fn build(config: &AppConfig) -> anyhow::Result<Self> {
        let store = Arc::new(
            TimeSeriesStore::open(config.store.clone()).with_context(|| {
                format!("opening store at {}", config.store.root.display())
            })?,
        );

        let dimensions = match &config.dimensions_path {
            Some(path) => DimensionTable::load_json(path)
                .with_context(|| format!("loading dimensions from {}", path.display()))?,
            None => DimensionTable::new(),
        };
        let engine = Arc::new(QueryEngine::new(
            Arc::clone(&store),
            Arc::new(dimensions),
            Planner::new(config.planner.clone()),
        ));
        let queries = Arc::new(QueryService::new(engine, config.cache.clone()));

        let status = Arc::new(StatusRegistry::new());
        let mut scheduler = Scheduler::new(config.scheduler.clone(), Arc::clone(&status))?;
        for source in &config.sources {
            let upstream = Arc::new(DirectorySource::new(
                source.name.clone(),
                source.directory.clone(),
            ));
            let retry = source.retry.clone().unwrap_or_else(|| config.retry.clone());
            let collector = SourceCollector::new(upstream, source.dataset(), Arc::clone(&store), retry)
                .with_context(|| format!("creating collector {}", source.name))?;
            scheduler.add(Arc::new(collector))?;
            info!(
                collector = %source.name,
                dataset = %source.dataset().key,
                dir = %source.directory.dir.display(),
                "Collector registered"
            );
        }

        Ok(Self {
            store,
            queries,
            status,
            scheduler: Arc::new(scheduler),
        })
    }
}
