//! Aggregate query integration tests
//!
//! Runs the engine and the cached service against a real on-disk store:
//! cross-resolution totals, the bidirectional split, empty windows and
//! cache behaviour under concurrency and TTL expiry.

use query_engine::{
    AggregateRequest, CacheConfig, DimensionTable, Filters, GroupDimension, PlanPath,
    Planner, PlannerConfig, QueryEngine, QueryError, QueryService, ResolutionChoice, TimeBucket,
};
use persistence::{DatasetSpec, FsyncPolicy, StoreConfig, TimeSeriesStore};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use types::dimension::DimensionRecord;
use types::ids::{DatasetKey, SourceId};
use types::record::RawRecord;
use types::time::SECONDS_PER_DAY;

const DAY0: i64 = 19_000 * SECONDS_PER_DAY;

struct Fixture {
    _tmp: TempDir,
    store: Arc<TimeSeriesStore>,
    engine: Arc<QueryEngine>,
}

fn fixture(fine_interval: i64, coarse_interval: i64) -> Fixture {
    let tmp = TempDir::new().unwrap();
    let store = Arc::new(
        TimeSeriesStore::open(StoreConfig::new(tmp.path()).with_fsync(FsyncPolicy::Never)).unwrap(),
    );
    store
        .register(DatasetSpec::new(DatasetKey::fine(source()), fine_interval))
        .unwrap();
    store
        .register(DatasetSpec::new(DatasetKey::coarse(source()), coarse_interval))
        .unwrap();
    let dims = DimensionTable::from_records(vec![
        DimensionRecord::new("WIND1", "Wind"),
        DimensionRecord::new("BAT1", "Battery"),
    ]);
    let engine = Arc::new(QueryEngine::new(
        Arc::clone(&store),
        Arc::new(dims),
        Planner::new(PlannerConfig::default()),
    ));
    Fixture {
        _tmp: tmp,
        store,
        engine,
    }
}

fn source() -> SourceId {
    SourceId::new("nem")
}

fn constant(start: i64, count: i64, interval: i64, entity: &str, rate: f64) -> Vec<RawRecord> {
    (0..count)
        .map(|i| RawRecord::new(start + i * interval, entity, rate))
        .collect()
}

fn close(a: f64, b: f64) -> bool {
    (a - b).abs() <= 1e-6 * b.abs().max(1.0)
}

#[test]
fn test_fine_and_coarse_report_the_same_daily_total() {
    let f = fixture(300, 1_800);
    f.store
        .append(&DatasetKey::fine(source()), constant(DAY0, 288, 300, "WIND1", 100.0))
        .unwrap();
    f.store
        .append(&DatasetKey::coarse(source()), constant(DAY0, 48, 1_800, "WIND1", 100.0))
        .unwrap();

    let daily = |resolution| {
        AggregateRequest::new("nem", DAY0, DAY0 + SECONDS_PER_DAY)
            .group_by(GroupDimension::Time(TimeBucket::Day))
            .resolution(resolution)
    };

    let fine = f.engine.query_aggregate(&daily(ResolutionChoice::Fine)).unwrap();
    let coarse = f.engine.query_aggregate(&daily(ResolutionChoice::Coarse)).unwrap();

    assert_eq!(fine.path, PlanPath::RawScan);
    assert_eq!(coarse.path, PlanPath::Rollup);
    assert!(close(fine.total_net(), 2_400.0), "fine total {}", fine.total_net());
    assert!(close(coarse.total_net(), 2_400.0), "coarse total {}", coarse.total_net());
    assert!(close(fine.rows[0].mean_rate, coarse.rows[0].mean_rate));
    assert!(fine.rows[0].complete && coarse.rows[0].complete);
}

#[test]
fn test_auto_resolution_totals_agree_across_threshold() {
    let f = fixture(300, 1_800);
    let days = 10;
    f.store
        .append(
            &DatasetKey::fine(source()),
            constant(DAY0, 288 * days, 300, "WIND1", 100.0),
        )
        .unwrap();
    f.store
        .append(
            &DatasetKey::coarse(source()),
            constant(DAY0, 48 * days, 1_800, "WIND1", 100.0),
        )
        .unwrap();

    let short = f
        .engine
        .query_aggregate(&AggregateRequest::new("nem", DAY0, DAY0 + 2 * SECONDS_PER_DAY))
        .unwrap();
    let long = f
        .engine
        .query_aggregate(&AggregateRequest::new("nem", DAY0, DAY0 + days * SECONDS_PER_DAY))
        .unwrap();

    assert_eq!(short.resolution, types::resolution::Resolution::Fine);
    assert_eq!(long.resolution, types::resolution::Resolution::Coarse);
    assert!(close(short.total_net(), 4_800.0));
    assert!(close(long.total_net(), 24_000.0));
}

#[test]
fn test_bidirectional_split() {
    let f = fixture(300, 3_600);
    let mut records = constant(DAY0, 5, 3_600, "BAT1", 100.0);
    records.extend(constant(DAY0 + 5 * 3_600, 5, 3_600, "BAT1", -50.0));
    f.store.append(&DatasetKey::coarse(source()), records).unwrap();

    let request = AggregateRequest::new("nem", DAY0, DAY0 + 10 * 3_600)
        .resolution(ResolutionChoice::Coarse)
        .group_by(GroupDimension::Category);
    let table = f.engine.query_aggregate(&request).unwrap();

    assert_eq!(table.rows.len(), 1);
    let row = &table.rows[0];
    assert_eq!(row.category.as_deref(), Some("Battery"));
    assert!(close(row.net, 250.0));
    assert!(close(row.positive, 500.0));
    assert!(close(row.negative, -250.0));

    // Same split through the rollup path, hour by hour
    let hourly = f
        .engine
        .query_aggregate(&request.clone().group_by(GroupDimension::Time(TimeBucket::Hour)))
        .unwrap();
    assert_eq!(hourly.path, PlanPath::Rollup);
    assert_eq!(hourly.rows.len(), 10);
    assert!(close(hourly.total_positive(), 500.0));
    assert!(close(hourly.total_negative(), -250.0));
}

#[test]
fn test_empty_window_returns_declared_schema() {
    let f = fixture(300, 1_800);
    f.store
        .append(&DatasetKey::fine(source()), constant(DAY0, 12, 300, "WIND1", 1.0))
        .unwrap();

    let request = AggregateRequest::new("nem", DAY0 + 600, DAY0 + 600)
        .group_by(GroupDimension::Time(TimeBucket::Hour))
        .group_by(GroupDimension::Entity);
    let table = f.engine.query_aggregate(&request).unwrap();

    assert!(table.is_empty());
    assert_eq!(
        table.column_names(),
        vec![
            "bucket_start",
            "entity_id",
            "net",
            "positive",
            "negative",
            "mean_rate",
            "samples",
            "coverage",
            "complete"
        ]
    );
}

#[test]
fn test_range_without_data_is_empty_not_error() {
    let f = fixture(300, 1_800);
    let table = f
        .engine
        .query_aggregate(&AggregateRequest::new("nem", DAY0, DAY0 + 3_600))
        .unwrap();
    assert!(table.is_empty());
    assert!(!table.columns.is_empty());
}

#[test]
fn test_entity_filter_and_grouping() {
    let f = fixture(300, 1_800);
    let mut records = constant(DAY0, 12, 300, "WIND1", 30.0);
    records.extend(constant(DAY0, 12, 300, "BAT1", -10.0));
    records.extend(constant(DAY0, 12, 300, "SOLAR9", 5.0));
    f.store.append(&DatasetKey::fine(source()), records).unwrap();

    let by_entity = f
        .engine
        .query_aggregate(
            &AggregateRequest::new("nem", DAY0, DAY0 + 3_600)
                .group_by(GroupDimension::Entity)
                .group_by(GroupDimension::Category),
        )
        .unwrap();
    let groups: Vec<(String, String)> = by_entity
        .rows
        .iter()
        .map(|r| {
            (
                r.category.clone().unwrap(),
                r.entity_id.as_ref().unwrap().to_string(),
            )
        })
        .collect();
    assert_eq!(
        groups,
        vec![
            ("Battery".to_string(), "BAT1".to_string()),
            ("Unknown".to_string(), "SOLAR9".to_string()),
            ("Wind".to_string(), "WIND1".to_string()),
        ]
    );

    let filtered = f
        .engine
        .query_aggregate(
            &AggregateRequest::new("nem", DAY0, DAY0 + 3_600)
                .filters(Filters::default().with_entities(["WIND1"])),
        )
        .unwrap();
    assert!(close(filtered.total_net(), 30.0));
}

#[test]
fn test_full_i64_window_aggregates_everything() {
    let f = fixture(300, 1_800);
    f.store
        .append(&DatasetKey::coarse(source()), constant(DAY0, 48, 1_800, "WIND1", 100.0))
        .unwrap();

    let table = f
        .engine
        .query_aggregate(&AggregateRequest::new("nem", i64::MIN, i64::MAX))
        .unwrap();
    assert!(close(table.total_net(), 2_400.0));
    assert!(!table.rows[0].complete);

    let hourly = f
        .engine
        .query_aggregate(
            &AggregateRequest::new("nem", -1, i64::MAX)
                .group_by(GroupDimension::Time(TimeBucket::Hour)),
        )
        .unwrap();
    assert_eq!(hourly.path, PlanPath::Rollup);
    assert_eq!(hourly.rows.len(), 24);
    assert!(close(hourly.total_net(), 2_400.0));
}

#[test]
fn test_restated_rows_keep_last_on_both_paths() {
    let f = fixture(300, 1_800);
    let coarse = DatasetKey::coarse(source());
    f.store.append(&coarse, constant(DAY0, 48, 1_800, "WIND1", 100.0)).unwrap();
    f.store.append(&coarse, constant(DAY0, 2, 1_800, "WIND1", 40.0)).unwrap();

    let request = AggregateRequest::new("nem", DAY0, DAY0 + SECONDS_PER_DAY)
        .resolution(ResolutionChoice::Coarse);
    let raw = f.engine.query_aggregate(&request).unwrap();
    assert_eq!(raw.path, PlanPath::RawScan);
    assert_eq!(raw.rows[0].samples, 48);
    assert!(close(raw.total_net(), 2_340.0));

    let hourly = f
        .engine
        .query_aggregate(&request.group_by(GroupDimension::Time(TimeBucket::Hour)))
        .unwrap();
    assert_eq!(hourly.path, PlanPath::Rollup);
    assert!(close(hourly.rows[0].mean_rate, 40.0));
    assert!(close(hourly.total_net(), 2_340.0));
}

#[test]
fn test_explicit_fine_rejects_long_ranges() {
    let f = fixture(300, 1_800);
    let err = f
        .engine
        .query_aggregate(
            &AggregateRequest::new("nem", DAY0, DAY0 + 30 * SECONDS_PER_DAY)
                .resolution(ResolutionChoice::Fine),
        )
        .unwrap_err();
    assert!(matches!(err, QueryError::FineRangeTooLarge { .. }));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_identical_concurrent_queries_execute_once() {
    let f = fixture(300, 1_800);
    f.store
        .append(&DatasetKey::fine(source()), constant(DAY0, 288, 300, "WIND1", 100.0))
        .unwrap();
    let service = Arc::new(QueryService::new(Arc::clone(&f.engine), CacheConfig::default()));

    let mut tasks = Vec::new();
    for i in 0..16 {
        let service = Arc::clone(&service);
        // Same logical query: filter spelled differently, Auto vs Fine
        let resolution = if i % 2 == 0 {
            ResolutionChoice::Auto
        } else {
            ResolutionChoice::Fine
        };
        tasks.push(tokio::spawn(async move {
            service
                .query_aggregate(
                    &AggregateRequest::new("nem", DAY0, DAY0 + SECONDS_PER_DAY)
                        .resolution(resolution)
                        .filters(Filters::default().with_entities(["WIND1", "WIND1"])),
                )
                .await
        }));
    }

    let mut tables = Vec::new();
    for task in tasks {
        tables.push(task.await.unwrap().unwrap());
    }
    assert_eq!(f.engine.executions(), 1);
    assert!(tables.iter().all(|t| Arc::ptr_eq(t, &tables[0])));
    assert!(close(tables[0].total_net(), 2_400.0));
}

#[tokio::test(start_paused = true)]
async fn test_cached_result_expires_after_ttl() {
    let f = fixture(300, 1_800);
    f.store
        .append(&DatasetKey::fine(source()), constant(DAY0, 12, 300, "WIND1", 10.0))
        .unwrap();
    let service = QueryService::new(
        Arc::clone(&f.engine),
        CacheConfig {
            ttl_ms: 300_000,
            max_entries: 64,
        },
    );
    let request = AggregateRequest::new("nem", DAY0, DAY0 + 3_600);

    service.query_aggregate(&request).await.unwrap();
    assert_eq!(f.engine.executions(), 1);

    tokio::time::advance(Duration::from_secs(299)).await;
    service.query_aggregate(&request).await.unwrap();
    assert_eq!(f.engine.executions(), 1);

    tokio::time::advance(Duration::from_secs(2)).await;
    service.query_aggregate(&request).await.unwrap();
    assert_eq!(f.engine.executions(), 2);
    assert_eq!(service.cache_stats().misses, 2);
}

#[tokio::test]
async fn test_failed_queries_are_not_cached() {
    let f = fixture(300, 1_800);
    let service = QueryService::new(Arc::clone(&f.engine), CacheConfig::default());

    let unknown = service
        .query_aggregate(&AggregateRequest::new("other", DAY0, DAY0 + 60))
        .await;
    assert!(matches!(unknown, Err(QueryError::UnknownSource(_))));
    assert!(service.cache().is_empty());

    service
        .query_aggregate(&AggregateRequest::new("nem", DAY0, DAY0 + 3_600))
        .await
        .unwrap();
    assert_eq!(service.cache().len(), 1);
    assert_eq!(service.invalidate_source(&source()), 1);
    assert!(service.cache().is_empty());
}
