use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use axum::http::StatusCode;
use axum::routing::get;
use axum::Router;
use djb_core::{Category, JobSource, NormalizedJob, SourceGroup};
use djb_storage::{DedupRow, InsertOutcome, JobStore, MemoryJobStore, StoreError};
use djb_sync::{IngestPipeline, RunSelection, SourceRegistry, SourceStatus, SyncConfig};

async fn serve(router: Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("addr");
    tokio::spawn(async move {
        axum::serve(listener, router).await.expect("serve");
    });
    format!("http://{addr}")
}

/// Loses its database connection after one successful insert.
#[derive(Default)]
struct OneInsertStore {
    inner: MemoryJobStore,
    inserts: AtomicUsize,
}

#[async_trait]
impl JobStore for OneInsertStore {
    async fn exists_by_id(&self, id: &str) -> Result<bool, StoreError> {
        self.inner.exists_by_id(id).await
    }

    async fn find_id_by_apply_url(&self, apply_url: &str) -> Result<Option<String>, StoreError> {
        self.inner.find_id_by_apply_url(apply_url).await
    }

    async fn insert_if_absent(&self, job: &NormalizedJob) -> Result<InsertOutcome, StoreError> {
        if self.inserts.fetch_add(1, Ordering::SeqCst) > 0 {
            return Err(StoreError::Database(sqlx::Error::PoolClosed));
        }
        self.inner.insert_if_absent(job).await
    }

    async fn delete_by_ids(&self, ids: &[String]) -> Result<u64, StoreError> {
        self.inner.delete_by_ids(ids).await
    }

    async fn count(&self) -> Result<u64, StoreError> {
        self.inner.count().await
    }

    async fn count_by_source(&self) -> Result<BTreeMap<String, u64>, StoreError> {
        self.inner.count_by_source().await
    }

    async fn list_dedup_rows(&self) -> Result<Vec<DedupRow>, StoreError> {
        self.inner.list_dedup_rows().await
    }
}

fn remotive_fixture() -> String {
    let path = Path::new(env!("CARGO_MANIFEST_DIR")).join("../../fixtures/remotive/remote-jobs.json");
    std::fs::read_to_string(path).expect("fixture")
}

async fn upstream() -> String {
    let body = remotive_fixture();
    let router = Router::new()
        .route(
            "/api/remote-jobs",
            get(move || {
                let body = body.clone();
                async move { ([("content-type", "application/json")], body) }
            }),
        )
        .route(
            "/v1/boards/broken/jobs",
            get(|| async { (StatusCode::INTERNAL_SERVER_ERROR, "board offline") }),
        );
    serve(router).await
}

fn registry(base: &str) -> SourceRegistry {
    SourceRegistry::from_yaml(&format!(
        r#"
sources:
  - source: remotive
    display_name: Remotive
    enabled: true
    group: api
    crawlability: public_api
    base_url: {base}
  - source: jsearch
    display_name: JSearch
    enabled: true
    group: api
    crawlability: keyed_api
  - source: greenhouse
    display_name: Greenhouse
    enabled: true
    group: ats
    crawlability: ats_feed
    base_url: {base}
    boards: [broken]
  - source: lever
    display_name: Lever
    enabled: false
    group: ats
    crawlability: ats_feed
"#
    ))
    .expect("registry")
}

fn config() -> SyncConfig {
    let vars: HashMap<&str, &str> = [("DJB_REQUEST_DELAY_MS", "0"), ("DJB_HTTP_TIMEOUT_SECS", "5")]
        .into_iter()
        .collect();
    SyncConfig::from_lookup(|name| vars.get(name).map(|v| v.to_string()))
}

fn selection() -> RunSelection {
    RunSelection {
        category: Category::Product,
        ..RunSelection::default()
    }
}

#[tokio::test]
async fn run_reports_each_source_and_is_idempotent() {
    let base = upstream().await;
    let store = Arc::new(MemoryJobStore::new());
    let pipeline = IngestPipeline::new(config(), registry(&base), store.clone()).expect("pipeline");

    let report = pipeline.run(selection()).await;
    let statuses: Vec<(JobSource, SourceStatus)> = report.sources.iter().map(|s| (s.source, s.status)).collect();
    assert_eq!(
        statuses,
        vec![
            (JobSource::Remotive, SourceStatus::Ok),
            (JobSource::Jsearch, SourceStatus::Skipped),
            (JobSource::Greenhouse, SourceStatus::Failed),
            (JobSource::Lever, SourceStatus::Skipped),
        ]
    );
    assert!(!report.success);

    let remotive = &report.sources[0];
    assert_eq!((remotive.fetched, remotive.classified), (3, 2));
    assert_eq!((remotive.inserted, remotive.skipped), (2, 0));
    assert!(report.sources[1].error.as_deref().is_some_and(|e| e.contains("JSEARCH_API_KEY")));
    assert_eq!(report.sources[2].failures.len(), 1);
    assert_eq!(report.totals.inserted, 2);
    assert_eq!(report.totals.failed_sources, 1);
    assert_eq!(store.count().await.expect("count"), 2);

    let again = pipeline.run(selection()).await;
    assert_eq!((again.sources[0].inserted, again.sources[0].skipped), (0, 2));
    assert_eq!(store.count().await.expect("count"), 2);
}

#[tokio::test]
async fn group_selection_limits_the_run() {
    let base = upstream().await;
    let store = Arc::new(MemoryJobStore::new());
    let pipeline = IngestPipeline::new(config(), registry(&base), store).expect("pipeline");

    let report = pipeline
        .run(RunSelection {
            group: Some(SourceGroup::Api),
            source: Some(JobSource::Remotive),
            ..selection()
        })
        .await;
    assert!(report.success);
    assert_eq!(report.sources.len(), 1);
    assert_eq!(report.totals.inserted, 2);

    let json = serde_json::to_value(&report).expect("report json");
    assert_eq!(json["sources"][0]["status"], "ok");
    assert_eq!(json["selection"]["category"], "product");
}

#[tokio::test]
async fn store_failure_reports_rows_written_before_it() {
    let base = upstream().await;
    let store = Arc::new(OneInsertStore::default());
    let pipeline = IngestPipeline::new(config(), registry(&base), store.clone()).expect("pipeline");

    let report = pipeline
        .run(RunSelection {
            source: Some(JobSource::Remotive),
            ..selection()
        })
        .await;
    let remotive = &report.sources[0];
    assert_eq!(remotive.status, SourceStatus::Failed);
    assert_eq!((remotive.inserted, remotive.skipped), (1, 0));
    assert!(remotive.error.as_deref().is_some_and(|e| e.starts_with("sync: database error")));
    assert_eq!(report.totals.inserted, 1);
    assert!(!report.success);
    assert_eq!(store.count().await.expect("count"), 1);
}
