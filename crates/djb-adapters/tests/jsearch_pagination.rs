use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use chrono::{TimeZone, Utc};
use djb_adapters::jsearch::JsearchAdapter;
use djb_adapters::{adapter_for_source, AdapterContext, AdapterError, RunBudget, SourceAdapter, SourceSettings};
use djb_core::{Category, JobSource};
use djb_storage::{BackoffPolicy, HttpClientConfig, HttpFetcher};
use serde_json::{json, Value};

struct Upstream {
    pages: HashMap<u32, Value>,
}

impl Upstream {
    fn job(&self, id: &str) -> Option<Value> {
        self.pages
            .values()
            .filter_map(|page| page["data"].as_array())
            .flatten()
            .find(|job| job["job_id"] == id)
            .cloned()
    }
}

fn fixture_page() -> Value {
    let path = Path::new(env!("CARGO_MANIFEST_DIR"))
        .join("../../fixtures/jsearch/search-page.json");
    let body = std::fs::read_to_string(&path).expect("fixture");
    serde_json::from_str(&body).expect("fixture json")
}

fn upstream() -> Upstream {
    let mut pages = HashMap::new();
    pages.insert(1, fixture_page());
    pages.insert(
        2,
        json!({"status": "OK", "data": [
            {"job_id": "jsx-p2-a", "employer_name": "Quill", "job_title": "Product Designer II",
             "job_description": "Checkout flows.", "job_is_remote": true,
             "job_apply_link": "https://quill.test/jobs/1",
             "job_posted_at_datetime_utc": "2024-02-24T08:00:00.000Z"},
            {"job_id": "jsx-ux-hourly", "employer_name": "Cobalt Health", "job_title": "UX Designer (Contract)"}
        ]}),
    );
    pages.insert(
        4,
        json!({"status": "OK", "data": [
            {"job_id": "jsx-p4-a", "employer_name": "Parcel", "job_title": "Senior Product Designer",
             "job_description": "Search-level summary.", "job_is_remote": true,
             "job_apply_link": "https://parcel.test/jobs/9",
             "job_posted_at_datetime_utc": "2024-02-20T08:00:00.000Z"}
        ]}),
    );
    pages.insert(5, json!({"status": "OK", "data": []}));
    Upstream { pages }
}

async fn search(State(up): State<Arc<Upstream>>, Query(params): Query<HashMap<String, String>>) -> Response {
    let page: u32 = params.get("page").and_then(|p| p.parse().ok()).unwrap_or(1);
    match up.pages.get(&page) {
        Some(body) => Json(body.clone()).into_response(),
        None => (StatusCode::INTERNAL_SERVER_ERROR, "upstream exploded").into_response(),
    }
}

async fn details(State(up): State<Arc<Upstream>>, Query(params): Query<HashMap<String, String>>) -> Response {
    let id = params.get("job_id").cloned().unwrap_or_default();
    if id == "jsx-p4-a" {
        return (StatusCode::BAD_GATEWAY, "detail unavailable").into_response();
    }
    match up.job(&id) {
        Some(mut job) => {
            let summary = job["job_description"].as_str().unwrap_or_default().to_string();
            job["job_description"] = Value::String(format!("Full description: {summary}"));
            Json(json!({"status": "OK", "data": [job]})).into_response()
        }
        None => Json(json!({"status": "OK", "data": []})).into_response(),
    }
}

async fn serve(router: Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("addr");
    tokio::spawn(async move {
        axum::serve(listener, router).await.expect("serve");
    });
    format!("http://{addr}")
}

fn fetcher() -> HttpFetcher {
    HttpFetcher::new(HttpClientConfig {
        timeout: Duration::from_secs(5),
        user_agent: None,
        backoff: BackoffPolicy::none(),
    })
    .expect("fetcher")
}

fn context() -> AdapterContext {
    let fetched_at = Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).single().expect("ts");
    let mut ctx = AdapterContext::new(fetched_at, RunBudget::new(Duration::from_secs(30)));
    ctx.category = Category::Product;
    ctx.request_delay = Duration::ZERO;
    ctx
}

#[tokio::test]
async fn failed_page_is_skipped_and_pagination_continues() {
    let router = Router::new()
        .route("/search", get(search))
        .route("/job-details", get(details))
        .with_state(Arc::new(upstream()));
    let base = serve(router).await;

    let adapter = JsearchAdapter::new(Some("test-key".to_string()), Some(base)).with_pages_per_query(5);
    let output = adapter.fetch(&fetcher(), &context()).await.expect("adapter never raises");

    // Page 3 failed; pages 4 and 5 were still requested.
    assert_eq!(output.failures.len(), 2, "{:?}", output.failures);
    assert!(output.failures.iter().any(|f| f.contains("page 3")));
    assert!(output.failures.iter().any(|f| f.starts_with("job-details jsx-p4-a")));

    // The overlapping id on page 2 is only counted once.
    assert_eq!(output.fetched, 6);
    assert_eq!(output.classified, 5);
    let ids: Vec<&str> = output.jobs.iter().map(|j| j.id.as_str()).collect();
    assert_eq!(
        ids,
        vec![
            "jsearch-jsx-ux-hourly",
            "jsearch-jsx-visual-monthly",
            "jsearch-jsx-product-yearly",
            "jsearch-jsx-p2-a",
            "jsearch-jsx-p4-a",
        ]
    );

    let detailed = &output.jobs[0];
    assert!(detailed.description.starts_with("Full description:"));
    let fallback = output.jobs.iter().find(|j| j.id == "jsearch-jsx-p4-a").expect("p4 job");
    assert_eq!(fallback.description, "Search-level summary.");
}

#[tokio::test]
async fn detail_cap_limits_second_phase_calls() {
    let router = Router::new()
        .route("/search", get(search))
        .route("/job-details", get(details))
        .with_state(Arc::new(upstream()));
    let base = serve(router).await;

    let mut ctx = context();
    ctx.detail_fetch_cap = 1;
    let adapter = JsearchAdapter::new(Some("test-key".to_string()), Some(base)).with_pages_per_query(5);
    let output = adapter.fetch(&fetcher(), &ctx).await.expect("output");

    let full = output
        .jobs
        .iter()
        .filter(|j| j.description.starts_with("Full description:"))
        .count();
    assert_eq!(full, 1);
    assert_eq!(output.jobs.len(), 5);
    assert_eq!(output.failures.len(), 1);
}

#[tokio::test]
async fn missing_api_key_is_not_configured() {
    let adapter = adapter_for_source(JobSource::Jsearch, SourceSettings::default());
    let err = adapter.fetch(&fetcher(), &context()).await.unwrap_err();
    assert!(matches!(
        err,
        AdapterError::NotConfigured {
            job_source: JobSource::Jsearch,
            ..
        }
    ));
}
