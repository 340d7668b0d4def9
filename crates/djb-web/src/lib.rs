//! Axum trigger surface for DJB: the scheduler calls these endpoints, each
//! call runs one batch and answers with the JSON report.

use std::str::FromStr;
use std::sync::Arc;

use anyhow::Context;
use axum::{
    extract::{Query, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use djb_adapters::ScrapeMode;
use djb_core::{Category, JobSource, Region, SourceGroup, UnknownVariant};
use djb_storage::JobStore;
use djb_sync::{build_pipeline, connect_store, DedupKey, DuplicateCleanup, IngestPipeline, RunSelection, SyncConfig};
use serde::Deserialize;
use serde_json::json;
use sha2::{Digest, Sha256};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

pub const CRATE_NAME: &str = "djb-web";

#[derive(Clone)]
pub struct AppState {
    pipeline: Arc<IngestPipeline>,
    cleanup: DuplicateCleanup,
    store: Arc<dyn JobStore>,
    secret_digest: Option<[u8; 32]>,
}

impl AppState {
    /// Without a secret every trigger call is rejected.
    pub fn new(pipeline: IngestPipeline, store: Arc<dyn JobStore>, cron_secret: Option<&str>) -> Self {
        Self {
            pipeline: Arc::new(pipeline),
            cleanup: DuplicateCleanup::new(store.clone()),
            store,
            secret_digest: cron_secret.map(digest),
        }
    }

    fn authorized(&self, headers: &HeaderMap) -> bool {
        let Some(expected) = self.secret_digest else {
            return false;
        };
        headers
            .get(header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "))
            .is_some_and(|token| digest(token.trim()) == expected)
    }
}

fn digest(value: &str) -> [u8; 32] {
    Sha256::digest(value.as_bytes()).into()
}

#[derive(Debug, Default, Deserialize)]
struct IngestQuery {
    source: Option<String>,
    group: Option<String>,
    region: Option<String>,
    category: Option<String>,
    mode: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct DedupeQuery {
    key: Option<String>,
    dry_run: Option<String>,
}

/// A query value outside its closed set.
#[derive(Debug)]
struct BadParam(UnknownVariant);

impl IntoResponse for BadParam {
    fn into_response(self) -> Response {
        (
            StatusCode::BAD_REQUEST,
            Json(json!({ "error": self.0.to_string(), "valid": self.0.valid })),
        )
            .into_response()
    }
}

fn param<T: FromStr<Err = UnknownVariant>>(raw: Option<&str>) -> Result<Option<T>, BadParam> {
    match raw.map(str::trim).filter(|v| !v.is_empty()) {
        Some(value) => value.parse().map(Some).map_err(BadParam),
        None => Ok(None),
    }
}

fn scrape_mode(raw: Option<&str>) -> Result<ScrapeMode, BadParam> {
    match raw.map(str::trim).filter(|v| !v.is_empty()) {
        Some(value) => value.parse().map_err(|_| {
            BadParam(UnknownVariant {
                kind: "mode",
                value: value.to_string(),
                valid: vec!["full", "quick"],
            })
        }),
        None => Ok(ScrapeMode::default()),
    }
}

fn flag(raw: Option<&str>) -> Result<bool, BadParam> {
    match raw.map(|v| v.trim().to_ascii_lowercase()).as_deref() {
        None | Some("") | Some("false") | Some("0") => Ok(false),
        Some("true") | Some("1") => Ok(true),
        Some(other) => Err(BadParam(UnknownVariant {
            kind: "dry_run",
            value: other.to_string(),
            valid: vec!["true", "false"],
        })),
    }
}

impl IngestQuery {
    fn selection(&self) -> Result<RunSelection, BadParam> {
        Ok(RunSelection {
            source: param::<JobSource>(self.source.as_deref())?,
            group: param::<SourceGroup>(self.group.as_deref())?,
            region: param::<Region>(self.region.as_deref())?.unwrap_or_default(),
            category: param::<Category>(self.category.as_deref())?.unwrap_or_default(),
            mode: scrape_mode(self.mode.as_deref())?,
        })
    }
}

fn unauthorized() -> Response {
    (StatusCode::UNAUTHORIZED, Json(json!({ "error": "unauthorized" }))).into_response()
}

pub fn app(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/api/cron/ingest", get(ingest_handler).post(ingest_handler))
        .route("/api/cron/dedupe", get(dedupe_handler).post(dedupe_handler))
        .with_state(Arc::new(state))
}

async fn health_handler(State(state): State<Arc<AppState>>) -> Response {
    let counts = match state.store.count().await {
        Ok(jobs) => state.store.count_by_source().await.map(|by_source| (jobs, by_source)),
        Err(err) => Err(err),
    };
    match counts {
        Ok((jobs, by_source)) => Json(json!({ "status": "ok", "jobs": jobs, "by_source": by_source })).into_response(),
        Err(err) => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({ "status": "degraded", "error": err.to_string() })),
        )
            .into_response(),
    }
}

async fn ingest_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(query): Query<IngestQuery>,
) -> Response {
    if !state.authorized(&headers) {
        warn!(endpoint = "ingest", "rejected trigger call");
        return unauthorized();
    }
    let selection = match query.selection() {
        Ok(selection) => selection,
        Err(bad) => return bad.into_response(),
    };
    let report = state.pipeline.run(selection).await;
    Json(report).into_response()
}

async fn dedupe_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(query): Query<DedupeQuery>,
) -> Response {
    if !state.authorized(&headers) {
        warn!(endpoint = "dedupe", "rejected trigger call");
        return unauthorized();
    }
    let parsed = param::<DedupKey>(query.key.as_deref()).and_then(|key| Ok((key, flag(query.dry_run.as_deref())?)));
    let (key, dry_run) = match parsed {
        Ok((key, dry_run)) => (key.unwrap_or(DedupKey::ApplyUrl), dry_run),
        Err(bad) => return bad.into_response(),
    };
    match state.cleanup.run(key, dry_run).await {
        Ok(report) => Json(report).into_response(),
        Err(err) => {
            warn!(%key, error = %err, "duplicate cleanup failed");
            (
                StatusCode::OK,
                Json(json!({ "success": false, "key": key, "dry_run": dry_run, "error": err.to_string() })),
            )
                .into_response()
        }
    }
}

pub async fn serve(config: SyncConfig) -> anyhow::Result<()> {
    let port = config.web_port;
    let secret = config.cron_secret.clone();
    if secret.is_none() {
        warn!("CRON_SECRET is not set; every trigger call will be rejected");
    }
    let store = connect_store(&config).await?;
    store.migrate().await.context("running migrations")?;

    let shutdown = CancellationToken::new();
    let pipeline = build_pipeline(config, store.clone())
        .await?
        .with_cancellation(shutdown.clone());
    let state = AppState::new(pipeline, store, secret.as_deref());

    let listener = TcpListener::bind(("0.0.0.0", port))
        .await
        .with_context(|| format!("binding port {port}"))?;
    info!(port, "trigger server listening");
    axum::serve(listener, app(state))
        .with_graceful_shutdown(async move {
            let _ = tokio::signal::ctrl_c().await;
            info!("shutting down; cancelling in-flight runs");
            shutdown.cancel();
        })
        .await?;
    Ok(())
}

pub async fn serve_from_env() -> anyhow::Result<()> {
    serve(SyncConfig::from_env()).await
}
