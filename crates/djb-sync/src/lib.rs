//! Ingestion orchestration for DJB: configuration, the sync engine, the
//! duplicate-cleanup job and the per-invocation pipeline.

use std::sync::Arc;

use anyhow::{Context, Result};
use djb_storage::{JobStore, PgJobStore};

pub mod config;
pub mod engine;
pub mod pipeline;

pub use config::{SourceConfig, SourceRegistry, SyncConfig};
pub use engine::{
    normalize_key_fragment, plan_cleanup, CleanupReport, DedupKey, DuplicateCleanup, SyncAborted, SyncCounts,
    SyncEngine,
};
pub use pipeline::{IngestPipeline, RunReport, RunSelection, RunTotals, SourceReport, SourceStatus};

pub const CRATE_NAME: &str = "djb-sync";

/// Postgres store for `DATABASE_URL`.
pub async fn connect_store(config: &SyncConfig) -> Result<Arc<PgJobStore>> {
    let url = config
        .database_url
        .as_deref()
        .context("DATABASE_URL is not set")?;
    let store = PgJobStore::connect(url)
        .await
        .context("connecting to DATABASE_URL")?;
    Ok(Arc::new(store))
}

pub async fn build_pipeline(config: SyncConfig, store: Arc<dyn JobStore>) -> Result<IngestPipeline> {
    let registry = SourceRegistry::load(&config.registry_path()).await?;
    IngestPipeline::new(config, registry, store)
}

pub async fn run_sync_once_from_env(selection: RunSelection) -> Result<RunReport> {
    let config = SyncConfig::from_env();
    let store = connect_store(&config).await?;
    let pipeline = build_pipeline(config, store).await?;
    Ok(pipeline.run(selection).await)
}
