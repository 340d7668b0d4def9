//! One invocation: run the selected adapters in order and sync each
//! adapter's output as soon as it arrives.

use std::sync::Arc;
use std::time::Instant;

use anyhow::Result;
use chrono::{DateTime, Utc};
use djb_adapters::{adapter_for_source, AdapterContext, AdapterError, RunBudget, ScrapeMode};
use djb_core::{Category, JobSource, Region, SourceGroup};
use djb_storage::{HttpFetcher, JobStore};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::config::{SourceConfig, SourceRegistry, SyncConfig};
use crate::engine::{SyncAborted, SyncCounts, SyncEngine};

/// Which batch a trigger call asked for.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RunSelection {
    pub source: Option<JobSource>,
    pub group: Option<SourceGroup>,
    pub region: Region,
    pub category: Category,
    pub mode: ScrapeMode,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceStatus {
    Ok,
    Skipped,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SourceReport {
    pub source: JobSource,
    pub status: SourceStatus,
    pub fetched: usize,
    pub classified: usize,
    pub inserted: usize,
    pub skipped: usize,
    pub failures: Vec<String>,
    pub error: Option<String>,
    pub duration_ms: u64,
}

impl SourceReport {
    fn empty(source: JobSource, status: SourceStatus, error: Option<String>) -> Self {
        Self {
            source,
            status,
            fetched: 0,
            classified: 0,
            inserted: 0,
            skipped: 0,
            failures: Vec::new(),
            error,
            duration_ms: 0,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RunTotals {
    pub fetched: usize,
    pub classified: usize,
    pub inserted: usize,
    pub skipped: usize,
    pub failed_sources: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub run_id: Uuid,
    /// False when any selected source failed outright.
    pub success: bool,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub duration_ms: u64,
    pub selection: RunSelection,
    pub totals: RunTotals,
    pub sources: Vec<SourceReport>,
}

fn totals(sources: &[SourceReport]) -> RunTotals {
    sources.iter().fold(RunTotals::default(), |mut acc, s| {
        acc.fetched += s.fetched;
        acc.classified += s.classified;
        acc.inserted += s.inserted;
        acc.skipped += s.skipped;
        if s.status == SourceStatus::Failed {
            acc.failed_sources += 1;
        }
        acc
    })
}

pub struct IngestPipeline {
    config: SyncConfig,
    registry: SourceRegistry,
    http: HttpFetcher,
    engine: SyncEngine,
    cancel: CancellationToken,
}

impl IngestPipeline {
    pub fn new(config: SyncConfig, registry: SourceRegistry, store: Arc<dyn JobStore>) -> Result<Self> {
        let http = HttpFetcher::new(config.http_config())?;
        Ok(Self {
            config,
            registry,
            http,
            engine: SyncEngine::new(store),
            cancel: CancellationToken::new(),
        })
    }

    /// Ties every run to an outer token (e.g. server shutdown).
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn registry(&self) -> &SourceRegistry {
        &self.registry
    }

    /// Never fails as a whole: every problem lands in the per-source report.
    pub async fn run(&self, selection: RunSelection) -> RunReport {
        let run_id = Uuid::new_v4();
        let started_at = Utc::now();
        let clock = Instant::now();
        let budget = RunBudget::with_token(self.config.run_budget(), self.cancel.child_token());

        let entries = self.registry.matching(&selection);
        info!(%run_id, sources = entries.len(), ?selection, "ingest run started");

        let mut sources = Vec::with_capacity(entries.len());
        for entry in entries {
            let span = info_span!("ingest_source", %run_id, source = %entry.source);
            let report = self.run_source(entry, &selection, &budget).instrument(span).await;
            sources.push(report);
        }

        let totals = totals(&sources);
        let report = RunReport {
            run_id,
            success: totals.failed_sources == 0,
            started_at,
            finished_at: Utc::now(),
            duration_ms: clock.elapsed().as_millis() as u64,
            selection,
            totals,
            sources,
        };
        info!(
            %run_id,
            success = report.success,
            inserted = totals.inserted,
            skipped = totals.skipped,
            failed_sources = totals.failed_sources,
            duration_ms = report.duration_ms,
            "ingest run finished"
        );
        report
    }

    fn context(&self, selection: &RunSelection, budget: &RunBudget) -> AdapterContext {
        let mut ctx = AdapterContext::new(Utc::now(), budget.clone());
        ctx.region = selection.region;
        ctx.category = selection.category;
        ctx.scrape_mode = selection.mode;
        ctx.request_timeout = self.config.http_config().timeout;
        ctx.request_delay = std::time::Duration::from_millis(self.config.request_delay_ms);
        ctx.detail_fetch_cap = self.config.detail_fetch_cap;
        ctx.scrape_item_cap = self.config.scrape_item_cap;
        ctx
    }

    async fn run_source(&self, entry: &SourceConfig, selection: &RunSelection, budget: &RunBudget) -> SourceReport {
        let source = entry.source;
        if !entry.enabled {
            info!(%source, "skipped: disabled in sources.yaml");
            return SourceReport::empty(source, SourceStatus::Skipped, Some("disabled".to_string()));
        }
        if budget.is_exhausted() {
            warn!(%source, "skipped: run budget exhausted");
            return SourceReport::empty(source, SourceStatus::Skipped, Some("run budget exhausted".to_string()));
        }

        let clock = Instant::now();
        let adapter = adapter_for_source(source, self.registry.settings_for(entry, &self.config));
        let ctx = self.context(selection, budget);

        let mut report = match adapter.fetch(&self.http, &ctx).await {
            Err(AdapterError::NotConfigured { reason, .. }) => {
                info!(%source, %reason, "skipped: not configured");
                SourceReport::empty(source, SourceStatus::Skipped, Some(reason))
            }
            Err(err) => {
                warn!(%source, error = %err, "adapter failed");
                SourceReport::empty(source, SourceStatus::Failed, Some(err.to_string()))
            }
            Ok(output) => {
                let mut report = SourceReport::empty(source, SourceStatus::Ok, None);
                report.fetched = output.fetched;
                report.classified = output.classified;
                report.failures = output.failures;
                if report.fetched == 0 && !report.failures.is_empty() {
                    report.status = SourceStatus::Failed;
                }
                match self.engine.sync(output.jobs).await {
                    Ok(SyncCounts { inserted, skipped }) => {
                        report.inserted = inserted;
                        report.skipped = skipped;
                    }
                    Err(SyncAborted { counts, source: err }) => {
                        warn!(%source, error = %err, inserted = counts.inserted, "sync failed");
                        report.inserted = counts.inserted;
                        report.skipped = counts.skipped;
                        report.status = SourceStatus::Failed;
                        report.error = Some(format!("sync: {err}"));
                    }
                }
                report
            }
        };
        report.duration_ms = clock.elapsed().as_millis() as u64;
        info!(
            %source,
            status = ?report.status,
            fetched = report.fetched,
            classified = report.classified,
            inserted = report.inserted,
            skipped = report.skipped,
            failures = report.failures.len(),
            "source finished"
        );
        report
    }
}
