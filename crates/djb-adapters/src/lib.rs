//! Source adapter contracts + per-source fetch/normalize implementations.

use std::collections::HashSet;
use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use djb_core::{classify, Category, JobDraft, JobSource, NormalizedJob, Region};
use djb_storage::{FetchError, FetchRequest, HttpFetcher};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

pub mod ashby;
pub mod budget;
pub mod greenhouse;
pub mod jsearch;
pub mod lever;
mod raw;
pub mod remoteok;
pub mod remotive;
pub mod scrape;

pub use budget::RunBudget;
pub use scrape::{ScrapeDriverKind, ScrapeError, ScrapeMode};

pub const CRATE_NAME: &str = "djb-adapters";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Crawlability {
    /// Documented public JSON API.
    PublicApi,
    /// API that needs a key.
    KeyedApi,
    /// Applicant-tracking-system board feed.
    AtsFeed,
    /// Rendered pages that need a browser.
    Browser,
}

#[derive(Debug, Error)]
pub enum AdapterError {
    #[error("{job_source} skipped: not configured ({reason})")]
    NotConfigured { job_source: JobSource, reason: String },
    #[error(transparent)]
    Fetch(#[from] FetchError),
    #[error("parse error: {0}")]
    Parse(String),
    #[error(transparent)]
    Scrape(#[from] ScrapeError),
}

/// A company board on an ATS host. Written in `sources.yaml` either as a
/// bare slug or as `{ slug, company }`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum BoardSpec {
    Slug(String),
    Named { slug: String, company: String },
}

impl BoardSpec {
    pub fn slug(&self) -> &str {
        match self {
            BoardSpec::Slug(slug) | BoardSpec::Named { slug, .. } => slug,
        }
    }

    /// Display company name; derived from the slug when not given.
    pub fn company(&self) -> String {
        match self {
            BoardSpec::Named { company, .. } => company.clone(),
            BoardSpec::Slug(slug) => raw::titlecase_slug(slug),
        }
    }
}

/// Per-source construction settings. Everything comes from the invocation's
/// config; adapters never read the environment themselves.
#[derive(Debug, Clone, Default)]
pub struct SourceSettings {
    pub boards: Vec<BoardSpec>,
    pub api_key: Option<String>,
    /// Overrides the upstream origin (tests point this at a local server).
    pub base_url: Option<String>,
    pub scrape_driver: ScrapeDriverKind,
}

/// Invocation-wide knobs every adapter receives.
#[derive(Debug, Clone)]
pub struct AdapterContext {
    pub fetched_at: DateTime<Utc>,
    pub region: Region,
    pub category: Category,
    pub budget: RunBudget,
    pub request_timeout: Duration,
    pub request_delay: Duration,
    pub detail_fetch_cap: usize,
    pub scrape_item_cap: usize,
    pub scrape_mode: ScrapeMode,
}

impl AdapterContext {
    pub fn new(fetched_at: DateTime<Utc>, budget: RunBudget) -> Self {
        Self {
            fetched_at,
            region: Region::default(),
            category: Category::default(),
            budget,
            request_timeout: Duration::from_secs(15),
            request_delay: Duration::from_millis(1000),
            detail_fetch_cap: 20,
            scrape_item_cap: 15,
            scrape_mode: ScrapeMode::Full,
        }
    }

    fn budgeted(&self, request: FetchRequest) -> Result<FetchRequest, FetchError> {
        if self.budget.is_exhausted() {
            return Err(FetchError::Cancelled { url: request.url });
        }
        let timeout = self.budget.request_timeout(self.request_timeout);
        Ok(request.timeout(timeout))
    }

    /// GET + decode, bounded by both the per-request timeout and the run budget.
    pub async fn get_json<T: DeserializeOwned>(
        &self,
        http: &HttpFetcher,
        source: JobSource,
        request: FetchRequest,
    ) -> Result<T, FetchError> {
        let request = self.budgeted(request)?;
        self.budget
            .guard(&request.url, http.get_json(source.as_str(), &request))
            .await
    }

    pub async fn get_text(
        &self,
        http: &HttpFetcher,
        source: JobSource,
        request: FetchRequest,
    ) -> Result<String, FetchError> {
        let request = self.budgeted(request)?;
        self.budget
            .guard(&request.url, http.get_text(source.as_str(), &request))
            .await
    }

    /// Inter-request politeness delay. Returns `false` once the budget is gone.
    pub async fn pause(&self) -> bool {
        self.budget.sleep(self.request_delay).await
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct AdapterOutput {
    pub jobs: Vec<NormalizedJob>,
    /// Unique upstream records seen this run.
    pub fetched: usize,
    /// Records the classifier accepted.
    pub classified: usize,
    pub failures: Vec<String>,
}

/// Accumulates one adapter run: seen-id dedup, classification and
/// normalization. Failures are recorded, never raised.
#[derive(Debug)]
pub struct JobCollector {
    source: JobSource,
    fetched_at: DateTime<Utc>,
    seen: HashSet<String>,
    output: AdapterOutput,
}

impl JobCollector {
    pub fn new(source: JobSource, fetched_at: DateTime<Utc>) -> Self {
        Self {
            source,
            fetched_at,
            seen: HashSet::new(),
            output: AdapterOutput::default(),
        }
    }

    pub fn source(&self) -> JobSource {
        self.source
    }

    /// Marks an upstream id as seen. Returns `false` if it already was.
    pub fn first_sighting(&mut self, upstream_id: &str) -> bool {
        let fresh = self.seen.insert(upstream_id.trim().to_string());
        if fresh {
            self.output.fetched += 1;
        }
        fresh
    }

    /// Classify and normalize a draft whose id was already sighted.
    pub fn accept(&mut self, draft: JobDraft) -> bool {
        let verdict = classify(&draft.title, &draft.tags, draft.description.as_deref());
        if !verdict.accepted {
            debug!(source = %self.source, title = %draft.title, tier = ?verdict.tier, "not a design job");
            return false;
        }
        self.output.classified += 1;
        match draft.normalize(self.source, self.fetched_at) {
            Some(job) => {
                self.output.jobs.push(job);
                true
            }
            None => false,
        }
    }

    /// `first_sighting` + `accept` for single-phase sources.
    pub fn offer(&mut self, draft: JobDraft) -> bool {
        if !self.first_sighting(&draft.upstream_id) {
            return false;
        }
        self.accept(draft)
    }

    pub fn fail(&mut self, what: impl fmt::Display, err: impl fmt::Display) {
        warn!(source = %self.source, %what, error = %err, "skipping after failure");
        self.output.failures.push(format!("{what}: {err}"));
    }

    pub fn job_count(&self) -> usize {
        self.output.jobs.len()
    }

    pub fn finish(self) -> AdapterOutput {
        self.output
    }
}

#[async_trait]
pub trait SourceAdapter: Send + Sync {
    fn source(&self) -> JobSource;
    fn crawlability(&self) -> Crawlability;

    /// Fetch, classify and normalize. Only `NotConfigured` is returned as an
    /// error; everything else lands in `AdapterOutput::failures`.
    async fn fetch(&self, http: &HttpFetcher, ctx: &AdapterContext) -> Result<AdapterOutput, AdapterError>;
}

pub fn adapter_for_source(source: JobSource, settings: SourceSettings) -> Box<dyn SourceAdapter> {
    match source {
        JobSource::Remotive => Box::new(remotive::RemotiveAdapter::new(settings.base_url)),
        JobSource::RemoteOk => Box::new(remoteok::RemoteOkAdapter::new(settings.base_url)),
        JobSource::Jsearch => Box::new(jsearch::JsearchAdapter::new(settings.api_key, settings.base_url)),
        JobSource::Greenhouse => Box::new(greenhouse::GreenhouseAdapter::new(settings.boards, settings.base_url)),
        JobSource::Lever => Box::new(lever::LeverAdapter::new(settings.boards, settings.base_url)),
        JobSource::Ashby => Box::new(ashby::AshbyAdapter::new(settings.boards, settings.base_url)),
        JobSource::Dribbble => Box::new(scrape::ScrapeAdapter::new(
            scrape::sites::dribbble(settings.base_url.as_deref()),
            settings.scrape_driver,
        )),
        JobSource::Coroflot => Box::new(scrape::ScrapeAdapter::new(
            scrape::sites::coroflot(settings.base_url.as_deref()),
            settings.scrape_driver,
        )),
    }
}

/// Shared guard for board-driven ATS adapters.
fn require_boards(source: JobSource, boards: &[BoardSpec]) -> Result<(), AdapterError> {
    if boards.is_empty() {
        return Err(AdapterError::NotConfigured {
            job_source: source,
            reason: "no boards listed in sources.yaml".to_string(),
        });
    }
    Ok(())
}
