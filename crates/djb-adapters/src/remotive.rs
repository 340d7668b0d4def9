//! Remotive public API: one `category=design` search per category term.

use async_trait::async_trait;
use djb_core::{parse_salary_text, JobDraft, JobSource};
use djb_storage::{FetchRequest, HttpFetcher};
use serde::Deserialize;
use tracing::info;

use crate::raw::{non_empty, parse_timestamp, NumOrString};
use crate::{AdapterContext, AdapterError, AdapterOutput, Crawlability, JobCollector, SourceAdapter};

pub const DEFAULT_BASE_URL: &str = "https://remotive.com";

#[derive(Debug, Default, Deserialize)]
pub struct RemotiveResponse {
    #[serde(default)]
    pub jobs: Vec<RemotiveJob>,
}

#[derive(Debug, Default, Deserialize)]
pub struct RemotiveJob {
    pub id: Option<NumOrString>,
    pub url: Option<String>,
    pub title: Option<String>,
    pub company_name: Option<String>,
    pub company_logo: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    pub job_type: Option<String>,
    pub publication_date: Option<String>,
    pub candidate_required_location: Option<String>,
    pub salary: Option<String>,
    pub description: Option<String>,
}

impl RemotiveJob {
    /// `None` when the id or title is missing. Salary is free text: parsed
    /// when it reads as USD, otherwise kept verbatim in `salary_text`.
    pub fn into_draft(self) -> Option<JobDraft> {
        let id = self.id?.to_id();
        let title = non_empty(self.title)?;
        let salary_text = non_empty(self.salary);
        let salary = salary_text
            .as_deref()
            .and_then(parse_salary_text)
            .unwrap_or_default();

        Some(JobDraft {
            upstream_id: id,
            title,
            company: non_empty(self.company_name),
            location: non_empty(self.candidate_required_location),
            company_logo: non_empty(self.company_logo),
            salary,
            salary_text,
            description: self.description,
            job_type_hint: non_empty(self.job_type),
            tags: self.tags,
            apply_url: non_empty(self.url),
            posted_at: self.publication_date.as_deref().and_then(parse_timestamp),
        })
    }
}

pub fn parse_response(body: RemotiveResponse) -> Vec<JobDraft> {
    body.jobs.into_iter().filter_map(RemotiveJob::into_draft).collect()
}

#[derive(Debug, Clone)]
pub struct RemotiveAdapter {
    base_url: String,
}

impl RemotiveAdapter {
    pub fn new(base_url: Option<String>) -> Self {
        Self {
            base_url: base_url.unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
        }
    }
}

#[async_trait]
impl SourceAdapter for RemotiveAdapter {
    fn source(&self) -> JobSource {
        JobSource::Remotive
    }

    fn crawlability(&self) -> Crawlability {
        Crawlability::PublicApi
    }

    async fn fetch(&self, http: &HttpFetcher, ctx: &AdapterContext) -> Result<AdapterOutput, AdapterError> {
        let mut collector = JobCollector::new(self.source(), ctx.fetched_at);
        let url = format!("{}/api/remote-jobs", self.base_url.trim_end_matches('/'));

        for (i, term) in ctx.category.search_terms().iter().enumerate() {
            if i > 0 && !ctx.pause().await {
                collector.fail(format!("search '{term}'"), "run budget exhausted");
                break;
            }
            let request = FetchRequest::get(&url)
                .query("category", "design")
                .query("search", term);
            match ctx.get_json::<RemotiveResponse>(http, self.source(), request).await {
                Ok(body) => {
                    let drafts = parse_response(body);
                    info!(source = "remotive", term, results = drafts.len(), "search page");
                    for draft in drafts {
                        collector.offer(draft);
                    }
                }
                Err(err) => collector.fail(format!("search '{term}'"), err),
            }
        }

        Ok(collector.finish())
    }
}
