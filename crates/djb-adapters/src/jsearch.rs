//! JSearch (RapidAPI) aggregator.
//!
//! Two-phase: paginated `/search` per category term, then a capped
//! `/job-details` call for candidates that survive the title prefilter.
//! Candidates past the cap, or whose detail call fails, keep their
//! search-result fields.

use async_trait::async_trait;
use djb_core::{annualize, passes_title_prefilter, JobDraft, JobSource, PayPeriod, Region};
use djb_storage::{FetchRequest, HttpFetcher};
use serde::Deserialize;
use tracing::{debug, info};

use crate::raw::{join_location, non_empty, parse_timestamp, NumOrString};
use crate::{AdapterContext, AdapterError, AdapterOutput, Crawlability, JobCollector, SourceAdapter};

pub const DEFAULT_BASE_URL: &str = "https://jsearch.p.rapidapi.com";
pub const RAPIDAPI_HOST: &str = "jsearch.p.rapidapi.com";
pub const DEFAULT_PAGES_PER_QUERY: u32 = 5;

#[derive(Debug, Default, Deserialize)]
pub struct JsearchResponse {
    pub status: Option<String>,
    #[serde(default)]
    pub data: Vec<JsearchJob>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct JsearchJob {
    pub job_id: Option<String>,
    pub employer_name: Option<String>,
    pub employer_logo: Option<String>,
    pub job_title: Option<String>,
    pub job_description: Option<String>,
    pub job_employment_type: Option<String>,
    pub job_apply_link: Option<String>,
    pub job_city: Option<String>,
    pub job_state: Option<String>,
    pub job_country: Option<String>,
    pub job_is_remote: Option<bool>,
    pub job_posted_at_datetime_utc: Option<String>,
    pub job_min_salary: Option<NumOrString>,
    pub job_max_salary: Option<NumOrString>,
    pub job_salary_period: Option<String>,
    #[serde(default)]
    pub job_required_skills: Option<Vec<String>>,
}

/// `FULLTIME`, `CONTRACTOR`, ... to the labels `parse_job_type` understands.
fn employment_type_hint(raw: &str) -> Option<&'static str> {
    match raw.trim().to_ascii_uppercase().replace(['_', '-', ' '], "").as_str() {
        "FULLTIME" => Some("full-time"),
        "PARTTIME" => Some("part-time"),
        "CONTRACTOR" | "CONTRACT" | "TEMPORARY" => Some("contract"),
        "INTERN" | "INTERNSHIP" => Some("internship"),
        _ => None,
    }
}

impl JsearchJob {
    pub fn id(&self) -> Option<&str> {
        self.job_id.as_deref().map(str::trim).filter(|id| !id.is_empty())
    }

    pub fn title(&self) -> &str {
        self.job_title.as_deref().unwrap_or_default()
    }

    /// Salary comes as a min/max pair plus a period (`HOUR`, `MONTH`,
    /// `YEAR`); an unknown period leaves the salary empty.
    pub fn into_draft(self) -> Option<JobDraft> {
        let id = self.id()?.to_string();
        let title = non_empty(self.job_title)?;

        let salary = self
            .job_salary_period
            .as_deref()
            .and_then(PayPeriod::parse)
            .map(|period| {
                annualize(
                    self.job_min_salary.as_ref().and_then(NumOrString::to_f64),
                    self.job_max_salary.as_ref().and_then(NumOrString::to_f64),
                    period,
                )
            })
            .unwrap_or_default();

        let location = if self.job_is_remote == Some(true) {
            Some("Remote".to_string())
        } else {
            join_location([
                self.job_city.as_deref(),
                self.job_state.as_deref(),
                self.job_country.as_deref(),
            ])
        };

        Some(JobDraft {
            upstream_id: id,
            title,
            company: non_empty(self.employer_name),
            location,
            company_logo: non_empty(self.employer_logo),
            salary,
            salary_text: None,
            description: self.job_description,
            job_type_hint: self
                .job_employment_type
                .as_deref()
                .and_then(employment_type_hint)
                .map(str::to_string),
            tags: self.job_required_skills.unwrap_or_default(),
            apply_url: non_empty(self.job_apply_link),
            posted_at: self
                .job_posted_at_datetime_utc
                .as_deref()
                .and_then(parse_timestamp),
        })
    }
}

pub fn search_query(term: &str, region: Region) -> String {
    format!("{term} in {}", region.query_location())
}

#[derive(Debug, Clone)]
pub struct JsearchAdapter {
    api_key: Option<String>,
    base_url: String,
    pages_per_query: u32,
}

impl JsearchAdapter {
    pub fn new(api_key: Option<String>, base_url: Option<String>) -> Self {
        Self {
            api_key: api_key.filter(|k| !k.trim().is_empty()),
            base_url: base_url.unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
            pages_per_query: DEFAULT_PAGES_PER_QUERY,
        }
    }

    pub fn with_pages_per_query(mut self, pages: u32) -> Self {
        self.pages_per_query = pages.max(1);
        self
    }

    fn request(&self, path: &str, api_key: &str) -> FetchRequest {
        FetchRequest::get(format!("{}/{path}", self.base_url.trim_end_matches('/')))
            .header("X-RapidAPI-Key", api_key)
            .header("X-RapidAPI-Host", RAPIDAPI_HOST)
    }

    async fn detail(
        &self,
        http: &HttpFetcher,
        ctx: &AdapterContext,
        api_key: &str,
        job_id: &str,
    ) -> Result<Option<JsearchJob>, djb_storage::FetchError> {
        let request = self.request("job-details", api_key).query("job_id", job_id);
        let body: JsearchResponse = ctx.get_json(http, self.source(), request).await?;
        Ok(body.data.into_iter().next())
    }
}

#[async_trait]
impl SourceAdapter for JsearchAdapter {
    fn source(&self) -> JobSource {
        JobSource::Jsearch
    }

    fn crawlability(&self) -> Crawlability {
        Crawlability::KeyedApi
    }

    async fn fetch(&self, http: &HttpFetcher, ctx: &AdapterContext) -> Result<AdapterOutput, AdapterError> {
        let Some(api_key) = self.api_key.as_deref() else {
            return Err(AdapterError::NotConfigured {
                job_source: self.source(),
                reason: "JSEARCH_API_KEY is not set".to_string(),
            });
        };

        let mut collector = JobCollector::new(self.source(), ctx.fetched_at);
        let mut details_used = 0usize;
        let mut first_request = true;

        'terms: for term in ctx.category.search_terms() {
            let query = search_query(term, ctx.region);
            for page in 1..=self.pages_per_query {
                if !first_request && !ctx.pause().await {
                    collector.fail(format!("'{query}' page {page}"), "run budget exhausted");
                    break 'terms;
                }
                first_request = false;

                let request = self
                    .request("search", api_key)
                    .query("query", &query)
                    .query("page", page)
                    .query("num_pages", 1)
                    .query("date_posted", "week");
                let body: JsearchResponse = match ctx.get_json(http, self.source(), request).await {
                    Ok(body) => body,
                    Err(err) => {
                        collector.fail(format!("'{query}' page {page}"), err);
                        continue;
                    }
                };
                info!(source = "jsearch", query = %query, page, results = body.data.len(), "search page");
                if body.data.is_empty() {
                    break;
                }

                for hit in body.data {
                    let Some(id) = hit.id().map(str::to_string) else {
                        continue;
                    };
                    if !collector.first_sighting(&id) {
                        continue;
                    }
                    if !passes_title_prefilter(hit.title()) {
                        debug!(source = "jsearch", title = hit.title(), "rejected by title prefilter");
                        continue;
                    }

                    let mut record = hit;
                    if details_used < ctx.detail_fetch_cap && !ctx.budget.is_exhausted() {
                        details_used += 1;
                        match self.detail(http, ctx, api_key, &id).await {
                            Ok(Some(full)) => record = full,
                            Ok(None) => {}
                            Err(err) => collector.fail(format!("job-details {id}"), err),
                        }
                    }
                    if let Some(draft) = record.into_draft() {
                        collector.accept(draft);
                    }
                }
            }
        }

        Ok(collector.finish())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::fixture;
    use djb_core::SalaryRange;

    fn search_page() -> JsearchResponse {
        serde_json::from_str(&fixture("jsearch", "search-page.json")).expect("fixture json")
    }

    #[test]
    fn hourly_salary_is_annualized_with_2080_hours() {
        let job = search_page()
            .data
            .into_iter()
            .find(|j| j.id() == Some("jsx-ux-hourly"))
            .expect("hourly job");
        let draft = job.into_draft().expect("draft");
        assert_eq!(
            draft.salary,
            SalaryRange {
                min: Some(104_000),
                max: Some(156_000)
            }
        );
        assert_eq!(draft.job_type_hint.as_deref(), Some("contract"));
        assert_eq!(draft.location.as_deref(), Some("Remote"));
    }

    #[test]
    fn monthly_salary_and_on_site_location() {
        let job = search_page()
            .data
            .into_iter()
            .find(|j| j.id() == Some("jsx-visual-monthly"))
            .expect("monthly job");
        let draft = job.into_draft().expect("draft");
        assert_eq!(
            draft.salary,
            SalaryRange {
                min: Some(84_000),
                max: Some(96_000)
            }
        );
        assert_eq!(draft.location.as_deref(), Some("Austin, TX, US"));
    }

    #[test]
    fn prefilter_would_skip_engineering_hits() {
        let titles: Vec<String> = search_page()
            .data
            .iter()
            .filter(|j| passes_title_prefilter(j.title()))
            .map(|j| j.title().to_string())
            .collect();
        assert!(!titles.iter().any(|t| t.contains("Engineer")));
        assert_eq!(titles.len(), 3);
    }

    #[test]
    fn query_includes_region_phrase() {
        assert_eq!(
            search_query("ux designer", Region::Uk),
            "ux designer in United Kingdom"
        );
    }
}
