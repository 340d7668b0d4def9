//! Ashby posting API, one call per job board.

use async_trait::async_trait;
use djb_core::{annualize, parse_salary_text, JobDraft, JobSource, PayPeriod, SalaryRange};
use djb_storage::{FetchRequest, HttpFetcher};
use serde::Deserialize;
use tracing::info;

use crate::raw::{non_empty, parse_timestamp};
use crate::{
    require_boards, AdapterContext, AdapterError, AdapterOutput, BoardSpec, Crawlability,
    JobCollector, SourceAdapter,
};

pub const DEFAULT_BASE_URL: &str = "https://api.ashbyhq.com";

#[derive(Debug, Default, Deserialize)]
pub struct AshbyBoard {
    #[serde(default)]
    pub jobs: Vec<AshbyJob>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AshbyJob {
    pub id: Option<String>,
    pub title: Option<String>,
    pub location: Option<String>,
    pub employment_type: Option<String>,
    pub department: Option<String>,
    pub team: Option<String>,
    pub is_remote: Option<bool>,
    pub is_listed: Option<bool>,
    pub description_html: Option<String>,
    pub description_plain: Option<String>,
    pub published_at: Option<String>,
    pub job_url: Option<String>,
    pub apply_url: Option<String>,
    pub compensation: Option<AshbyCompensation>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AshbyCompensation {
    pub compensation_tier_summary: Option<String>,
    #[serde(default)]
    pub summary_components: Vec<AshbyCompensationComponent>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AshbyCompensationComponent {
    pub compensation_type: Option<String>,
    /// `1 YEAR`, `1 HOUR`, ...
    pub interval: Option<String>,
    pub currency_code: Option<String>,
    pub min_value: Option<f64>,
    pub max_value: Option<f64>,
}

fn employment_type_hint(raw: &str) -> Option<&'static str> {
    match raw.trim() {
        "FullTime" => Some("full-time"),
        "PartTime" => Some("part-time"),
        "Contract" | "Temporary" => Some("contract"),
        "Intern" => Some("internship"),
        _ => None,
    }
}

impl AshbyCompensation {
    /// The structured salary component wins; the summary string is parsed
    /// as a fallback and always kept as `salary_text`.
    fn normalize(&self) -> (SalaryRange, Option<String>) {
        let summary = non_empty(self.compensation_tier_summary.clone());
        let structured = self
            .summary_components
            .iter()
            .filter(|c| {
                c.compensation_type
                    .as_deref()
                    .is_some_and(|t| t.eq_ignore_ascii_case("salary"))
            })
            .filter(|c| {
                c.currency_code
                    .as_deref()
                    .map_or(true, |code| code.eq_ignore_ascii_case("USD"))
            })
            .find_map(|c| {
                let period = c
                    .interval
                    .as_deref()?
                    .split_whitespace()
                    .find_map(PayPeriod::parse)?;
                Some(annualize(c.min_value, c.max_value, period))
            })
            .filter(|range| !range.is_empty());

        let salary = structured
            .or_else(|| summary.as_deref().and_then(parse_salary_text))
            .unwrap_or_default();
        (salary, summary)
    }
}

impl AshbyJob {
    /// Unlisted postings are dropped.
    pub fn into_draft(self, board: &BoardSpec) -> Option<JobDraft> {
        if self.is_listed == Some(false) {
            return None;
        }
        let id = non_empty(self.id)?;
        let title = non_empty(self.title)?;
        let (salary, salary_text) = self
            .compensation
            .as_ref()
            .map(AshbyCompensation::normalize)
            .unwrap_or_default();

        let location = match (non_empty(self.location), self.is_remote) {
            (Some(loc), Some(true)) if !loc.to_lowercase().contains("remote") => {
                Some(format!("{loc} (Remote)"))
            }
            (Some(loc), _) => Some(loc),
            (None, Some(true)) => Some("Remote".to_string()),
            (None, _) => None,
        };

        Some(JobDraft {
            upstream_id: id,
            title,
            company: Some(board.company()),
            location,
            company_logo: None,
            salary,
            salary_text,
            description: self.description_html.or(self.description_plain),
            job_type_hint: self
                .employment_type
                .as_deref()
                .and_then(employment_type_hint)
                .map(str::to_string),
            tags: [self.department, self.team]
                .into_iter()
                .filter_map(non_empty)
                .collect(),
            apply_url: non_empty(self.apply_url).or_else(|| non_empty(self.job_url)),
            posted_at: self.published_at.as_deref().and_then(parse_timestamp),
        })
    }
}

pub fn parse_board(body: AshbyBoard, board: &BoardSpec) -> Vec<JobDraft> {
    body.jobs
        .into_iter()
        .filter_map(|job| job.into_draft(board))
        .collect()
}

#[derive(Debug, Clone)]
pub struct AshbyAdapter {
    boards: Vec<BoardSpec>,
    base_url: String,
}

impl AshbyAdapter {
    pub fn new(boards: Vec<BoardSpec>, base_url: Option<String>) -> Self {
        Self {
            boards,
            base_url: base_url.unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
        }
    }
}

#[async_trait]
impl SourceAdapter for AshbyAdapter {
    fn source(&self) -> JobSource {
        JobSource::Ashby
    }

    fn crawlability(&self) -> Crawlability {
        Crawlability::AtsFeed
    }

    async fn fetch(&self, http: &HttpFetcher, ctx: &AdapterContext) -> Result<AdapterOutput, AdapterError> {
        require_boards(self.source(), &self.boards)?;
        let mut collector = JobCollector::new(self.source(), ctx.fetched_at);

        for (i, board) in self.boards.iter().enumerate() {
            if i > 0 && !ctx.pause().await {
                collector.fail(format!("board {}", board.slug()), "run budget exhausted");
                break;
            }
            let request = FetchRequest::get(format!(
                "{}/posting-api/job-board/{}",
                self.base_url.trim_end_matches('/'),
                board.slug()
            ))
            .query("includeCompensation", "true");

            match ctx.get_json::<AshbyBoard>(http, self.source(), request).await {
                Ok(body) => {
                    let drafts = parse_board(body, board);
                    info!(source = "ashby", board = board.slug(), postings = drafts.len(), "board fetched");
                    for draft in drafts {
                        collector.offer(draft);
                    }
                }
                Err(err) => collector.fail(format!("board {}", board.slug()), err),
            }
        }

        Ok(collector.finish())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{fetched_at, fixture};
    use djb_core::{ExperienceLevel, JobType};

    fn fixture_drafts() -> Vec<JobDraft> {
        let body: AshbyBoard =
            serde_json::from_str(&fixture("ashby", "job-board.json")).expect("fixture json");
        parse_board(body, &BoardSpec::Slug("halcyon".to_string()))
    }

    #[test]
    fn structured_compensation_beats_summary_text() {
        let drafts = fixture_drafts();
        assert_eq!(drafts.len(), 3);
        let lead = &drafts[0];
        assert_eq!(
            lead.salary,
            SalaryRange {
                min: Some(165_000),
                max: Some(195_000)
            }
        );
        assert_eq!(lead.salary_text.as_deref(), Some("$165K – $195K • Offers Equity"));
        assert_eq!(lead.location.as_deref(), Some("San Francisco (Remote)"));
    }

    #[test]
    fn summary_is_parsed_when_no_structured_component() {
        let drafts = fixture_drafts();
        let intern = drafts.iter().find(|d| d.upstream_id == "ash-3").expect("intern");
        assert_eq!(intern.salary.min, Some(52_000));
        assert_eq!(intern.job_type_hint.as_deref(), Some("internship"));
    }

    #[test]
    fn normalized_fields() {
        let mut collector = JobCollector::new(JobSource::Ashby, fetched_at());
        for draft in fixture_drafts() {
            collector.offer(draft);
        }
        let output = collector.finish();
        assert_eq!(output.fetched, 3);
        assert_eq!(output.jobs.len(), 2);
        let lead = &output.jobs[0];
        assert_eq!(lead.company, "Halcyon");
        assert_eq!(lead.experience_level, ExperienceLevel::Lead);
        assert_eq!(lead.job_type, JobType::FullTime);
        assert_eq!(output.jobs[1].job_type, JobType::Internship);
        assert_eq!(output.jobs[1].experience_level, ExperienceLevel::Entry);
    }
}
