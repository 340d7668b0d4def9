//! Lever postings API, one call per company.

use async_trait::async_trait;
use djb_core::{annualize, JobDraft, JobSource, PayPeriod, SalaryRange};
use djb_storage::{FetchRequest, HttpFetcher};
use serde::Deserialize;
use tracing::info;

use crate::raw::{from_epoch_millis, non_empty, NumOrString};
use crate::{
    require_boards, AdapterContext, AdapterError, AdapterOutput, BoardSpec, Crawlability,
    JobCollector, SourceAdapter,
};

pub const DEFAULT_BASE_URL: &str = "https://api.lever.co";

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LeverPosting {
    pub id: Option<String>,
    pub text: Option<String>,
    pub hosted_url: Option<String>,
    pub apply_url: Option<String>,
    pub created_at: Option<i64>,
    pub categories: Option<LeverCategories>,
    pub description: Option<String>,
    pub description_plain: Option<String>,
    #[serde(default)]
    pub lists: Vec<LeverList>,
    pub additional: Option<String>,
    pub salary_range: Option<LeverSalaryRange>,
    pub workplace_type: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct LeverCategories {
    pub commitment: Option<String>,
    pub location: Option<String>,
    pub team: Option<String>,
    pub department: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct LeverList {
    pub text: Option<String>,
    pub content: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct LeverSalaryRange {
    pub min: Option<NumOrString>,
    pub max: Option<NumOrString>,
    pub currency: Option<String>,
    /// `per-year-salary`, `per-hour-wage`, `per-month-salary`, ...
    pub interval: Option<String>,
}

impl LeverSalaryRange {
    /// USD ranges are annualized; other currencies become text only.
    fn normalize(&self) -> (SalaryRange, Option<String>) {
        let min = self.min.as_ref().and_then(NumOrString::to_f64);
        let max = self.max.as_ref().and_then(NumOrString::to_f64);
        let currency = self.currency.as_deref().unwrap_or("USD").trim().to_ascii_uppercase();
        let interval = self.interval.as_deref().unwrap_or_default();
        let period = interval.split('-').find_map(PayPeriod::parse);

        if currency == "USD" {
            if let Some(period) = period {
                return (annualize(min, max, period), None);
            }
        }
        let figures = [min, max]
            .iter()
            .flatten()
            .map(|v| format!("{v:.0}"))
            .collect::<Vec<_>>()
            .join(" - ");
        let text = if figures.is_empty() {
            None
        } else {
            Some(format!("{currency} {figures} {interval}").trim().to_string())
        };
        (SalaryRange::default(), text)
    }
}

impl LeverPosting {
    /// Description is the HTML body plus every list section; the commitment
    /// category is the job-type hint; team and department become tags.
    pub fn into_draft(self, board: &BoardSpec) -> Option<JobDraft> {
        let id = non_empty(self.id)?;
        let title = non_empty(self.text)?;
        let categories = self.categories.unwrap_or_default();
        let (salary, salary_text) = self
            .salary_range
            .as_ref()
            .map(LeverSalaryRange::normalize)
            .unwrap_or_default();

        let mut description = self
            .description
            .or(self.description_plain)
            .unwrap_or_default();
        for list in &self.lists {
            if let Some(heading) = list.text.as_deref() {
                description.push_str(&format!("<h3>{heading}</h3>"));
            }
            if let Some(content) = list.content.as_deref() {
                description.push_str(&format!("<ul>{content}</ul>"));
            }
        }
        if let Some(extra) = self.additional.as_deref() {
            description.push_str(extra);
        }

        let location = match (categories.location, self.workplace_type.as_deref()) {
            (Some(loc), Some("remote")) => Some(format!("{loc} (Remote)")),
            (Some(loc), _) => Some(loc),
            (None, Some("remote")) => Some("Remote".to_string()),
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
            description: Some(description),
            job_type_hint: non_empty(categories.commitment),
            tags: [categories.team, categories.department]
                .into_iter()
                .filter_map(non_empty)
                .collect(),
            apply_url: non_empty(self.apply_url).or_else(|| non_empty(self.hosted_url)),
            posted_at: self.created_at.and_then(from_epoch_millis),
        })
    }
}

pub fn parse_postings(postings: Vec<LeverPosting>, board: &BoardSpec) -> Vec<JobDraft> {
    postings
        .into_iter()
        .filter_map(|p| p.into_draft(board))
        .collect()
}

#[derive(Debug, Clone)]
pub struct LeverAdapter {
    boards: Vec<BoardSpec>,
    base_url: String,
}

impl LeverAdapter {
    pub fn new(boards: Vec<BoardSpec>, base_url: Option<String>) -> Self {
        Self {
            boards,
            base_url: base_url.unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
        }
    }
}

#[async_trait]
impl SourceAdapter for LeverAdapter {
    fn source(&self) -> JobSource {
        JobSource::Lever
    }

    fn crawlability(&self) -> Crawlability {
        Crawlability::AtsFeed
    }

    async fn fetch(&self, http: &HttpFetcher, ctx: &AdapterContext) -> Result<AdapterOutput, AdapterError> {
        require_boards(self.source(), &self.boards)?;
        let mut collector = JobCollector::new(self.source(), ctx.fetched_at);

        for (i, board) in self.boards.iter().enumerate() {
            if i > 0 && !ctx.pause().await {
                collector.fail(format!("company {}", board.slug()), "run budget exhausted");
                break;
            }
            let request = FetchRequest::get(format!(
                "{}/v0/postings/{}",
                self.base_url.trim_end_matches('/'),
                board.slug()
            ))
            .query("mode", "json");

            match ctx.get_json::<Vec<LeverPosting>>(http, self.source(), request).await {
                Ok(postings) => {
                    let drafts = parse_postings(postings, board);
                    info!(source = "lever", company = board.slug(), postings = drafts.len(), "company fetched");
                    for draft in drafts {
                        collector.offer(draft);
                    }
                }
                Err(err) => collector.fail(format!("company {}", board.slug()), err),
            }
        }

        Ok(collector.finish())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{fetched_at, fixture};
    use djb_core::JobType;

    fn board() -> BoardSpec {
        BoardSpec::Named {
            slug: "meridian".to_string(),
            company: "Meridian Studio".to_string(),
        }
    }

    fn fixture_drafts() -> Vec<JobDraft> {
        let postings: Vec<LeverPosting> =
            serde_json::from_str(&fixture("lever", "postings.json")).expect("fixture json");
        parse_postings(postings, &board())
    }

    #[test]
    fn commitment_and_salary_range() {
        let drafts = fixture_drafts();
        assert_eq!(drafts.len(), 3);

        let hourly = &drafts[0];
        assert_eq!(hourly.salary.min, Some(124_800));
        assert_eq!(hourly.salary.max, Some(145_600));
        assert_eq!(hourly.job_type_hint.as_deref(), Some("Contract"));
        assert_eq!(hourly.location.as_deref(), Some("Lisbon (Remote)"));

        let euro = &drafts[1];
        assert!(euro.salary.is_empty());
        assert_eq!(
            euro.salary_text.as_deref(),
            Some("EUR 60000 - 75000 per-year-salary")
        );
    }

    #[test]
    fn normalized_output_uses_board_company_and_list_sections() {
        let mut collector = JobCollector::new(JobSource::Lever, fetched_at());
        for draft in fixture_drafts() {
            collector.offer(draft);
        }
        let output = collector.finish();
        assert_eq!(output.jobs.len(), 2);
        let job = &output.jobs[0];
        assert_eq!(job.id, "lever-5f1d7c1e-aaaa-4bbb-8ccc-000000000001");
        assert_eq!(job.company, "Meridian Studio");
        assert_eq!(job.job_type, JobType::Contract);
        assert!(job.description.contains("Wireframes for every flow"));
        assert!(job.skills.contains(&"Wireframing".to_string()));
        assert_eq!(
            job.posted_at.to_rfc3339(),
            "2024-01-05T10:00:00+00:00"
        );
    }
}
