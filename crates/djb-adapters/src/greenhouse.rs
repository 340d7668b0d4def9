//! Greenhouse job-board API, one call per company board.

use async_trait::async_trait;
use djb_core::{JobDraft, JobSource};
use djb_storage::{FetchRequest, HttpFetcher};
use serde::Deserialize;
use tracing::info;

use crate::raw::{non_empty, parse_timestamp, NumOrString};
use crate::{
    require_boards, AdapterContext, AdapterError, AdapterOutput, BoardSpec, Crawlability,
    JobCollector, SourceAdapter,
};

pub const DEFAULT_BASE_URL: &str = "https://boards-api.greenhouse.io";

#[derive(Debug, Default, Deserialize)]
pub struct GreenhouseBoard {
    #[serde(default)]
    pub jobs: Vec<GreenhouseJob>,
}

#[derive(Debug, Default, Deserialize)]
pub struct GreenhouseJob {
    pub id: Option<NumOrString>,
    pub title: Option<String>,
    pub absolute_url: Option<String>,
    pub updated_at: Option<String>,
    pub first_published: Option<String>,
    pub company_name: Option<String>,
    pub location: Option<GreenhouseLocation>,
    /// Entity-escaped HTML (`&lt;p&gt;...`).
    pub content: Option<String>,
    #[serde(default)]
    pub departments: Vec<GreenhouseNamed>,
}

#[derive(Debug, Default, Deserialize)]
pub struct GreenhouseLocation {
    pub name: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct GreenhouseNamed {
    pub name: Option<String>,
}

impl GreenhouseJob {
    /// Department names become tags. `first_published` wins over
    /// `updated_at`; the board's company name is the fallback employer.
    pub fn into_draft(self, board: &BoardSpec) -> Option<JobDraft> {
        let id = self.id?.to_id();
        let title = non_empty(self.title)?;
        let posted_at = self
            .first_published
            .as_deref()
            .and_then(parse_timestamp)
            .or_else(|| self.updated_at.as_deref().and_then(parse_timestamp));

        Some(JobDraft {
            upstream_id: id,
            title,
            company: non_empty(self.company_name).or_else(|| Some(board.company())),
            location: self.location.and_then(|l| non_empty(l.name)),
            company_logo: None,
            salary: Default::default(),
            salary_text: None,
            description: self.content,
            job_type_hint: None,
            tags: self
                .departments
                .into_iter()
                .filter_map(|d| non_empty(d.name))
                .collect(),
            apply_url: non_empty(self.absolute_url),
            posted_at,
        })
    }
}

pub fn parse_board(body: GreenhouseBoard, board: &BoardSpec) -> Vec<JobDraft> {
    body.jobs
        .into_iter()
        .filter_map(|job| job.into_draft(board))
        .collect()
}

#[derive(Debug, Clone)]
pub struct GreenhouseAdapter {
    boards: Vec<BoardSpec>,
    base_url: String,
}

impl GreenhouseAdapter {
    pub fn new(boards: Vec<BoardSpec>, base_url: Option<String>) -> Self {
        Self {
            boards,
            base_url: base_url.unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
        }
    }
}

#[async_trait]
impl SourceAdapter for GreenhouseAdapter {
    fn source(&self) -> JobSource {
        JobSource::Greenhouse
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
                "{}/v1/boards/{}/jobs",
                self.base_url.trim_end_matches('/'),
                board.slug()
            ))
            .query("content", "true");

            match ctx.get_json::<GreenhouseBoard>(http, self.source(), request).await {
                Ok(body) => {
                    let drafts = parse_board(body, board);
                    info!(source = "greenhouse", board = board.slug(), postings = drafts.len(), "board fetched");
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

    fn board() -> BoardSpec {
        BoardSpec::Slug("northwind".to_string())
    }

    fn fixture_drafts() -> Vec<JobDraft> {
        let body: GreenhouseBoard =
            serde_json::from_str(&fixture("greenhouse", "jobs.json")).expect("fixture json");
        parse_board(body, &board())
    }

    #[test]
    fn escaped_markup_is_decoded_then_stripped() {
        let mut collector = JobCollector::new(JobSource::Greenhouse, fetched_at());
        for draft in fixture_drafts() {
            collector.offer(draft);
        }
        let output = collector.finish();
        assert_eq!(output.fetched, 3);
        assert_eq!(output.jobs.len(), 2);

        let designer = &output.jobs[0];
        assert_eq!(designer.id, "greenhouse-4012345");
        assert_eq!(designer.company, "Northwind");
        assert_eq!(designer.location, "New York, NY");
        assert!(designer.description.starts_with("About the role"));
        assert!(!designer.description.contains("&lt;"));
        assert!(!designer.description.contains('<'));
        assert!(designer.skills.contains(&"Design Systems".to_string()));
    }

    #[test]
    fn first_published_beats_updated_at() {
        let drafts = fixture_drafts();
        assert_eq!(
            drafts[0].posted_at.map(|t| t.to_rfc3339()),
            Some("2024-01-10T14:00:00+00:00".to_string())
        );
        assert_eq!(drafts[1].tags, vec!["Design".to_string()]);
    }
}
