//! RemoteOK public feed. The array's first element is a legal notice, not a job.

use async_trait::async_trait;
use djb_core::{annualize, JobDraft, JobSource, PayPeriod};
use djb_storage::{FetchRequest, HttpFetcher};
use serde::Deserialize;
use serde_json::Value as JsonValue;

use crate::raw::{from_epoch_secs, non_empty, parse_timestamp, NumOrString};
use crate::{AdapterContext, AdapterError, AdapterOutput, Crawlability, JobCollector, SourceAdapter};

pub const DEFAULT_BASE_URL: &str = "https://remoteok.com";

#[derive(Debug, Default, Deserialize)]
pub struct RemoteOkJob {
    pub id: Option<NumOrString>,
    pub epoch: Option<i64>,
    pub date: Option<String>,
    pub company: Option<String>,
    pub company_logo: Option<String>,
    pub logo: Option<String>,
    pub position: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    pub description: Option<String>,
    pub location: Option<String>,
    pub salary_min: Option<NumOrString>,
    pub salary_max: Option<NumOrString>,
    pub apply_url: Option<String>,
    pub url: Option<String>,
}

impl RemoteOkJob {
    /// Salary figures are already annual USD; zero means "not given".
    pub fn into_draft(self) -> Option<JobDraft> {
        let id = self.id?.to_id();
        let title = non_empty(self.position)?;
        let salary = annualize(
            self.salary_min.as_ref().and_then(NumOrString::to_f64),
            self.salary_max.as_ref().and_then(NumOrString::to_f64),
            PayPeriod::Year,
        );
        let posted_at = self
            .date
            .as_deref()
            .and_then(parse_timestamp)
            .or_else(|| self.epoch.and_then(from_epoch_secs));

        Some(JobDraft {
            upstream_id: id,
            title,
            company: non_empty(self.company),
            location: non_empty(self.location),
            company_logo: non_empty(self.company_logo).or_else(|| non_empty(self.logo)),
            salary,
            salary_text: None,
            description: self.description,
            job_type_hint: None,
            tags: self.tags,
            apply_url: non_empty(self.apply_url).or_else(|| non_empty(self.url)),
            posted_at,
        })
    }
}

/// Skips the leading legal element and any entry that is not a job object.
/// Returns the drafts and the number of malformed entries.
pub fn parse_feed(feed: Vec<JsonValue>) -> (Vec<JobDraft>, usize) {
    let mut drafts = Vec::new();
    let mut malformed = 0;
    for entry in feed {
        if entry.get("legal").is_some() {
            continue;
        }
        match serde_json::from_value::<RemoteOkJob>(entry) {
            Ok(job) => match job.into_draft() {
                Some(draft) => drafts.push(draft),
                None => malformed += 1,
            },
            Err(_) => malformed += 1,
        }
    }
    (drafts, malformed)
}

#[derive(Debug, Clone)]
pub struct RemoteOkAdapter {
    base_url: String,
}

impl RemoteOkAdapter {
    pub fn new(base_url: Option<String>) -> Self {
        Self {
            base_url: base_url.unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
        }
    }
}

#[async_trait]
impl SourceAdapter for RemoteOkAdapter {
    fn source(&self) -> JobSource {
        JobSource::RemoteOk
    }

    fn crawlability(&self) -> Crawlability {
        Crawlability::PublicApi
    }

    async fn fetch(&self, http: &HttpFetcher, ctx: &AdapterContext) -> Result<AdapterOutput, AdapterError> {
        let mut collector = JobCollector::new(self.source(), ctx.fetched_at);
        let request = FetchRequest::get(format!("{}/api", self.base_url.trim_end_matches('/')))
            .query("tag", "design");

        match ctx.get_json::<Vec<JsonValue>>(http, self.source(), request).await {
            Ok(feed) => {
                let (drafts, malformed) = parse_feed(feed);
                if malformed > 0 {
                    collector.fail("feed", format!("{malformed} malformed entries skipped"));
                }
                for draft in drafts {
                    collector.offer(draft);
                }
            }
            Err(err) => collector.fail("feed", err),
        }

        Ok(collector.finish())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{fetched_at, fixture};
    use chrono::{TimeZone, Utc};

    fn fixture_feed() -> Vec<JsonValue> {
        serde_json::from_str(&fixture("remoteok", "api.json")).expect("fixture json")
    }

    #[test]
    fn legal_notice_is_skipped_and_bad_entries_counted() {
        let (drafts, malformed) = parse_feed(fixture_feed());
        assert_eq!(drafts.len(), 3);
        assert_eq!(malformed, 1);
        assert_eq!(drafts[0].upstream_id, "310455");
        assert_eq!(drafts[1].upstream_id, "310460");
    }

    #[test]
    fn zero_salary_means_absent_and_epoch_is_a_fallback() {
        let (drafts, _) = parse_feed(fixture_feed());
        assert_eq!(drafts[0].salary.min, Some(95_000));
        assert_eq!(drafts[0].salary.max, Some(130_000));
        assert!(drafts[1].salary.is_empty());
        assert_eq!(
            drafts[1].posted_at,
            Utc.with_ymd_and_hms(2024, 1, 5, 10, 0, 0).single()
        );
    }

    #[test]
    fn tag_fallback_accepts_tool_tagged_creative_role() {
        let mut collector = JobCollector::new(JobSource::RemoteOk, fetched_at());
        let (drafts, _) = parse_feed(fixture_feed());
        for draft in drafts {
            collector.offer(draft);
        }
        let output = collector.finish();
        let ids: Vec<_> = output.jobs.iter().map(|j| j.id.as_str()).collect();
        assert_eq!(ids, vec!["remoteok-310455", "remoteok-310460"]);
        assert_eq!(
            output.jobs[0].apply_url.as_deref(),
            Some("https://remoteok.com/remote-jobs/310455")
        );
    }
}
