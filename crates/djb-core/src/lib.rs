//! Core domain model for DJB: the canonical job record plus the pure
//! classification and normalization rules every adapter shares.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub mod classify;
pub mod salary;
pub mod text;

pub use classify::{classify, is_design_job, passes_title_prefilter, Tier, Verdict};
pub use salary::{annualize, parse_salary_text, PayPeriod, SalaryRange, HOURS_PER_YEAR};

pub const CRATE_NAME: &str = "djb-core";

/// Fallback company name when an upstream omits it.
pub const UNKNOWN_COMPANY: &str = "Unknown Company";
/// Fallback location when an upstream omits it.
pub const DEFAULT_LOCATION: &str = "Remote";

/// Error returned when a closed-set value fails to parse.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownVariant {
    pub kind: &'static str,
    pub value: String,
    pub valid: Vec<&'static str>,
}

impl fmt::Display for UnknownVariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "unknown {} '{}' (valid: {})",
            self.kind,
            self.value,
            self.valid.join(", ")
        )
    }
}

impl std::error::Error for UnknownVariant {}

macro_rules! closed_set {
    (
        $(#[$meta:meta])*
        $name:ident, $kind:literal { $($variant:ident => $text:literal),+ $(,)? }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        pub enum $name {
            $(#[serde(rename = $text)] $variant),+
        }

        impl $name {
            pub const ALL: &'static [$name] = &[$($name::$variant),+];

            pub fn as_str(&self) -> &'static str {
                match self {
                    $($name::$variant => $text),+
                }
            }

            pub fn valid_values() -> Vec<&'static str> {
                Self::ALL.iter().map(|v| v.as_str()).collect()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $name {
            type Err = UnknownVariant;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                let needle = s.trim().to_ascii_lowercase();
                Self::ALL
                    .iter()
                    .copied()
                    .find(|v| v.as_str() == needle)
                    .ok_or_else(|| UnknownVariant {
                        kind: $kind,
                        value: s.to_string(),
                        valid: Self::valid_values(),
                    })
            }
        }
    };
}

closed_set!(
    /// Which adapter produced a record.
    JobSource, "source" {
        Remotive => "remotive",
        RemoteOk => "remoteok",
        Jsearch => "jsearch",
        Greenhouse => "greenhouse",
        Lever => "lever",
        Ashby => "ashby",
        Dribbble => "dribbble",
        Coroflot => "coroflot",
    }
);

closed_set!(
    /// Batch of sources a single trigger call can select.
    SourceGroup, "group" {
        Api => "api",
        Ats => "ats",
        Scrape => "scrape",
    }
);

impl JobSource {
    pub fn group(&self) -> SourceGroup {
        match self {
            JobSource::Remotive | JobSource::RemoteOk | JobSource::Jsearch => SourceGroup::Api,
            JobSource::Greenhouse | JobSource::Lever | JobSource::Ashby => SourceGroup::Ats,
            JobSource::Dribbble | JobSource::Coroflot => SourceGroup::Scrape,
        }
    }
}

closed_set!(
    JobType, "job type" {
        FullTime => "full-time",
        PartTime => "part-time",
        Contract => "contract",
        Freelance => "freelance",
        Internship => "internship",
    }
);

closed_set!(
    ExperienceLevel, "experience level" {
        Entry => "entry",
        Mid => "mid",
        Senior => "senior",
        Lead => "lead",
    }
);

closed_set!(
    /// Geographic slice used by search-style sources.
    Region, "region" {
        Us => "us",
        Uk => "uk",
        Europe => "europe",
        Remote => "remote",
    }
);

closed_set!(
    /// Design discipline slice used by search-style sources.
    Category, "category" {
        Ux => "ux",
        Product => "product",
        Visual => "visual",
        All => "all",
    }
);

impl Default for JobType {
    fn default() -> Self {
        JobType::FullTime
    }
}

impl Default for ExperienceLevel {
    fn default() -> Self {
        ExperienceLevel::Mid
    }
}

impl Default for Region {
    fn default() -> Self {
        Region::Remote
    }
}

impl Default for Category {
    fn default() -> Self {
        Category::All
    }
}

impl Region {
    /// Location phrase appended to search queries.
    pub fn query_location(&self) -> &'static str {
        match self {
            Region::Us => "United States",
            Region::Uk => "United Kingdom",
            Region::Europe => "Europe",
            Region::Remote => "Remote",
        }
    }
}

impl Category {
    /// Search phrases for query-driven sources.
    pub fn search_terms(&self) -> &'static [&'static str] {
        match self {
            Category::Ux => &["ux designer", "ui designer", "ux researcher"],
            Category::Product => &["product designer"],
            Category::Visual => &["graphic designer", "visual designer", "brand designer"],
            Category::All => &[
                "product designer",
                "ux designer",
                "ui designer",
                "graphic designer",
                "visual designer",
            ],
        }
    }
}

/// Canonical job record flowing from adapters into the store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NormalizedJob {
    pub id: String,
    pub source: JobSource,
    pub title: String,
    pub company: String,
    pub location: String,
    pub company_logo: Option<String>,
    pub salary_min: Option<i64>,
    pub salary_max: Option<i64>,
    pub salary_text: Option<String>,
    pub description: String,
    pub job_type: JobType,
    pub experience_level: ExperienceLevel,
    pub skills: Vec<String>,
    pub apply_url: Option<String>,
    pub posted_at: DateTime<Utc>,
    pub is_featured: bool,
}

impl NormalizedJob {
    /// Source-qualified id, e.g. `greenhouse-4012345`.
    pub fn qualified_id(source: JobSource, upstream_id: &str) -> String {
        format!("{}-{}", source.as_str(), upstream_id.trim())
    }
}

/// Adapter-side handoff before normalization. Every field except the
/// identity and title may be missing; `normalize` supplies the defaults.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct JobDraft {
    pub upstream_id: String,
    pub title: String,
    pub company: Option<String>,
    pub location: Option<String>,
    pub company_logo: Option<String>,
    /// Already annualized by the adapter.
    pub salary: SalaryRange,
    pub salary_text: Option<String>,
    /// Raw description; may contain markup.
    pub description: Option<String>,
    /// Explicit employment-type label from the upstream, if any.
    pub job_type_hint: Option<String>,
    pub tags: Vec<String>,
    pub apply_url: Option<String>,
    pub posted_at: Option<DateTime<Utc>>,
}

impl JobDraft {
    pub fn new(upstream_id: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            upstream_id: upstream_id.into(),
            title: title.into(),
            ..Default::default()
        }
    }

    /// Build the canonical record. Returns `None` only when the identity or
    /// title is blank; missing optional fields fall back to defaults.
    pub fn normalize(self, source: JobSource, fetched_at: DateTime<Utc>) -> Option<NormalizedJob> {
        let upstream_id = self.upstream_id.trim();
        let title = text::collapse_whitespace(&text::strip_html(&self.title));
        if upstream_id.is_empty() || title.is_empty() {
            return None;
        }

        let company = self
            .company
            .map(|c| text::collapse_whitespace(&text::strip_html(&c)))
            .filter(|c| !c.is_empty())
            .unwrap_or_else(|| UNKNOWN_COMPANY.to_string());
        let location = self
            .location
            .map(|l| text::collapse_whitespace(&l))
            .filter(|l| !l.is_empty())
            .unwrap_or_else(|| DEFAULT_LOCATION.to_string());

        let description = self
            .description
            .as_deref()
            .map(text::strip_html)
            .map(|d| text::truncate_chars(&d, text::DESCRIPTION_MAX_CHARS))
            .unwrap_or_default();

        let job_type = match self.job_type_hint.as_deref() {
            Some(hint) if !hint.trim().is_empty() => text::parse_job_type(hint),
            _ => text::parse_job_type(&format!("{title} {description}")),
        };
        let experience_level = text::parse_experience_level(&title, Some(&description));
        let skills = text::skills_from(&description, &self.tags);

        let company_logo = self
            .company_logo
            .filter(|u| u.starts_with("http"))
            .or_else(|| text::company_logo_url(&company));

        let salary = self.salary.ordered();
        let salary_text = self
            .salary_text
            .map(|s| text::collapse_whitespace(&s))
            .filter(|s| !s.is_empty());

        let apply_url = self
            .apply_url
            .map(|u| u.trim().to_string())
            .filter(|u| u.starts_with("http"));

        Some(NormalizedJob {
            id: NormalizedJob::qualified_id(source, upstream_id),
            source,
            title,
            company,
            location,
            company_logo,
            salary_min: salary.min,
            salary_max: salary.max,
            salary_text,
            description,
            job_type,
            experience_level,
            skills,
            apply_url,
            posted_at: self.posted_at.unwrap_or(fetched_at),
            is_featured: false,
        })
    }
}
