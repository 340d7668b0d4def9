//! Site profiles for the browser-driven sources.

use djb_core::JobSource;

use super::dom::CardSelectors;
use super::{DetailHops, Pagination, SiteProfile};

pub const DRIBBBLE_BASE_URL: &str = "https://dribbble.com";
pub const COROFLOT_BASE_URL: &str = "https://www.coroflot.com";

fn origin(base: Option<&str>, default: &str) -> String {
    base.unwrap_or(default).trim_end_matches('/').to_string()
}

/// Dribbble's job board lazy-loads on scroll. Cards link to a Dribbble
/// landing page whose outbound "Apply" anchor leads to the employer.
pub fn dribbble(base: Option<&str>) -> SiteProfile {
    SiteProfile {
        source: JobSource::Dribbble,
        listing_url: format!("{}/jobs?location=Anywhere", origin(base, DRIBBBLE_BASE_URL)),
        wait_selector: "li.job-list-item",
        card: CardSelectors {
            item: "li.job-list-item",
            title: ".job-board-job-title",
            company: ".job-board-job-company",
            location: ".location-container",
            link: "a.job-link",
        },
        pagination: Pagination::Scroll { max_rounds: 4 },
        detail: DetailHops::TwoHop,
        description_selectors: &[
            ".job-description",
            "[data-qa='job-description']",
            "#content",
            "article",
            "main",
        ],
        apply_selector: None,
    }
}

/// Coroflot paginates with a "next" anchor; detail pages are on-site.
pub fn coroflot(base: Option<&str>) -> SiteProfile {
    SiteProfile {
        source: JobSource::Coroflot,
        listing_url: format!("{}/design-jobs", origin(base, COROFLOT_BASE_URL)),
        wait_selector: "div.job-listing",
        card: CardSelectors {
            item: "div.job-listing",
            title: ".job-title",
            company: ".job-company",
            location: ".job-location",
            link: "a.job-link",
        },
        pagination: Pagination::NextLink {
            selector: "a[rel='next']",
            max_pages: 3,
        },
        detail: DetailHops::OneHop,
        description_selectors: &[".job-description", "#job_description", "article", "main"],
        apply_selector: Some("a.apply-button"),
    }
}
