//! Browser-driven sources. A run walks a fixed state sequence
//! (`Launch → Navigate → Extract → Paginate → DetailFetch → Closed`) over a
//! [`driver::BrowserDriver`]; every page read goes through the pure queries
//! in [`dom`].

use std::collections::VecDeque;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use djb_core::{passes_title_prefilter, JobDraft, JobSource};
use djb_storage::HttpFetcher;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, info_span, warn, Instrument};

use crate::{AdapterContext, AdapterError, AdapterOutput, Crawlability, JobCollector, SourceAdapter};

pub mod dom;
pub mod driver;
pub mod sites;

use dom::{CardSelectors, ListingCard};
use driver::{BrowserDriver, ChromeDriver, HttpPageDriver};

#[derive(Debug, Error)]
pub enum ScrapeError {
    #[error("browser launch failed: {0}")]
    Launch(String),
    #[error("navigation failed: {0}")]
    Navigation(String),
    #[error("timed out waiting for selector {0}")]
    SelectorTimeout(String),
    #[error("invalid selector {0}")]
    Selector(String),
    #[error("browser error: {0}")]
    Browser(String),
    #[error("browser step timed out: {0}")]
    Timeout(String),
}

impl ScrapeError {
    /// Errors after which the session cannot continue. Everything else is
    /// scoped to one page or one item.
    pub fn is_fatal(&self) -> bool {
        matches!(self, ScrapeError::Launch(_) | ScrapeError::Browser(_) | ScrapeError::Selector(_))
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScrapeMode {
    #[default]
    Full,
    /// Listing data only; no detail pages.
    Quick,
}

impl FromStr for ScrapeMode {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "full" => Ok(ScrapeMode::Full),
            "quick" => Ok(ScrapeMode::Quick),
            other => Err(format!("unknown scrape mode `{other}` (expected full or quick)")),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScrapeDriverKind {
    #[default]
    Chrome,
    Http,
}

impl FromStr for ScrapeDriverKind {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "chrome" => Ok(ScrapeDriverKind::Chrome),
            "http" => Ok(ScrapeDriverKind::Http),
            other => Err(format!("unknown scrape driver `{other}` (expected chrome or http)")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScrapeState {
    Launch,
    Navigate,
    Extract,
    Paginate,
    DetailFetch,
    Closed,
}

impl fmt::Display for ScrapeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ScrapeState::Launch => "launch",
            ScrapeState::Navigate => "navigate",
            ScrapeState::Extract => "extract",
            ScrapeState::Paginate => "paginate",
            ScrapeState::DetailFetch => "detail_fetch",
            ScrapeState::Closed => "closed",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pagination {
    /// Lazy-loading list; scroll until nothing new appears.
    Scroll { max_rounds: usize },
    /// Classic "next" anchor.
    NextLink { selector: &'static str, max_pages: usize },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DetailHops {
    /// The card links straight to the posting.
    OneHop,
    /// The card links to a landing page that carries the outbound apply link.
    TwoHop,
}

#[derive(Debug, Clone)]
pub struct SiteProfile {
    pub source: JobSource,
    pub listing_url: String,
    pub wait_selector: &'static str,
    pub card: CardSelectors,
    pub pagination: Pagination,
    pub detail: DetailHops,
    pub description_selectors: &'static [&'static str],
    /// One-hop sites: the apply anchor on the detail page.
    pub apply_selector: Option<&'static str>,
}

/// What the detail phase learned about one card.
#[derive(Debug, Default)]
struct DetailPage {
    description: Option<String>,
    apply_url: Option<String>,
}

struct ScrapeRun<'a> {
    site: &'a SiteProfile,
    ctx: &'a AdapterContext,
    state: ScrapeState,
    page_url: String,
    page_html: String,
    pages_seen: usize,
    /// Extracted but not yet accepted.
    cards: VecDeque<ListingCard>,
    collector: JobCollector,
}

impl<'a> ScrapeRun<'a> {
    fn new(site: &'a SiteProfile, ctx: &'a AdapterContext) -> Self {
        Self {
            site,
            ctx,
            state: ScrapeState::Launch,
            page_url: site.listing_url.clone(),
            page_html: String::new(),
            pages_seen: 0,
            cards: VecDeque::new(),
            collector: JobCollector::new(site.source, ctx.fetched_at),
        }
    }

    fn enter(&mut self, state: ScrapeState) {
        debug!(source = %self.site.source, from = %self.state, to = %state, "scrape state");
        self.state = state;
    }

    fn cap_reached(&self) -> bool {
        self.cards.len() >= self.ctx.scrape_item_cap
    }

    fn step_timeout(&self) -> Duration {
        self.ctx.budget.request_timeout(self.ctx.request_timeout)
    }

    async fn drive<D: BrowserDriver>(&mut self, driver: &mut D) -> Result<(), ScrapeError> {
        self.launch(driver).await?;
        self.navigate(driver).await?;
        loop {
            let added = match self.extract(driver).await {
                Ok(added) => added,
                Err(err) if !err.is_fatal() && self.pages_seen > 0 => {
                    self.collector.fail(format!("page {}", self.page_url), err);
                    break;
                }
                Err(err) => return Err(err),
            };
            if self.cap_reached() || self.ctx.budget.is_exhausted() {
                break;
            }
            if !self.paginate(driver, added).await? {
                break;
            }
        }
        info!(source = %self.site.source, cards = self.cards.len(), pages = self.pages_seen, "listing extracted");
        self.detail_fetch(driver).await
    }

    async fn launch<D: BrowserDriver>(&mut self, driver: &mut D) -> Result<(), ScrapeError> {
        self.enter(ScrapeState::Launch);
        driver.launch().await
    }

    async fn navigate<D: BrowserDriver>(&mut self, driver: &mut D) -> Result<(), ScrapeError> {
        self.enter(ScrapeState::Navigate);
        driver
            .navigate(&self.page_url, Some(self.site.wait_selector), self.step_timeout())
            .await
    }

    /// Reads the current page and records unseen cards up to the item cap.
    /// Returns how many were new.
    async fn extract<D: BrowserDriver>(&mut self, driver: &mut D) -> Result<usize, ScrapeError> {
        self.enter(ScrapeState::Extract);
        self.page_html = driver.content().await?;
        self.pages_seen += 1;
        let mut added = 0;
        for card in dom::listing_cards(&self.page_html, &self.page_url, &self.site.card)? {
            if self.cap_reached() {
                break;
            }
            if self.collector.first_sighting(&card.id) {
                self.cards.push_back(card);
                added += 1;
            }
        }
        Ok(added)
    }

    /// Moves to more listings. Returns `false` when there are none.
    async fn paginate<D: BrowserDriver>(&mut self, driver: &mut D, last_added: usize) -> Result<bool, ScrapeError> {
        self.enter(ScrapeState::Paginate);
        match self.site.pagination {
            Pagination::Scroll { max_rounds } => {
                if last_added == 0 || self.pages_seen > max_rounds {
                    return Ok(false);
                }
                if !self.ctx.pause().await {
                    return Ok(false);
                }
                match driver.scroll().await {
                    Err(err) if !err.is_fatal() => {
                        self.collector.fail(format!("scroll {}", self.page_url), err);
                        Ok(false)
                    }
                    other => other,
                }
            }
            Pagination::NextLink { selector, max_pages } => {
                if self.pages_seen >= max_pages {
                    return Ok(false);
                }
                let Some(next) = dom::next_page_url(&self.page_html, &self.page_url, selector)? else {
                    return Ok(false);
                };
                if !self.ctx.pause().await {
                    return Ok(false);
                }
                self.page_url = next;
                match self.navigate(driver).await {
                    Ok(()) => Ok(true),
                    Err(err) if !err.is_fatal() => {
                        self.collector.fail(format!("page {}", self.page_url), err);
                        Ok(false)
                    }
                    Err(err) => Err(err),
                }
            }
        }
    }

    async fn detail_fetch<D: BrowserDriver>(&mut self, driver: &mut D) -> Result<(), ScrapeError> {
        self.enter(ScrapeState::DetailFetch);
        while let Some(card) = self.cards.pop_front() {
            let wants_detail = self.ctx.scrape_mode == ScrapeMode::Full
                && passes_title_prefilter(&card.title);
            if !wants_detail {
                self.collector.accept(listing_draft(card, DetailPage::default()));
                continue;
            }
            if !self.ctx.pause().await {
                debug!(source = %self.site.source, "budget exhausted; keeping listing data");
                self.cards.push_front(card);
                self.keep_listing_data();
                break;
            }

            match self.detail_page(driver, &card).await {
                Ok(detail) => {
                    self.collector.accept(listing_draft(card, detail));
                }
                Err(err) if !err.is_fatal() => {
                    self.collector.fail(format!("detail {}", card.url), err);
                    self.collector.accept(listing_draft(card, DetailPage::default()));
                }
                Err(err) => {
                    self.cards.push_front(card);
                    return Err(err);
                }
            }
        }
        Ok(())
    }

    /// Accepts every pending card with listing data only.
    fn keep_listing_data(&mut self) -> usize {
        let pending = self.cards.len();
        while let Some(card) = self.cards.pop_front() {
            self.collector.accept(listing_draft(card, DetailPage::default()));
        }
        pending
    }

    async fn detail_page<D: BrowserDriver>(&self, driver: &mut D, card: &ListingCard) -> Result<DetailPage, ScrapeError> {
        let timeout = self.step_timeout();
        driver.navigate(&card.url, None, timeout).await?;
        let html = driver.content().await?;

        match self.site.detail {
            DetailHops::OneHop => {
                let apply_url = match self.site.apply_selector {
                    Some(css) => dom::first_link(&html, &card.url, css)?,
                    None => None,
                };
                Ok(DetailPage {
                    description: dom::extract_description(&html, self.site.description_selectors)?,
                    apply_url,
                })
            }
            DetailHops::TwoHop => {
                let Some(outbound) = dom::outbound_apply_link(&html, &card.url)? else {
                    return Ok(DetailPage {
                        description: dom::extract_description(&html, self.site.description_selectors)?,
                        apply_url: None,
                    });
                };
                driver.navigate(&outbound, None, timeout).await?;
                let target = driver.content().await?;
                let description = match dom::extract_description(&target, self.site.description_selectors)? {
                    Some(text) => Some(text),
                    None => dom::extract_description(&html, self.site.description_selectors)?,
                };
                Ok(DetailPage {
                    description,
                    apply_url: Some(outbound),
                })
            }
        }
    }
}

fn listing_draft(card: ListingCard, detail: DetailPage) -> JobDraft {
    let mut draft = JobDraft::new(card.id, card.title);
    draft.company = card.company;
    draft.location = card.location;
    draft.description = detail.description;
    draft.apply_url = detail.apply_url.or(Some(card.url));
    draft
}

/// Runs one scrape session to completion. The driver is closed on every
/// exit path, and items extracted before a fatal error are still returned.
pub async fn run_scrape<D: BrowserDriver>(site: &SiteProfile, driver: &mut D, ctx: &AdapterContext) -> AdapterOutput {
    let mut run = ScrapeRun::new(site, ctx);
    let span = info_span!("scrape", source = %site.source, mode = ?ctx.scrape_mode);
    let outcome = run.drive(driver).instrument(span).await;
    if let Err(err) = outcome {
        let state = run.state;
        run.collector.fail(format!("{state} state"), err);
        let kept = run.keep_listing_data();
        if kept > 0 {
            warn!(source = %site.source, kept, "run ended early; keeping listing data for pending cards");
        }
    }
    driver.close().await;
    run.enter(ScrapeState::Closed);

    let output = run.collector.finish();
    info!(
        source = %site.source,
        fetched = output.fetched,
        jobs = output.jobs.len(),
        failures = output.failures.len(),
        "scrape finished"
    );
    output
}

#[derive(Debug, Clone)]
pub struct ScrapeAdapter {
    site: SiteProfile,
    driver: ScrapeDriverKind,
}

impl ScrapeAdapter {
    pub fn new(site: SiteProfile, driver: ScrapeDriverKind) -> Self {
        Self { site, driver }
    }

    pub fn site(&self) -> &SiteProfile {
        &self.site
    }
}

#[async_trait]
impl SourceAdapter for ScrapeAdapter {
    fn source(&self) -> JobSource {
        self.site.source
    }

    fn crawlability(&self) -> Crawlability {
        Crawlability::Browser
    }

    async fn fetch(&self, http: &HttpFetcher, ctx: &AdapterContext) -> Result<AdapterOutput, AdapterError> {
        let output = match self.driver {
            ScrapeDriverKind::Chrome => {
                let mut driver = ChromeDriver::new(ctx.request_timeout.max(Duration::from_secs(30)));
                run_scrape(&self.site, &mut driver, ctx).await
            }
            ScrapeDriverKind::Http => {
                let mut driver = HttpPageDriver::new(http.clone(), self.site.source.as_str());
                run_scrape(&self.site, &mut driver, ctx).await
            }
        };
        Ok(output)
    }
}
