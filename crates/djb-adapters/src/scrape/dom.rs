//! Pure DOM queries over HTML strings, one per orchestrator state.

use scraper::{ElementRef, Html, Selector};
use url::Url;

use super::ScrapeError;

/// Descriptions shorter than this are treated as navigation chrome.
pub const MIN_DESCRIPTION_CHARS: usize = 120;

#[derive(Debug, Clone, Copy)]
pub struct CardSelectors {
    pub item: &'static str,
    pub title: &'static str,
    pub company: &'static str,
    pub location: &'static str,
    pub link: &'static str,
}

/// One job as seen on a listing page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListingCard {
    pub id: String,
    pub title: String,
    pub company: Option<String>,
    pub location: Option<String>,
    pub url: String,
}

fn selector(css: &str) -> Result<Selector, ScrapeError> {
    Selector::parse(css).map_err(|e| ScrapeError::Selector(format!("{css}: {e}")))
}

fn text_or_none(value: String) -> Option<String> {
    let collapsed = value.split_whitespace().collect::<Vec<_>>().join(" ");
    if collapsed.is_empty() {
        None
    } else {
        Some(collapsed)
    }
}

fn first_text(scope: ElementRef<'_>, sel: &Selector) -> Option<String> {
    scope
        .select(sel)
        .next()
        .and_then(|n| text_or_none(n.text().collect::<String>()))
}

/// Stable id from a job URL: the first run of 4+ digits in the path, else
/// the last path segment.
pub fn card_id_from_url(url: &Url) -> Option<String> {
    let path = url.path();
    let mut digits = String::new();
    for ch in path.chars() {
        if ch.is_ascii_digit() {
            digits.push(ch);
        } else if digits.len() >= 4 {
            break;
        } else {
            digits.clear();
        }
    }
    if digits.len() >= 4 {
        return Some(digits);
    }
    url.path_segments()?
        .filter(|s| !s.is_empty())
        .last()
        .map(str::to_string)
}

/// Listing cards in page order. Cards without a title or link are skipped.
pub fn listing_cards(html: &str, page_url: &str, sels: &CardSelectors) -> Result<Vec<ListingCard>, ScrapeError> {
    let base = Url::parse(page_url).map_err(|e| ScrapeError::Navigation(format!("{page_url}: {e}")))?;
    let document = Html::parse_document(html);
    let item_sel = selector(sels.item)?;
    let title_sel = selector(sels.title)?;
    let company_sel = selector(sels.company)?;
    let location_sel = selector(sels.location)?;
    let link_sel = selector(sels.link)?;

    let mut cards = Vec::new();
    for node in document.select(&item_sel) {
        let Some(title) = first_text(node, &title_sel) else {
            continue;
        };
        let href = node
            .select(&link_sel)
            .next()
            .and_then(|a| a.value().attr("href"))
            .or_else(|| node.value().attr("href"));
        let Some(url) = href.and_then(|h| base.join(h.trim()).ok()) else {
            continue;
        };
        let Some(id) = card_id_from_url(&url) else {
            continue;
        };
        cards.push(ListingCard {
            id,
            title,
            company: first_text(node, &company_sel),
            location: first_text(node, &location_sel),
            url: url.to_string(),
        });
    }
    Ok(cards)
}

/// Absolute URL of the "next page" link, if any.
pub fn next_page_url(html: &str, page_url: &str, next_selector: &str) -> Result<Option<String>, ScrapeError> {
    let base = Url::parse(page_url).map_err(|e| ScrapeError::Navigation(format!("{page_url}: {e}")))?;
    let document = Html::parse_document(html);
    let sel = selector(next_selector)?;
    Ok(document
        .select(&sel)
        .filter_map(|a| a.value().attr("href"))
        .filter_map(|href| base.join(href.trim()).ok())
        .find(|url| url.as_str() != page_url)
        .map(|url| url.to_string()))
}

fn same_site(a: &Url, b: &Url) -> bool {
    match (a.host_str(), b.host_str()) {
        (Some(x), Some(y)) => {
            let x = x.trim_start_matches("www.");
            let y = y.trim_start_matches("www.");
            x == y || x.ends_with(&format!(".{y}")) || y.ends_with(&format!(".{x}"))
        }
        _ => false,
    }
}

/// Outbound apply link on an intermediate landing page: an http(s) anchor
/// pointing off-site. Anchors that say "apply" win over any other
/// off-site link.
pub fn outbound_apply_link(html: &str, page_url: &str) -> Result<Option<String>, ScrapeError> {
    let base = Url::parse(page_url).map_err(|e| ScrapeError::Navigation(format!("{page_url}: {e}")))?;
    let document = Html::parse_document(html);
    let anchors = selector("a[href]")?;

    let mut fallback = None;
    for a in document.select(&anchors) {
        let Some(url) = a
            .value()
            .attr("href")
            .and_then(|h| base.join(h.trim()).ok())
        else {
            continue;
        };
        if !matches!(url.scheme(), "http" | "https") || same_site(&url, &base) {
            continue;
        }
        let label = a.text().collect::<String>().to_lowercase();
        let href_lower = url.as_str().to_lowercase();
        if label.contains("apply") || href_lower.contains("apply") {
            return Ok(Some(url.to_string()));
        }
        if fallback.is_none() && (href_lower.contains("job") || href_lower.contains("career")) {
            fallback = Some(url.to_string());
        }
    }
    Ok(fallback)
}

/// Description via an ordered selector chain. The first candidate whose
/// text clears `MIN_DESCRIPTION_CHARS` wins; the last resort joins every
/// paragraph and list item on the page.
pub fn extract_description(html: &str, selectors: &[&str]) -> Result<Option<String>, ScrapeError> {
    let document = Html::parse_document(html);
    let long_enough = |text: &str| text.chars().count() >= MIN_DESCRIPTION_CHARS;

    for css in selectors {
        let sel = selector(css)?;
        for node in document.select(&sel) {
            let text = node
                .text()
                .map(str::trim)
                .filter(|t| !t.is_empty())
                .collect::<Vec<_>>()
                .join("\n");
            if long_enough(&text) {
                return Ok(Some(text));
            }
        }
    }

    let blocks = selector("p, li")?;
    let text = document
        .select(&blocks)
        .filter_map(|n| text_or_none(n.text().collect::<String>()))
        .collect::<Vec<_>>()
        .join("\n");
    Ok(long_enough(&text).then_some(text))
}

/// First attribute value for `css`, resolved against the page URL.
pub fn first_link(html: &str, page_url: &str, css: &str) -> Result<Option<String>, ScrapeError> {
    let base = Url::parse(page_url).map_err(|e| ScrapeError::Navigation(format!("{page_url}: {e}")))?;
    let document = Html::parse_document(html);
    let sel = selector(css)?;
    Ok(document
        .select(&sel)
        .filter_map(|a| a.value().attr("href"))
        .find_map(|href| base.join(href.trim()).ok())
        .map(|url| url.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    const CARDS: CardSelectors = CardSelectors {
        item: "li.job",
        title: ".title",
        company: ".company",
        location: ".location",
        link: "a",
    };

    #[test]
    fn cards_resolve_relative_links_and_skip_incomplete_items() {
        let html = r#"
            <ul>
              <li class="job"><a href="/jobs/12345-ux-designer"><span class="title"> UX
                Designer </span></a><span class="company">Acme</span></li>
              <li class="job"><a href="/jobs/999-x"><span class="title"></span></a></li>
              <li class="job"><span class="title">No link</span></li>
            </ul>"#;
        let cards = listing_cards(html, "https://dribbble.com/jobs", &CARDS).unwrap();
        assert_eq!(cards.len(), 1);
        assert_eq!(cards[0].id, "12345");
        assert_eq!(cards[0].title, "UX Designer");
        assert_eq!(cards[0].company.as_deref(), Some("Acme"));
        assert_eq!(cards[0].location, None);
        assert_eq!(cards[0].url, "https://dribbble.com/jobs/12345-ux-designer");
    }

    #[test]
    fn outbound_link_ignores_same_site_anchors() {
        let html = r#"
            <a href="/jobs">Back to jobs</a>
            <a href="https://cdn.dribbble.com/apply">Same site</a>
            <a href="https://acme.test/careers/42">Careers page</a>
            <a href="https://boards.greenhouse.io/acme/jobs/42">Apply now</a>"#;
        let link = outbound_apply_link(html, "https://dribbble.com/jobs/12345").unwrap();
        assert_eq!(link.as_deref(), Some("https://boards.greenhouse.io/acme/jobs/42"));

        let no_apply = r#"<a href="https://acme.test/careers/42">Careers</a>"#;
        let link = outbound_apply_link(no_apply, "https://dribbble.com/jobs/12345").unwrap();
        assert_eq!(link.as_deref(), Some("https://acme.test/careers/42"));
    }

    #[test]
    fn description_fallback_chain_skips_short_containers() {
        let long = "We are looking for a product designer to own onboarding, run research \
                    with customers and ship polished flows in Figma every single week.";
        let html = format!(
            r#"<div class="job-description">Apply</div>
               <article><p>{long}</p></article>"#
        );
        let text = extract_description(&html, &[".job-description", "article"]).unwrap();
        assert_eq!(text.as_deref(), Some(long));

        let scattered = format!("<nav>Home</nav><p>{long}</p><ul><li>Figma</li></ul>");
        let text = extract_description(&scattered, &[".missing"]).unwrap().unwrap();
        assert!(text.ends_with("Figma"));

        assert_eq!(extract_description("<p>Too short</p>", &["main"]).unwrap(), None);
    }

    #[test]
    fn next_link_must_leave_the_current_page() {
        let html = r#"<a class="next" href="?page=1">1</a><a class="next" href="?page=2">Next</a>"#;
        let next = next_page_url(html, "https://www.coroflot.com/design-jobs?page=1", "a.next").unwrap();
        assert_eq!(next.as_deref(), Some("https://www.coroflot.com/design-jobs?page=2"));
    }
}
