//! Browser backends the orchestrator drives.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use djb_storage::{FetchRequest, HttpFetcher};
use headless_chrome::{Browser, LaunchOptions, Tab};
use tracing::{debug, warn};

use super::ScrapeError;

#[async_trait]
pub trait BrowserDriver: Send {
    async fn launch(&mut self) -> Result<(), ScrapeError>;

    /// Load `url` and, when given, wait up to `timeout` for `wait_for` to appear.
    async fn navigate(&mut self, url: &str, wait_for: Option<&str>, timeout: Duration) -> Result<(), ScrapeError>;

    /// Rendered HTML of the current page.
    async fn content(&mut self) -> Result<String, ScrapeError>;

    /// Scroll to the bottom so lazy listings load more. Returns `false` when
    /// the backend cannot load more content.
    async fn scroll(&mut self) -> Result<bool, ScrapeError>;

    /// Release every resource. Safe to call more than once.
    async fn close(&mut self);
}

/// Headless Chrome. Every blocking CDP call runs on the blocking pool and
/// is time-boxed. A timed-out call keeps running on its thread, so the tab it
/// holds is abandoned and later steps use a fresh one.
pub struct ChromeDriver {
    browser: Option<Browser>,
    tab: Option<Arc<Tab>>,
    /// Set when a hung tab could not be replaced; every later step fails fatally.
    abandoned: Option<String>,
    settle: Duration,
    step_timeout: Duration,
}

impl ChromeDriver {
    pub fn new(step_timeout: Duration) -> Self {
        Self {
            browser: None,
            tab: None,
            abandoned: None,
            settle: Duration::from_millis(1200),
            step_timeout,
        }
    }

    fn tab(&self) -> Result<Arc<Tab>, ScrapeError> {
        if let Some(reason) = &self.abandoned {
            return Err(ScrapeError::Browser(format!("session abandoned: {reason}")));
        }
        self.tab
            .clone()
            .ok_or_else(|| ScrapeError::Browser("browser not launched".to_string()))
    }

    /// Runs one CDP step on the current tab. On timeout the tab is swapped out
    /// before the error is returned.
    async fn step<T, F>(&mut self, what: &str, timeout: Duration, f: F) -> Result<T, ScrapeError>
    where
        T: Send + 'static,
        F: FnOnce(Arc<Tab>) -> Result<T, ScrapeError> + Send + 'static,
    {
        let tab = self.tab()?;
        let result = time_boxed(what, timeout, move || f(tab)).await;
        if matches!(result, Err(ScrapeError::Timeout(_))) {
            self.replace_hung_tab(what).await;
        }
        result
    }

    async fn replace_hung_tab(&mut self, what: &str) {
        if let Some(hung) = self.tab.take() {
            // Not awaited: the hung call may still hold the tab.
            let _ = tokio::task::spawn_blocking(move || {
                let _ = hung.stop_loading();
                let _ = hung.close(false);
            });
        }
        let Some(browser) = self.browser.clone() else {
            self.abandoned = Some(format!("{what} hung before launch"));
            return;
        };
        let opened = time_boxed("new tab", self.step_timeout, move || {
            browser.new_tab().map_err(|e| ScrapeError::Browser(e.to_string()))
        })
        .await;
        match opened {
            Ok(tab) => {
                warn!(step = what, "replaced hung tab");
                self.tab = Some(tab);
            }
            Err(err) => {
                warn!(step = what, error = %err, "could not replace hung tab");
                self.abandoned = Some(format!("{what} hung and no new tab could be opened: {err}"));
            }
        }
    }
}

async fn time_boxed<T, F>(what: &str, timeout: Duration, f: F) -> Result<T, ScrapeError>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T, ScrapeError> + Send + 'static,
{
    match tokio::time::timeout(timeout, tokio::task::spawn_blocking(f)).await {
        Ok(Ok(result)) => result,
        Ok(Err(join)) => Err(ScrapeError::Browser(format!("{what}: {join}"))),
        Err(_) => Err(ScrapeError::Timeout(what.to_string())),
    }
}

#[async_trait]
impl BrowserDriver for ChromeDriver {
    async fn launch(&mut self) -> Result<(), ScrapeError> {
        let (browser, tab) = time_boxed("launch", self.step_timeout, || {
                let options = LaunchOptions {
                    headless: true,
                    sandbox: false,
                    idle_browser_timeout: Duration::from_secs(60),
                    ..Default::default()
                };
                let browser = Browser::new(options).map_err(|e| ScrapeError::Launch(e.to_string()))?;
                let tab = browser.new_tab().map_err(|e| ScrapeError::Launch(e.to_string()))?;
                Ok((browser, tab))
            })
            .await?;
        self.browser = Some(browser);
        self.tab = Some(tab);
        self.abandoned = None;
        Ok(())
    }

    async fn navigate(&mut self, url: &str, wait_for: Option<&str>, timeout: Duration) -> Result<(), ScrapeError> {
        let url = url.to_string();
        let wait_for = wait_for.map(str::to_string);
        self.step("navigate", timeout, move |tab| {
            tab.navigate_to(&url)
                .and_then(|t| t.wait_until_navigated())
                .map_err(|e| ScrapeError::Navigation(format!("{url}: {e}")))?;
            if let Some(css) = wait_for {
                tab.wait_for_element_with_custom_timeout(&css, timeout)
                    .map_err(|_| ScrapeError::SelectorTimeout(css.clone()))?;
            }
            Ok(())
        })
        .await
    }

    async fn content(&mut self) -> Result<String, ScrapeError> {
        let timeout = self.step_timeout;
        self.step("content", timeout, move |tab| {
            tab.get_content().map_err(|e| ScrapeError::Browser(e.to_string()))
        })
        .await
    }

    async fn scroll(&mut self) -> Result<bool, ScrapeError> {
        let timeout = self.step_timeout;
        self.step("scroll", timeout, move |tab| {
            tab.evaluate("window.scrollTo(0, document.body.scrollHeight)", false)
                .map(|_| ())
                .map_err(|e| ScrapeError::Browser(e.to_string()))
        })
        .await?;
        tokio::time::sleep(self.settle).await;
        Ok(true)
    }

    async fn close(&mut self) {
        if let Some(tab) = self.tab.take() {
            let _ = tokio::task::spawn_blocking(move || tab.close(true)).await;
        }
        // Dropping the handle terminates the Chrome process.
        if let Some(browser) = self.browser.take() {
            let _ = tokio::task::spawn_blocking(move || drop(browser)).await;
        }
        debug!("chrome closed");
    }
}

/// Plain GETs through the shared fetcher; no JavaScript, no scrolling.
pub struct HttpPageDriver {
    http: HttpFetcher,
    source_id: &'static str,
    current: Option<String>,
}

impl HttpPageDriver {
    pub fn new(http: HttpFetcher, source_id: &'static str) -> Self {
        Self {
            http,
            source_id,
            current: None,
        }
    }
}

#[async_trait]
impl BrowserDriver for HttpPageDriver {
    async fn launch(&mut self) -> Result<(), ScrapeError> {
        Ok(())
    }

    async fn navigate(&mut self, url: &str, _wait_for: Option<&str>, timeout: Duration) -> Result<(), ScrapeError> {
        let request = FetchRequest::get(url).timeout(timeout);
        let body = self
            .http
            .get_text(self.source_id, &request)
            .await
            .map_err(|e| ScrapeError::Navigation(format!("{url}: {e}")))?;
        self.current = Some(body);
        Ok(())
    }

    async fn content(&mut self) -> Result<String, ScrapeError> {
        self.current
            .clone()
            .ok_or_else(|| ScrapeError::Browser("no page loaded".to_string()))
    }

    async fn scroll(&mut self) -> Result<bool, ScrapeError> {
        Ok(false)
    }

    async fn close(&mut self) {
        self.current = None;
    }
}

/// Serves canned HTML by URL. Each URL maps to one or more snapshots; every
/// `scroll` advances to the next snapshot, emulating lazy loading.
#[derive(Debug, Default)]
pub struct FixtureDriver {
    pages: HashMap<String, Vec<String>>,
    current: Option<(String, usize)>,
    launched: bool,
    closed: bool,
    pub visited: Vec<String>,
}

impl FixtureDriver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn page(mut self, url: impl Into<String>, html: impl Into<String>) -> Self {
        self.pages.entry(url.into()).or_default().push(html.into());
        self
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }
}

#[async_trait]
impl BrowserDriver for FixtureDriver {
    async fn launch(&mut self) -> Result<(), ScrapeError> {
        self.launched = true;
        Ok(())
    }

    async fn navigate(&mut self, url: &str, _wait_for: Option<&str>, _timeout: Duration) -> Result<(), ScrapeError> {
        if !self.launched {
            return Err(ScrapeError::Browser("browser not launched".to_string()));
        }
        self.visited.push(url.to_string());
        if !self.pages.contains_key(url) {
            return Err(ScrapeError::Navigation(format!("{url}: 404 in fixture set")));
        }
        self.current = Some((url.to_string(), 0));
        Ok(())
    }

    async fn content(&mut self) -> Result<String, ScrapeError> {
        let (url, idx) = self
            .current
            .as_ref()
            .ok_or_else(|| ScrapeError::Browser("no page loaded".to_string()))?;
        self.pages
            .get(url)
            .and_then(|snapshots| snapshots.get(*idx))
            .cloned()
            .ok_or_else(|| ScrapeError::Browser(format!("{url}: missing snapshot")))
    }

    async fn scroll(&mut self) -> Result<bool, ScrapeError> {
        let Some((url, idx)) = self.current.as_mut() else {
            return Ok(false);
        };
        let available = self.pages.get(url.as_str()).map_or(0, Vec::len);
        if *idx + 1 < available {
            *idx += 1;
            Ok(true)
        } else {
            Ok(false)
        }
    }

    async fn close(&mut self) {
        self.closed = true;
        self.current = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn hung_step_without_a_browser_abandons_the_session() {
        let mut driver = ChromeDriver::new(Duration::from_millis(50));
        driver.replace_hung_tab("navigate").await;

        let err = driver.content().await.unwrap_err();
        assert!(err.is_fatal());
        assert!(err.to_string().contains("session abandoned: navigate hung"));
    }

    #[tokio::test]
    async fn time_boxed_steps_report_timeouts_as_recoverable() {
        let err = time_boxed("content", Duration::from_millis(10), || {
            std::thread::sleep(Duration::from_millis(200));
            Ok(())
        })
        .await
        .unwrap_err();
        assert!(matches!(err, ScrapeError::Timeout(ref step) if step == "content"));
        assert!(!err.is_fatal());
    }

    #[tokio::test]
    async fn unlaunched_driver_refuses_steps() {
        let mut driver = ChromeDriver::new(Duration::from_secs(1));
        assert!(matches!(driver.scroll().await, Err(ScrapeError::Browser(_))));
    }
}
