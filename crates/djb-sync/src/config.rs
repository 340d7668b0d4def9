use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use djb_adapters::{BoardSpec, Crawlability, ScrapeDriverKind, SourceSettings};
use djb_core::{JobSource, SourceGroup};
use djb_storage::http::DEFAULT_USER_AGENT;
use djb_storage::HttpClientConfig;
use serde::Deserialize;
use tokio::fs;
use tracing::warn;

use crate::pipeline::RunSelection;

#[derive(Debug, Clone)]
pub struct SyncConfig {
    pub database_url: Option<String>,
    pub cron_secret: Option<String>,
    pub jsearch_api_key: Option<String>,
    pub user_agent: String,
    pub http_timeout_secs: u64,
    pub request_delay_ms: u64,
    pub run_budget_secs: u64,
    pub detail_fetch_cap: usize,
    pub scrape_item_cap: usize,
    pub scrape_driver: ScrapeDriverKind,
    pub web_port: u16,
    pub workspace_root: PathBuf,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self::from_lookup(|_| None)
    }
}

fn parsed_or<T: std::str::FromStr>(name: &str, raw: Option<String>, default: T) -> T {
    match raw {
        Some(value) => value.trim().parse().unwrap_or_else(|_| {
            warn!(variable = name, %value, "unparseable value, using default");
            default
        }),
        None => default,
    }
}

impl SyncConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Builds the config from any variable source; blank values count as unset.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let var = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());
        Self {
            database_url: var("DATABASE_URL"),
            cron_secret: var("CRON_SECRET"),
            jsearch_api_key: var("JSEARCH_API_KEY"),
            user_agent: var("DJB_USER_AGENT").unwrap_or_else(|| DEFAULT_USER_AGENT.to_string()),
            http_timeout_secs: parsed_or("DJB_HTTP_TIMEOUT_SECS", var("DJB_HTTP_TIMEOUT_SECS"), 15),
            request_delay_ms: parsed_or("DJB_REQUEST_DELAY_MS", var("DJB_REQUEST_DELAY_MS"), 1000),
            run_budget_secs: parsed_or("DJB_RUN_BUDGET_SECS", var("DJB_RUN_BUDGET_SECS"), 270),
            detail_fetch_cap: parsed_or("DJB_DETAIL_FETCH_CAP", var("DJB_DETAIL_FETCH_CAP"), 20),
            scrape_item_cap: parsed_or("DJB_SCRAPE_ITEM_CAP", var("DJB_SCRAPE_ITEM_CAP"), 15),
            scrape_driver: parsed_or("DJB_SCRAPE_DRIVER", var("DJB_SCRAPE_DRIVER"), ScrapeDriverKind::Chrome),
            web_port: parsed_or("DJB_WEB_PORT", var("DJB_WEB_PORT"), 8000),
            workspace_root: var("DJB_WORKSPACE_ROOT")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(".")),
        }
    }

    pub fn http_config(&self) -> HttpClientConfig {
        HttpClientConfig {
            timeout: Duration::from_secs(self.http_timeout_secs),
            user_agent: Some(self.user_agent.clone()),
            ..Default::default()
        }
    }

    pub fn run_budget(&self) -> Duration {
        Duration::from_secs(self.run_budget_secs)
    }

    pub fn registry_path(&self) -> PathBuf {
        self.workspace_root.join("sources.yaml")
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SourceConfig {
    pub source: JobSource,
    pub display_name: String,
    pub enabled: bool,
    pub group: SourceGroup,
    pub crawlability: Crawlability,
    #[serde(default)]
    pub boards: Vec<BoardSpec>,
    /// Overrides the upstream origin.
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default)]
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SourceRegistry {
    pub sources: Vec<SourceConfig>,
}

impl SourceRegistry {
    pub fn from_yaml(text: &str) -> Result<Self> {
        let registry: SourceRegistry = serde_yaml::from_str(text).context("parsing source registry")?;
        registry.validate()?;
        Ok(registry)
    }

    pub async fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)
            .await
            .with_context(|| format!("reading {}", path.display()))?;
        Self::from_yaml(&text).with_context(|| format!("loading {}", path.display()))
    }

    fn validate(&self) -> Result<()> {
        let mut seen = Vec::new();
        for entry in &self.sources {
            if seen.contains(&entry.source) {
                bail!("source {} is listed twice", entry.source);
            }
            seen.push(entry.source);
            if entry.group != entry.source.group() {
                bail!(
                    "source {} is in group {} but declares {}",
                    entry.source,
                    entry.source.group(),
                    entry.group
                );
            }
        }
        Ok(())
    }

    pub fn get(&self, source: JobSource) -> Option<&SourceConfig> {
        self.sources.iter().find(|s| s.source == source)
    }

    /// Entries matching the selection, disabled ones included, in registry order.
    pub fn matching(&self, selection: &RunSelection) -> Vec<&SourceConfig> {
        self.sources
            .iter()
            .filter(|s| selection.source.map_or(true, |wanted| wanted == s.source))
            .filter(|s| selection.group.map_or(true, |wanted| wanted == s.group))
            .collect()
    }

    pub fn selected(&self, selection: &RunSelection) -> Vec<&SourceConfig> {
        self.matching(selection).into_iter().filter(|s| s.enabled).collect()
    }

    pub fn settings_for(&self, entry: &SourceConfig, config: &SyncConfig) -> SourceSettings {
        SourceSettings {
            boards: entry.boards.clone(),
            api_key: match entry.source {
                JobSource::Jsearch => config.jsearch_api_key.clone(),
                _ => None,
            },
            base_url: entry.base_url.clone(),
            scrape_driver: config.scrape_driver,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn defaults_apply_when_unset_blank_or_invalid() {
        let config = SyncConfig::from_lookup(lookup(&[
            ("CRON_SECRET", "  "),
            ("DJB_HTTP_TIMEOUT_SECS", "soon"),
            ("DJB_SCRAPE_DRIVER", "HTTP"),
            ("DJB_SCRAPE_ITEM_CAP", "5"),
        ]));
        assert_eq!(config.cron_secret, None);
        assert_eq!(config.http_timeout_secs, 15);
        assert_eq!(config.request_delay_ms, 1000);
        assert_eq!(config.run_budget_secs, 270);
        assert_eq!(config.scrape_driver, ScrapeDriverKind::Http);
        assert_eq!(config.scrape_item_cap, 5);
        assert_eq!(config.web_port, 8000);
        assert_eq!(config.registry_path(), PathBuf::from("./sources.yaml"));
    }

    #[test]
    fn registry_rejects_group_mismatch() {
        let yaml = r#"
sources:
  - source: lever
    display_name: Lever
    enabled: true
    group: api
    crawlability: ats_feed
"#;
        let err = SourceRegistry::from_yaml(yaml).unwrap_err();
        assert!(format!("{err:#}").contains("lever is in group ats"));
    }

    #[tokio::test]
    async fn workspace_registry_loads_every_source() {
        let path = Path::new(env!("CARGO_MANIFEST_DIR")).join("../../sources.yaml");
        let registry = SourceRegistry::load(&path).await.expect("sources.yaml");
        for source in JobSource::ALL {
            let entry = registry.get(*source).unwrap_or_else(|| panic!("{source} missing"));
            assert_eq!(entry.group, source.group());
        }
        let ats = registry.get(JobSource::Greenhouse).expect("greenhouse");
        assert!(!ats.boards.is_empty());
    }

    #[tokio::test]
    async fn registry_loads_from_a_temp_workspace() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("sources.yaml");
        std::fs::write(
            &path,
            r#"
sources:
  - source: greenhouse
    display_name: Greenhouse
    enabled: true
    group: ats
    crawlability: ats_feed
    boards:
      - figma
      - { slug: linear, company: Linear }
  - source: dribbble
    display_name: Dribbble
    enabled: false
    group: scrape
    crawlability: browser
"#,
        )
        .expect("write");

        let registry = SourceRegistry::load(&path).await.expect("load");
        let selected = registry.selected(&RunSelection::default());
        assert_eq!(selected.len(), 1);
        assert_eq!(selected[0].boards[1].company(), "Linear");

        let config = SyncConfig::default();
        let settings = registry.settings_for(selected[0], &config);
        assert_eq!(settings.boards.len(), 2);
        assert!(settings.api_key.is_none());
    }
}
