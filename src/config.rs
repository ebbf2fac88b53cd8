use anyhow::{Context, Result};
use serde::Deserialize;
use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub store: StoreConfig,
    #[serde(default)]
    pub publish: PublishConfig,
    #[serde(default)]
    pub permissions: PermissionsConfig,
    #[serde(default)]
    pub notifications: NotificationsConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct StoreConfig {
    /// Directory holding `collections/`, `master/`, `published-collections/`, `archive/`.
    pub root: PathBuf,
    #[serde(default)]
    pub exclude_globs: Vec<String>,
}

impl StoreConfig {
    pub fn collections_dir(&self) -> PathBuf {
        self.root.join("collections")
    }

    pub fn master_dir(&self) -> PathBuf {
        self.root.join("master")
    }

    pub fn published_collections_dir(&self) -> PathBuf {
        self.root.join("published-collections")
    }

    pub fn archive_dir(&self) -> PathBuf {
        self.root.join("archive")
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct PublishConfig {
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default)]
    pub targets: Vec<TargetConfig>,
}

impl Default for PublishConfig {
    fn default() -> Self {
        Self {
            max_concurrency: default_max_concurrency(),
            timeout_secs: default_timeout_secs(),
            targets: Vec::new(),
        }
    }
}

fn default_max_concurrency() -> usize {
    16
}
fn default_timeout_secs() -> u64 {
    60
}

#[derive(Debug, Deserialize, Clone)]
pub struct TargetConfig {
    pub url: String,
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct PermissionsConfig {
    /// Actors allowed to edit and view every collection.
    #[serde(default)]
    pub editors: Vec<String>,
    /// Viewer teams: team name → member actors.
    #[serde(default)]
    pub teams: BTreeMap<String, Vec<String>>,
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct NotificationsConfig {
    #[serde(default)]
    pub webhook_url: Option<String>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct SchedulerConfig {
    #[serde(default = "default_scheduler_enabled")]
    pub enabled: bool,
    /// How often `serve` rescans the store for new scheduled collections.
    #[serde(default = "default_rescan_secs")]
    pub rescan_secs: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            enabled: default_scheduler_enabled(),
            rescan_secs: default_rescan_secs(),
        }
    }
}

fn default_scheduler_enabled() -> bool {
    true
}
fn default_rescan_secs() -> u64 {
    60
}

impl Config {
    /// Config rooted at `root` with no publish targets and no editors.
    pub fn minimal(root: &Path) -> Self {
        Self {
            store: StoreConfig {
                root: root.to_path_buf(),
                exclude_globs: Vec::new(),
            },
            publish: PublishConfig::default(),
            permissions: PermissionsConfig::default(),
            notifications: NotificationsConfig::default(),
            scheduler: SchedulerConfig::default(),
        }
    }
}

fn is_http_url(url: &str) -> bool {
    url.starts_with("http://") || url.starts_with("https://")
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;

    validate(&config)?;
    Ok(config)
}

pub fn validate(config: &Config) -> Result<()> {
    if config.publish.max_concurrency == 0 {
        anyhow::bail!("publish.max_concurrency must be > 0");
    }

    if config.scheduler.rescan_secs == 0 {
        anyhow::bail!("scheduler.rescan_secs must be > 0");
    }

    let mut seen = HashSet::new();
    for target in &config.publish.targets {
        if !is_http_url(&target.url) {
            anyhow::bail!(
                "publish target url must start with http:// or https://: '{}'",
                target.url
            );
        }
        if !seen.insert(target.url.trim_end_matches('/')) {
            anyhow::bail!("duplicate publish target url: '{}'", target.url);
        }
    }

    if let Some(url) = &config.notifications.webhook_url {
        if !is_http_url(url) {
            anyhow::bail!("notifications.webhook_url must be an http(s) url: '{}'", url);
        }
    }

    Ok(())
}
