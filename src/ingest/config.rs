// src/ingest/config.rs
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};

use crate::ingest::providers::{
    BrowserSite, GuestApiConfig, MarkdownFile, MarkdownSource, TableSchema,
};
use crate::reputation::Thresholds;

pub const ENV_CONFIG_PATH: &str = "HARVEST_CONFIG_PATH";
pub const DEFAULT_CONFIG_PATH: &str = "config/harvester.toml";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BrowserlessConfig {
    pub url: Option<String>,
    pub token: Option<String>,
    pub request_timeout_secs: u64,
}

impl Default for BrowserlessConfig {
    fn default() -> Self {
        Self {
            url: None,
            token: None,
            request_timeout_secs: 90,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HarvestConfig {
    /// Directory holding the blacklist/whitelist/review/follower files.
    pub data_dir: PathBuf,
    pub database_url: String,
    pub log_path: PathBuf,
    /// 0 disables the periodic scheduler.
    pub interval_hours: u64,
    pub stagger_secs: u64,
    pub status_ttl_secs: u64,
    pub http_timeout_secs: u64,
    pub thresholds: Thresholds,
    pub browserless: BrowserlessConfig,
    pub guest_api: GuestApiConfig,
    pub browser_sites: Vec<BrowserSite>,
    pub markdown_sources: Vec<MarkdownSource>,
}

impl Default for HarvestConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("data"),
            database_url: "sqlite://data/jobs.db".into(),
            log_path: PathBuf::from("logs/harvester.log"),
            interval_hours: 6,
            stagger_secs: 3600,
            status_ttl_secs: 2 * 3600,
            http_timeout_secs: 30,
            thresholds: Thresholds::default(),
            browserless: BrowserlessConfig::default(),
            guest_api: GuestApiConfig::default(),
            browser_sites: vec![BrowserSite::google(), BrowserSite::microsoft()],
            markdown_sources: default_markdown_sources(),
        }
    }
}

fn github(name: &str, owner: &str, repo: &str, git_ref: Option<&str>, files: Vec<MarkdownFile>) -> MarkdownSource {
    MarkdownSource {
        name: name.into(),
        owner: owner.into(),
        repo: repo.into(),
        git_ref: git_ref.map(String::from),
        files,
        user_agent: format!("JobStream/1.0 (https://github.com/{owner}/{repo})"),
        api_base: "https://api.github.com".into(),
    }
}

// The first file of each source doubles as its status probe target.
fn default_markdown_sources() -> Vec<MarkdownSource> {
    vec![
        github(
            "cvrve",
            "cvrve",
            "Summer2025-Internships",
            Some("dev"),
            vec![
                MarkdownFile::new("README.md", TableSchema::Standard),
                MarkdownFile::new("OFFSEASON_README.md", TableSchema::OffSeason),
            ],
        ),
        github(
            "simplify",
            "SimplifyJobs",
            "Summer2025-Internships",
            Some("dev"),
            vec![
                MarkdownFile::new("README.md", TableSchema::Standard),
                MarkdownFile::new("README-Off-Season.md", TableSchema::OffSeason),
            ],
        ),
        github(
            "speedyapply",
            "speedyapply",
            "2025-SWE-College-Jobs",
            Some("main"),
            vec![
                MarkdownFile::new("README.md", TableSchema::Salary),
                MarkdownFile::new("INTERN_INTL.md", TableSchema::International),
            ],
        ),
    ]
}

impl HarvestConfig {
    pub fn interval(&self) -> Option<Duration> {
        (self.interval_hours > 0).then(|| Duration::from_secs(self.interval_hours * 3600))
    }

    pub fn stagger_window(&self) -> Duration {
        Duration::from_secs(self.stagger_secs)
    }

    pub fn status_ttl(&self) -> Duration {
        Duration::from_secs(self.status_ttl_secs)
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_secs)
    }

    /// Apply `HARVEST_*` / `BROWSERLESS_*` environment overrides.
    pub fn apply_env(&mut self) -> Result<()> {
        if let Ok(v) = std::env::var("HARVEST_DATABASE_URL") {
            self.database_url = v;
        }
        if let Ok(v) = std::env::var("BROWSERLESS_URL") {
            self.browserless.url = Some(v);
        }
        if let Ok(v) = std::env::var("BROWSERLESS_TOKEN") {
            self.browserless.token = Some(v);
        }
        if let Ok(v) = std::env::var("HARVEST_INTERVAL_HOURS") {
            self.interval_hours = v
                .trim()
                .parse()
                .with_context(|| format!("HARVEST_INTERVAL_HOURS is not a number: {v}"))?;
        }
        if let Ok(v) = std::env::var("HARVEST_LOG_PATH") {
            self.log_path = PathBuf::from(v);
        }
        Ok(())
    }
}

/// Load config from an explicit path.
pub fn load_from(path: &Path) -> Result<HarvestConfig> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("reading harvest config from {}", path.display()))?;
    toml::from_str(&content).with_context(|| format!("parsing {}", path.display()))
}

/// Load config using env var + fallbacks, then apply env overrides:
/// 1) $HARVEST_CONFIG_PATH (must exist)
/// 2) config/harvester.toml
/// 3) built-in defaults
pub fn load_default() -> Result<HarvestConfig> {
    let mut cfg = if let Ok(p) = std::env::var(ENV_CONFIG_PATH) {
        let pb = PathBuf::from(p);
        if !pb.exists() {
            return Err(anyhow!("{ENV_CONFIG_PATH} points to non-existent path {}", pb.display()));
        }
        load_from(&pb)?
    } else {
        let default_p = PathBuf::from(DEFAULT_CONFIG_PATH);
        if default_p.exists() {
            load_from(&default_p)?
        } else {
            HarvestConfig::default()
        }
    };
    cfg.apply_env()?;
    Ok(cfg)
}
