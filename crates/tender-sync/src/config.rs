//! Environment-driven configuration and YAML loading.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use tender_adapters::AdapterContext;
use tender_core::{CapabilityProfile, NewSource};
use tender_storage::{HttpClientConfig, DEFAULT_USER_AGENT};
use tracing::info;
use uuid::Uuid;

pub const DEFAULT_HUB_URLS: &[&str] = &[
    "https://www.gov.hk/en/about/rss.htm",
    "https://www.dsd.gov.hk/EN/RSS_Feeds/index.html",
];

fn env_string(name: &str, default: &str) -> String {
    std::env::var(name).unwrap_or_else(|_| default.to_string())
}

fn env_parse<T: std::str::FromStr>(name: &str, default: T) -> T {
    std::env::var(name)
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

fn env_secs(name: &str, default: u64) -> Duration {
    Duration::from_secs(env_parse(name, default))
}

fn env_bool(name: &str, default: bool) -> bool {
    std::env::var(name)
        .map(|v| matches!(v.trim(), "1" | "true" | "TRUE" | "True" | "yes"))
        .unwrap_or(default)
}

fn env_list(name: &str, default: &[&str]) -> Vec<String> {
    match std::env::var(name) {
        Ok(raw) => raw
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(ToString::to_string)
            .collect(),
        Err(_) => default.iter().map(|s| s.to_string()).collect(),
    }
}

#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Unset means the in-memory store.
    pub database_url: Option<String>,
    pub sources_file: PathBuf,
    pub profile_file: PathBuf,
    pub user_agent: String,
    pub feed_timeout: Duration,
    pub scrape_timeout: Duration,
    pub assist_timeout: Duration,
    pub narrative_timeout: Duration,
    pub eval_batch: i64,
    pub cron_skip_hours: i64,
    pub hub_urls: Vec<String>,
    pub scheduler_enabled: bool,
    pub ingest_cron: String,
    pub evaluate_cron: String,
    pub discovery_cron: String,
    pub digest_cron: String,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            database_url: None,
            sources_file: PathBuf::from("sources.yaml"),
            profile_file: PathBuf::from("profile.yaml"),
            user_agent: DEFAULT_USER_AGENT.to_string(),
            feed_timeout: Duration::from_secs(15),
            scrape_timeout: Duration::from_secs(20),
            assist_timeout: Duration::from_secs(20),
            narrative_timeout: Duration::from_secs(30),
            eval_batch: 200,
            cron_skip_hours: 20,
            hub_urls: DEFAULT_HUB_URLS.iter().map(|s| s.to_string()).collect(),
            scheduler_enabled: false,
            ingest_cron: "0 0 3 * * *".to_string(),
            evaluate_cron: "0 0 4 * * *".to_string(),
            discovery_cron: "0 0 2 * * Sun".to_string(),
            digest_cron: "0 0 8 * * *".to_string(),
        }
    }
}

impl SyncConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            database_url: std::env::var("DATABASE_URL")
                .ok()
                .filter(|v| !v.trim().is_empty()),
            sources_file: std::env::var("TENDER_SOURCES_FILE")
                .map(PathBuf::from)
                .unwrap_or(defaults.sources_file),
            profile_file: std::env::var("TENDER_PROFILE_FILE")
                .map(PathBuf::from)
                .unwrap_or(defaults.profile_file),
            user_agent: env_string("TENDER_USER_AGENT", DEFAULT_USER_AGENT),
            feed_timeout: env_secs("TENDER_FEED_TIMEOUT_SECS", 15),
            scrape_timeout: env_secs("TENDER_SCRAPE_TIMEOUT_SECS", 20),
            assist_timeout: env_secs("TENDER_ASSIST_TIMEOUT_SECS", 20),
            narrative_timeout: env_secs("TENDER_NARRATIVE_TIMEOUT_SECS", 30),
            eval_batch: env_parse("TENDER_EVAL_BATCH", defaults.eval_batch),
            cron_skip_hours: env_parse("TENDER_CRON_SKIP_HOURS", defaults.cron_skip_hours),
            hub_urls: env_list("TENDER_HUB_URLS", DEFAULT_HUB_URLS),
            scheduler_enabled: env_bool("TENDER_SCHEDULER_ENABLED", false),
            ingest_cron: env_string("TENDER_INGEST_CRON", &defaults.ingest_cron),
            evaluate_cron: env_string("TENDER_EVALUATE_CRON", &defaults.evaluate_cron),
            discovery_cron: env_string("TENDER_DISCOVERY_CRON", &defaults.discovery_cron),
            digest_cron: env_string("TENDER_DIGEST_CRON", &defaults.digest_cron),
        }
    }

    pub fn adapter_context(&self, run_id: Uuid) -> AdapterContext {
        AdapterContext {
            run_id,
            feed_timeout: self.feed_timeout,
            scrape_timeout: self.scrape_timeout,
        }
    }

    pub fn http_client_config(&self) -> HttpClientConfig {
        HttpClientConfig {
            user_agent: self.user_agent.clone(),
            ..HttpClientConfig::default()
        }
    }
}

/// OpenAI-compatible chat-completions endpoint. Without a key every assisted
/// step uses its deterministic fallback.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssistConfig {
    pub api_url: String,
    pub api_key: Option<String>,
    pub model: String,
}

impl Default for AssistConfig {
    fn default() -> Self {
        Self {
            api_url: "https://api.deepseek.com/v1/chat/completions".to_string(),
            api_key: None,
            model: "deepseek-chat".to_string(),
        }
    }
}

impl AssistConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            api_url: env_string("LLM_API_URL", &defaults.api_url),
            api_key: std::env::var("LLM_API_KEY")
                .ok()
                .filter(|v| !v.trim().is_empty()),
            model: env_string("LLM_MODEL", &defaults.model),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.api_key.is_some()
    }
}

#[derive(Debug, Clone, serde::Deserialize)]
pub struct SourceSeedFile {
    pub sources: Vec<NewSource>,
}

pub fn load_seed_sources(path: &Path) -> Result<Vec<NewSource>> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("reading {}", path.display()))?;
    let file: SourceSeedFile =
        serde_yaml::from_str(&text).with_context(|| format!("parsing {}", path.display()))?;
    Ok(file.sources)
}

/// Loads the capability profile, falling back to the built-in one when the file is absent.
pub fn load_profile(path: &Path) -> Result<CapabilityProfile> {
    if !path.exists() {
        info!(path = %path.display(), "profile file not found; using built-in profile");
        return Ok(CapabilityProfile::default());
    }
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("reading {}", path.display()))?;
    serde_yaml::from_str(&text).with_context(|| format!("parsing {}", path.display()))
}
