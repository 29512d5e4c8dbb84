// src/config/mod.rs
//! Service configuration: `config/digest.toml` (or `$DIGEST_CONFIG_PATH`) plus env secrets.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::time::Duration;
use std::{env, fs};

use anyhow::{anyhow, bail, Context, Result};
use chrono::NaiveTime;
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};

use crate::ingest::rate_limit::{ExhaustedPolicy, RateLimit};
use crate::ingest::retry::RetryPolicy;
use crate::ingest::SourcePolicy;
use crate::model::SourceName;
use crate::rank::RecencyDecay;

pub const ENV_CONFIG_PATH: &str = "DIGEST_CONFIG_PATH";
pub const DEFAULT_CONFIG_PATH: &str = "config/digest.toml";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DigestConfig {
    pub sources: SourcesConfig,
    pub filter: FilterConfig,
    pub summary: SummaryConfig,
    pub schedule: ScheduleConfig,
    pub storage: StorageConfig,
    pub delivery: DeliveryConfig,
}

// ------------------------------------------------------------
// [sources]
// ------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SourcesConfig {
    pub enabled: Vec<String>,
    /// Crossref polite-pool contact.
    pub mailto: Option<String>,
    /// "ENV" reads `SEMANTIC_SCHOLAR_API_KEY`.
    pub semantic_scholar_api_key: Option<String>,
    pub arxiv: SourceSettings,
    pub crossref: SourceSettings,
    pub biorxiv: SourceSettings,
    pub medrxiv: SourceSettings,
    pub semantic_scholar: SourceSettings,
}

impl Default for SourcesConfig {
    fn default() -> Self {
        Self {
            enabled: vec!["arxiv".into(), "crossref".into()],
            mailto: None,
            semantic_scholar_api_key: None,
            arxiv: SourceSettings::with_budget(10, 60),
            crossref: SourceSettings::with_budget(50, 60),
            biorxiv: SourceSettings::with_budget(10, 60),
            medrxiv: SourceSettings::with_budget(10, 60),
            semantic_scholar: SourceSettings::with_budget(5, 60),
        }
    }
}

impl SourcesConfig {
    pub fn settings(&self, source: SourceName) -> &SourceSettings {
        match source {
            SourceName::Arxiv => &self.arxiv,
            SourceName::Crossref => &self.crossref,
            SourceName::Biorxiv => &self.biorxiv,
            SourceName::Medrxiv => &self.medrxiv,
            SourceName::SemanticScholar => &self.semantic_scholar,
        }
    }

    /// Parsed, deduplicated, in `SourceName::ALL` order.
    pub fn enabled_sources(&self) -> Result<Vec<SourceName>> {
        let mut set = BTreeSet::new();
        for s in &self.enabled {
            let name: SourceName = s.parse().map_err(|e: String| anyhow!(e))?;
            set.insert(name);
        }
        Ok(SourceName::ALL
            .into_iter()
            .filter(|s| set.contains(s))
            .collect())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SourceSettings {
    pub requests_per_window: u32,
    pub window_secs: u64,
    pub on_exhausted: ExhaustedPolicy,
    /// Upper bound on a deferred wait.
    pub max_wait_secs: u64,
    pub timeout_secs: u64,
    pub max_results: usize,
    pub page_size: usize,
    pub max_attempts: u8,
    pub backoff_ms: u64,
}

impl Default for SourceSettings {
    fn default() -> Self {
        Self::with_budget(10, 60)
    }
}

impl SourceSettings {
    pub fn with_budget(requests: u32, window_secs: u64) -> Self {
        Self {
            requests_per_window: requests,
            window_secs,
            on_exhausted: ExhaustedPolicy::Skip,
            max_wait_secs: 60,
            timeout_secs: 30,
            max_results: 50,
            page_size: 50,
            max_attempts: 2,
            backoff_ms: 1000,
        }
    }

    pub fn rate_limit(&self) -> RateLimit {
        RateLimit {
            requests: self.requests_per_window.max(1),
            window: Duration::from_secs(self.window_secs.max(1)),
        }
    }

    pub fn policy(&self) -> SourcePolicy {
        SourcePolicy {
            on_exhausted: self.on_exhausted,
            max_wait: Duration::from_secs(self.max_wait_secs),
            call_timeout: Duration::from_secs(self.timeout_secs.max(1)),
            max_results: self.max_results.max(1),
        }
    }

    pub fn retry(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts.max(1),
            base_backoff: Duration::from_millis(self.backoff_ms),
            multiplier: 2,
        }
    }
}

// ------------------------------------------------------------
// [filter]
// ------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FilterConfig {
    pub include: Vec<String>,
    pub exclude: Vec<String>,
    /// arXiv categories the fetch query is scoped to (`cs.LG`, ...).
    pub categories: Vec<String>,
    /// Rank-time category allow-list across all sources. Empty = any.
    pub allowed_categories: Vec<String>,
    pub max_papers_per_day: usize,
    pub match_weight: f64,
    pub recency_weight: f64,
    pub decay: RecencyDecay,
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            include: ["llm", "diffusion", "machine learning", "deep learning", "neural network"]
                .map(String::from)
                .to_vec(),
            exclude: ["survey", "review only", "obsolete"].map(String::from).to_vec(),
            categories: ["cs.AI", "cs.CL", "cs.LG", "cs.CV", "stat.ML"]
                .map(String::from)
                .to_vec(),
            allowed_categories: Vec::new(),
            max_papers_per_day: 5,
            match_weight: 1.0,
            recency_weight: 0.5,
            decay: RecencyDecay::default(),
        }
    }
}

// ------------------------------------------------------------
// [summary]
// ------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SummaryBackend {
    #[default]
    RuleBased,
    Openai,
    Anthropic,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SummaryConfig {
    pub backend: SummaryBackend,
    pub model: Option<String>,
    /// "ENV" reads `OPENAI_API_KEY` / `ANTHROPIC_API_KEY` by backend.
    pub api_key: Option<String>,
    pub min_len: usize,
    pub max_len: usize,
    pub tldr_max_sentences: usize,
    pub target_language: String,
    pub timeout_secs: u64,
    /// Remote calls per UTC day. 0 = unlimited.
    pub daily_limit: u32,
}

impl Default for SummaryConfig {
    fn default() -> Self {
        Self {
            backend: SummaryBackend::RuleBased,
            model: None,
            api_key: None,
            min_len: 150,
            max_len: 250,
            tldr_max_sentences: 2,
            target_language: "th".into(),
            timeout_secs: 30,
            daily_limit: 50,
        }
    }
}

// ------------------------------------------------------------
// [schedule]
// ------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScheduleConfig {
    /// Local "HH:MM".
    pub post_time: String,
    /// IANA zone of `post_time` ("Asia/Bangkok", "Europe/Berlin", "UTC").
    pub timezone: String,
    pub poll_secs: u64,
    pub retry_delays_secs: Vec<u64>,
    pub lookback_hours: i64,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            post_time: "20:00".into(),
            timezone: "Asia/Bangkok".into(),
            poll_secs: 30,
            retry_delays_secs: vec![60, 300, 900],
            lookback_hours: 48,
        }
    }
}

impl ScheduleConfig {
    pub fn post_time(&self) -> Result<NaiveTime> {
        NaiveTime::parse_from_str(self.post_time.trim(), "%H:%M")
            .with_context(|| format!("schedule.post_time '{}' is not HH:MM", self.post_time))
    }

    pub fn timezone(&self) -> Result<Tz> {
        self.timezone
            .trim()
            .parse::<Tz>()
            .map_err(|e| anyhow!("schedule.timezone '{}' is not an IANA zone: {e}", self.timezone))
    }
}

// ------------------------------------------------------------
// [storage] / [delivery]
// ------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub state_dir: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            state_dir: PathBuf::from("state"),
        }
    }
}

impl StorageConfig {
    pub fn seen_path(&self) -> PathBuf {
        self.state_dir.join("seen.json")
    }

    pub fn run_state_path(&self) -> PathBuf {
        self.state_dir.join("run_state.json")
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DeliveryConfig {
    /// "ENV" reads `DISCORD_WEBHOOK_URL`.
    pub discord_webhook_url: Option<String>,
    pub username: Option<String>,
    pub dry_run: bool,
    /// Attempts per item, first call included.
    pub max_retries: u8,
    pub backoff_ms: u64,
    pub timeout_secs: u64,
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            discord_webhook_url: None,
            username: Some("Paper Digest".into()),
            dry_run: false,
            max_retries: 3,
            backoff_ms: 500,
            timeout_secs: 10,
        }
    }
}

impl DeliveryConfig {
    pub fn retry(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_retries.max(1),
            base_backoff: Duration::from_millis(self.backoff_ms),
            multiplier: 2,
        }
    }
}

// ------------------------------------------------------------
// Loading
// ------------------------------------------------------------

fn clean_keywords(items: &[String]) -> Vec<String> {
    let set: BTreeSet<String> = items
        .iter()
        .map(|k| k.trim().to_lowercase())
        .filter(|k| !k.is_empty())
        .collect();
    set.into_iter().collect()
}

fn clean_categories(items: &[String]) -> Vec<String> {
    let set: BTreeSet<String> = items
        .iter()
        .map(|c| c.trim().to_string())
        .filter(|c| !c.is_empty())
        .collect();
    set.into_iter().collect()
}

/// `Some("ENV")` → value of `var`; missing var is an error only when `required`.
fn resolve_env(value: &mut Option<String>, var: &str, required: bool) -> Result<()> {
    let is_env = value
        .as_deref()
        .is_some_and(|v| v.trim().eq_ignore_ascii_case("env"));
    if is_env {
        match env::var(var) {
            Ok(v) if !v.trim().is_empty() => *value = Some(v),
            _ if required => bail!("Missing {var} env var"),
            _ => *value = None,
        }
    }
    Ok(())
}

impl DigestConfig {
    pub fn from_toml_str(s: &str) -> Result<Self> {
        let mut cfg: DigestConfig = toml::from_str(s).context("parsing digest config")?;
        cfg.sanitize()?;
        Ok(cfg)
    }

    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let data = fs::read_to_string(path)
            .with_context(|| format!("reading config from {}", path.display()))?;
        Self::from_toml_str(&data)
    }

    /// 1) `$DIGEST_CONFIG_PATH` (must exist) 2) `config/digest.toml` 3) built-in defaults.
    pub fn load_default() -> Result<Self> {
        if let Ok(p) = env::var(ENV_CONFIG_PATH) {
            let pb = PathBuf::from(p);
            if !pb.exists() {
                bail!("{ENV_CONFIG_PATH} points to non-existent path {}", pb.display());
            }
            return Self::load_from_file(&pb);
        }
        let default = PathBuf::from(DEFAULT_CONFIG_PATH);
        if default.exists() {
            return Self::load_from_file(&default);
        }
        let mut cfg = Self::default();
        cfg.sanitize()?;
        Ok(cfg)
    }

    /// Normalize lists, fix swapped bounds, validate names and times, resolve "ENV" secrets.
    pub fn sanitize(&mut self) -> Result<()> {
        self.filter.include = clean_keywords(&self.filter.include);
        self.filter.exclude = clean_keywords(&self.filter.exclude);
        self.filter.categories = clean_categories(&self.filter.categories);
        self.filter.allowed_categories = clean_categories(&self.filter.allowed_categories);
        if self.filter.max_papers_per_day == 0 {
            bail!("filter.max_papers_per_day must be at least 1");
        }

        if self.summary.min_len > self.summary.max_len {
            std::mem::swap(&mut self.summary.min_len, &mut self.summary.max_len);
        }
        self.summary.tldr_max_sentences = self.summary.tldr_max_sentences.max(1);
        self.summary.target_language = self.summary.target_language.trim().to_lowercase();
        if self.summary.target_language.is_empty() {
            self.summary.target_language = "th".into();
        }

        self.sources.enabled_sources()?;
        self.schedule.post_time()?;
        self.schedule.timezone()?;
        if self.schedule.retry_delays_secs.is_empty() {
            self.schedule.retry_delays_secs = vec![60];
        }
        self.schedule.poll_secs = self.schedule.poll_secs.max(1);

        let key_var = match self.summary.backend {
            SummaryBackend::Openai => Some("OPENAI_API_KEY"),
            SummaryBackend::Anthropic => Some("ANTHROPIC_API_KEY"),
            SummaryBackend::RuleBased => None,
        };
        if let Some(var) = key_var {
            resolve_env(&mut self.summary.api_key, var, true)?;
        }
        resolve_env(
            &mut self.delivery.discord_webhook_url,
            "DISCORD_WEBHOOK_URL",
            !self.delivery.dry_run,
        )?;
        resolve_env(
            &mut self.sources.semantic_scholar_api_key,
            "SEMANTIC_SCHOLAR_API_KEY",
            false,
        )?;
        Ok(())
    }
}
