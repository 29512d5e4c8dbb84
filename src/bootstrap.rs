// src/bootstrap.rs
//! Wire a [`DigestConfig`] into live components: adapters, summarizer, delivery, stores, scheduler.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use tracing::{info, warn};

use crate::config::{DigestConfig, SummaryBackend};
use crate::delivery::{Delivery, DiscordDelivery, DryRunDelivery};
use crate::ingest::providers::{
    arxiv::{ArxivProvider, ARXIV_API},
    biorxiv::{BiorxivProvider, BIORXIV_API},
    crossref::{CrossrefProvider, CROSSREF_API},
    semantic_scholar::{SemanticScholarProvider, SEMANTIC_SCHOLAR_API},
};
use crate::ingest::types::SourceAdapter;
use crate::ingest::FetchManager;
use crate::model::SourceName;
use crate::pipeline::Pipeline;
use crate::rank::FilterRank;
use crate::scheduler::{ScheduleSpec, Scheduler};
use crate::storage::{JsonRunStateStore, JsonSeenStore, StateDirLock};
use crate::summarize::{
    AnthropicSummarizer, LengthBounds, OpenAiSummarizer, OrchestratorConfig, QuotaLimited,
    RuleBasedSummarizer, Summarizer, SummaryOrchestrator,
};

/// Everything the binaries need, built once from config.
pub struct DigestRuntime {
    pub config: DigestConfig,
    pub pipeline: Arc<Pipeline>,
    pub scheduler: Arc<Scheduler>,
    pub summarizer: &'static str,
    pub delivery: &'static str,
}

impl DigestRuntime {
    pub async fn build(config: DigestConfig) -> Result<Self> {
        let fetch = build_fetch_manager(&config)?;
        let backend = build_summarizer(&config)?;
        let summarizer = backend.name();
        let delivery = build_delivery(&config)?;
        let delivery_name = delivery.name();

        let seen_path = config.storage.seen_path();
        let seen = JsonSeenStore::open(&seen_path)
            .await
            .with_context(|| format!("opening seen store {}", seen_path.display()))?;

        let pipeline = Pipeline::new(
            fetch,
            Arc::new(seen),
            build_rank(&config),
            SummaryOrchestrator::new(backend, orchestrator_config(&config)),
            delivery,
            config.filter.include.clone(),
            config.filter.categories.clone(),
            config.schedule.lookback_hours,
        )
        .with_run_lock(StateDirLock::new(&config.storage.state_dir));

        let run_state = JsonRunStateStore::new(config.storage.run_state_path());
        let scheduler = Scheduler::load(schedule_spec(&config)?, Arc::new(run_state))
            .await
            .context("loading run state")?;

        info!(
            sources = ?config.sources.enabled,
            summarizer,
            delivery = delivery_name,
            post_time = %config.schedule.post_time,
            timezone = %config.schedule.timezone,
            "digest runtime ready"
        );

        Ok(Self {
            config,
            pipeline: Arc::new(pipeline),
            scheduler: Arc::new(scheduler),
            summarizer,
            delivery: delivery_name,
        })
    }
}

fn adapter_for(cfg: &DigestConfig, source: SourceName) -> Result<Arc<dyn SourceAdapter>> {
    let s = cfg.sources.settings(source);
    let adapter: Arc<dyn SourceAdapter> = match source {
        SourceName::Arxiv => Arc::new(ArxivProvider::from_url(ARXIV_API, s.page_size, s.retry())?),
        SourceName::Crossref => Arc::new(CrossrefProvider::from_url(
            CROSSREF_API,
            s.page_size,
            s.retry(),
            cfg.sources.mailto.clone(),
        )?),
        SourceName::Biorxiv | SourceName::Medrxiv => {
            Arc::new(BiorxivProvider::from_url(source, BIORXIV_API, s.retry())?)
        }
        SourceName::SemanticScholar => Arc::new(SemanticScholarProvider::from_url(
            SEMANTIC_SCHOLAR_API,
            s.page_size,
            s.retry(),
            cfg.sources.semantic_scholar_api_key.clone(),
        )?),
    };
    Ok(adapter)
}

pub fn build_fetch_manager(cfg: &DigestConfig) -> Result<FetchManager> {
    let mut fetch = FetchManager::new();
    for source in cfg.sources.enabled_sources()? {
        let s = cfg.sources.settings(source);
        let adapter = adapter_for(cfg, source)
            .with_context(|| format!("building {} adapter", source.display_name()))?;
        fetch.register(adapter, s.rate_limit(), s.policy());
    }
    Ok(fetch)
}

pub fn build_rank(cfg: &DigestConfig) -> FilterRank {
    let f = &cfg.filter;
    FilterRank::new(&f.include, &f.exclude, f.max_papers_per_day)
        .with_weights(f.match_weight, f.recency_weight)
        .with_decay(f.decay)
        .with_categories(&f.allowed_categories)
}

pub fn orchestrator_config(cfg: &DigestConfig) -> OrchestratorConfig {
    let s = &cfg.summary;
    OrchestratorConfig {
        target_language: s.target_language.clone(),
        bounds: LengthBounds::new(s.min_len, s.max_len),
        tldr_max_sentences: s.tldr_max_sentences,
        call_timeout: Duration::from_secs(s.timeout_secs.max(1)),
    }
}

/// Remote backends are wrapped in the persisted daily quota.
pub fn build_summarizer(cfg: &DigestConfig) -> Result<Arc<dyn Summarizer>> {
    let s = &cfg.summary;
    let key = || {
        s.api_key
            .clone()
            .ok_or_else(|| anyhow!("summary.api_key is required for the {:?} backend", s.backend))
    };
    let dir = cfg.storage.state_dir.clone();
    let backend: Arc<dyn Summarizer> = match s.backend {
        SummaryBackend::RuleBased => Arc::new(RuleBasedSummarizer),
        SummaryBackend::Openai => {
            let inner = OpenAiSummarizer::new(key()?, s.model.as_deref())?;
            Arc::new(QuotaLimited::new(inner, dir, s.daily_limit))
        }
        SummaryBackend::Anthropic => {
            let inner = AnthropicSummarizer::new(key()?, s.model.as_deref())?;
            Arc::new(QuotaLimited::new(inner, dir, s.daily_limit))
        }
    };
    Ok(backend)
}

pub fn build_delivery(cfg: &DigestConfig) -> Result<Arc<dyn Delivery>> {
    let d = &cfg.delivery;
    if d.dry_run {
        warn!("delivery.dry_run is set: digests are logged, not posted");
        return Ok(Arc::new(DryRunDelivery));
    }
    let webhook = d
        .discord_webhook_url
        .clone()
        .filter(|u| !u.trim().is_empty())
        .ok_or_else(|| anyhow!("delivery.discord_webhook_url is required unless dry_run = true"))?;
    Ok(Arc::new(
        DiscordDelivery::new(webhook)
            .with_timeout(d.timeout_secs)
            .with_retry(d.retry())
            .with_username(d.username.clone()),
    ))
}

pub fn schedule_spec(cfg: &DigestConfig) -> Result<ScheduleSpec> {
    let s = &cfg.schedule;
    Ok(ScheduleSpec::new(s.post_time()?, s.timezone()?).with_retry_delays(
        s.retry_delays_secs
            .iter()
            .map(|secs| Duration::from_secs(*secs))
            .collect(),
    ))
}
