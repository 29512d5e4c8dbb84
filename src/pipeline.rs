// src/pipeline.rs
//! One digest run: fetch → normalize → dedup → rank → summarize → deliver → confirm.

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use metrics::{counter, describe_counter, describe_gauge, gauge};
use once_cell::sync::OnceCell;
use serde::Serialize;

use crate::dedup::Deduplicator;
use crate::delivery::{Delivery, DeliveryResult};
use crate::error::{RunError, SourceFailure};
use crate::ingest::types::FetchQuery;
use crate::ingest::FetchManager;
use crate::model::{Digest, DigestItem, QueryWindow};
use crate::normalize::normalize_all;
use crate::rank::FilterRank;
use crate::storage::{SeenStore, StateDirGuard, StateDirLock};
use crate::summarize::SummaryOrchestrator;

fn ensure_metrics_described() {
    static ONCE: OnceCell<()> = OnceCell::new();
    ONCE.get_or_init(|| {
        describe_counter!("digest_runs_total", "Pipeline runs by outcome.");
        describe_counter!("digest_normalize_errors_total", "Raw records dropped by the normalizer.");
        describe_counter!("digest_dedup_dropped_total", "Papers dropped as already posted or duplicated in-run.");
        describe_counter!("digest_selected_total", "Papers selected into a digest.");
        describe_counter!("digest_delivered_total", "Digest items confirmed delivered.");
        describe_counter!("digest_delivery_failed_total", "Digest items the transport failed to deliver.");
        describe_gauge!("digest_last_run_ts", "Unix ts when the pipeline last completed.");
    });
}

/// What happened in one run. Serialized on `/status`.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RunReport {
    pub date: Option<NaiveDate>,
    pub fetched: usize,
    pub source_failures: Vec<SourceFailure>,
    pub normalize_errors: usize,
    pub unseen: usize,
    pub selected: usize,
    pub delivered: usize,
    pub failed_delivery: usize,
    pub skipped_delivery: usize,
    pub fallbacks: usize,
    pub length_violations: usize,
    pub duration_ms: u64,
}

/// Something the scheduler can trigger once per day.
#[async_trait]
pub trait DigestJob: Send + Sync {
    /// `date` is the local calendar day the run belongs to.
    async fn run(&self, date: NaiveDate, now: DateTime<Utc>) -> Result<RunReport, RunError>;
}

pub struct Pipeline {
    fetch: FetchManager,
    dedup: Deduplicator,
    rank: FilterRank,
    summarizer: SummaryOrchestrator,
    delivery: Arc<dyn Delivery>,
    keywords: Vec<String>,
    categories: Vec<String>,
    lookback_hours: i64,
    run_lock: Option<StateDirLock>,
}

impl Pipeline {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        fetch: FetchManager,
        store: Arc<dyn SeenStore>,
        rank: FilterRank,
        summarizer: SummaryOrchestrator,
        delivery: Arc<dyn Delivery>,
        keywords: Vec<String>,
        categories: Vec<String>,
        lookback_hours: i64,
    ) -> Self {
        Self {
            fetch,
            dedup: Deduplicator::new(store),
            rank,
            summarizer,
            delivery,
            keywords,
            categories,
            lookback_hours,
            run_lock: None,
        }
    }

    /// Hold `lock` for every run, so processes sharing a state dir never run at once.
    pub fn with_run_lock(mut self, lock: StateDirLock) -> Self {
        self.run_lock = Some(lock);
        self
    }

    pub fn delivery_name(&self) -> &'static str {
        self.delivery.name()
    }

    /// Run every stage once. Only a storage failure or a total source outage is an error;
    /// an empty digest is a successful "no news today".
    pub async fn run_once(&self, date: NaiveDate, now: DateTime<Utc>) -> Result<RunReport, RunError> {
        ensure_metrics_described();
        let t0 = Instant::now();
        let result = match self.lock_state_dir() {
            Ok(_guard) => self.stages(date, now).await,
            Err(e) => Err(e),
        };

        let outcome = match &result {
            Ok(_) => "success",
            Err(RunError::AllSourcesFailed(_)) => "all_sources_failed",
            Err(RunError::Storage(_)) => "storage_failure",
            Err(RunError::AlreadyRunning) => "already_running",
        };
        counter!("digest_runs_total", "outcome" => outcome).increment(1);

        result.map(|mut report| {
            report.duration_ms = t0.elapsed().as_millis() as u64;
            gauge!("digest_last_run_ts").set(now.timestamp() as f64);
            tracing::info!(
                target: "pipeline",
                %date,
                fetched = report.fetched,
                unseen = report.unseen,
                selected = report.selected,
                delivered = report.delivered,
                failed = report.failed_delivery,
                duration_ms = report.duration_ms,
                "run finished"
            );
            report
        })
    }

    fn lock_state_dir(&self) -> Result<Option<StateDirGuard>, RunError> {
        let Some(lock) = &self.run_lock else {
            return Ok(None);
        };
        match lock.try_acquire()? {
            Some(guard) => Ok(Some(guard)),
            None => {
                tracing::warn!(
                    target: "pipeline",
                    lock = %lock.path().display(),
                    "another process holds the state dir, skipping run"
                );
                Err(RunError::AlreadyRunning)
            }
        }
    }

    async fn stages(&self, date: NaiveDate, now: DateTime<Utc>) -> Result<RunReport, RunError> {
        let mut report = RunReport {
            date: Some(date),
            ..RunReport::default()
        };

        let query = FetchQuery {
            window: QueryWindow::lookback(now, self.lookback_hours),
            keywords: self.keywords.clone(),
            categories: self.categories.clone(),
        };
        let fetched = self.fetch.fetch_all(&query).await;
        if fetched.is_total_outage() {
            tracing::error!(
                target: "pipeline",
                failures = fetched.failures.len(),
                "every enabled source failed"
            );
            return Err(RunError::AllSourcesFailed(fetched.failures));
        }
        report.fetched = fetched.records.len();
        report.source_failures = fetched.failures;

        let (papers, errors) = normalize_all(fetched.records);
        report.normalize_errors = errors.len();

        let (unseen, _stats) = self.dedup.filter_unseen(papers, now).await?;
        report.unseen = unseen.len();

        let selected = self.rank.select(unseen, date);
        report.selected = selected.len();

        let mut digest = Digest::empty(date);
        for sp in selected {
            let summary = self.summarizer.summarize(&sp.paper).await;
            report.fallbacks += usize::from(summary.fallback_used);
            report.length_violations += usize::from(summary.length_violation);
            digest.items.push(DigestItem {
                paper: sp.paper,
                score: sp.score,
                matched_keywords: sp.matched_keywords,
                summary,
            });
        }

        if digest.is_empty() {
            tracing::info!(target: "pipeline", %date, "no new papers today, nothing to deliver");
            return Ok(report);
        }

        let result: DeliveryResult = self.delivery.deliver(&digest).await;
        report.delivered = result.delivered_count();
        report.failed_delivery = result.failed_count();
        report.skipped_delivery = result.items.len() - report.delivered - report.failed_delivery;

        // Only confirmed items become "posted"; failed and skipped ones stay eligible.
        self.dedup.confirm_posted(result.delivered(), now).await?;
        Ok(report)
    }
}

#[async_trait]
impl DigestJob for Pipeline {
    async fn run(&self, date: NaiveDate, now: DateTime<Utc>) -> Result<RunReport, RunError> {
        self.run_once(date, now).await
    }
}
