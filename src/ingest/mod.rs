// src/ingest/mod.rs
pub mod providers;
pub mod rate_limit;
pub mod retry;
pub mod types;

use std::sync::Arc;
use std::time::{Duration, Instant};

use metrics::{counter, describe_counter, describe_histogram, histogram};
use once_cell::sync::OnceCell;
use serde::Serialize;
use tokio::task::JoinSet;

use crate::error::{AdapterError, SourceFailure, SourceFailureKind};
use crate::ingest::rate_limit::{ExhaustedPolicy, RateLimit, RateLimiter};
use crate::ingest::types::{FetchQuery, RawRecord, SourceAdapter};
use crate::model::SourceName;

/// One-time metrics registration (so series show up on /metrics).
fn ensure_metrics_described() {
    static ONCE: OnceCell<()> = OnceCell::new();
    ONCE.get_or_init(|| {
        describe_counter!(
            "digest_fetch_records_total",
            "Raw records returned by source adapters."
        );
        describe_counter!(
            "digest_source_failures_total",
            "Source fetch failures by kind."
        );
        describe_counter!(
            "digest_rate_limited_total",
            "Fetches cut short because a source budget ran out."
        );
        describe_counter!(
            "digest_provider_http_errors_total",
            "HTTP-level errors seen by adapters (after retries)."
        );
        describe_histogram!("digest_fetch_ms", "Per-source fetch time in milliseconds.");
        describe_histogram!("digest_parse_ms", "Provider parse time in milliseconds.");
    });
}

/// Per-source knobs chosen at registration.
#[derive(Debug, Clone, Copy)]
pub struct SourcePolicy {
    pub on_exhausted: ExhaustedPolicy,
    /// Longest a deferred acquire may sleep.
    pub max_wait: Duration,
    /// Deadline for a single `fetch_page` call.
    pub call_timeout: Duration,
    pub max_results: usize,
}

impl Default for SourcePolicy {
    fn default() -> Self {
        Self {
            on_exhausted: ExhaustedPolicy::Skip,
            max_wait: Duration::from_secs(60),
            call_timeout: Duration::from_secs(30),
            max_results: 100,
        }
    }
}

struct RegisteredSource {
    adapter: Arc<dyn SourceAdapter>,
    limiter: Arc<RateLimiter>,
    policy: SourcePolicy,
    enabled: bool,
}

/// What one source contributed to a run.
#[derive(Debug, Clone, Serialize)]
pub struct SourceReport {
    pub source: SourceName,
    pub records: usize,
    pub pages: usize,
    /// Budget ran out before pagination finished.
    pub rate_limited: bool,
    pub failure: Option<SourceFailure>,
}

#[derive(Debug, Default)]
pub struct FetchOutcome {
    /// Merged in registration order; each source keeps its native order.
    pub records: Vec<RawRecord>,
    pub failures: Vec<SourceFailure>,
    pub per_source: Vec<SourceReport>,
}

impl FetchOutcome {
    /// Every enabled source failed and none produced a single record.
    pub fn is_total_outage(&self) -> bool {
        !self.per_source.is_empty()
            && self
                .per_source
                .iter()
                .all(|r| r.failure.is_some() && r.records == 0)
    }
}

#[derive(Default)]
pub struct FetchManager {
    sources: Vec<RegisteredSource>,
}

impl FetchManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an adapter with its own, unshared request budget.
    pub fn register(
        &mut self,
        adapter: Arc<dyn SourceAdapter>,
        limit: RateLimit,
        policy: SourcePolicy,
    ) -> &mut Self {
        self.sources.push(RegisteredSource {
            adapter,
            limiter: Arc::new(RateLimiter::new(limit)),
            policy,
            enabled: true,
        });
        self
    }

    pub fn with_source(
        mut self,
        adapter: Arc<dyn SourceAdapter>,
        limit: RateLimit,
        policy: SourcePolicy,
    ) -> Self {
        self.register(adapter, limit, policy);
        self
    }

    /// Turn a registered source off without dropping its limiter state.
    pub fn set_enabled(&mut self, source: SourceName, enabled: bool) {
        for s in self.sources.iter_mut().filter(|s| s.adapter.name() == source) {
            s.enabled = enabled;
        }
    }

    pub fn enabled_sources(&self) -> Vec<SourceName> {
        self.sources
            .iter()
            .filter(|s| s.enabled)
            .map(|s| s.adapter.name())
            .collect()
    }

    /// Fetch every enabled source concurrently. A failing source never blocks the others.
    pub async fn fetch_all(&self, query: &FetchQuery) -> FetchOutcome {
        ensure_metrics_described();

        let query = Arc::new(query.clone());
        let mut set = JoinSet::new();
        let mut order = Vec::new();

        for (idx, src) in self.sources.iter().enumerate().filter(|(_, s)| s.enabled) {
            let adapter = Arc::clone(&src.adapter);
            let limiter = Arc::clone(&src.limiter);
            let policy = src.policy;
            let query = Arc::clone(&query);
            order.push((idx, adapter.name()));
            set.spawn(async move {
                let out = fetch_source(adapter.as_ref(), &limiter, policy, &query).await;
                (idx, out)
            });
        }

        let mut done: Vec<(usize, (Vec<RawRecord>, SourceReport))> = Vec::with_capacity(order.len());
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok(item) => done.push(item),
                Err(e) => {
                    tracing::error!(target: "ingest", error = %e, "source task aborted");
                }
            }
        }

        // A panicked task still has to show up as a failed source.
        for (idx, source) in &order {
            if !done.iter().any(|(i, _)| i == idx) {
                let failure = SourceFailure {
                    source: *source,
                    kind: SourceFailureKind::Network,
                    message: "fetch task aborted".into(),
                };
                done.push((
                    *idx,
                    (
                        Vec::new(),
                        SourceReport {
                            source: *source,
                            records: 0,
                            pages: 0,
                            rate_limited: false,
                            failure: Some(failure),
                        },
                    ),
                ));
            }
        }
        done.sort_by_key(|(idx, _)| *idx);

        let mut outcome = FetchOutcome::default();
        for (_, (mut records, report)) in done {
            if let Some(f) = &report.failure {
                counter!(
                    "digest_source_failures_total",
                    "source" => f.source.as_str(),
                    "kind" => f.kind.label()
                )
                .increment(1);
                outcome.failures.push(f.clone());
            }
            counter!("digest_fetch_records_total", "source" => report.source.as_str())
                .increment(records.len() as u64);
            outcome.records.append(&mut records);
            outcome.per_source.push(report);
        }

        tracing::info!(
            target: "ingest",
            sources = outcome.per_source.len(),
            records = outcome.records.len(),
            failures = outcome.failures.len(),
            "fetch finished"
        );
        outcome
    }
}

async fn fetch_source(
    adapter: &dyn SourceAdapter,
    limiter: &RateLimiter,
    policy: SourcePolicy,
    query: &FetchQuery,
) -> (Vec<RawRecord>, SourceReport) {
    let source = adapter.name();
    let t0 = Instant::now();
    let mut report = SourceReport {
        source,
        records: 0,
        pages: 0,
        rate_limited: false,
        failure: None,
    };
    let mut records = Vec::new();
    let mut cursor = Some(0usize);

    while let Some(at) = cursor {
        if records.len() >= policy.max_results {
            break;
        }
        if !limiter.acquire(policy.on_exhausted, policy.max_wait).await {
            report.rate_limited = true;
            counter!("digest_rate_limited_total", "source" => source.as_str()).increment(1);
            tracing::warn!(
                target: "ingest",
                source = source.as_str(),
                pages = report.pages,
                "rate limit exhausted, skipping rest of this run"
            );
            if report.pages == 0 {
                report.failure = Some(SourceFailure::from_adapter(
                    source,
                    AdapterError::new(SourceFailureKind::RateLimited, "request budget exhausted"),
                ));
            }
            break;
        }

        let result = match tokio::time::timeout(policy.call_timeout, adapter.fetch_page(query, at)).await {
            Ok(r) => r,
            Err(_) => Err(AdapterError::new(
                SourceFailureKind::Timeout,
                format!("no response within {}s", policy.call_timeout.as_secs_f32()),
            )),
        };

        match result {
            Ok(page) => {
                report.pages += 1;
                records.extend(page.records);
                cursor = page.next;
            }
            Err(e) => {
                tracing::warn!(
                    target: "ingest",
                    source = source.as_str(),
                    kind = e.kind.label(),
                    error = %e.message,
                    kept = records.len(),
                    "source fetch failed"
                );
                report.failure = Some(SourceFailure::from_adapter(source, e));
                break;
            }
        }
    }

    records.truncate(policy.max_results);
    report.records = records.len();
    histogram!("digest_fetch_ms", "source" => source.as_str())
        .record(t0.elapsed().as_secs_f64() * 1_000.0);
    tracing::debug!(
        target: "ingest",
        source = source.as_str(),
        records = report.records,
        pages = report.pages,
        "source done"
    );
    (records, report)
}
