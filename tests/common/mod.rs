// tests/common/mod.rs
//
// Shared doubles for the integration tests: canned adapters, a recording delivery and a
// store that always fails.
#![allow(dead_code)]

use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, TimeZone, Utc};

use paper_digest::delivery::{Delivery, DeliveryResult, ItemResult, ItemStatus};
use paper_digest::error::{AdapterError, DeliveryFailure, SourceFailureKind, StorageFailure};
use paper_digest::ingest::rate_limit::RateLimit;
use paper_digest::ingest::types::{ArxivEntry, FetchQuery, Page, RawRecord, SourceAdapter};
use paper_digest::ingest::{FetchManager, SourcePolicy};
use paper_digest::model::{Digest, Fingerprint, SeenRecord, SourceName};
use paper_digest::rank::FilterRank;
use paper_digest::storage::SeenStore;
use paper_digest::summarize::{
    LengthBounds, OrchestratorConfig, RuleBasedSummarizer, SummaryOrchestrator,
};
use paper_digest::Pipeline;

pub fn fixture(name: &str) -> String {
    let path = format!("{}/tests/fixtures/{name}", env!("CARGO_MANIFEST_DIR"));
    std::fs::read_to_string(&path).unwrap_or_else(|e| panic!("read {path}: {e}"))
}

pub fn day(d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 5, d).unwrap()
}

/// 20:00 in +07:00 on 2024-05-`d`.
pub fn evening(d: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 5, d, 13, 0, 0).unwrap()
}

pub fn arxiv(id: &str, title: &str, summary: &str, published: &str) -> RawRecord {
    RawRecord::Arxiv(ArxivEntry {
        id: Some(format!("http://arxiv.org/abs/{id}v1")),
        title: Some(title.into()),
        summary: Some(summary.into()),
        published: Some(format!("{published}T12:00:00Z")),
        authors: vec!["Alice Nguyen".into()],
        categories: vec!["cs.LG".into()],
        doi: None,
    })
}

/// Returns the same records on every call, as one page.
pub struct StaticAdapter {
    pub name: SourceName,
    pub records: Mutex<Vec<RawRecord>>,
}

impl StaticAdapter {
    pub fn new(name: SourceName, records: Vec<RawRecord>) -> Arc<Self> {
        Arc::new(Self {
            name,
            records: Mutex::new(records),
        })
    }

    pub fn push(&self, record: RawRecord) {
        self.records.lock().unwrap().push(record);
    }
}

#[async_trait]
impl SourceAdapter for StaticAdapter {
    async fn fetch_page(&self, _query: &FetchQuery, _cursor: usize) -> Result<Page, AdapterError> {
        Ok(Page::last(self.records.lock().unwrap().clone()))
    }

    fn name(&self) -> SourceName {
        self.name
    }
}

/// Never answers within any sane timeout.
pub struct StallingAdapter(pub SourceName);

#[async_trait]
impl SourceAdapter for StallingAdapter {
    async fn fetch_page(&self, _query: &FetchQuery, _cursor: usize) -> Result<Page, AdapterError> {
        tokio::time::sleep(Duration::from_secs(3600)).await;
        Ok(Page::default())
    }

    fn name(&self) -> SourceName {
        self.0
    }
}

/// Fails every call with a network error.
pub struct DownAdapter(pub SourceName);

#[async_trait]
impl SourceAdapter for DownAdapter {
    async fn fetch_page(&self, _query: &FetchQuery, _cursor: usize) -> Result<Page, AdapterError> {
        Err(AdapterError::new(SourceFailureKind::Network, "connection refused"))
    }

    fn name(&self) -> SourceName {
        self.0
    }
}

/// Records every digest it is handed; items whose `source_id` is in `failing` are not delivered.
#[derive(Default)]
pub struct RecordingDelivery {
    pub failing: Mutex<HashSet<String>>,
    pub calls: Mutex<Vec<Vec<(String, Fingerprint)>>>,
}

impl RecordingDelivery {
    pub fn failing_on(ids: &[&str]) -> Arc<Self> {
        let d = Self::default();
        d.failing
            .lock()
            .unwrap()
            .extend(ids.iter().map(|s| s.to_string()));
        Arc::new(d)
    }

    pub fn heal(&self) {
        self.failing.lock().unwrap().clear();
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    /// Source ids of the n-th digest, in digest order.
    pub fn ids(&self, call: usize) -> Vec<String> {
        self.calls.lock().unwrap()[call]
            .iter()
            .map(|(id, _)| id.clone())
            .collect()
    }
}

#[async_trait]
impl Delivery for RecordingDelivery {
    async fn deliver(&self, digest: &Digest) -> DeliveryResult {
        let failing = self.failing.lock().unwrap().clone();
        let mut out = DeliveryResult::default();
        let mut seen = Vec::new();
        for item in &digest.items {
            seen.push((item.paper.source_id.clone(), item.paper.fingerprint.clone()));
            let status = if failing.contains(&item.paper.source_id) {
                ItemStatus::Failed(DeliveryFailure("HTTP 500".into()))
            } else {
                ItemStatus::Delivered
            };
            out.items.push(ItemResult {
                fingerprint: item.paper.fingerprint.clone(),
                status,
            });
        }
        self.calls.lock().unwrap().push(seen);
        out
    }

    fn name(&self) -> &'static str {
        "recording"
    }
}

/// Store whose backing file went away.
pub struct BrokenStore;

#[async_trait]
impl SeenStore for BrokenStore {
    async fn get_seen(&self, _fingerprint: &Fingerprint) -> Result<Option<SeenRecord>, StorageFailure> {
        Err(StorageFailure::new("read", "disk I/O error"))
    }

    async fn put_seen(&self, _record: &SeenRecord) -> Result<(), StorageFailure> {
        Err(StorageFailure::new("write", "disk I/O error"))
    }
}

pub fn policy() -> SourcePolicy {
    SourcePolicy {
        call_timeout: Duration::from_millis(100),
        ..SourcePolicy::default()
    }
}

pub fn fetch_manager(adapters: Vec<Arc<dyn SourceAdapter>>) -> FetchManager {
    let mut fetch = FetchManager::new();
    for a in adapters {
        fetch.register(a, RateLimit::per_minute(60), policy());
    }
    fetch
}

pub fn pipeline(
    fetch: FetchManager,
    store: Arc<dyn SeenStore>,
    delivery: Arc<dyn Delivery>,
    include: &[&str],
    exclude: &[&str],
    max_n: usize,
) -> Pipeline {
    let include: Vec<String> = include.iter().map(|s| s.to_string()).collect();
    let exclude: Vec<String> = exclude.iter().map(|s| s.to_string()).collect();
    let summarizer = SummaryOrchestrator::new(
        Arc::new(RuleBasedSummarizer),
        OrchestratorConfig {
            target_language: "en".into(),
            bounds: LengthBounds::new(5, 80),
            tldr_max_sentences: 1,
            call_timeout: Duration::from_secs(5),
        },
    );
    Pipeline::new(
        fetch,
        store,
        FilterRank::new(&include, &exclude, max_n),
        summarizer,
        delivery,
        include,
        Vec::new(),
        48,
    )
}
