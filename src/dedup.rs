// src/dedup.rs
//! Two-phase dedup: provisional "seen" at fetch time, "posted" only after delivery.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use metrics::counter;

use crate::error::StorageFailure;
use crate::model::{Fingerprint, Paper, SeenRecord};
use crate::storage::SeenStore;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DedupStats {
    pub new: usize,
    /// Seen before but never posted; eligible again.
    pub carried_over: usize,
    pub already_posted: usize,
    pub duplicate_in_run: usize,
}

pub struct Deduplicator {
    store: Arc<dyn SeenStore>,
}

impl Deduplicator {
    pub fn new(store: Arc<dyn SeenStore>) -> Self {
        Self { store }
    }

    /// Drop papers already posted and in-run duplicates (first occurrence wins).
    /// Unknown fingerprints get a provisional record written before they pass through.
    pub async fn filter_unseen(
        &self,
        papers: Vec<Paper>,
        now: DateTime<Utc>,
    ) -> Result<(Vec<Paper>, DedupStats), StorageFailure> {
        self.store.refresh().await?;
        let mut stats = DedupStats::default();
        let mut in_run: HashSet<Fingerprint> = HashSet::with_capacity(papers.len());
        let mut out = Vec::with_capacity(papers.len());

        for paper in papers {
            if !in_run.insert(paper.fingerprint.clone()) {
                stats.duplicate_in_run += 1;
                continue;
            }
            match self.store.get_seen(&paper.fingerprint).await? {
                None => {
                    self.store
                        .put_seen(&SeenRecord::provisional(paper.fingerprint.clone(), now))
                        .await?;
                    stats.new += 1;
                    out.push(paper);
                }
                Some(rec) if rec.is_posted() => {
                    tracing::debug!(
                        target: "dedup",
                        fingerprint = paper.fingerprint.short(),
                        "already posted, dropped"
                    );
                    stats.already_posted += 1;
                }
                Some(_) => {
                    stats.carried_over += 1;
                    out.push(paper);
                }
            }
        }

        counter!("digest_dedup_dropped_total")
            .increment((stats.already_posted + stats.duplicate_in_run) as u64);
        tracing::info!(
            target: "dedup",
            kept = out.len(),
            new = stats.new,
            carried_over = stats.carried_over,
            already_posted = stats.already_posted,
            duplicate_in_run = stats.duplicate_in_run,
            "dedup finished"
        );
        Ok((out, stats))
    }

    /// Delivery-completion callback: mark these fingerprints as posted.
    /// `first_seen_at` and an earlier `posted_at` are preserved.
    pub async fn confirm_posted<'a, I>(&self, fingerprints: I, now: DateTime<Utc>) -> Result<usize, StorageFailure>
    where
        I: IntoIterator<Item = &'a Fingerprint>,
    {
        let mut confirmed = 0usize;
        for fp in fingerprints {
            let mut rec = self
                .store
                .get_seen(fp)
                .await?
                .unwrap_or_else(|| SeenRecord::provisional(fp.clone(), now));
            if rec.posted_at.is_none() {
                rec.posted_at = Some(now);
            }
            self.store.put_seen(&rec).await?;
            confirmed += 1;
        }
        tracing::debug!(target: "dedup", confirmed, "posted confirmed");
        Ok(confirmed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::SourceName;
    use crate::storage::MemorySeenStore;
    use chrono::NaiveDate;

    fn paper(fp: &str) -> Paper {
        Paper {
            source_id: fp.into(),
            source_name: SourceName::Arxiv,
            title: format!("Paper {fp}"),
            abstract_text: String::new(),
            authors: vec![],
            published_at: NaiveDate::from_ymd_opt(2024, 5, 1).unwrap(),
            url: String::new(),
            categories: Default::default(),
            doi: None,
            fingerprint: Fingerprint(fp.into()),
        }
    }

    #[tokio::test]
    async fn first_occurrence_wins_within_a_run() {
        let store = Arc::new(MemorySeenStore::new());
        let dedup = Deduplicator::new(store.clone());
        let (kept, stats) = dedup
            .filter_unseen(vec![paper("a"), paper("b"), paper("a")], Utc::now())
            .await
            .unwrap();
        assert_eq!(kept.len(), 2);
        assert_eq!(stats.duplicate_in_run, 1);
        assert_eq!(store.len(), 2);
        assert!(store.snapshot().iter().all(|r| !r.is_posted()));
    }

    #[tokio::test]
    async fn unposted_records_stay_eligible_and_posted_ones_do_not() {
        let store = Arc::new(MemorySeenStore::new());
        let dedup = Deduplicator::new(store.clone());
        let t0 = Utc::now();
        dedup
            .filter_unseen(vec![paper("a"), paper("b")], t0)
            .await
            .unwrap();
        dedup
            .confirm_posted([&Fingerprint("a".into())], t0)
            .await
            .unwrap();

        let (kept, stats) = dedup
            .filter_unseen(vec![paper("a"), paper("b")], t0 + chrono::Duration::days(1))
            .await
            .unwrap();
        assert_eq!(kept.iter().map(|p| p.source_id.as_str()).collect::<Vec<_>>(), ["b"]);
        assert_eq!(stats.already_posted, 1);
        assert_eq!(stats.carried_over, 1);

        let b = store.get_seen(&Fingerprint("b".into())).await.unwrap().unwrap();
        assert_eq!(b.first_seen_at, t0);
    }

    #[tokio::test]
    async fn confirm_keeps_first_seen_and_original_post_time() {
        let store = Arc::new(MemorySeenStore::new());
        let dedup = Deduplicator::new(store.clone());
        let t0 = Utc::now();
        let t1 = t0 + chrono::Duration::hours(2);
        let fp = Fingerprint("a".into());
        dedup.filter_unseen(vec![paper("a")], t0).await.unwrap();
        dedup.confirm_posted([&fp], t1).await.unwrap();
        dedup
            .confirm_posted([&fp], t1 + chrono::Duration::hours(1))
            .await
            .unwrap();
        let rec = store.get_seen(&fp).await.unwrap().unwrap();
        assert_eq!(rec.first_seen_at, t0);
        assert_eq!(rec.posted_at, Some(t1));
    }
}
