// src/delivery/mod.rs
pub mod discord;

use async_trait::async_trait;
use serde::Serialize;

use crate::error::DeliveryFailure;
use crate::model::{Digest, Fingerprint};

pub use discord::DiscordDelivery;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", content = "reason", rename_all = "snake_case")]
pub enum ItemStatus {
    Delivered,
    Failed(DeliveryFailure),
    /// Not sent on purpose (dry run). Never confirms the item as posted.
    Skipped,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ItemResult {
    pub fingerprint: Fingerprint,
    pub status: ItemStatus,
}

/// Per-item outcome of one `deliver` call, in digest order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DeliveryResult {
    pub items: Vec<ItemResult>,
}

impl DeliveryResult {
    pub fn all(digest: &Digest, status: ItemStatus) -> Self {
        Self {
            items: digest
                .items
                .iter()
                .map(|i| ItemResult {
                    fingerprint: i.paper.fingerprint.clone(),
                    status: status.clone(),
                })
                .collect(),
        }
    }

    pub fn delivered(&self) -> impl Iterator<Item = &Fingerprint> {
        self.items
            .iter()
            .filter(|i| i.status == ItemStatus::Delivered)
            .map(|i| &i.fingerprint)
    }

    pub fn delivered_count(&self) -> usize {
        self.delivered().count()
    }

    pub fn failed_count(&self) -> usize {
        self.items
            .iter()
            .filter(|i| matches!(i.status, ItemStatus::Failed(_)))
            .count()
    }
}

/// Chat transport. Must report every digest item; an empty digest needs no network call.
#[async_trait]
pub trait Delivery: Send + Sync {
    async fn deliver(&self, digest: &Digest) -> DeliveryResult;
    fn name(&self) -> &'static str;
}

/// Logs what would be posted and reports every item as skipped.
#[derive(Debug, Default, Clone, Copy)]
pub struct DryRunDelivery;

#[async_trait]
impl Delivery for DryRunDelivery {
    async fn deliver(&self, digest: &Digest) -> DeliveryResult {
        for (n, item) in digest.items.iter().enumerate() {
            tracing::info!(
                target: "delivery",
                position = n + 1,
                source = item.paper.source_name.as_str(),
                fingerprint = item.paper.fingerprint.short(),
                score = item.score,
                words = item.summary.word_count,
                title = %item.paper.title,
                "dry run: would post"
            );
        }
        DeliveryResult::all(digest, ItemStatus::Skipped)
    }

    fn name(&self) -> &'static str {
        "dry_run"
    }
}
