// src/delivery/discord.rs
use std::time::Duration;

use async_trait::async_trait;
use metrics::counter;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};

use super::{Delivery, DeliveryResult, ItemResult, ItemStatus};
use crate::error::DeliveryFailure;
use crate::ingest::retry::{RetryDecision, RetryPolicy};
use crate::model::{Digest, DigestItem, SourceName};

const MAX_TITLE: usize = 256;
const MAX_DESCRIPTION: usize = 4096;
const MAX_FIELD: usize = 1024;
/// Longest server-requested pause we are willing to honour.
const MAX_RETRY_AFTER: Duration = Duration::from_secs(30);

#[derive(Clone)]
pub struct DiscordDelivery {
    webhook: String,
    client: Client,
    username: Option<String>,
    timeout: Duration,
    retry: RetryPolicy,
}

/// One failed webhook attempt.
#[derive(Debug, thiserror::Error)]
enum PostError {
    #[error("Discord webhook rate limited")]
    RateLimited(Option<Duration>),
    #[error("Discord webhook HTTP error: {0}")]
    Status(StatusCode),
    #[error("Discord webhook request failed: {0}")]
    Transport(String),
}

impl PostError {
    fn decision(&self) -> RetryDecision {
        match self {
            PostError::RateLimited(Some(hint)) => RetryDecision::After((*hint).min(MAX_RETRY_AFTER)),
            PostError::RateLimited(None) | PostError::Transport(_) => RetryDecision::Backoff,
            PostError::Status(s) if s.is_client_error() => RetryDecision::Stop,
            PostError::Status(_) => RetryDecision::Backoff,
        }
    }
}

impl DiscordDelivery {
    pub fn new(webhook: String) -> Self {
        Self {
            webhook,
            client: Client::new(),
            username: None,
            timeout: Duration::from_secs(10),
            retry: RetryPolicy {
                max_attempts: 3,
                base_backoff: Duration::from_millis(500),
                multiplier: 2,
            },
        }
    }

    pub fn with_timeout(mut self, secs: u64) -> Self {
        self.timeout = Duration::from_secs(secs);
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_username(mut self, username: Option<String>) -> Self {
        self.username = username.filter(|u| !u.trim().is_empty());
        self
    }

    async fn post(&self, payload: &WebhookPayload) -> Result<(), DeliveryFailure> {
        self.retry
            .run_classified("discord webhook", || self.post_once(payload), PostError::decision)
            .await
            .map_err(|e| DeliveryFailure(e.to_string()))
    }

    async fn post_once(&self, payload: &WebhookPayload) -> Result<(), PostError> {
        let rsp = self
            .client
            .post(&self.webhook)
            .timeout(self.timeout)
            .json(payload)
            .send()
            .await
            .map_err(|e| PostError::Transport(e.to_string()))?;
        match rsp.status() {
            s if s.is_success() => Ok(()),
            StatusCode::TOO_MANY_REQUESTS => {
                let hint = rsp
                    .json::<RateLimited>()
                    .await
                    .ok()
                    .and_then(|r| Duration::try_from_secs_f64(r.retry_after.max(0.0)).ok());
                Err(PostError::RateLimited(hint))
            }
            s => Err(PostError::Status(s)),
        }
    }

    fn payload(&self, item: &DigestItem, position: usize) -> WebhookPayload {
        WebhookPayload {
            username: self.username.clone(),
            content: None,
            embeds: vec![paper_embed(item, position)],
        }
    }
}

#[async_trait]
impl Delivery for DiscordDelivery {
    async fn deliver(&self, digest: &Digest) -> DeliveryResult {
        let mut out = DeliveryResult::default();
        for (n, item) in digest.items.iter().enumerate() {
            let status = match self.post(&self.payload(item, n + 1)).await {
                Ok(()) => {
                    counter!("digest_delivered_total").increment(1);
                    ItemStatus::Delivered
                }
                Err(e) => {
                    counter!("digest_delivery_failed_total").increment(1);
                    tracing::warn!(
                        target: "delivery",
                        fingerprint = item.paper.fingerprint.short(),
                        error = %e,
                        "item not delivered"
                    );
                    ItemStatus::Failed(e)
                }
            };
            out.items.push(ItemResult {
                fingerprint: item.paper.fingerprint.clone(),
                status,
            });
        }
        out
    }

    fn name(&self) -> &'static str {
        "discord"
    }
}

#[derive(Deserialize)]
struct RateLimited {
    /// Seconds.
    retry_after: f64,
}

#[derive(Debug, Serialize)]
pub struct EmbedField {
    pub name: String,
    pub value: String,
    pub inline: bool,
}

#[derive(Debug, Serialize)]
pub struct Embed {
    pub title: String,
    pub url: Option<String>,
    pub description: String,
    pub color: u32,
    pub fields: Vec<EmbedField>,
}

#[derive(Debug, Serialize)]
struct WebhookPayload {
    #[serde(skip_serializing_if = "Option::is_none")]
    username: Option<String>,
    content: Option<String>,
    embeds: Vec<Embed>,
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        return s.to_string();
    }
    let mut out: String = s.chars().take(max.saturating_sub(3)).collect();
    out.push_str("...");
    out
}

fn source_color(source: SourceName) -> u32 {
    match source {
        SourceName::Arxiv => 0xB31B1B,
        SourceName::Crossref => 0x3EB1C8,
        SourceName::Biorxiv => 0xBD2736,
        SourceName::Medrxiv => 0x0B5394,
        SourceName::SemanticScholar => 0x1857B6,
    }
}

fn authors_line(authors: &[String]) -> String {
    match authors.len() {
        0 => "-".to_string(),
        1..=3 => authors.join(", "),
        n => format!("{} +{} more", authors[..3].join(", "), n - 3),
    }
}

/// One embed per paper: numbered title linking to the paper, summary plus TL;DR, and metadata.
pub fn paper_embed(item: &DigestItem, position: usize) -> Embed {
    let p = &item.paper;
    let mut description = item.summary.text.clone();
    if !item.summary.tldr.is_empty() {
        description.push_str(&format!("\n\n**TL;DR:** {}", item.summary.tldr));
    }
    let mut fields = vec![
        EmbedField {
            name: "Authors".into(),
            value: truncate(&authors_line(&p.authors), MAX_FIELD),
            inline: false,
        },
        EmbedField {
            name: "Source".into(),
            value: format!("{} ({})", p.source_name.display_name(), p.published_at),
            inline: true,
        },
    ];
    if !item.matched_keywords.is_empty() {
        let kws: Vec<&str> = item.matched_keywords.iter().map(String::as_str).collect();
        fields.push(EmbedField {
            name: "Keywords".into(),
            value: truncate(&kws.join(", "), MAX_FIELD),
            inline: true,
        });
    }
    Embed {
        title: truncate(&format!("{position}. {}", p.title), MAX_TITLE),
        url: (!p.url.is_empty()).then(|| p.url.clone()),
        description: truncate(&description, MAX_DESCRIPTION),
        color: source_color(p.source_name),
        fields,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Fingerprint, Paper, Summary};
    use chrono::NaiveDate;

    fn item(authors: usize) -> DigestItem {
        DigestItem {
            paper: Paper {
                source_id: "2405.1".into(),
                source_name: SourceName::Arxiv,
                title: "T".repeat(300),
                abstract_text: String::new(),
                authors: (0..authors).map(|i| format!("A{i}")).collect(),
                published_at: NaiveDate::from_ymd_opt(2024, 5, 1).unwrap(),
                url: "https://arxiv.org/abs/2405.1".into(),
                categories: Default::default(),
                doi: None,
                fingerprint: Fingerprint("f".into()),
            },
            score: 1.0,
            matched_keywords: ["diffusion".to_string()].into_iter().collect(),
            summary: Summary {
                text: "Summary text.".into(),
                tldr: "Short.".into(),
                language: "en".into(),
                word_count: 2,
                length_violation: false,
                backend: "rule_based".into(),
                fallback_used: false,
            },
        }
    }

    #[test]
    fn embed_respects_discord_limits() {
        let e = paper_embed(&item(5), 1);
        assert_eq!(e.title.chars().count(), MAX_TITLE);
        assert!(e.title.starts_with("1. "));
        assert!(e.description.ends_with("**TL;DR:** Short."));
        assert_eq!(e.fields[0].value, "A0, A1, A2 +2 more");
        assert_eq!(e.fields[1].value, "arXiv (2024-05-01)");
        assert_eq!(e.fields[2].value, "diffusion");
    }

    #[tokio::test]
    async fn empty_digest_makes_no_calls() {
        // Unroutable webhook: any request would fail the item.
        let d = DiscordDelivery::new("http://127.0.0.1:9/webhook".into()).with_retry(RetryPolicy::none());
        let res = d
            .deliver(&Digest::empty(NaiveDate::from_ymd_opt(2024, 5, 1).unwrap()))
            .await;
        assert!(res.items.is_empty());
    }

    #[test]
    fn retry_decisions_follow_status() {
        assert_eq!(
            PostError::RateLimited(Some(Duration::from_secs(2))).decision(),
            RetryDecision::After(Duration::from_secs(2))
        );
        assert_eq!(
            PostError::RateLimited(Some(Duration::from_secs(600))).decision(),
            RetryDecision::After(MAX_RETRY_AFTER)
        );
        assert_eq!(PostError::RateLimited(None).decision(), RetryDecision::Backoff);
        assert_eq!(PostError::Status(StatusCode::BAD_GATEWAY).decision(), RetryDecision::Backoff);
        assert_eq!(PostError::Status(StatusCode::NOT_FOUND).decision(), RetryDecision::Stop);
        assert_eq!(PostError::Transport("reset".into()).decision(), RetryDecision::Backoff);
    }
}
