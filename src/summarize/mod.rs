// src/summarize/mod.rs
//! Per-paper summaries: a pluggable backend, a length contract and a rule-based fallback.

pub mod quota;
pub mod remote;
pub mod rule_based;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use metrics::{counter, describe_counter};
use once_cell::sync::{Lazy, OnceCell};
use regex::Regex;

use crate::error::SummarizerError;
use crate::model::{Paper, Summary};

pub use quota::QuotaLimited;
pub use remote::{AnthropicSummarizer, OpenAiSummarizer};
pub use rule_based::RuleBasedSummarizer;

fn ensure_metrics_described() {
    static ONCE: OnceCell<()> = OnceCell::new();
    ONCE.get_or_init(|| {
        describe_counter!(
            "digest_summary_fallback_total",
            "Summaries produced by the rule-based fallback after a backend failure."
        );
        describe_counter!(
            "digest_summary_length_violation_total",
            "Summaries accepted outside the configured word bounds."
        );
    });
}

/// Inclusive word-count bounds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LengthBounds {
    pub min: usize,
    pub max: usize,
}

impl LengthBounds {
    /// Swaps the ends if given in the wrong order.
    pub fn new(a: usize, b: usize) -> Self {
        Self {
            min: a.min(b),
            max: a.max(b),
        }
    }

    pub fn contains(&self, words: usize) -> bool {
        (self.min..=self.max).contains(&words)
    }

    pub fn midpoint(&self) -> usize {
        self.min + (self.max - self.min) / 2
    }
}

/// Input handed to a backend.
#[derive(Debug, Clone)]
pub struct SummaryRequest<'a> {
    pub title: &'a str,
    pub text: &'a str,
    pub authors: &'a [String],
    pub target_language: &'a str,
    pub bounds: LengthBounds,
    pub tldr_max_sentences: usize,
    /// Set on the retry after an out-of-bounds draft.
    pub target_words: Option<usize>,
}

/// Raw backend output before the orchestrator's checks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Draft {
    pub summary: String,
    pub tldr: String,
}

#[async_trait]
pub trait Summarizer: Send + Sync {
    async fn summarize(&self, req: &SummaryRequest<'_>) -> Result<Draft, SummarizerError>;
    fn name(&self) -> &'static str;
}

pub fn word_count(s: &str) -> usize {
    s.split_whitespace().count()
}

static RE_SENTENCE_END: Lazy<Regex> = Lazy::new(|| Regex::new(r"[.!?。]+(\s+|$)").unwrap());

/// Split on sentence punctuation followed by whitespace (or end of text).
pub fn split_sentences(text: &str) -> Vec<String> {
    let mut out = Vec::new();
    let mut start = 0usize;
    for m in RE_SENTENCE_END.find_iter(text) {
        let s = text[start..m.end()].trim();
        if !s.is_empty() {
            out.push(s.to_string());
        }
        start = m.end();
    }
    let rest = text[start..].trim();
    if !rest.is_empty() {
        out.push(rest.to_string());
    }
    out
}

/// Keep at most `n` sentences (at least one).
pub fn trim_sentences(text: &str, n: usize) -> String {
    split_sentences(text)
        .into_iter()
        .take(n.max(1))
        .collect::<Vec<_>>()
        .join(" ")
}

pub struct OrchestratorConfig {
    pub target_language: String,
    pub bounds: LengthBounds,
    pub tldr_max_sentences: usize,
    pub call_timeout: Duration,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            target_language: "th".into(),
            bounds: LengthBounds::new(150, 250),
            tldr_max_sentences: 2,
            call_timeout: Duration::from_secs(30),
        }
    }
}

pub struct SummaryOrchestrator {
    backend: Arc<dyn Summarizer>,
    fallback: RuleBasedSummarizer,
    cfg: OrchestratorConfig,
}

impl SummaryOrchestrator {
    pub fn new(backend: Arc<dyn Summarizer>, cfg: OrchestratorConfig) -> Self {
        Self {
            backend,
            fallback: RuleBasedSummarizer,
            cfg,
        }
    }

    pub fn backend_name(&self) -> &'static str {
        self.backend.name()
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.cfg
    }

    async fn call(
        &self,
        backend: &dyn Summarizer,
        req: &SummaryRequest<'_>,
    ) -> Result<Draft, SummarizerError> {
        match tokio::time::timeout(self.cfg.call_timeout, backend.summarize(req)).await {
            Ok(r) => r,
            Err(_) => Err(SummarizerError::Timeout),
        }
    }

    /// Never fails: a backend error degrades to the rule-based summary for this paper only.
    pub async fn summarize(&self, paper: &Paper) -> Summary {
        ensure_metrics_described();

        let mut req = SummaryRequest {
            title: &paper.title,
            text: &paper.abstract_text,
            authors: &paper.authors,
            target_language: &self.cfg.target_language,
            bounds: self.cfg.bounds,
            tldr_max_sentences: self.cfg.tldr_max_sentences,
            target_words: None,
        };

        let mut backend: &dyn Summarizer = self.backend.as_ref();
        let mut fallback_used = false;
        let first = match self.call(backend, &req).await {
            Ok(d) => d,
            Err(e) => {
                tracing::warn!(
                    target: "summarize",
                    backend = backend.name(),
                    fingerprint = paper.fingerprint.short(),
                    error = %e,
                    "backend failed, using rule-based fallback"
                );
                counter!("digest_summary_fallback_total").increment(1);
                fallback_used = true;
                backend = &self.fallback;
                self.fallback.draft(&req)
            }
        };

        let mut draft = first;
        let words = word_count(&draft.summary);
        if !self.cfg.bounds.contains(words) {
            req.target_words = Some(self.cfg.bounds.midpoint());
            tracing::debug!(
                target: "summarize",
                backend = backend.name(),
                words,
                target = self.cfg.bounds.midpoint(),
                "draft out of bounds, retrying once"
            );
            match self.call(backend, &req).await {
                Ok(retry) => draft = retry,
                Err(e) => {
                    tracing::debug!(target: "summarize", error = %e, "length retry failed, keeping first draft");
                }
            }
        }

        let word_count = word_count(&draft.summary);
        let length_violation = !self.cfg.bounds.contains(word_count);
        if length_violation {
            counter!("digest_summary_length_violation_total").increment(1);
            tracing::info!(
                target: "summarize",
                fingerprint = paper.fingerprint.short(),
                word_count,
                min = self.cfg.bounds.min,
                max = self.cfg.bounds.max,
                "summary accepted with length violation"
            );
        }

        let tldr_source = if draft.tldr.trim().is_empty() {
            &draft.summary
        } else {
            &draft.tldr
        };
        let tldr = trim_sentences(tldr_source, self.cfg.tldr_max_sentences);

        Summary {
            text: draft.summary,
            tldr,
            language: self.cfg.target_language.clone(),
            word_count,
            length_violation,
            backend: backend.name().to_string(),
            fallback_used,
        }
    }
}
