//! Canonical entities shared by every pipeline stage.

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// Every source the fetch layer knows how to talk to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceName {
    Arxiv,
    Crossref,
    Biorxiv,
    Medrxiv,
    SemanticScholar,
}

impl SourceName {
    pub const ALL: [SourceName; 5] = [
        SourceName::Arxiv,
        SourceName::Crossref,
        SourceName::Biorxiv,
        SourceName::Medrxiv,
        SourceName::SemanticScholar,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Arxiv => "arxiv",
            Self::Crossref => "crossref",
            Self::Biorxiv => "biorxiv",
            Self::Medrxiv => "medrxiv",
            Self::SemanticScholar => "semantic_scholar",
        }
    }

    /// Human label used in chat messages.
    pub fn display_name(self) -> &'static str {
        match self {
            Self::Arxiv => "arXiv",
            Self::Crossref => "Crossref",
            Self::Biorxiv => "bioRxiv",
            Self::Medrxiv => "medRxiv",
            Self::SemanticScholar => "Semantic Scholar",
        }
    }
}

impl fmt::Display for SourceName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SourceName {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "arxiv" => Ok(Self::Arxiv),
            "crossref" => Ok(Self::Crossref),
            "biorxiv" => Ok(Self::Biorxiv),
            "medrxiv" => Ok(Self::Medrxiv),
            "semantic_scholar" | "semanticscholar" | "s2" => Ok(Self::SemanticScholar),
            other => Err(format!("unknown source '{other}'")),
        }
    }
}

/// Hex-encoded SHA-256 identifying one underlying work across sources and runs.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Fingerprint(pub String);

impl Fingerprint {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Short prefix for log lines.
    pub fn short(&self) -> &str {
        &self.0[..self.0.len().min(12)]
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Canonical paper produced by the normalizer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Paper {
    pub source_id: String,
    pub source_name: SourceName,
    pub title: String,
    #[serde(rename = "abstract")]
    pub abstract_text: String,
    pub authors: Vec<String>,
    pub published_at: NaiveDate,
    pub url: String,
    /// Lower-cased, trimmed.
    pub categories: BTreeSet<String>,
    /// Bare DOI (no resolver prefix), lower-cased.
    pub doi: Option<String>,
    pub fingerprint: Fingerprint,
}

impl Paper {
    /// Title and abstract joined, lower-cased. Keyword matching runs on this.
    pub fn search_text(&self) -> String {
        format!("{} {}", self.title, self.abstract_text).to_lowercase()
    }
}

/// Dedup history for one fingerprint. Append-only; `posted_at` is set once, on confirmed delivery.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeenRecord {
    pub fingerprint: Fingerprint,
    pub first_seen_at: DateTime<Utc>,
    pub posted_at: Option<DateTime<Utc>>,
}

impl SeenRecord {
    pub fn provisional(fingerprint: Fingerprint, now: DateTime<Utc>) -> Self {
        Self {
            fingerprint,
            first_seen_at: now,
            posted_at: None,
        }
    }

    pub fn is_posted(&self) -> bool {
        self.posted_at.is_some()
    }
}

/// Paper that survived filtering, with its rank score.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScoredPaper {
    pub paper: Paper,
    pub score: f64,
    pub matched_keywords: BTreeSet<String>,
}

/// Localized summary attached to a selected paper.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Summary {
    pub text: String,
    pub tldr: String,
    pub language: String,
    pub word_count: usize,
    /// Set whenever `word_count` ended up outside the configured bounds.
    pub length_violation: bool,
    /// Name of the backend that produced the text.
    pub backend: String,
    pub fallback_used: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DigestItem {
    pub paper: Paper,
    pub score: f64,
    pub matched_keywords: BTreeSet<String>,
    pub summary: Summary,
}

/// Ordered, bounded selection for one run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Digest {
    pub date: NaiveDate,
    pub items: Vec<DigestItem>,
}

impl Digest {
    pub fn empty(date: NaiveDate) -> Self {
        Self {
            date,
            items: Vec::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }
}

/// Time range a run asks its sources about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct QueryWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl QueryWindow {
    pub fn lookback(end: DateTime<Utc>, hours: i64) -> Self {
        Self {
            start: end - chrono::Duration::hours(hours.max(1)),
            end,
        }
    }

    pub fn start_date(&self) -> NaiveDate {
        self.start.date_naive()
    }

    pub fn end_date(&self) -> NaiveDate {
        self.end.date_naive()
    }
}
