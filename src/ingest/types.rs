// src/ingest/types.rs
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::AdapterError;
use crate::model::{QueryWindow, SourceName};

/// What a run asks every source for.
#[derive(Debug, Clone)]
pub struct FetchQuery {
    pub window: QueryWindow,
    pub keywords: Vec<String>,
    /// Source-native category filter (e.g. `cs.LG` for arXiv). Sources without categories ignore it.
    pub categories: Vec<String>,
}

/// One page of raw records plus the cursor of the next page, if any.
#[derive(Debug, Clone, Default)]
pub struct Page {
    pub records: Vec<RawRecord>,
    pub next: Option<usize>,
}

impl Page {
    pub fn last(records: Vec<RawRecord>) -> Self {
        Self {
            records,
            next: None,
        }
    }
}

/// Source-native record shapes. Each variant has its own mapping in `normalize`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "shape", rename_all = "snake_case")]
pub enum RawRecord {
    Arxiv(ArxivEntry),
    Crossref(CrossrefItem),
    Biorxiv(BiorxivItem),
    SemanticScholar(ScholarPaper),
}

impl RawRecord {
    pub fn source(&self) -> SourceName {
        match self {
            RawRecord::Arxiv(_) => SourceName::Arxiv,
            RawRecord::Crossref(_) => SourceName::Crossref,
            RawRecord::Biorxiv(b) => b.server,
            RawRecord::SemanticScholar(_) => SourceName::SemanticScholar,
        }
    }
}

/// Atom `<entry>` as returned by the arXiv API.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ArxivEntry {
    /// `http://arxiv.org/abs/2405.01234v2`
    pub id: Option<String>,
    pub title: Option<String>,
    pub summary: Option<String>,
    /// RFC 3339.
    pub published: Option<String>,
    pub authors: Vec<String>,
    pub categories: Vec<String>,
    pub doi: Option<String>,
}

/// `message.items[]` from the Crossref `works` endpoint.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CrossrefItem {
    #[serde(rename = "DOI")]
    pub doi: Option<String>,
    #[serde(default)]
    pub title: Vec<String>,
    #[serde(rename = "abstract")]
    pub abstract_text: Option<String>,
    #[serde(default)]
    pub author: Vec<CrossrefAuthor>,
    #[serde(rename = "URL")]
    pub url: Option<String>,
    #[serde(default)]
    pub subject: Vec<String>,
    #[serde(rename = "published-print")]
    pub published_print: Option<CrossrefDate>,
    #[serde(rename = "published-online")]
    pub published_online: Option<CrossrefDate>,
    pub issued: Option<CrossrefDate>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CrossrefAuthor {
    pub given: Option<String>,
    pub family: Option<String>,
    pub name: Option<String>,
}

/// `{"date-parts": [[2024, 5, 1]]}`; month and day may be missing.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CrossrefDate {
    #[serde(rename = "date-parts", default)]
    pub date_parts: Vec<Vec<Option<i32>>>,
}

/// `collection[]` from `api.biorxiv.org/details/...`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BiorxivItem {
    /// Which server the record came from; set by the adapter, not by the payload.
    #[serde(default = "default_biorxiv_server")]
    pub server: SourceName,
    pub doi: Option<String>,
    pub title: Option<String>,
    #[serde(rename = "abstract")]
    pub abstract_text: Option<String>,
    /// Semicolon separated.
    pub authors: Option<String>,
    /// `YYYY-MM-DD`
    pub date: Option<String>,
    pub category: Option<String>,
    pub version: Option<String>,
}

fn default_biorxiv_server() -> SourceName {
    SourceName::Biorxiv
}

/// `data[]` from the Semantic Scholar Graph API paper search.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScholarPaper {
    pub paper_id: Option<String>,
    pub title: Option<String>,
    #[serde(rename = "abstract")]
    pub abstract_text: Option<String>,
    pub url: Option<String>,
    pub year: Option<i32>,
    /// `YYYY-MM-DD`
    pub publication_date: Option<String>,
    #[serde(default)]
    pub authors: Vec<ScholarAuthor>,
    pub external_ids: Option<ScholarExternalIds>,
    pub fields_of_study: Option<Vec<String>>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ScholarAuthor {
    pub name: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ScholarExternalIds {
    #[serde(rename = "DOI")]
    pub doi: Option<String>,
    #[serde(rename = "ArXiv")]
    pub arxiv: Option<String>,
}

/// A pluggable academic-metadata provider.
///
/// Adapters return typed failures; they never hand back a half-parsed page.
/// Rate limiting and timeouts are applied by the fetch manager around each call.
#[async_trait]
pub trait SourceAdapter: Send + Sync {
    /// Fetch the page starting at `cursor` (0 for the first page).
    async fn fetch_page(&self, query: &FetchQuery, cursor: usize) -> Result<Page, AdapterError>;
    fn name(&self) -> SourceName;
}
