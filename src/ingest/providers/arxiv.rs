// src/ingest/providers/arxiv.rs
use async_trait::async_trait;
use metrics::{counter, histogram};
use quick_xml::de::from_str;
use serde::Deserialize;

use crate::error::AdapterError;
use crate::ingest::providers::{http_client, send_for_text};
use crate::ingest::retry::RetryPolicy;
use crate::ingest::types::{ArxivEntry, FetchQuery, Page, RawRecord, SourceAdapter};
use crate::model::SourceName;

pub const ARXIV_API: &str = "https://export.arxiv.org/api/query";

#[derive(Debug, Deserialize)]
struct Feed {
    #[serde(rename = "totalResults", alias = "opensearch:totalResults")]
    total_results: Option<usize>,
    #[serde(rename = "entry", default)]
    entries: Vec<AtomEntry>,
}

#[derive(Debug, Deserialize)]
struct AtomEntry {
    id: Option<String>,
    title: Option<String>,
    summary: Option<String>,
    published: Option<String>,
    #[serde(rename = "author", default)]
    authors: Vec<AtomAuthor>,
    #[serde(rename = "category", default)]
    categories: Vec<AtomCategory>,
    #[serde(rename = "doi", alias = "arxiv:doi")]
    doi: Option<String>,
}

#[derive(Debug, Deserialize)]
struct AtomAuthor {
    name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct AtomCategory {
    #[serde(rename = "@term")]
    term: Option<String>,
}

pub struct ArxivProvider {
    mode: Mode,
    page_size: usize,
}

enum Mode {
    // Owned copy so tests can pass non-'static payloads.
    Fixture(String),
    Http {
        base_url: String,
        client: reqwest::Client,
        retry: RetryPolicy,
    },
}

impl ArxivProvider {
    pub fn from_fixture_str(s: &str) -> Self {
        Self {
            mode: Mode::Fixture(s.to_string()),
            page_size: usize::MAX,
        }
    }

    pub fn from_url(base_url: &str, page_size: usize, retry: RetryPolicy) -> Result<Self, AdapterError> {
        Ok(Self {
            mode: Mode::Http {
                base_url: base_url.to_string(),
                client: http_client()?,
                retry,
            },
            page_size: page_size.clamp(1, 200),
        })
    }

    /// `cat:` filters OR-ed, keywords searched in title and abstract, then a submission window.
    pub fn build_search_query(query: &FetchQuery) -> String {
        let mut parts = Vec::new();

        let cats: Vec<String> = query
            .categories
            .iter()
            .filter(|c| c.contains('.'))
            .map(|c| format!("cat:{c}"))
            .collect();
        if !cats.is_empty() {
            parts.push(format!("({})", cats.join(" OR ")));
        }

        let kws: Vec<String> = query
            .keywords
            .iter()
            .map(|k| k.replace('"', "").trim().to_string())
            .filter(|k| !k.is_empty())
            .map(|k| format!("(ti:\"{k}\" OR abs:\"{k}\")"))
            .collect();
        if !kws.is_empty() {
            parts.push(format!("({})", kws.join(" OR ")));
        }

        if parts.is_empty() {
            parts.push("(cat:cs.AI OR cat:cs.LG OR cat:cs.CL OR cat:cs.CV)".to_string());
        }

        parts.push(format!(
            "submittedDate:[{} TO {}]",
            query.window.start.format("%Y%m%d%H%M"),
            query.window.end.format("%Y%m%d%H%M")
        ));
        parts.join(" AND ")
    }

    pub fn parse_feed(xml: &str) -> Result<(Vec<RawRecord>, Option<usize>), AdapterError> {
        let t0 = std::time::Instant::now();
        let feed: Feed =
            from_str(xml).map_err(|e| AdapterError::malformed(format!("arxiv atom: {e}")))?;

        let mut out = Vec::with_capacity(feed.entries.len());
        for e in feed.entries {
            // The API reports query errors as a single pseudo-entry.
            if e.id.as_deref().is_some_and(|id| id.contains("/api/errors")) {
                let msg = e.summary.unwrap_or_else(|| "unknown arXiv API error".into());
                return Err(AdapterError::malformed(format!("arxiv api error: {}", msg.trim())));
            }
            out.push(RawRecord::Arxiv(ArxivEntry {
                id: e.id,
                title: e.title,
                summary: e.summary,
                published: e.published,
                authors: e.authors.into_iter().filter_map(|a| a.name).collect(),
                categories: e.categories.into_iter().filter_map(|c| c.term).collect(),
                doi: e.doi,
            }));
        }

        histogram!("digest_parse_ms", "source" => "arxiv")
            .record(t0.elapsed().as_secs_f64() * 1_000.0);
        Ok((out, feed.total_results))
    }
}

#[async_trait]
impl SourceAdapter for ArxivProvider {
    async fn fetch_page(&self, query: &FetchQuery, cursor: usize) -> Result<Page, AdapterError> {
        match &self.mode {
            Mode::Fixture(s) => Ok(Page::last(Self::parse_feed(s)?.0)),
            Mode::Http {
                base_url,
                client,
                retry,
            } => {
                let search = Self::build_search_query(query);
                let start = cursor.to_string();
                let max = self.page_size.to_string();
                let body = retry
                    .run("arxiv query", || {
                        send_for_text(client.get(base_url.as_str()).query(&[
                            ("search_query", search.as_str()),
                            ("start", start.as_str()),
                            ("max_results", max.as_str()),
                            ("sortBy", "submittedDate"),
                            ("sortOrder", "descending"),
                        ]))
                    })
                    .await
                    .inspect_err(|_| {
                        counter!("digest_provider_http_errors_total", "source" => "arxiv")
                            .increment(1);
                    })?;

                let (records, total) = Self::parse_feed(&body)?;
                let fetched_to = cursor + records.len();
                let more = records.len() >= self.page_size
                    && total.map_or(true, |t| fetched_to < t);
                Ok(Page {
                    records,
                    next: more.then_some(fetched_to),
                })
            }
        }
    }

    fn name(&self) -> SourceName {
        SourceName::Arxiv
    }
}
