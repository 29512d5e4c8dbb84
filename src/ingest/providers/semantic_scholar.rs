// src/ingest/providers/semantic_scholar.rs
use async_trait::async_trait;
use metrics::counter;
use serde::Deserialize;

use crate::error::AdapterError;
use crate::ingest::providers::{http_client, send_for_text};
use crate::ingest::retry::RetryPolicy;
use crate::ingest::types::{FetchQuery, Page, RawRecord, ScholarPaper, SourceAdapter};
use crate::model::SourceName;

pub const SEMANTIC_SCHOLAR_API: &str = "https://api.semanticscholar.org/graph/v1/paper/search";

const FIELDS: &str =
    "paperId,title,abstract,url,year,publicationDate,authors,externalIds,fieldsOfStudy";

#[derive(Debug, Deserialize)]
struct SearchResponse {
    total: Option<usize>,
    next: Option<usize>,
    #[serde(default)]
    data: Vec<ScholarPaper>,
}

pub struct SemanticScholarProvider {
    mode: Mode,
    page_size: usize,
}

enum Mode {
    Fixture(String),
    Http {
        base_url: String,
        client: reqwest::Client,
        retry: RetryPolicy,
        api_key: Option<String>,
    },
}

impl SemanticScholarProvider {
    pub fn from_fixture_str(s: &str) -> Self {
        Self {
            mode: Mode::Fixture(s.to_string()),
            page_size: usize::MAX,
        }
    }

    pub fn from_url(
        base_url: &str,
        page_size: usize,
        retry: RetryPolicy,
        api_key: Option<String>,
    ) -> Result<Self, AdapterError> {
        Ok(Self {
            mode: Mode::Http {
                base_url: base_url.to_string(),
                client: http_client()?,
                retry,
                api_key: api_key.filter(|k| !k.trim().is_empty()),
            },
            page_size: page_size.clamp(1, 100),
        })
    }

    /// Returns the records and the offset of the next page as reported by the API.
    pub fn parse_search(json: &str) -> Result<(Vec<RawRecord>, Option<usize>), AdapterError> {
        let resp: SearchResponse = serde_json::from_str(json)
            .map_err(|e| AdapterError::malformed(format!("semantic scholar search: {e}")))?;
        tracing::debug!(
            target: "ingest",
            total = resp.total.unwrap_or(0),
            page = resp.data.len(),
            "semantic scholar page"
        );
        let records = resp.data.into_iter().map(RawRecord::SemanticScholar).collect();
        Ok((records, resp.next))
    }
}

#[async_trait]
impl SourceAdapter for SemanticScholarProvider {
    async fn fetch_page(&self, query: &FetchQuery, cursor: usize) -> Result<Page, AdapterError> {
        match &self.mode {
            Mode::Fixture(s) => Ok(Page::last(Self::parse_search(s)?.0)),
            Mode::Http {
                base_url,
                client,
                retry,
                api_key,
            } => {
                // The search endpoint requires free text; nothing to ask without keywords.
                let text = query.keywords.join(" ");
                if text.trim().is_empty() {
                    return Ok(Page::default());
                }
                let range = format!(
                    "{}:{}",
                    query.window.start_date(),
                    query.window.end_date()
                );
                let offset = cursor.to_string();
                let limit = self.page_size.to_string();

                let body = retry
                    .run("semantic scholar search", || {
                        let mut req = client.get(base_url.as_str()).query(&[
                            ("query", text.as_str()),
                            ("fields", FIELDS),
                            ("publicationDateOrYear", range.as_str()),
                            ("offset", offset.as_str()),
                            ("limit", limit.as_str()),
                        ]);
                        if let Some(key) = api_key.as_deref() {
                            req = req.header("x-api-key", key);
                        }
                        send_for_text(req)
                    })
                    .await
                    .inspect_err(|_| {
                        counter!("digest_provider_http_errors_total", "source" => "semantic_scholar")
                            .increment(1);
                    })?;

                let (records, next) = Self::parse_search(&body)?;
                Ok(Page {
                    next: next.filter(|n| *n > cursor && !records.is_empty()),
                    records,
                })
            }
        }
    }

    fn name(&self) -> SourceName {
        SourceName::SemanticScholar
    }
}
