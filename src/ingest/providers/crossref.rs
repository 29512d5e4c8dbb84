// src/ingest/providers/crossref.rs
use async_trait::async_trait;
use metrics::counter;
use serde::Deserialize;

use crate::error::AdapterError;
use crate::ingest::providers::{http_client, send_for_text};
use crate::ingest::retry::RetryPolicy;
use crate::ingest::types::{CrossrefItem, FetchQuery, Page, RawRecord, SourceAdapter};
use crate::model::SourceName;

pub const CROSSREF_API: &str = "https://api.crossref.org/works";

#[derive(Debug, Deserialize)]
struct WorksResponse {
    status: Option<String>,
    message: WorksMessage,
}

#[derive(Debug, Deserialize)]
struct WorksMessage {
    #[serde(rename = "total-results")]
    total_results: Option<usize>,
    #[serde(default)]
    items: Vec<CrossrefItem>,
}

pub struct CrossrefProvider {
    mode: Mode,
    page_size: usize,
}

enum Mode {
    Fixture(String),
    Http {
        base_url: String,
        client: reqwest::Client,
        retry: RetryPolicy,
        /// Crossref's "polite pool" contact address.
        mailto: Option<String>,
    },
}

impl CrossrefProvider {
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
        mailto: Option<String>,
    ) -> Result<Self, AdapterError> {
        Ok(Self {
            mode: Mode::Http {
                base_url: base_url.to_string(),
                client: http_client()?,
                retry,
                mailto,
            },
            page_size: page_size.clamp(1, 1000),
        })
    }

    pub fn parse_works(json: &str) -> Result<(Vec<RawRecord>, Option<usize>), AdapterError> {
        let resp: WorksResponse = serde_json::from_str(json)
            .map_err(|e| AdapterError::malformed(format!("crossref works: {e}")))?;
        if let Some(status) = resp.status.as_deref() {
            if status != "ok" {
                return Err(AdapterError::malformed(format!("crossref status '{status}'")));
            }
        }
        let records = resp
            .message
            .items
            .into_iter()
            .map(RawRecord::Crossref)
            .collect();
        Ok((records, resp.message.total_results))
    }

    fn filter_param(query: &FetchQuery) -> String {
        format!(
            "from-pub-date:{},until-pub-date:{},type:journal-article",
            query.window.start_date(),
            query.window.end_date()
        )
    }
}

#[async_trait]
impl SourceAdapter for CrossrefProvider {
    async fn fetch_page(&self, query: &FetchQuery, cursor: usize) -> Result<Page, AdapterError> {
        match &self.mode {
            Mode::Fixture(s) => Ok(Page::last(Self::parse_works(s)?.0)),
            Mode::Http {
                base_url,
                client,
                retry,
                mailto,
            } => {
                let filter = Self::filter_param(query);
                let text = query.keywords.join(" ");
                let rows = self.page_size.to_string();
                let offset = cursor.to_string();
                let mut params: Vec<(&str, &str)> = vec![
                    ("filter", filter.as_str()),
                    ("rows", rows.as_str()),
                    ("offset", offset.as_str()),
                    ("sort", "published"),
                    ("order", "desc"),
                ];
                if !text.trim().is_empty() {
                    params.push(("query.bibliographic", text.as_str()));
                }
                if let Some(m) = mailto.as_deref() {
                    params.push(("mailto", m));
                }

                let body = retry
                    .run("crossref works", || {
                        send_for_text(client.get(base_url.as_str()).query(&params))
                    })
                    .await
                    .inspect_err(|_| {
                        counter!("digest_provider_http_errors_total", "source" => "crossref")
                            .increment(1);
                    })?;

                let (records, total) = Self::parse_works(&body)?;
                let fetched_to = cursor + records.len();
                let more =
                    records.len() >= self.page_size && total.map_or(true, |t| fetched_to < t);
                Ok(Page {
                    records,
                    next: more.then_some(fetched_to),
                })
            }
        }
    }

    fn name(&self) -> SourceName {
        SourceName::Crossref
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn non_ok_status_is_malformed() {
        let err = CrossrefProvider::parse_works(r#"{"status":"failed","message":{"items":[]}}"#)
            .unwrap_err();
        assert_eq!(err.kind, crate::error::SourceFailureKind::Malformed);
    }

    #[test]
    fn missing_optional_fields_still_parse() {
        let (records, total) = CrossrefProvider::parse_works(
            r#"{"status":"ok","message":{"total-results":1,"items":[{"DOI":"10.1/x"}]}}"#,
        )
        .unwrap();
        assert_eq!(total, Some(1));
        match &records[0] {
            RawRecord::Crossref(item) => {
                assert_eq!(item.doi.as_deref(), Some("10.1/x"));
                assert!(item.title.is_empty());
            }
            other => panic!("unexpected record {other:?}"),
        }
    }
}
