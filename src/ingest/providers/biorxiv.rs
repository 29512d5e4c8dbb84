// src/ingest/providers/biorxiv.rs
//! bioRxiv and medRxiv share one API; the server is part of the path.

use async_trait::async_trait;
use metrics::counter;
use serde::Deserialize;

use crate::error::AdapterError;
use crate::ingest::providers::{http_client, send_for_text};
use crate::ingest::retry::RetryPolicy;
use crate::ingest::types::{BiorxivItem, FetchQuery, Page, RawRecord, SourceAdapter};
use crate::model::SourceName;

pub const BIORXIV_API: &str = "https://api.biorxiv.org/details";

/// The details endpoint always pages in blocks of this size.
const API_PAGE: usize = 100;

#[derive(Debug, Deserialize)]
struct DetailsResponse {
    #[serde(default)]
    messages: Vec<DetailsMessage>,
    #[serde(default)]
    collection: Vec<BiorxivItem>,
}

#[derive(Debug, Deserialize)]
struct DetailsMessage {
    status: Option<String>,
    // Sent as a number or a string depending on the endpoint version.
    total: Option<serde_json::Value>,
}

impl DetailsMessage {
    fn total(&self) -> Option<usize> {
        match self.total.as_ref()? {
            serde_json::Value::Number(n) => n.as_u64().map(|n| n as usize),
            serde_json::Value::String(s) => s.parse().ok(),
            _ => None,
        }
    }
}

pub struct BiorxivProvider {
    server: SourceName,
    mode: Mode,
}

enum Mode {
    Fixture(String),
    Http {
        base_url: String,
        client: reqwest::Client,
        retry: RetryPolicy,
    },
}

impl BiorxivProvider {
    /// `server` must be `Biorxiv` or `Medrxiv`; anything else is treated as bioRxiv.
    pub fn from_fixture_str(server: SourceName, s: &str) -> Self {
        Self {
            server: Self::coerce(server),
            mode: Mode::Fixture(s.to_string()),
        }
    }

    pub fn from_url(server: SourceName, base_url: &str, retry: RetryPolicy) -> Result<Self, AdapterError> {
        Ok(Self {
            server: Self::coerce(server),
            mode: Mode::Http {
                base_url: base_url.trim_end_matches('/').to_string(),
                client: http_client()?,
                retry,
            },
        })
    }

    fn coerce(server: SourceName) -> SourceName {
        match server {
            SourceName::Medrxiv => SourceName::Medrxiv,
            _ => SourceName::Biorxiv,
        }
    }

    pub fn parse_details(
        server: SourceName,
        json: &str,
    ) -> Result<(Vec<RawRecord>, Option<usize>), AdapterError> {
        let resp: DetailsResponse = serde_json::from_str(json)
            .map_err(|e| AdapterError::malformed(format!("{server} details: {e}")))?;
        let total = resp.messages.first().and_then(DetailsMessage::total);

        // "no posts found" comes back as a non-ok status with an empty collection.
        if resp.collection.is_empty() {
            return Ok((Vec::new(), Some(0)));
        }
        if let Some(status) = resp.messages.first().and_then(|m| m.status.as_deref()) {
            if status != "ok" {
                return Err(AdapterError::malformed(format!("{server} status '{status}'")));
            }
        }

        let records = resp
            .collection
            .into_iter()
            .map(|mut item| {
                item.server = server;
                RawRecord::Biorxiv(item)
            })
            .collect();
        Ok((records, total))
    }
}

#[async_trait]
impl SourceAdapter for BiorxivProvider {
    async fn fetch_page(&self, query: &FetchQuery, cursor: usize) -> Result<Page, AdapterError> {
        match &self.mode {
            Mode::Fixture(s) => Ok(Page::last(Self::parse_details(self.server, s)?.0)),
            Mode::Http {
                base_url,
                client,
                retry,
            } => {
                let url = format!(
                    "{base_url}/{}/{}/{}/{cursor}/json",
                    self.server.as_str(),
                    query.window.start_date(),
                    query.window.end_date()
                );
                let body = retry
                    .run("biorxiv details", || send_for_text(client.get(url.as_str())))
                    .await
                    .inspect_err(|_| {
                        counter!("digest_provider_http_errors_total", "source" => self.server.as_str())
                            .increment(1);
                    })?;

                let (records, total) = Self::parse_details(self.server, &body)?;
                let fetched_to = cursor + records.len();
                let more = records.len() >= API_PAGE && total.map_or(true, |t| fetched_to < t);
                Ok(Page {
                    records,
                    next: more.then_some(fetched_to),
                })
            }
        }
    }

    fn name(&self) -> SourceName {
        self.server
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn records_are_tagged_with_their_server() {
        let json = r#"{"messages":[{"status":"ok","total":"1"}],
            "collection":[{"doi":"10.1101/2024.05.01.1","title":"T","date":"2024-05-01"}]}"#;
        let (records, total) = BiorxivProvider::parse_details(SourceName::Medrxiv, json).unwrap();
        assert_eq!(total, Some(1));
        assert_eq!(records[0].source(), SourceName::Medrxiv);
    }

    #[test]
    fn empty_interval_is_not_a_failure() {
        let json = r#"{"messages":[{"status":"no posts found"}],"collection":[]}"#;
        let (records, _) = BiorxivProvider::parse_details(SourceName::Biorxiv, json).unwrap();
        assert!(records.is_empty());
    }
}
