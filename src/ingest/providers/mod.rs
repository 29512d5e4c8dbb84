// src/ingest/providers/mod.rs
pub mod arxiv;
pub mod biorxiv;
pub mod crossref;
pub mod semantic_scholar;

use std::time::Duration;

use crate::error::AdapterError;

pub const USER_AGENT: &str = concat!(
    "paper-digest/",
    env!("CARGO_PKG_VERSION"),
    " (daily research digest bot)"
);

/// Shared client for one adapter. The per-call deadline is applied by the fetch manager.
pub fn http_client() -> Result<reqwest::Client, AdapterError> {
    reqwest::Client::builder()
        .user_agent(USER_AGENT)
        .connect_timeout(Duration::from_secs(5))
        .timeout(Duration::from_secs(30))
        .build()
        .map_err(|e| AdapterError::new(crate::error::SourceFailureKind::Network, e.to_string()))
}

/// Send a request and return the body, mapping non-2xx statuses to typed failures.
pub async fn send_for_text(req: reqwest::RequestBuilder) -> Result<String, AdapterError> {
    let resp = req.send().await?;
    let status = resp.status();
    let body = resp.text().await?;
    if !status.is_success() {
        return Err(AdapterError::from_status(status.as_u16(), &body));
    }
    Ok(body)
}
