//! Failure taxonomy for a digest run.
//!
//! Everything below the run level (sources, single records, single summaries,
//! single deliveries) is absorbed and logged by the stage that sees it. Only
//! [`RunError`] escapes a pipeline run.

use std::fmt;

use serde::Serialize;
use thiserror::Error;

use crate::model::SourceName;

/// Coarse classification of an adapter failure. Drives retry decisions and metrics labels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "status")]
pub enum SourceFailureKind {
    Timeout,
    Network,
    Malformed,
    /// 403 or an explicit ban page.
    Blocked,
    /// 429 from the remote, or our own budget ran out for the run.
    RateLimited,
    Http(u16),
}

impl SourceFailureKind {
    /// Kinds worth one more attempt inside the same run.
    pub fn is_transient(self) -> bool {
        match self {
            Self::Timeout | Self::Network => true,
            Self::Http(status) => status >= 500,
            _ => false,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::Timeout => "timeout",
            Self::Network => "network",
            Self::Malformed => "malformed",
            Self::Blocked => "blocked",
            Self::RateLimited => "rate_limited",
            Self::Http(_) => "http",
        }
    }
}

/// Error raised by an adapter before the manager knows which source it belongs to.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{kind:?}: {message}")]
pub struct AdapterError {
    pub kind: SourceFailureKind,
    pub message: String,
}

impl AdapterError {
    pub fn new(kind: SourceFailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn malformed(message: impl Into<String>) -> Self {
        Self::new(SourceFailureKind::Malformed, message)
    }

    pub fn from_status(status: u16, body_hint: &str) -> Self {
        let kind = match status {
            429 => SourceFailureKind::RateLimited,
            403 => SourceFailureKind::Blocked,
            s => SourceFailureKind::Http(s),
        };
        let hint: String = body_hint.chars().take(120).collect();
        Self::new(kind, format!("HTTP {status}: {hint}"))
    }
}

impl From<reqwest::Error> for AdapterError {
    fn from(e: reqwest::Error) -> Self {
        let kind = if e.is_timeout() {
            SourceFailureKind::Timeout
        } else if e.is_decode() {
            SourceFailureKind::Malformed
        } else if let Some(status) = e.status() {
            return Self::from_status(status.as_u16(), "");
        } else {
            SourceFailureKind::Network
        };
        Self::new(kind, e.to_string())
    }
}

/// One source's failure for one run. Isolated: other sources keep going.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SourceFailure {
    pub source: SourceName,
    pub kind: SourceFailureKind,
    pub message: String,
}

impl SourceFailure {
    pub fn from_adapter(source: SourceName, err: AdapterError) -> Self {
        Self {
            source,
            kind: err.kind,
            message: err.message,
        }
    }
}

impl fmt::Display for SourceFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "source {} failed ({}): {}",
            self.source,
            self.kind.label(),
            self.message
        )
    }
}

impl std::error::Error for SourceFailure {}

/// A raw record that could not be mapped to a `Paper`. The record is dropped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NormalizationError {
    pub source: SourceName,
    pub reason: String,
}

impl NormalizationError {
    pub fn new(source: SourceName, reason: impl Into<String>) -> Self {
        Self {
            source,
            reason: reason.into(),
        }
    }
}

impl fmt::Display for NormalizationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "cannot normalize {} record: {}", self.source, self.reason)
    }
}

impl std::error::Error for NormalizationError {}

/// Failure of a summarizer backend for a single paper.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SummarizerError {
    #[error("summarizer quota exceeded")]
    QuotaExceeded,
    #[error("summarizer timed out")]
    Timeout,
    #[error("malformed summarizer output: {0}")]
    MalformedOutput(String),
    #[error("summarizer transport error: {0}")]
    Transport(String),
}

impl From<reqwest::Error> for SummarizerError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            Self::Timeout
        } else if e.is_decode() {
            Self::MalformedOutput(e.to_string())
        } else if e.status().map(|s| s.as_u16()) == Some(429) {
            Self::QuotaExceeded
        } else {
            Self::Transport(e.to_string())
        }
    }
}

/// The seen-record store could not be read or written. Fatal to the current run.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("storage {op} failed: {message}")]
pub struct StorageFailure {
    pub op: &'static str,
    pub message: String,
}

impl StorageFailure {
    pub fn new(op: &'static str, message: impl ToString) -> Self {
        Self {
            op,
            message: message.to_string(),
        }
    }
}

/// Per-item delivery failure, reported inside `DeliveryResult`.
#[derive(Debug, Clone, Error, PartialEq, Eq, Serialize)]
#[error("delivery failed: {0}")]
pub struct DeliveryFailure(pub String);

/// Failures that abort a run and are reported to the operator.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RunError {
    #[error(transparent)]
    Storage(#[from] StorageFailure),
    #[error("all {} enabled sources failed", .0.len())]
    AllSourcesFailed(Vec<SourceFailure>),
    #[error("a digest run is already in progress")]
    AlreadyRunning,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_mapping_covers_ban_and_throttle() {
        assert_eq!(
            AdapterError::from_status(429, "slow down").kind,
            SourceFailureKind::RateLimited
        );
        assert_eq!(
            AdapterError::from_status(403, "").kind,
            SourceFailureKind::Blocked
        );
        assert_eq!(
            AdapterError::from_status(502, "").kind,
            SourceFailureKind::Http(502)
        );
    }

    #[test]
    fn only_transient_kinds_retry() {
        assert!(SourceFailureKind::Timeout.is_transient());
        assert!(SourceFailureKind::Http(503).is_transient());
        assert!(!SourceFailureKind::Http(404).is_transient());
        assert!(!SourceFailureKind::Blocked.is_transient());
        assert!(!SourceFailureKind::Malformed.is_transient());
    }

    #[test]
    fn source_failure_names_source_and_kind() {
        let f = SourceFailure::from_adapter(
            SourceName::Crossref,
            AdapterError::new(SourceFailureKind::Timeout, "no answer in 30s"),
        );
        let text = f.to_string();
        assert!(text.contains(SourceName::Crossref.as_str()), "{text}");
        assert!(text.contains(SourceFailureKind::Timeout.label()), "{text}");
        assert!(text.ends_with("no answer in 30s"), "{text}");
        assert!(std::error::Error::source(&f).is_none());
    }
}
