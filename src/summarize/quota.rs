// src/summarize/quota.rs
//! Daily call budget for paid backends, persisted so a restart does not reset it.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use super::{Draft, SummaryRequest, Summarizer};
use crate::error::SummarizerError;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct DailyCounter {
    date: NaiveDate,
    count: u32,
}

impl DailyCounter {
    fn fresh(today: NaiveDate) -> Self {
        Self {
            date: today,
            count: 0,
        }
    }
}

fn counter_path(dir: &Path) -> PathBuf {
    dir.join("summarizer_daily_count.json")
}

fn load_counter(dir: &Path) -> io::Result<DailyCounter> {
    let s = fs::read_to_string(counter_path(dir))?;
    serde_json::from_str(&s).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
}

fn save_counter(dir: &Path, dc: &DailyCounter) -> io::Result<()> {
    fs::create_dir_all(dir)?;
    let p = counter_path(dir);
    let tmp = p.with_extension("json.tmp");
    let s = serde_json::to_string(dc).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    fs::write(&tmp, s)?;
    fs::rename(tmp, p)
}

/// Wraps a backend and refuses calls once `daily_limit` successful calls were made today (UTC).
/// A `daily_limit` of 0 means unlimited; calls are still counted.
pub struct QuotaLimited<S> {
    inner: S,
    dir: PathBuf,
    daily_limit: u32,
    counter: Mutex<DailyCounter>,
}

impl<S: Summarizer> QuotaLimited<S> {
    pub fn new(inner: S, dir: impl Into<PathBuf>, daily_limit: u32) -> Self {
        let dir = dir.into();
        let today = Utc::now().date_naive();
        let counter = load_counter(&dir).unwrap_or_else(|_| DailyCounter::fresh(today));
        Self {
            inner,
            dir,
            daily_limit,
            counter: Mutex::new(counter),
        }
    }

    pub fn is_unlimited(&self) -> bool {
        self.daily_limit == 0
    }

    /// Calls left today. `None` when unlimited.
    pub fn remaining(&self) -> Option<u32> {
        if self.is_unlimited() {
            return None;
        }
        let today = Utc::now().date_naive();
        Some(match self.counter.lock() {
            Ok(g) if g.date == today => self.daily_limit.saturating_sub(g.count),
            Ok(_) => self.daily_limit,
            Err(_) => 0,
        })
    }

    fn check(&self) -> Result<(), SummarizerError> {
        let today = Utc::now().date_naive();
        let mut g = self
            .counter
            .lock()
            .map_err(|e| SummarizerError::Transport(e.to_string()))?;
        if g.date != today {
            *g = DailyCounter::fresh(today);
            let _ = save_counter(&self.dir, &g);
        }
        if !self.is_unlimited() && g.count >= self.daily_limit {
            return Err(SummarizerError::QuotaExceeded);
        }
        Ok(())
    }

    fn record_call(&self) {
        if let Ok(mut g) = self.counter.lock() {
            g.count = g.count.saturating_add(1);
            if let Err(e) = save_counter(&self.dir, &g) {
                tracing::warn!(target: "summarize", error = %e, "could not persist daily counter");
            }
        }
    }
}

#[async_trait]
impl<S: Summarizer> Summarizer for QuotaLimited<S> {
    async fn summarize(&self, req: &SummaryRequest<'_>) -> Result<Draft, SummarizerError> {
        self.check()?;
        let draft = self.inner.summarize(req).await?;
        self.record_call();
        Ok(draft)
    }

    fn name(&self) -> &'static str {
        self.inner.name()
    }
}
