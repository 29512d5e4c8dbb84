// src/ingest/retry.rs
use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use crate::error::AdapterError;

/// What a failed attempt asks of the retry loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    Stop,
    /// Wait the policy's backoff for this attempt.
    Backoff,
    /// Wait a server-provided delay instead of the backoff.
    After(Duration),
}

/// Declarative retry policy handed to every adapter and to the webhook transport.
///
/// `max_attempts` counts the first call, so `1` means "never retry".
/// Only transient failures (timeouts, network, 5xx) are retried.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u8,
    pub base_backoff: Duration,
    pub multiplier: u32,
}

impl Default for RetryPolicy {
    /// One immediate-ish retry on a transient error.
    fn default() -> Self {
        Self {
            max_attempts: 2,
            base_backoff: Duration::from_millis(500),
            multiplier: 2,
        }
    }
}

impl RetryPolicy {
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    /// Delay before attempt `attempt + 1` (attempts are 1-based).
    pub fn backoff(&self, attempt: u8) -> Duration {
        let factor = self
            .multiplier
            .max(1)
            .saturating_pow(u32::from(attempt.saturating_sub(1)));
        self.base_backoff.saturating_mul(factor)
    }

    /// Retry transient adapter failures.
    pub async fn run<T, F, Fut>(&self, what: &str, op: F) -> Result<T, AdapterError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, AdapterError>>,
    {
        self.run_classified(what, op, |e: &AdapterError| {
            if e.kind.is_transient() {
                RetryDecision::Backoff
            } else {
                RetryDecision::Stop
            }
        })
        .await
    }

    /// Retry loop with a caller-supplied classification of each error.
    pub async fn run_classified<T, E, F, Fut, C>(&self, what: &str, mut op: F, classify: C) -> Result<T, E>
    where
        E: Display,
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        C: Fn(&E) -> RetryDecision,
    {
        let max = self.max_attempts.max(1);
        let mut attempt: u8 = 0;
        loop {
            attempt += 1;
            let err = match op().await {
                Ok(v) => return Ok(v),
                Err(e) => e,
            };
            let wait = match classify(&err) {
                _ if attempt >= max => return Err(err),
                RetryDecision::Stop => return Err(err),
                RetryDecision::Backoff => self.backoff(attempt),
                RetryDecision::After(hint) => hint,
            };
            tracing::debug!(
                target: "retry",
                what,
                attempt,
                wait_ms = wait.as_millis() as u64,
                error = %err,
                "retryable failure, retrying"
            );
            tokio::time::sleep(wait).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SourceFailureKind;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn backoff_grows_geometrically() {
        let p = RetryPolicy {
            max_attempts: 4,
            base_backoff: Duration::from_millis(100),
            multiplier: 3,
        };
        assert_eq!(p.backoff(1), Duration::from_millis(100));
        assert_eq!(p.backoff(2), Duration::from_millis(300));
        assert_eq!(p.backoff(3), Duration::from_millis(900));
    }

    #[tokio::test(start_paused = true)]
    async fn transient_error_is_retried_once() {
        let calls = AtomicU32::new(0);
        let out = RetryPolicy::default()
            .run("test", || {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n == 0 {
                        Err(AdapterError::new(SourceFailureKind::Network, "reset"))
                    } else {
                        Ok(7)
                    }
                }
            })
            .await;
        assert_eq!(out, Ok(7));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn permanent_error_is_not_retried() {
        let calls = AtomicU32::new(0);
        let out: Result<(), _> = RetryPolicy::default()
            .run("test", || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(AdapterError::new(SourceFailureKind::Blocked, "captcha")) }
            })
            .await;
        assert!(out.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn server_hint_replaces_backoff_and_attempts_are_capped() {
        let p = RetryPolicy {
            max_attempts: 3,
            base_backoff: Duration::from_secs(60),
            multiplier: 2,
        };
        let calls = AtomicU32::new(0);
        let t0 = tokio::time::Instant::now();
        let out: Result<(), String> = p
            .run_classified(
                "webhook",
                || {
                    calls.fetch_add(1, Ordering::SeqCst);
                    async { Err("429".to_string()) }
                },
                |_| RetryDecision::After(Duration::from_secs(2)),
            )
            .await;
        assert_eq!(out, Err("429".to_string()));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        // Two server-hinted waits of 2s, not the 60s policy backoff.
        let waited = t0.elapsed();
        assert!(waited >= Duration::from_secs(4) && waited < Duration::from_secs(60), "{waited:?}");
    }
}
