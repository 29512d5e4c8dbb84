// src/ingest/rate_limit.rs
//! Per-source request budget, one independent GCRA limiter per source.
//!
//! `requests` per `window` with a burst of `requests`: a fresh limiter can spend the whole
//! budget at once, then regains one request every `window / requests`.

use std::fmt;
use std::num::NonZeroU32;
use std::time::Duration;

use governor::{
    clock::{Clock, DefaultClock},
    state::{InMemoryState, NotKeyed},
    Quota,
};
use serde::{Deserialize, Serialize};

/// What to do when a source has used up its budget mid-run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExhaustedPolicy {
    /// Stop calling the source for the rest of the run and log it.
    #[default]
    Skip,
    /// Wait for the next request slot, at most `max_wait`.
    Defer,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimit {
    pub requests: u32,
    pub window: Duration,
}

impl RateLimit {
    pub fn per_minute(requests: u32) -> Self {
        Self {
            requests,
            window: Duration::from_secs(60),
        }
    }

    fn quota(&self) -> Quota {
        let burst = NonZeroU32::new(self.requests).unwrap_or(NonZeroU32::MIN);
        let period = (self.window / burst.get()).max(Duration::from_nanos(1));
        Quota::with_period(period)
            .unwrap_or_else(|| Quota::per_second(burst))
            .allow_burst(burst)
    }
}

type DirectLimiter = governor::RateLimiter<NotKeyed, InMemoryState, DefaultClock>;

pub struct RateLimiter {
    limit: RateLimit,
    inner: DirectLimiter,
    clock: DefaultClock,
}

impl fmt::Debug for RateLimiter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RateLimiter").field("limit", &self.limit).finish()
    }
}

impl RateLimiter {
    pub fn new(limit: RateLimit) -> Self {
        Self {
            limit,
            inner: governor::RateLimiter::direct(limit.quota()),
            clock: DefaultClock::default(),
        }
    }

    pub fn limit(&self) -> RateLimit {
        self.limit
    }

    /// Take one request slot if one is free right now.
    pub fn try_acquire(&self) -> bool {
        self.inner.check().is_ok()
    }

    /// Acquire according to `policy`. Returns `false` when the caller must give up for this run.
    pub async fn acquire(&self, policy: ExhaustedPolicy, max_wait: Duration) -> bool {
        let wait = match self.inner.check() {
            Ok(()) => return true,
            Err(not_until) => not_until.wait_time_from(self.clock.now()),
        };
        match policy {
            ExhaustedPolicy::Skip => false,
            ExhaustedPolicy::Defer if wait > max_wait => false,
            ExhaustedPolicy::Defer => {
                tracing::debug!(target: "ingest", wait_ms = wait.as_millis() as u64, "request budget exhausted, deferring");
                self.inner.until_ready().await;
                true
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    #[test]
    fn budget_is_enforced_within_window() {
        let rl = RateLimiter::new(RateLimit {
            requests: 2,
            window: Duration::from_secs(60),
        });
        assert!(rl.try_acquire());
        assert!(rl.try_acquire());
        assert!(!rl.try_acquire());
    }

    #[test]
    fn zero_requests_still_allows_one() {
        let rl = RateLimiter::new(RateLimit {
            requests: 0,
            window: Duration::from_secs(60),
        });
        assert!(rl.try_acquire());
        assert!(!rl.try_acquire());
    }

    #[tokio::test]
    async fn skip_policy_gives_up_immediately() {
        let rl = RateLimiter::new(RateLimit {
            requests: 1,
            window: Duration::from_secs(3600),
        });
        assert!(rl.acquire(ExhaustedPolicy::Skip, Duration::ZERO).await);
        assert!(!rl.acquire(ExhaustedPolicy::Skip, Duration::ZERO).await);
    }

    #[tokio::test]
    async fn defer_policy_waits_for_next_slot() {
        let rl = RateLimiter::new(RateLimit {
            requests: 1,
            window: Duration::from_millis(200),
        });
        assert!(rl.acquire(ExhaustedPolicy::Defer, Duration::from_secs(5)).await);
        let t0 = Instant::now();
        assert!(rl.acquire(ExhaustedPolicy::Defer, Duration::from_secs(5)).await);
        assert!(t0.elapsed() >= Duration::from_millis(150));
    }

    #[tokio::test]
    async fn defer_policy_respects_max_wait() {
        let rl = RateLimiter::new(RateLimit {
            requests: 1,
            window: Duration::from_secs(3600),
        });
        assert!(rl.acquire(ExhaustedPolicy::Defer, Duration::from_secs(1)).await);
        assert!(!rl.acquire(ExhaustedPolicy::Defer, Duration::from_secs(1)).await);
    }

    #[tokio::test]
    async fn sources_do_not_share_a_budget() {
        let limit = RateLimit::per_minute(1);
        let arxiv = RateLimiter::new(limit);
        let crossref = RateLimiter::new(limit);
        assert!(arxiv.try_acquire());
        assert!(!arxiv.try_acquire());
        assert!(crossref.try_acquire());
    }
}
