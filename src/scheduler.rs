// src/scheduler.rs
//! Once-a-day trigger keyed on the local calendar date.
//!
//! The persisted `last_run_date` is only advanced by a successful scheduled run, so a restart
//! after the trigger time catches up exactly once and a restart after a completed run is a no-op.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Days, NaiveDate, NaiveTime, TimeZone, Utc};
use chrono_tz::Tz;
use serde::Serialize;
use tokio::task::JoinHandle;

use crate::error::{RunError, StorageFailure};
use crate::pipeline::{DigestJob, RunReport};
use crate::storage::{RunState, RunStateStore};

const FALLBACK_RETRY: Duration = Duration::from_secs(60);
/// Step used to walk out of a skipped (spring-forward) local hour.
const GAP_STEP_MINUTES: i64 = 15;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SchedulerState {
    /// Today's digest is done.
    Idle,
    /// Today's trigger is pending (or waiting for a retry slot).
    Waiting,
    Running,
}

#[derive(Debug, Clone)]
pub struct ScheduleSpec {
    pub post_time: NaiveTime,
    pub tz: Tz,
    pub retry_delays: Vec<Duration>,
}

impl ScheduleSpec {
    pub fn new(post_time: NaiveTime, tz: Tz) -> Self {
        Self {
            post_time,
            tz,
            retry_delays: vec![
                Duration::from_secs(60),
                Duration::from_secs(300),
                Duration::from_secs(900),
            ],
        }
    }

    pub fn with_retry_delays(mut self, delays: Vec<Duration>) -> Self {
        self.retry_delays = delays;
        self
    }

    pub fn local_date(&self, now: DateTime<Utc>) -> NaiveDate {
        now.with_timezone(&self.tz).date_naive()
    }

    /// UTC instant of the trigger on local `date`.
    ///
    /// A wall-clock time that occurs twice (fall back) fires at the first occurrence.
    /// One that does not occur (spring forward) fires at the first valid local time after it.
    pub fn trigger_at(&self, date: NaiveDate) -> DateTime<Utc> {
        let mut local = date.and_time(self.post_time);
        for _ in 0..(24 * 60 / GAP_STEP_MINUTES) {
            if let Some(at) = self.tz.from_local_datetime(&local).earliest() {
                return at.with_timezone(&Utc);
            }
            local += chrono::Duration::minutes(GAP_STEP_MINUTES);
        }
        local.and_utc()
    }

    /// Delay before retry number `failures` (1-based); the last configured delay repeats.
    pub fn retry_delay(&self, failures: u32) -> Duration {
        let idx = (failures.max(1) - 1) as usize;
        self.retry_delays
            .get(idx)
            .or_else(|| self.retry_delays.last())
            .copied()
            .unwrap_or(FALLBACK_RETRY)
    }
}

#[derive(Debug)]
pub enum TickOutcome {
    NotDue,
    /// A run was already in progress; nothing started.
    Busy,
    Ran(RunReport),
    Failed(RunError),
}

/// Snapshot served on `/status`.
#[derive(Debug, Clone, Serialize)]
pub struct SchedulerStatus {
    pub state: SchedulerState,
    pub local_date: NaiveDate,
    pub last_run_date: Option<NaiveDate>,
    pub last_success_at: Option<DateTime<Utc>>,
    pub last_outcome: Option<String>,
    pub next_trigger_at: DateTime<Utc>,
    pub next_retry_at: Option<DateTime<Utc>>,
    pub consecutive_failures: u32,
    pub last_report: Option<RunReport>,
}

#[derive(Debug, Default)]
struct Inner {
    persisted: RunState,
    failures: u32,
    /// Local date the pending retry belongs to, and when it may fire.
    retry: Option<(NaiveDate, DateTime<Utc>)>,
    last_report: Option<RunReport>,
}

pub struct Scheduler {
    spec: ScheduleSpec,
    store: Arc<dyn RunStateStore>,
    running: AtomicBool,
    inner: Mutex<Inner>,
}

/// Clears the run-in-progress flag on every exit path.
struct RunningGuard<'a>(&'a AtomicBool);

impl Drop for RunningGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl Scheduler {
    /// Load-or-default the persisted run state.
    pub async fn load(spec: ScheduleSpec, store: Arc<dyn RunStateStore>) -> Result<Self, StorageFailure> {
        let persisted = store.load().await?;
        tracing::info!(
            target: "scheduler",
            last_run_date = ?persisted.last_run_date,
            post_time = %spec.post_time,
            timezone = spec.tz.name(),
            "scheduler loaded"
        );
        Ok(Self {
            spec,
            store,
            running: AtomicBool::new(false),
            inner: Mutex::new(Inner {
                persisted,
                ..Inner::default()
            }),
        })
    }

    pub fn spec(&self) -> &ScheduleSpec {
        &self.spec
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        // A poisoned lock only means a panic elsewhere; the data is plain bookkeeping.
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Past today's trigger, no successful run recorded for today, and no retry pending.
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        let today = self.spec.local_date(now);
        let inner = self.lock();
        if inner.persisted.last_run_date == Some(today) {
            return false;
        }
        if now < self.spec.trigger_at(today) {
            return false;
        }
        match inner.retry {
            Some((date, at)) if date == today => now >= at,
            _ => true,
        }
    }

    pub fn state(&self, now: DateTime<Utc>) -> SchedulerState {
        if self.is_running() {
            return SchedulerState::Running;
        }
        let today = self.spec.local_date(now);
        if self.lock().persisted.last_run_date == Some(today) {
            SchedulerState::Idle
        } else {
            SchedulerState::Waiting
        }
    }

    /// Run the job if it is due. Called from the poll loop and once at startup.
    pub async fn tick(&self, job: &dyn DigestJob, now: DateTime<Utc>) -> TickOutcome {
        if !self.is_due(now) {
            return TickOutcome::NotDue;
        }
        let date = self.spec.local_date(now);
        match self.execute(job, date, now, true).await {
            Ok(report) => TickOutcome::Ran(report),
            Err(RunError::AlreadyRunning) => TickOutcome::Busy,
            Err(e) => TickOutcome::Failed(e),
        }
    }

    /// Manual trigger. Ignores the daily key (and leaves it untouched) but not the running flag.
    pub async fn run_now(&self, job: &dyn DigestJob, now: DateTime<Utc>) -> Result<RunReport, RunError> {
        let date = self.spec.local_date(now);
        self.execute(job, date, now, false).await
    }

    async fn execute(
        &self,
        job: &dyn DigestJob,
        date: NaiveDate,
        now: DateTime<Utc>,
        scheduled: bool,
    ) -> Result<RunReport, RunError> {
        if self
            .running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            tracing::warn!(target: "scheduler", %date, "run already in progress, skipping trigger");
            return Err(RunError::AlreadyRunning);
        }
        let _guard = RunningGuard(&self.running);
        tracing::info!(target: "scheduler", %date, scheduled, "digest run starting");

        let result = job.run(date, now).await;

        let snapshot = {
            let mut inner = self.lock();
            match &result {
                Ok(report) => {
                    if scheduled {
                        inner.persisted.last_run_date = Some(date);
                        inner.failures = 0;
                        inner.retry = None;
                    }
                    inner.persisted.last_success_at = Some(now);
                    inner.persisted.last_outcome = Some("success".into());
                    inner.last_report = Some(report.clone());
                }
                Err(e) => {
                    inner.persisted.last_outcome = Some(e.to_string());
                    if scheduled {
                        inner.failures = inner.failures.saturating_add(1);
                        let delay = self.spec.retry_delay(inner.failures);
                        let at = now + chrono::Duration::from_std(delay).unwrap_or_else(|_| chrono::Duration::minutes(1));
                        inner.retry = Some((date, at));
                        tracing::warn!(
                            target: "scheduler",
                            %date,
                            failures = inner.failures,
                            retry_at = %at,
                            error = %e,
                            "digest run failed, retry scheduled"
                        );
                    }
                }
            }
            inner.persisted.clone()
        };

        // The in-memory date already blocks a same-day rerun; a failed save only loses it on restart,
        // where dedup still prevents reposting.
        if let Err(e) = self.store.save(&snapshot).await {
            tracing::error!(target: "scheduler", error = %e, "could not persist run state");
        }
        result
    }

    pub fn status(&self, now: DateTime<Utc>) -> SchedulerStatus {
        let state = self.state(now);
        let today = self.spec.local_date(now);
        let inner = self.lock();
        let next_trigger_at = if inner.persisted.last_run_date == Some(today) {
            let tomorrow = today.checked_add_days(Days::new(1)).unwrap_or(today);
            self.spec.trigger_at(tomorrow)
        } else {
            let base = self.spec.trigger_at(today);
            match inner.retry {
                Some((date, at)) if date == today => base.max(at),
                _ => base,
            }
        };
        SchedulerStatus {
            state,
            local_date: today,
            last_run_date: inner.persisted.last_run_date,
            last_success_at: inner.persisted.last_success_at,
            last_outcome: inner.persisted.last_outcome.clone(),
            next_trigger_at,
            next_retry_at: inner.retry.map(|(_, at)| at),
            consecutive_failures: inner.failures,
            last_report: inner.last_report.clone(),
        }
    }

    /// Poll forever. The first tick fires immediately, which is the startup catch-up.
    pub fn run_loop(self: Arc<Self>, job: Arc<dyn DigestJob>, poll: Duration) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(poll.max(Duration::from_secs(1)));
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                match self.tick(job.as_ref(), Utc::now()).await {
                    TickOutcome::NotDue | TickOutcome::Busy => {}
                    TickOutcome::Ran(report) => {
                        tracing::info!(
                            target: "scheduler",
                            delivered = report.delivered,
                            selected = report.selected,
                            "scheduled run complete"
                        );
                    }
                    TickOutcome::Failed(e) => {
                        tracing::error!(target: "scheduler", error = %e, "scheduled run failed");
                    }
                }
            }
        })
    }
}
