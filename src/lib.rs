// src/lib.rs
// Public library surface for the binaries and integration tests.

pub mod api;
pub mod bootstrap;
pub mod config;
pub mod dedup;
pub mod delivery;
pub mod error;
pub mod ingest;
pub mod metrics;
pub mod model;
pub mod normalize;
pub mod pipeline;
pub mod rank;
pub mod scheduler;
pub mod storage;
pub mod summarize;

// ---- Re-exports for stable public API ----
pub use crate::api::{create_router, AppState};
pub use crate::bootstrap::DigestRuntime;
pub use crate::config::DigestConfig;
pub use crate::error::RunError;
pub use crate::model::{Digest, Fingerprint, Paper, SourceName};
pub use crate::pipeline::{DigestJob, Pipeline, RunReport};
pub use crate::scheduler::{Scheduler, TickOutcome};

use tracing::info;

/// One immediate pipeline pass through the scheduler's running guard. Dedup still applies;
/// the daily idempotency key is left alone.
pub async fn run_digest_once(rt: &DigestRuntime) -> Result<RunReport, RunError> {
    let report = rt
        .scheduler
        .run_now(rt.pipeline.as_ref(), chrono::Utc::now())
        .await?;
    info!(
        fetched = report.fetched,
        selected = report.selected,
        delivered = report.delivered,
        "manual digest run finished"
    );
    Ok(report)
}
