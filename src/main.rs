//! Paper Digest hosted entrypoint.
//! Loads config, starts the daily scheduler loop and serves `/health`, `/status`, `/metrics`.

use std::time::Duration;

use paper_digest::{api, metrics::Metrics, DigestConfig, DigestRuntime};
use shuttle_axum::ShuttleAxum;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Enable compact tracing logs in development only.
/// Activation requires BOTH:
///   - dev environment (debug build OR SHUTTLE_ENV in {local, development, dev})
///   - DIGEST_DEV_LOG=1
fn enable_dev_tracing() {
    let dev_flag = std::env::var("DIGEST_DEV_LOG")
        .ok()
        .is_some_and(|v| v == "1");

    let is_dev_env = cfg!(debug_assertions)
        || matches!(
            std::env::var("SHUTTLE_ENV")
                .unwrap_or_default()
                .to_ascii_lowercase()
                .as_str(),
            "local" | "development" | "dev"
        );

    if !(dev_flag && is_dev_env) {
        return;
    }

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("paper_digest=info,warn"));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().compact())
        .init();
}

#[shuttle_runtime::main]
async fn axum() -> ShuttleAxum {
    // Local/dev only: DIGEST_CONFIG_PATH and the "ENV" secrets may come from .env.
    let _ = dotenvy::dotenv();
    enable_dev_tracing();

    let config = DigestConfig::load_default()?;
    let metrics = Metrics::install(config.filter.max_papers_per_day)?;
    let poll = Duration::from_secs(config.schedule.poll_secs);
    let rt = DigestRuntime::build(config).await?;

    // First tick fires immediately: a start after today's post time catches up once.
    rt.scheduler.clone().run_loop(rt.pipeline.clone(), poll);

    let state = api::AppState {
        scheduler: rt.scheduler.clone(),
        metrics,
        summarizer: rt.summarizer,
        delivery: rt.delivery,
    };
    Ok(api::create_router(state).into())
}
