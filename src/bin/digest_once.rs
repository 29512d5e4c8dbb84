//! Run one digest pass right now (manual trigger / smoke test) and print the report as JSON.
//! Honours dedup; ignores the daily idempotency key.

use paper_digest::{metrics::Metrics, run_digest_once, DigestConfig, DigestRuntime};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("paper_digest=info,warn")),
        )
        .compact()
        .init();

    let config = DigestConfig::load_default()?;
    Metrics::install(config.filter.max_papers_per_day)?;
    let rt = DigestRuntime::build(config).await?;

    let report = run_digest_once(&rt).await?;
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}
