use std::sync::Arc;

use axum::{extract::State, routing::get, Json, Router};
use chrono::Utc;
use serde::Serialize;

use crate::metrics::Metrics;
use crate::scheduler::{Scheduler, SchedulerStatus};

#[derive(Clone)]
pub struct AppState {
    pub scheduler: Arc<Scheduler>,
    pub metrics: Metrics,
    /// Backend names, for the status page.
    pub summarizer: &'static str,
    pub delivery: &'static str,
}

pub fn create_router(state: AppState) -> Router {
    let metrics: Router = state.metrics.router();
    Router::new()
        .route("/health", get(|| async { "ok" }))
        .route("/status", get(status))
        .with_state(state)
        .merge(metrics)
}

#[derive(Serialize)]
struct StatusResp {
    #[serde(flatten)]
    scheduler: SchedulerStatus,
    summarizer: &'static str,
    delivery: &'static str,
}

async fn status(State(state): State<AppState>) -> Json<StatusResp> {
    Json(StatusResp {
        scheduler: state.scheduler.status(Utc::now()),
        summarizer: state.summarizer,
        delivery: state.delivery,
    })
}
