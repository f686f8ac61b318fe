//! axum HTTP surface: liveness probe, executor introspection, and the
//! streaming root endpoint that serves Checkmk agent output.

use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use serde::Serialize;

use crate::app::Watchpost;

#[derive(Serialize)]
struct ExecutorStatisticsResponse {
    active: usize,
    finished_unpicked: usize,
    submitted_total: u64,
    errored_total: u64,
}

pub fn router(app: Arc<Watchpost>) -> Router {
    Router::new()
        .route("/healthcheck", get(healthcheck))
        .route("/executor/statistics", get(executor_statistics))
        .route("/executor/errored", get(executor_errored))
        .route("/", get(root))
        .with_state(app)
}

async fn healthcheck() -> StatusCode {
    StatusCode::NO_CONTENT
}

async fn executor_statistics(State(app): State<Arc<Watchpost>>) -> impl IntoResponse {
    let stats = app.executor.statistics();
    Json(ExecutorStatisticsResponse {
        active: stats.active,
        finished_unpicked: stats.finished_unpicked,
        submitted_total: stats.submitted_total,
        errored_total: stats.errored_total,
    })
}

async fn executor_errored(State(app): State<Arc<Watchpost>>) -> impl IntoResponse {
    Json(app.executor.errored())
}

async fn root(State(app): State<Arc<Watchpost>>) -> impl IntoResponse {
    let body = app.run_checks_once().await;
    ([(axum::http::header::CONTENT_TYPE, "text/plain")], body)
}
