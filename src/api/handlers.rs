use std::collections::BTreeMap;

use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use serde::Serialize;

use crate::core::metrics;
use crate::core::state::AppState;

#[derive(Debug, Serialize)]
pub(crate) struct HealthResponse {
    pub(crate) service: String,
    pub(crate) status: String,
    pub(crate) components: BTreeMap<String, String>,
    pub(crate) sessions: BTreeMap<&'static str, usize>,
}

pub(crate) async fn healthz(State(state): State<AppState>) -> Json<HealthResponse> {
    let mut status = "healthy".to_string();
    let mut components = BTreeMap::new();

    components.insert("active_tasks".to_string(), state.active_tasks().len().to_string());
    components.insert("background_tasks".to_string(), state.tasks().running().to_string());
    components.insert("results".to_string(), state.results().len().to_string());
    components.insert("in_flight_messages".to_string(), state.cancellations().len().to_string());

    match tokio::fs::metadata(state.ledger().path()).await {
        Ok(_) => {
            components.insert("ledger".to_string(), "healthy".to_string());
        }
        Err(err) => {
            components.insert("ledger".to_string(), format!("unhealthy: {err}"));
            status = "degraded".to_string();
        }
    }

    if state.shutdown_token().is_cancelled() {
        status = "shutting_down".to_string();
    }

    Json(HealthResponse {
        service: "exam-grading-bot".to_string(),
        status,
        components,
        sessions: state.sessions().count_by_state(),
    })
}

pub(crate) async fn metrics(State(state): State<AppState>) -> impl IntoResponse {
    if !state.settings().telemetry().prometheus_enabled {
        return StatusCode::NOT_FOUND.into_response();
    }

    match metrics::render() {
        Some(body) => ([(axum::http::header::CONTENT_TYPE, "text/plain; version=0.0.4")], body)
            .into_response(),
        None => StatusCode::SERVICE_UNAVAILABLE.into_response(),
    }
}
