use std::collections::BTreeMap;

use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};

use crate::core::metrics;
use crate::core::state::AppState;
use crate::schemas::{HealthResponse, RootResponse};

pub(crate) async fn root() -> Json<RootResponse> {
    Json(RootResponse {
        message: "Exam intake API".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

pub(crate) async fn healthz(State(state): State<AppState>) -> Json<HealthResponse> {
    let mut status = "healthy";
    let mut components = BTreeMap::new();

    match state.exams().ping().await {
        Ok(()) => {
            components.insert("database".to_string(), "healthy".to_string());
        }
        Err(err) => {
            components.insert("database".to_string(), format!("unhealthy: {err}"));
            status = "unhealthy";
        }
    }

    let storage_key = format!("storage:{}", state.storage().backend());
    match state.storage().health().await {
        Ok(()) => {
            components.insert(storage_key, "healthy".to_string());
        }
        Err(err) => {
            components.insert(storage_key, format!("unhealthy: {err}"));
            status = "unhealthy";
        }
    }

    // Uploads keep working without the broker; only finishing exams is affected.
    match state.publisher().health().await {
        Ok(()) => {
            components.insert("queue".to_string(), "healthy".to_string());
        }
        Err(err) => {
            components.insert("queue".to_string(), format!("unhealthy: {err}"));
            if status == "healthy" {
                status = "degraded";
            }
        }
    }

    Json(HealthResponse {
        service: "exam-intake".to_string(),
        status: status.to_string(),
        components,
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
