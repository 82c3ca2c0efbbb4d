use axum::{
    extract::State,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde::Serialize;
use tracing::debug;

use crate::routes::AppState;

pub fn health_routes(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/info", get(info_check))
        .with_state(state)
}

#[derive(Serialize)]
pub struct HealthStatus {
    status: String,
}

async fn health_check() -> Response {
    Json(HealthStatus {
        status: "ok".to_owned(),
    })
    .into_response()
}

/// Effective settings, with the port actually bound.
pub async fn info_check(State(state): State<AppState>) -> Response {
    debug!("settings requested");
    let controller = state.controller.lock().await;
    Json(controller.settings().clone()).into_response()
}
