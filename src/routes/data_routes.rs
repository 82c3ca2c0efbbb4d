use axum::{
    extract::{ws::WebSocketUpgrade, Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, error};

use depthcalc::SeriesHandle;

use crate::routes::ws_handler::handle_ws_fetch;
use crate::routes::AppState;

#[derive(Deserialize, Debug)]
pub struct WindowQuery {
    pub min: Option<f64>,
    pub max: Option<f64>,
}

#[derive(Serialize, Debug)]
pub struct WindowResponse {
    pub id: u64,
    pub name: String,
    pub timestamps: Vec<f64>,
    pub values: Vec<f64>,
}

#[derive(Serialize, Debug, PartialEq)]
pub struct IntervalEntry {
    pub number: usize,
    pub start: f64,
    pub finish: f64,
}

#[derive(Deserialize, Debug)]
pub struct IntervalRequest {
    pub start: f64,
    pub finish: f64,
}

#[derive(Serialize, Debug)]
pub struct IntervalEditResponse {
    pub changed: bool,
    pub count: usize,
}

/// =======================
/// ROUTER
/// =======================

pub fn data_routes(state: AppState) -> Router {
    Router::new()
        .route("/series", get(list_series))
        .route("/series/{id}/window", get(series_window))
        .route("/intervals", get(list_intervals))
        .route("/intervals/add", post(add_interval))
        .route("/intervals/delete", post(delete_interval))
        .route("/stream/{id}", get(ws_stream))
        .with_state(state)
}

/// =======================
/// HANDLERS
/// =======================

async fn list_series(State(state): State<AppState>) -> Response {
    let controller = state.controller.lock().await;
    Json(controller.series_list()).into_response()
}

async fn series_window(
    State(state): State<AppState>,
    Path(id): Path<u64>,
    Query(query): Query<WindowQuery>,
) -> Response {
    let handle = SeriesHandle::from_id(id);
    let controller = state.controller.lock().await;

    let Some(series) = controller.series(handle) else {
        error!("Series not found: {}", id);
        return StatusCode::NOT_FOUND.into_response();
    };

    let min = query.min.or(series.start_x()).unwrap_or(0.0);
    let max = query.max.or(series.finish_x()).unwrap_or(0.0);
    if min > max {
        return StatusCode::BAD_REQUEST.into_response();
    }

    let (timestamps, values) = series.visible_window(min, max);
    debug!("window {} [{}, {}]: {} points", series.name(), min, max, values.len());

    Json(WindowResponse {
        id,
        name: series.name().to_string(),
        timestamps,
        values,
    })
    .into_response()
}

async fn list_intervals(State(state): State<AppState>) -> Response {
    let controller = state.controller.lock().await;
    let entries: Vec<IntervalEntry> = controller
        .intervals()
        .numbered()
        .map(|(number, iv)| IntervalEntry {
            number,
            start: iv.start,
            finish: iv.finish,
        })
        .collect();
    Json(entries).into_response()
}

async fn add_interval(State(state): State<AppState>, Json(request): Json<IntervalRequest>) -> Response {
    let mut controller = state.controller.lock().await;
    let changed = controller.add_interval(request.start, request.finish);
    Json(IntervalEditResponse {
        changed,
        count: controller.intervals().len(),
    })
    .into_response()
}

async fn delete_interval(State(state): State<AppState>, Json(request): Json<IntervalRequest>) -> Response {
    let mut controller = state.controller.lock().await;
    let changed = controller.delete_interval(request.start, request.finish);
    Json(IntervalEditResponse {
        changed,
        count: controller.intervals().len(),
    })
    .into_response()
}

async fn ws_stream(State(state): State<AppState>, Path(id): Path<u64>, ws: WebSocketUpgrade) -> Response {
    let handle = SeriesHandle::from_id(id);
    let exists = state.controller.lock().await.series(handle).is_some();
    if !exists {
        error!("Series not found: {}", id);
        return StatusCode::NOT_FOUND.into_response();
    }

    // the controller is locked again inside the websocket handler
    ws.on_upgrade(move |socket| handle_ws_fetch(socket, state.controller, handle))
}

#[cfg(test)]
mod tests {
    use super::*;
    use depthcalc::{ChannelKind, Controller, EventSink, Settings, TimeSeries};
    use std::sync::Arc;

    fn state(dir: &tempfile::TempDir) -> (AppState, SeriesHandle) {
        let settings = Settings {
            snapshots_dir: dir.path().to_path_buf(),
            ..Settings::default()
        };
        let (sink, _rx) = EventSink::channel();
        let mut controller = Controller::new(settings, sink).unwrap();
        let xs: Vec<f64> = (0..100).map(|i| i as f64).collect();
        let handle = controller.add_series(TimeSeries::new("gl1", ChannelKind::Depth, xs.clone(), xs));
        (
            AppState {
                controller: Arc::new(tokio::sync::Mutex::new(controller)),
            },
            handle,
        )
    }

    #[tokio::test]
    async fn test_window_and_missing_series() {
        let dir = tempfile::tempdir().unwrap();
        let (state, handle) = state(&dir);

        let query = WindowQuery {
            min: Some(10.0),
            max: Some(20.0),
        };
        let resp = series_window(State(state.clone()), Path(handle.to_id()), Query(query)).await;
        assert_eq!(resp.status(), StatusCode::OK);

        let query = WindowQuery { min: None, max: None };
        let resp = series_window(State(state), Path(u64::MAX), Query(query)).await;
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_interval_edits() {
        let dir = tempfile::tempdir().unwrap();
        let (state, _) = state(&dir);

        let resp = add_interval(
            State(state.clone()),
            Json(IntervalRequest {
                start: 5.0,
                finish: 15.0,
            }),
        )
        .await;
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(state.controller.lock().await.intervals().len(), 1);

        delete_interval(
            State(state.clone()),
            Json(IntervalRequest {
                start: 0.0,
                finish: 20.0,
            }),
        )
        .await;
        let controller = state.controller.lock().await;
        assert!(controller.intervals().is_empty());
        // the depth curve was built on the deleted interval
        assert!(controller.series_list().is_empty());
    }
}
