pub mod data_routes;
pub mod info_routes;
pub mod ws_handler;

use axum::Router;
use std::sync::Arc;

use depthcalc::Controller;

#[derive(Clone)]
pub struct AppState {
    pub controller: Arc<tokio::sync::Mutex<Controller>>,
}

impl AppState {
    pub fn new(controller: Controller) -> Self {
        Self {
            controller: Arc::new(tokio::sync::Mutex::new(controller)),
        }
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .merge(info_routes::health_routes(state.clone()))
        .merge(data_routes::data_routes(state))
}
