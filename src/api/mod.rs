//! HTTP API handlers

pub mod ws;

use crate::hub::{HubHandle, StatsSnapshot};
use axum::{
    extract::State,
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;
use std::path::Path;
use tower_http::{cors::CorsLayer, services::ServeDir, trace::TraceLayer};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub hub: HubHandle,
}

impl AppState {
    pub fn new(hub: HubHandle) -> Self {
        Self { hub }
    }
}

/// Error response
#[derive(Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

#[derive(Serialize)]
pub struct ReloadResponse {
    pub ok: bool,
    pub scenes: usize,
}

/// GET /stats - Connection, note and scene counters
pub async fn stats_handler(State(state): State<AppState>) -> Json<StatsSnapshot> {
    Json(state.hub.stats())
}

/// POST /reload-scenes - Re-read the scene file
pub async fn reload_scenes_handler(State(state): State<AppState>) -> impl IntoResponse {
    match state.hub.reload_scenes() {
        Ok(scenes) => (
            StatusCode::OK,
            Json(ReloadResponse { ok: true, scenes }),
        )
            .into_response(),
        Err(e) => {
            tracing::warn!("Scene reload failed: {}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ErrorResponse {
                    error: e.to_string(),
                }),
            )
                .into_response()
        }
    }
}

/// Build the HTTP router. Unmatched paths are served from `static_dir`.
pub fn router(state: AppState, static_dir: &Path) -> Router {
    Router::new()
        .route("/ws", get(ws::ws_handler))
        .route("/stats", get(stats_handler))
        .route("/reload-scenes", post(reload_scenes_handler))
        .fallback_service(ServeDir::new(static_dir))
        // Browsers connect from anywhere on the LAN
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
