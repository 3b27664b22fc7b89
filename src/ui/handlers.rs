//! HTTP API handlers

use axum::{
    body::Bytes,
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use std::sync::Arc;

use crate::audio::device::{list_devices, AudioDeviceInfo};
use crate::session::SessionStatus;
use crate::tracking::TrackerSnapshot;
use crate::ui::server::AppState;

/// API response wrapper
#[derive(serde::Serialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl<T> ApiResponse<T> {
    pub fn ok(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }

    pub fn error(msg: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(msg.into()),
        }
    }
}

/// Status plus process uptime
#[derive(serde::Serialize)]
pub struct SystemStatus {
    #[serde(flatten)]
    pub session: SessionStatus,
    pub uptime_seconds: u64,
}

/// Get system status
pub async fn get_status(State(state): State<Arc<AppState>>) -> Json<ApiResponse<SystemStatus>> {
    Json(ApiResponse::ok(SystemStatus {
        session: state.controller.status(),
        uptime_seconds: state.started_at.elapsed().as_secs(),
    }))
}

/// Get available audio devices
pub async fn get_devices() -> (StatusCode, Json<ApiResponse<Vec<AudioDeviceInfo>>>) {
    match tokio::task::spawn_blocking(list_devices).await {
        Ok(devices) => (StatusCode::OK, Json(ApiResponse::ok(devices))),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(ApiResponse::error(e.to_string())),
        ),
    }
}

/// Get all trackers
pub async fn get_trackers(
    State(state): State<Arc<AppState>>,
) -> Json<ApiResponse<Vec<TrackerSnapshot>>> {
    Json(ApiResponse::ok(state.controller.tracking().snapshot()))
}

/// Remove every tracker
pub async fn clear_trackers(State(state): State<Arc<AppState>>) -> Json<ApiResponse<usize>> {
    Json(ApiResponse::ok(state.controller.tracking().remove_all()))
}

/// Remove one tracker
pub async fn delete_tracker(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> (StatusCode, Json<ApiResponse<()>>) {
    if state.controller.tracking().remove(&id) {
        (StatusCode::OK, Json(ApiResponse::ok(())))
    } else {
        (
            StatusCode::NOT_FOUND,
            Json(ApiResponse::error(format!("Tracker {} not found", id))),
        )
    }
}

/// Start the session
pub async fn start_session(State(state): State<Arc<AppState>>) -> (StatusCode, Json<ApiResponse<()>>) {
    match state.controller.start().await {
        Ok(()) => (StatusCode::OK, Json(ApiResponse::ok(()))),
        Err(e) => (StatusCode::CONFLICT, Json(ApiResponse::error(e.to_string()))),
    }
}

/// Stop the session
pub async fn stop_session(State(state): State<Arc<AppState>>) -> Json<ApiResponse<()>> {
    state.controller.stop().await;
    Json(ApiResponse::ok(()))
}

/// Submit an encoded camera frame. Returns whether it was queued for
/// sending.
pub async fn submit_frame(
    State(state): State<Arc<AppState>>,
    body: Bytes,
) -> (StatusCode, Json<ApiResponse<bool>>) {
    let decoded = tokio::task::spawn_blocking(move || {
        image::load_from_memory(&body).map(|image| image.to_rgb8())
    })
    .await;

    match decoded {
        Ok(Ok(frame)) => {
            let queued = state.controller.submit_owned_frame(frame);
            (StatusCode::OK, Json(ApiResponse::ok(queued)))
        }
        Ok(Err(e)) => (
            StatusCode::BAD_REQUEST,
            Json(ApiResponse::error(format!("Invalid image: {}", e))),
        ),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(ApiResponse::error(e.to_string())),
        ),
    }
}
