//! Detection control routes

use std::sync::Arc;

use axum::{
    extract::{Query, State},
    Json,
};
use dms::{AlertStatus, StartOutcome};
use serde::Serialize;
use tracing::info;

use super::{round_confidence, CameraQuery};
use crate::error::ApiError;
use crate::AppState;

/// Response for start/stop requests
#[derive(Debug, Serialize)]
pub struct ControlResponse {
    pub status: &'static str,
    pub message: String,
}

/// Response for the status endpoint
#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub is_detecting: bool,
    pub status: AlertStatus,
    pub confidence: f32,
}

/// Start the capture loop on `?camera=N`
pub async fn start_detection(
    State(state): State<Arc<AppState>>,
    Query(params): Query<CameraQuery>,
) -> Result<Json<ControlResponse>, ApiError> {
    let service = state.service.clone();
    let camera = params.camera;
    let outcome = tokio::task::spawn_blocking(move || service.start(camera)).await??;

    let response = match outcome {
        StartOutcome::Started => ControlResponse {
            status: "started",
            message: format!("Detection started on camera {}", camera),
        },
        StartOutcome::AlreadyRunning => ControlResponse {
            status: "already_running",
            message: "Detection already running".to_string(),
        },
    };
    Ok(Json(response))
}

/// Stop the capture loop. Succeeds whether or not it was running.
pub async fn stop_detection(State(state): State<Arc<AppState>>) -> Json<ControlResponse> {
    if !state.service.stop() {
        info!("Stop requested while detection was not running");
    }
    Json(ControlResponse {
        status: "stopped",
        message: "Detection stopped".to_string(),
    })
}

pub async fn get_status(State(state): State<Arc<AppState>>) -> Json<StatusResponse> {
    let status = state.service.status();
    Json(StatusResponse {
        is_detecting: status.is_running,
        status: status.alert_status,
        confidence: round_confidence(status.confidence),
    })
}
