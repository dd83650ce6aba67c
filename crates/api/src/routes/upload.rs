//! Single-image analysis and camera preview routes

use std::sync::Arc;

use axum::{
    extract::{Multipart, Query, State},
    Json,
};
use dms::AlertStatus;
use serde::Serialize;
use tracing::{info, warn};

use super::{jpeg_data_url, round_confidence, CameraQuery};
use crate::error::ApiError;
use crate::AppState;

/// Multipart field carrying the uploaded image
const IMAGE_FIELD: &str = "image";

#[derive(Debug, Serialize)]
pub struct UploadResponse {
    pub success: bool,
    /// Annotated image as a JPEG data URL
    pub processed_image: String,
    /// Raw signal for this single image, not a debounced alert
    pub is_drowsy: bool,
    pub confidence: f32,
    pub status: AlertStatus,
}

#[derive(Debug, Serialize)]
pub struct PreviewResponse {
    pub preview_image: String,
    pub camera_index: u32,
}

/// Analyze one uploaded image. Independent of the live session.
pub async fn upload_image(
    State(state): State<Arc<AppState>>,
    mut multipart: Multipart,
) -> Result<Json<UploadResponse>, ApiError> {
    let mut image = None;
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::BadRequest(e.to_string()))?
    {
        if field.name() != Some(IMAGE_FIELD) {
            continue;
        }
        if field.file_name() == Some("") {
            return Err(ApiError::BadRequest("No image selected".to_string()));
        }
        image = Some(
            field
                .bytes()
                .await
                .map_err(|e| ApiError::BadRequest(e.to_string()))?,
        );
        break;
    }

    let Some(bytes) = image else {
        return Err(ApiError::BadRequest("No image uploaded".to_string()));
    };
    if bytes.is_empty() {
        return Err(ApiError::BadRequest("No image selected".to_string()));
    }

    metrics::counter!("dms_uploads_total").increment(1);
    let service = state.service.clone();
    let analysis = tokio::task::spawn_blocking(move || service.analyze_upload(&bytes))
        .await?
        .map_err(|e| {
            warn!("Upload analysis failed: {}", e);
            ApiError::Internal(format!("Error processing image: {}", e))
        })?;
    info!(
        "Analyzed upload: drowsy={}, confidence={:.2}",
        analysis.is_drowsy, analysis.confidence
    );

    Ok(Json(UploadResponse {
        success: true,
        processed_image: jpeg_data_url(&analysis.annotated_jpeg),
        is_drowsy: analysis.is_drowsy,
        confidence: round_confidence(analysis.confidence),
        status: analysis.status,
    }))
}

/// Grab a single frame from `?camera=N` so a client can pick a camera
pub async fn camera_preview(
    State(state): State<Arc<AppState>>,
    Query(params): Query<CameraQuery>,
) -> Result<Json<PreviewResponse>, ApiError> {
    let camera = params.camera;
    let service = state.service.clone();
    let jpeg = tokio::task::spawn_blocking(move || service.preview_jpeg(camera))
        .await?
        .map_err(|e| {
            warn!("Camera preview failed: {}", e);
            ApiError::BadRequest(format!("Could not open camera {}", camera))
        })?;

    Ok(Json(PreviewResponse {
        preview_image: jpeg_data_url(&jpeg),
        camera_index: camera,
    }))
}
