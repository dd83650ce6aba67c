//! HTTP route handlers

pub mod detection;
pub mod stream;
pub mod upload;

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use serde::Deserialize;

/// `?camera=N`, defaulting to camera 0
#[derive(Debug, Deserialize)]
pub struct CameraQuery {
    #[serde(default)]
    pub camera: u32,
}

/// Confidence as reported to clients, two decimals
pub(crate) fn round_confidence(confidence: f32) -> f32 {
    (confidence * 100.0).round() / 100.0
}

pub(crate) fn jpeg_data_url(jpeg: &[u8]) -> String {
    format!("data:image/jpeg;base64,{}", BASE64.encode(jpeg))
}
