//! Driver Monitoring System (DMS)
//!
//! Drowsiness detection from camera frames:
//! - Face detection and eye candidate filtering
//! - Eye-state and yawn classification on color patches
//! - Consecutive-frame hysteresis before alerting
//! - Frame annotation and a background capture loop with shared state

pub mod analysis;
pub mod annotate;
pub mod backends;
pub mod capture_loop;
pub mod config;
pub mod detector;
pub mod hysteresis;
pub mod models;
pub mod pipeline;
pub mod processor;
pub mod service;
pub mod state;

pub use analysis::{DetectionResult, EyeReading, EyeSearch, FaceReading, FrameEvaluation, RegionOutcome};
pub use annotate::Annotator;
pub use capture_loop::{CaptureLoop, LoopExit};
pub use config::{DetectParams, DmsConfig, EyeFilterConfig};
pub use detector::{group_rectangles, ObjectDetector, Patch, PatchClassifier, Rect};
pub use hysteresis::HysteresisCounter;
pub use models::DetectionModels;
pub use pipeline::DetectionPipeline;
pub use processor::FrameProcessor;
pub use service::{DetectionService, StartOutcome, UploadAnalysis};
pub use state::{AlertStatus, DetectionSnapshot, SharedDetectionState, StatusSnapshot};

use camera_capture::CameraError;
use thiserror::Error;

/// DMS error types
#[derive(Error, Debug)]
pub enum DmsError {
    #[error("Model loading failed: {0}")]
    ModelLoad(String),

    #[error("Inference failed: {0}")]
    Inference(String),

    #[error("Image processing failed: {0}")]
    ImageProcessing(String),

    #[error("Invalid frame: {0}")]
    InvalidFrame(String),

    #[error("Capture source unavailable: {0}")]
    CaptureUnavailable(String),

    #[error("Capture failed: {0}")]
    Capture(String),

    #[error(transparent)]
    Camera(#[from] CameraError),
}
