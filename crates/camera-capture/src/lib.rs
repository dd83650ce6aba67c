//! Camera Capture Library for the Drowsiness Monitor
//!
//! Provides the frame type shared by the detection pipeline, capture
//! sources that are pulled frame by frame, and the JPEG codec used to
//! move frames over HTTP.
//! Supports:
//! - Image-directory playback (recorded sessions, tests)
//! - Live webcams (feature `webcam`)

pub mod codec;
pub mod frame;
pub mod source;

pub use codec::{decode_image, encode_jpeg, DEFAULT_JPEG_QUALITY};
pub use frame::VideoFrame;
pub use source::{DirectoryOpener, DirectorySource, FrameSource, SourceOpener};
#[cfg(feature = "webcam")]
pub use source::{WebcamOpener, WebcamSource};

use thiserror::Error;

/// Camera error types
#[derive(Error, Debug)]
pub enum CameraError {
    #[error("Failed to open camera: {0}")]
    Open(String),

    #[error("Invalid format: {0}")]
    Format(String),

    #[error("Streaming error: {0}")]
    Stream(String),

    #[error("Image decode failed: {0}")]
    Decode(String),

    #[error("Image encode failed: {0}")]
    Encode(String),
}
