//! Live webcam source backed by nokhwa

use std::time::Instant;

use nokhwa::{
    pixel_format::RgbFormat,
    utils::{CameraIndex, RequestedFormat, RequestedFormatType, Resolution},
    Camera,
};
use tracing::{debug, info, warn};

use super::{FrameSource, SourceOpener};
use crate::{CameraError, VideoFrame};

/// An open webcam stream
pub struct WebcamSource {
    camera: Camera,
    device_index: u32,
    sequence: u32,
    started: Instant,
}

impl WebcamSource {
    /// Open a webcam by device index and start streaming
    pub fn open(device_index: u32, width: u32, height: u32, fps: u32) -> Result<Self, CameraError> {
        let requested =
            RequestedFormat::new::<RgbFormat>(RequestedFormatType::AbsoluteHighestResolution);

        debug!(
            "Opening webcam device {} with requested resolution {}x{} @ {} fps",
            device_index, width, height, fps
        );

        let mut camera = Camera::new(CameraIndex::Index(device_index), requested)
            .map_err(|e| CameraError::Open(format!("webcam {}: {}", device_index, e)))?;

        camera
            .open_stream()
            .map_err(|e| CameraError::Stream(e.to_string()))?;

        // Drivers may refuse the requested mode; fall back to their default.
        if let Err(e) = camera.set_resolution(Resolution::new(width, height)) {
            warn!("Could not set resolution {}x{}: {}", width, height, e);
        }
        if let Err(e) = camera.set_frame_rate(fps) {
            warn!("Could not set frame rate {} fps: {}", fps, e);
        }

        let actual = camera.resolution();
        info!(
            "Webcam device {} opened: {}x{} @ {} fps",
            device_index,
            actual.width(),
            actual.height(),
            camera.frame_rate()
        );

        Ok(Self {
            camera,
            device_index,
            sequence: 0,
            started: Instant::now(),
        })
    }
}

impl FrameSource for WebcamSource {
    fn read_frame(&mut self) -> Option<VideoFrame> {
        let buffer = match self.camera.frame() {
            Ok(buffer) => buffer,
            Err(e) => {
                warn!("Webcam {} capture failed: {}", self.device_index, e);
                return None;
            }
        };
        let decoded = match buffer.decode_image::<RgbFormat>() {
            Ok(image) => image,
            Err(e) => {
                warn!("Webcam {} frame decode failed: {}", self.device_index, e);
                return None;
            }
        };

        let sequence = self.sequence;
        self.sequence = self.sequence.wrapping_add(1);
        let timestamp_ns = self.started.elapsed().as_nanos() as u64;
        Some(VideoFrame::from_rgb_image(decoded, timestamp_ns, sequence))
    }
}

impl Drop for WebcamSource {
    fn drop(&mut self) {
        if let Err(e) = self.camera.stop_stream() {
            warn!("Failed to stop webcam stream: {}", e);
        }
        info!("Webcam device {} released", self.device_index);
    }
}

/// Opens webcams with a requested capture mode
#[derive(Debug, Clone, Copy)]
pub struct WebcamOpener {
    pub width: u32,
    pub height: u32,
    pub fps: u32,
}

impl WebcamOpener {
    pub fn new(width: u32, height: u32, fps: u32) -> Self {
        Self { width, height, fps }
    }
}

impl SourceOpener for WebcamOpener {
    fn open(&self, camera_index: u32) -> Result<Box<dyn FrameSource>, CameraError> {
        let source = WebcamSource::open(camera_index, self.width, self.height, self.fps)?;
        Ok(Box::new(source))
    }
}
