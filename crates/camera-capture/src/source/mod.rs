//! Capture sources
//!
//! A capture source is opened by integer camera index and then pulled one
//! frame at a time until it runs dry.

mod directory;
#[cfg(feature = "webcam")]
mod webcam;

pub use directory::{DirectoryOpener, DirectorySource};
#[cfg(feature = "webcam")]
pub use webcam::{WebcamOpener, WebcamSource};

use crate::{CameraError, VideoFrame};

/// An open stream of frames
pub trait FrameSource {
    /// Pull the next frame. `None` means the source is exhausted or
    /// disconnected and will not produce further frames.
    fn read_frame(&mut self) -> Option<VideoFrame>;
}

/// Opens capture sources by camera index.
///
/// Sources are opened on the thread that will read them, so only the
/// opener has to cross threads.
pub trait SourceOpener: Send + Sync {
    fn open(&self, camera_index: u32) -> Result<Box<dyn FrameSource>, CameraError>;
}
