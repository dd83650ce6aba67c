//! Image-directory playback source

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::time::Instant;

use tracing::{debug, info, warn};

use super::{FrameSource, SourceOpener};
use crate::{CameraError, VideoFrame};

const IMAGE_EXTENSIONS: [&str; 3] = ["jpg", "jpeg", "png"];

/// Plays back still images from a directory in lexical order
pub struct DirectorySource {
    files: VecDeque<PathBuf>,
    sequence: u32,
    started: Instant,
}

impl DirectorySource {
    /// Open a directory of images. Fails when the directory is missing or
    /// holds no images.
    pub fn open(dir: &Path) -> Result<Self, CameraError> {
        let entries = std::fs::read_dir(dir)
            .map_err(|e| CameraError::Open(format!("{}: {}", dir.display(), e)))?;

        let mut files: Vec<PathBuf> = entries
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|path| path.is_file() && has_image_extension(path))
            .collect();
        files.sort();

        if files.is_empty() {
            return Err(CameraError::Open(format!(
                "no images found in {}",
                dir.display()
            )));
        }

        info!("Opened {} with {} frames", dir.display(), files.len());
        Ok(Self {
            files: files.into(),
            sequence: 0,
            started: Instant::now(),
        })
    }

    /// Frames not yet read
    pub fn remaining(&self) -> usize {
        self.files.len()
    }
}

impl FrameSource for DirectorySource {
    fn read_frame(&mut self) -> Option<VideoFrame> {
        while let Some(path) = self.files.pop_front() {
            match image::open(&path) {
                Ok(img) => {
                    let sequence = self.sequence;
                    self.sequence = self.sequence.wrapping_add(1);
                    let timestamp_ns = self.started.elapsed().as_nanos() as u64;
                    debug!("Read frame {} from {}", sequence, path.display());
                    return Some(VideoFrame::from_rgb_image(img.to_rgb8(), timestamp_ns, sequence));
                }
                Err(e) => warn!("Skipping unreadable image {}: {}", path.display(), e),
            }
        }
        None
    }
}

fn has_image_extension(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| IMAGE_EXTENSIONS.iter().any(|known| ext.eq_ignore_ascii_case(known)))
        .unwrap_or(false)
}

/// Maps camera index `N` to `<root>/N/`. Index 0 falls back to `<root>`
/// itself when there is no `0` subdirectory.
#[derive(Debug, Clone)]
pub struct DirectoryOpener {
    root: PathBuf,
}

impl DirectoryOpener {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn resolve(&self, camera_index: u32) -> PathBuf {
        let indexed = self.root.join(camera_index.to_string());
        if camera_index == 0 && !indexed.is_dir() {
            self.root.clone()
        } else {
            indexed
        }
    }
}

impl SourceOpener for DirectoryOpener {
    fn open(&self, camera_index: u32) -> Result<Box<dyn FrameSource>, CameraError> {
        let source = DirectorySource::open(&self.resolve(camera_index))?;
        Ok(Box::new(source))
    }
}
