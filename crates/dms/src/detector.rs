//! Face/eye detection and patch classification interfaces

use camera_capture::frame::VideoFrame;
use image::GrayImage;
use serde::{Deserialize, Serialize};

use crate::config::{DetectParams, EyeFilterConfig};
use crate::DmsError;

/// Axis-aligned integer region
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Rect {
    pub x: i32,
    pub y: i32,
    pub width: u32,
    pub height: u32,
}

impl Rect {
    pub fn new(x: i32, y: i32, width: u32, height: u32) -> Self {
        Self { x, y, width, height }
    }

    pub fn right(&self) -> i32 {
        self.x.saturating_add(i32::try_from(self.width).unwrap_or(i32::MAX))
    }

    pub fn bottom(&self) -> i32 {
        self.y.saturating_add(i32::try_from(self.height).unwrap_or(i32::MAX))
    }

    /// Width over height; `None` for degenerate boxes
    pub fn aspect_ratio(&self) -> Option<f32> {
        (self.height > 0).then(|| self.width as f32 / self.height as f32)
    }

    /// Translate by (dx, dy)
    pub fn offset(&self, dx: i32, dy: i32) -> Rect {
        Rect::new(self.x.saturating_add(dx), self.y.saturating_add(dy), self.width, self.height)
    }

    /// Intersect with a `width x height` image; `None` if nothing is left
    pub fn clip(&self, width: u32, height: u32) -> Option<Rect> {
        let x0 = self.x.max(0);
        let y0 = self.y.max(0);
        let x1 = self.right().min(width as i32);
        let y1 = self.bottom().min(height as i32);
        (x1 > x0 && y1 > y0).then(|| Rect::new(x0, y0, (x1 - x0) as u32, (y1 - y0) as u32))
    }
}

/// Fixed-size square color patch, HWC order, channels scaled to [0, 1]
#[derive(Debug, Clone, PartialEq)]
pub struct Patch {
    size: u32,
    data: Vec<f32>,
}

impl Patch {
    /// Crop `region` out of `frame`, resize to `size x size` and normalize.
    /// Regions that are empty or stick out of the frame are rejected.
    pub fn extract(frame: &VideoFrame, region: &Rect, size: u32) -> Result<Self, DmsError> {
        if region.x < 0 || region.y < 0 {
            return Err(DmsError::ImageProcessing(format!(
                "region {:?} starts outside the frame",
                region
            )));
        }
        let cropped = frame
            .crop(region.x as u32, region.y as u32, region.width, region.height)
            .ok_or_else(|| {
                DmsError::ImageProcessing(format!(
                    "region {:?} does not fit a {}x{} frame",
                    region, frame.width, frame.height
                ))
            })?;
        let resized = cropped.resize(size, size).ok_or_else(|| {
            DmsError::ImageProcessing(format!("cannot resize region to {}x{}", size, size))
        })?;

        let data = resized.data.iter().map(|&v| v as f32 / 255.0).collect();
        Ok(Self { size, data })
    }

    pub fn size(&self) -> u32 {
        self.size
    }

    /// Pixel values, row-major, three channels per pixel
    pub fn data(&self) -> &[f32] {
        &self.data
    }
}

/// Locates objects (faces, eyes) in a grayscale image.
///
/// Implementations must be deterministic for a fixed image. Calls may
/// block for tens of milliseconds.
pub trait ObjectDetector: Send + Sync {
    fn detect(&self, image: &GrayImage, params: &DetectParams) -> Result<Vec<Rect>, DmsError>;
}

/// Binary classifier over a fixed-size patch, returning the probability of
/// the positive class ("Yawn" / "Open")
pub trait PatchClassifier: Send + Sync {
    fn classify(&self, patch: &Patch) -> Result<f32, DmsError>;
}

/// Merge raw detector hits by neighbor voting.
///
/// Hits whose edges all lie within `eps * (min width + min height) / 2` of
/// each other are clustered. A cluster survives only with more than
/// `min_neighbors` members and is replaced by the mean box. With
/// `min_neighbors == 0` the raw hits are returned unchanged.
pub fn group_rectangles(candidates: &[Rect], min_neighbors: u32, eps: f32) -> Vec<Rect> {
    if min_neighbors == 0 || candidates.is_empty() {
        return candidates.to_vec();
    }

    let mut parent: Vec<usize> = (0..candidates.len()).collect();
    fn find(parent: &mut [usize], mut i: usize) -> usize {
        while parent[i] != i {
            parent[i] = parent[parent[i]];
            i = parent[i];
        }
        i
    }

    for i in 0..candidates.len() {
        for j in 0..i {
            if similar(&candidates[i], &candidates[j], eps) {
                let (a, b) = (find(&mut parent, i), find(&mut parent, j));
                if a != b {
                    parent[a] = b;
                }
            }
        }
    }

    // root -> (count, sum x, sum y, sum w, sum h), in first-seen order
    let mut clusters: Vec<(usize, [i64; 5])> = Vec::new();
    for (i, rect) in candidates.iter().enumerate() {
        let root = find(&mut parent, i);
        let slot = match clusters.iter().position(|(r, _)| *r == root) {
            Some(pos) => pos,
            None => {
                clusters.push((root, [0; 5]));
                clusters.len() - 1
            }
        };
        let acc = &mut clusters[slot].1;
        acc[0] += 1;
        acc[1] += rect.x as i64;
        acc[2] += rect.y as i64;
        acc[3] += rect.width as i64;
        acc[4] += rect.height as i64;
    }

    clusters
        .into_iter()
        .filter(|(_, acc)| acc[0] > min_neighbors as i64)
        .map(|(_, acc)| {
            let n = acc[0] as f64;
            let mean = |v: i64| (v as f64 / n).round();
            Rect::new(
                mean(acc[1]) as i32,
                mean(acc[2]) as i32,
                mean(acc[3]) as u32,
                mean(acc[4]) as u32,
            )
        })
        .collect()
}

fn similar(a: &Rect, b: &Rect, eps: f32) -> bool {
    let delta = eps as f64
        * (a.width.min(b.width) as f64 + a.height.min(b.height) as f64)
        * 0.5;
    let close = |p: i32, q: i32| p.abs_diff(q) as f64 <= delta;
    close(a.x, b.x) && close(a.y, b.y) && close(a.right(), b.right()) && close(a.bottom(), b.bottom())
}

/// Keep only eye candidates that sit in the upper part of the face and
/// have an eye-like shape.
///
/// Candidates are relative to the face region (as returned by running the
/// eye detector on the face crop). A candidate is dropped when its top is
/// more than `max_vertical_offset * face height` below the face top, or its
/// aspect ratio falls outside `[min_aspect_ratio, max_aspect_ratio]`.
pub fn filter_eye_candidates(
    face_height: u32,
    candidates: &[Rect],
    filter: &EyeFilterConfig,
) -> Vec<Rect> {
    let max_offset = (face_height as f32 * filter.max_vertical_offset) as i32;
    candidates
        .iter()
        .filter(|eye| eye.y <= max_offset)
        .filter(|eye| {
            eye.aspect_ratio().is_some_and(|ratio| {
                ratio >= filter.min_aspect_ratio && ratio <= filter.max_aspect_ratio
            })
        })
        .copied()
        .collect()
}
