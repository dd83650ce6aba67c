//! Video frame types and processing

use image::{imageops, GrayImage, ImageBuffer, RgbImage};

/// Decoded RGB video frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VideoFrame {
    /// RGB pixel data (width * height * 3)
    pub data: Vec<u8>,
    /// Frame width
    pub width: u32,
    /// Frame height
    pub height: u32,
    /// Capture timestamp (nanoseconds)
    pub timestamp_ns: u64,
    /// Frame sequence number
    pub sequence: u32,
}

impl VideoFrame {
    /// Create a new video frame from raw RGB data
    pub fn new(data: Vec<u8>, width: u32, height: u32, timestamp_ns: u64, sequence: u32) -> Self {
        Self {
            data,
            width,
            height,
            timestamp_ns,
            sequence,
        }
    }

    /// Create a frame of a single solid color
    pub fn filled(width: u32, height: u32, rgb: [u8; 3]) -> Self {
        let data = rgb
            .iter()
            .copied()
            .cycle()
            .take((width as usize) * (height as usize) * 3)
            .collect();
        Self::new(data, width, height, 0, 0)
    }

    /// Wrap an `image` RGB buffer without copying
    pub fn from_rgb_image(image: RgbImage, timestamp_ns: u64, sequence: u32) -> Self {
        let (width, height) = image.dimensions();
        Self {
            data: image.into_raw(),
            width,
            height,
            timestamp_ns,
            sequence,
        }
    }

    /// Copy into an `image` RGB buffer. `None` when the buffer length
    /// does not match the declared dimensions.
    pub fn to_rgb_image(&self) -> Option<RgbImage> {
        ImageBuffer::from_raw(self.width, self.height, self.data.clone())
    }

    /// Whether the pixel buffer matches `width * height * 3`
    pub fn is_well_formed(&self) -> bool {
        self.width > 0
            && self.height > 0
            && self.data.len() == (self.width as usize) * (self.height as usize) * 3
    }

    /// Get pixel at (x, y)
    pub fn get_pixel(&self, x: u32, y: u32) -> Option<[u8; 3]> {
        if x >= self.width || y >= self.height {
            return None;
        }
        let idx = ((y as usize) * (self.width as usize) + x as usize) * 3;
        self.data
            .get(idx..idx + 3)
            .map(|p| [p[0], p[1], p[2]])
    }

    /// Convert to grayscale
    pub fn to_grayscale(&self) -> Option<GrayImage> {
        let gray = self
            .data
            .chunks_exact(3)
            .map(|pixel| {
                // Luminance formula: 0.299*R + 0.587*G + 0.114*B
                (pixel[0] as f32 * 0.299 + pixel[1] as f32 * 0.587 + pixel[2] as f32 * 0.114) as u8
            })
            .collect();
        GrayImage::from_raw(self.width, self.height, gray)
    }

    /// Crop a region of the frame. Empty or out-of-bounds regions yield `None`.
    pub fn crop(&self, x: u32, y: u32, w: u32, h: u32) -> Option<VideoFrame> {
        if w == 0 || h == 0 || !self.is_well_formed() {
            return None;
        }
        if x.checked_add(w)? > self.width || y.checked_add(h)? > self.height {
            return None;
        }

        let mut cropped = Vec::with_capacity((w as usize) * (h as usize) * 3);
        for row in y..(y + h) {
            let start = ((row as usize) * (self.width as usize) + x as usize) * 3;
            let end = start + (w as usize) * 3;
            cropped.extend_from_slice(&self.data[start..end]);
        }

        Some(VideoFrame {
            data: cropped,
            width: w,
            height: h,
            timestamp_ns: self.timestamp_ns,
            sequence: self.sequence,
        })
    }

    /// Resize frame using bilinear interpolation
    pub fn resize(&self, new_width: u32, new_height: u32) -> Option<VideoFrame> {
        if new_width == 0 || new_height == 0 {
            return None;
        }
        let image = self.to_rgb_image()?;
        let resized = imageops::resize(&image, new_width, new_height, imageops::FilterType::Triangle);
        Some(VideoFrame::from_rgb_image(resized, self.timestamp_ns, self.sequence))
    }
}
