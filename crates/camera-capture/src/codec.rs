//! JPEG encoding for transport and still-image decoding for uploads

use image::{codecs::jpeg::JpegEncoder, ExtendedColorType, ImageEncoder};

use crate::{CameraError, VideoFrame};

/// Default JPEG quality for streamed and returned frames
pub const DEFAULT_JPEG_QUALITY: u8 = 80;

/// Encode an RGB frame as JPEG
pub fn encode_jpeg(frame: &VideoFrame, quality: u8) -> Result<Vec<u8>, CameraError> {
    if !frame.is_well_formed() {
        return Err(CameraError::Format(format!(
            "{} bytes for a {}x{} RGB frame",
            frame.data.len(),
            frame.width,
            frame.height
        )));
    }

    let mut buffer = Vec::new();
    JpegEncoder::new_with_quality(&mut buffer, quality.clamp(1, 100))
        .write_image(&frame.data, frame.width, frame.height, ExtendedColorType::Rgb8)
        .map_err(|e| CameraError::Encode(e.to_string()))?;
    Ok(buffer)
}

/// Decode a compressed still image (any format `image` recognises) to RGB
pub fn decode_image(bytes: &[u8]) -> Result<VideoFrame, CameraError> {
    let img = image::load_from_memory(bytes).map_err(|e| CameraError::Decode(e.to_string()))?;
    Ok(VideoFrame::from_rgb_image(img.to_rgb8(), 0, 0))
}
