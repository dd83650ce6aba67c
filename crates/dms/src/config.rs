//! DMS configuration

use serde::{Deserialize, Serialize};

/// Tuning for one object-detector call
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DetectParams {
    /// Minimum number of overlapping raw hits a box needs to survive grouping
    pub min_neighbors: u32,
    /// Smallest accepted box side (pixels)
    pub min_size: u32,
    /// Relative tolerance when grouping overlapping hits
    pub group_eps: f32,
}

impl DetectParams {
    pub fn faces() -> Self {
        Self {
            min_neighbors: 5,
            min_size: 30,
            group_eps: 0.2,
        }
    }

    pub fn eyes() -> Self {
        Self {
            min_neighbors: 3,
            min_size: 8,
            group_eps: 0.2,
        }
    }
}

/// Heuristics that reject eye candidates which are really nostrils,
/// mouth corners and the like
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EyeFilterConfig {
    /// Largest allowed offset of the candidate top from the face top,
    /// as a fraction of face height
    pub max_vertical_offset: f32,
    /// Width/height aspect ratio bounds (inclusive)
    pub min_aspect_ratio: f32,
    pub max_aspect_ratio: f32,
}

impl Default for EyeFilterConfig {
    fn default() -> Self {
        Self {
            max_vertical_offset: 0.4,
            min_aspect_ratio: 0.7,
            max_aspect_ratio: 1.8,
        }
    }
}

/// DMS configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DmsConfig {
    /// Side length of the square classifier input patch
    pub patch_size: u32,

    /// Classifier probability above which the positive class wins
    pub decision_threshold: f32,

    /// Consecutive drowsy frames that must be exceeded before alerting
    pub hysteresis_threshold: u32,

    /// Face detector tuning
    pub face_detect: DetectParams,

    /// Eye detector tuning
    pub eye_detect: DetectParams,

    /// Eye candidate filtering
    pub eye_filter: EyeFilterConfig,

    /// Delay between capture loop iterations (milliseconds)
    pub frame_interval_ms: u64,

    /// JPEG quality for streamed and returned frames
    pub jpeg_quality: u8,

    /// Detector model input size and score floor
    pub detector_input_width: u32,
    pub detector_input_height: u32,
    pub detector_score_threshold: f32,

    /// Model paths
    pub face_model_path: Option<String>,
    pub eye_model_path: Option<String>,
    pub yawn_model_path: Option<String>,
    pub eye_state_model_path: Option<String>,

    /// TTF/OTF font for annotation labels; labels are skipped without one
    pub font_path: Option<String>,
}

impl Default for DmsConfig {
    fn default() -> Self {
        Self {
            patch_size: 64,
            decision_threshold: 0.5,
            hysteresis_threshold: 20,
            face_detect: DetectParams::faces(),
            eye_detect: DetectParams::eyes(),
            eye_filter: EyeFilterConfig::default(),
            frame_interval_ms: 100,
            jpeg_quality: camera_capture::DEFAULT_JPEG_QUALITY,
            detector_input_width: 320,
            detector_input_height: 240,
            detector_score_threshold: 0.6,
            face_model_path: None,
            eye_model_path: None,
            yawn_model_path: None,
            eye_state_model_path: None,
            font_path: None,
        }
    }
}

impl DmsConfig {
    /// Create strict config (alerts sooner, more false positives)
    pub fn strict() -> Self {
        Self {
            hysteresis_threshold: 10,
            ..Default::default()
        }
    }

    /// Create lenient config (alerts later, fewer false positives)
    pub fn lenient() -> Self {
        Self {
            hysteresis_threshold: 30,
            ..Default::default()
        }
    }

    pub fn frame_interval(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.frame_interval_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_policy() {
        let config = DmsConfig::default();
        assert_eq!(config.patch_size, 64);
        assert_eq!(config.hysteresis_threshold, 20);
        assert_eq!(config.face_detect.min_neighbors, 5);
        assert_eq!(config.jpeg_quality, camera_capture::DEFAULT_JPEG_QUALITY);
        assert_eq!(config.frame_interval().as_millis(), 100);
        assert_eq!(config.eye_filter.max_vertical_offset, 0.4);
    }

    #[test]
    fn test_presets_only_move_hysteresis() {
        let strict = DmsConfig::strict();
        let lenient = DmsConfig::lenient();
        assert!(strict.hysteresis_threshold < DmsConfig::default().hysteresis_threshold);
        assert!(lenient.hysteresis_threshold > DmsConfig::default().hysteresis_threshold);
        assert_eq!(strict.decision_threshold, lenient.decision_threshold);
    }
}
