//! ONNX Runtime backed detector and classifier

use image::{imageops, GrayImage};
use ndarray::Array4;
use ort::session::{builder::GraphOptimizationLevel, Session};
use tracing::{debug, error, info};

use crate::config::DetectParams;
use crate::detector::{group_rectangles, ObjectDetector, Patch, PatchClassifier, Rect};
use crate::DmsError;

fn build_session(path: &str) -> Result<Session, DmsError> {
    info!("Loading ONNX model from {}", path);
    Session::builder()
        .and_then(|builder| builder.with_optimization_level(GraphOptimizationLevel::Level3))
        .and_then(|builder| builder.commit_from_file(path))
        .map_err(|e| {
            error!("Failed to load model {}: {}", path, e);
            DmsError::ModelLoad(format!("{}: {}", path, e))
        })
}

fn inference_error(e: ort::Error) -> DmsError {
    DmsError::Inference(e.to_string())
}

/// Binary classifier taking a `1 x N x N x 3` patch and producing one
/// probability
pub struct OnnxPatchClassifier {
    session: Session,
    input_size: u32,
}

impl OnnxPatchClassifier {
    pub fn load(path: &str, input_size: u32) -> Result<Self, DmsError> {
        Ok(Self {
            session: build_session(path)?,
            input_size,
        })
    }
}

impl PatchClassifier for OnnxPatchClassifier {
    fn classify(&self, patch: &Patch) -> Result<f32, DmsError> {
        if patch.size() != self.input_size {
            return Err(DmsError::Inference(format!(
                "expected {0}x{0} patch, got {1}x{1}",
                self.input_size,
                patch.size()
            )));
        }
        let n = patch.size() as usize;
        let input = Array4::from_shape_vec((1, n, n, 3), patch.data().to_vec())
            .map_err(|e| DmsError::Inference(e.to_string()))?;

        let outputs = self
            .session
            .run(ort::inputs![input].map_err(inference_error)?)
            .map_err(inference_error)?;
        let output = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(inference_error)?;

        let probability = output
            .iter()
            .next()
            .copied()
            .ok_or_else(|| DmsError::Inference("classifier produced no output".into()))?;
        if !probability.is_finite() {
            return Err(DmsError::Inference(format!("non-finite probability {}", probability)));
        }
        Ok(probability.clamp(0.0, 1.0))
    }
}

/// Box detector taking a `1 x 1 x H x W` grayscale image and producing
/// `K x 5` rows of `[x1, y1, x2, y2, score]` in normalized coordinates
pub struct OnnxBoxDetector {
    session: Session,
    input_width: u32,
    input_height: u32,
    score_threshold: f32,
}

impl OnnxBoxDetector {
    pub fn load(
        path: &str,
        input_width: u32,
        input_height: u32,
        score_threshold: f32,
    ) -> Result<Self, DmsError> {
        Ok(Self {
            session: build_session(path)?,
            input_width,
            input_height,
            score_threshold,
        })
    }
}

impl ObjectDetector for OnnxBoxDetector {
    fn detect(&self, image: &GrayImage, params: &DetectParams) -> Result<Vec<Rect>, DmsError> {
        let (width, height) = image.dimensions();
        if width == 0 || height == 0 {
            return Ok(Vec::new());
        }

        let resized = imageops::resize(
            image,
            self.input_width,
            self.input_height,
            imageops::FilterType::Triangle,
        );
        let mut input =
            Array4::<f32>::zeros((1, 1, self.input_height as usize, self.input_width as usize));
        for (x, y, pixel) in resized.enumerate_pixels() {
            input[[0, 0, y as usize, x as usize]] = pixel[0] as f32 / 255.0;
        }

        let outputs = self
            .session
            .run(ort::inputs![input].map_err(inference_error)?)
            .map_err(inference_error)?;
        let raw: Vec<f32> = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(inference_error)?
            .iter()
            .copied()
            .collect();

        let candidates: Vec<Rect> = raw
            .chunks_exact(5)
            .filter(|row| row[4] >= self.score_threshold)
            .filter_map(|row| {
                let x1 = (row[0].clamp(0.0, 1.0) * width as f32).round() as i32;
                let y1 = (row[1].clamp(0.0, 1.0) * height as f32).round() as i32;
                let x2 = (row[2].clamp(0.0, 1.0) * width as f32).round() as i32;
                let y2 = (row[3].clamp(0.0, 1.0) * height as f32).round() as i32;
                let (w, h) = ((x2 - x1).max(0) as u32, (y2 - y1).max(0) as u32);
                (w >= params.min_size && h >= params.min_size).then(|| Rect::new(x1, y1, w, h))
            })
            .collect();

        debug!("Detector produced {} raw candidates", candidates.len());
        Ok(group_rectangles(&candidates, params.min_neighbors, params.group_eps))
    }
}
