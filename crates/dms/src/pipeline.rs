//! Per-frame detection pipeline

use std::sync::Arc;

use camera_capture::frame::VideoFrame;
use image::{imageops, GrayImage};
use tracing::{debug, warn};

use crate::analysis::{DetectionResult, EyeReading, EyeSearch, FaceReading, FrameEvaluation, RegionOutcome};
use crate::annotate::Annotator;
use crate::config::DmsConfig;
use crate::detector::{filter_eye_candidates, Patch, PatchClassifier, Rect};
use crate::models::{DetectionModels, ReadyModels};
use crate::DmsError;

/// Stateless detection over single frames. Shared by every session; the
/// hysteresis state lives in [`crate::FrameProcessor`].
pub struct DetectionPipeline {
    models: Arc<DetectionModels>,
    config: DmsConfig,
    annotator: Annotator,
}

impl DetectionPipeline {
    pub fn new(models: Arc<DetectionModels>, config: DmsConfig, annotator: Annotator) -> Self {
        if !models.is_ready() {
            warn!("Detection pipeline created in degraded mode");
        }
        Self {
            models,
            config,
            annotator,
        }
    }

    /// Build the pipeline from configuration, loading models and font
    pub fn from_config(config: DmsConfig) -> Self {
        let models = Arc::new(DetectionModels::load(&config));
        let annotator = Annotator::from_font_path(config.font_path.as_deref());
        Self::new(models, config, annotator)
    }

    pub fn config(&self) -> &DmsConfig {
        &self.config
    }

    pub fn models(&self) -> &DetectionModels {
        &self.models
    }

    pub fn annotator(&self) -> &Annotator {
        &self.annotator
    }

    /// Detect faces and read yawn and eye state for each of them.
    ///
    /// Only a malformed frame is an error. Region failures are recorded in
    /// the evaluation and never abort the frame.
    pub fn evaluate(&self, frame: &VideoFrame) -> Result<FrameEvaluation, DmsError> {
        if !frame.is_well_formed() {
            return Err(DmsError::InvalidFrame(format!(
                "{} bytes for {}x{}",
                frame.data.len(),
                frame.width,
                frame.height
            )));
        }
        let gray = frame
            .to_grayscale()
            .ok_or_else(|| DmsError::InvalidFrame("grayscale conversion failed".into()))?;

        let Some(models) = self.models.ready() else {
            return Ok(FrameEvaluation::degraded());
        };

        let mut evaluation = FrameEvaluation::default();
        let faces = match models.face_detector.detect(&gray, &self.config.face_detect) {
            Ok(faces) => faces,
            Err(e) => {
                warn!("Face detection failed on frame {}: {}", frame.sequence, e);
                evaluation.region_errors += 1;
                Vec::new()
            }
        };

        for face in faces {
            let Some(face) = face.clip(frame.width, frame.height) else {
                debug!("Dropping face outside the frame");
                continue;
            };
            let reading = self.read_face(frame, &gray, &face, &models, &mut evaluation.region_errors);
            evaluation.faces.push(reading);
        }

        if evaluation.region_errors > 0 {
            metrics::counter!("dms_region_errors_total").increment(evaluation.region_errors as u64);
        }
        Ok(evaluation)
    }

    fn read_face(
        &self,
        frame: &VideoFrame,
        gray: &GrayImage,
        face: &Rect,
        models: &ReadyModels<'_>,
        region_errors: &mut usize,
    ) -> FaceReading {
        let yawn = self.classify_region(frame, face, models.yawn_classifier, region_errors);

        let face_gray =
            imageops::crop_imm(gray, face.x as u32, face.y as u32, face.width, face.height).to_image();
        let eyes = match models.eye_detector.detect(&face_gray, &self.config.eye_detect) {
            Ok(candidates) => {
                let filtered = filter_eye_candidates(face.height, &candidates, &self.config.eye_filter);
                debug!(
                    "Face {:?}: {} eye candidates, {} after filtering",
                    face,
                    candidates.len(),
                    filtered.len()
                );
                EyeSearch::Found(
                    filtered
                        .into_iter()
                        .map(|eye| {
                            let rect = eye.offset(face.x, face.y);
                            EyeReading {
                                rect,
                                outcome: self.classify_region(frame, &rect, models.eye_classifier, region_errors),
                            }
                        })
                        .collect(),
                )
            }
            Err(e) => {
                debug!("Eye detection failed for face {:?}: {}", face, e);
                *region_errors += 1;
                EyeSearch::Failed
            }
        };

        FaceReading {
            rect: *face,
            yawn,
            eyes,
        }
    }

    fn classify_region(
        &self,
        frame: &VideoFrame,
        region: &Rect,
        classifier: &dyn PatchClassifier,
        region_errors: &mut usize,
    ) -> RegionOutcome {
        let probability = Patch::extract(frame, region, self.config.patch_size)
            .and_then(|patch| classifier.classify(&patch))
            .and_then(|p| {
                if (0.0..=1.0).contains(&p) {
                    Ok(p)
                } else {
                    Err(DmsError::Inference(format!("probability {} outside [0, 1]", p)))
                }
            });

        match probability {
            Ok(p) => RegionOutcome::from_probability(p, self.config.decision_threshold),
            Err(e) => {
                debug!("Region {:?} failed: {}", region, e);
                *region_errors += 1;
                RegionOutcome::Failed
            }
        }
    }

    /// One-shot analysis without hysteresis. `is_drowsy_now` carries the raw
    /// per-frame signal, not a debounced alert.
    pub fn analyze_single(&self, frame: &VideoFrame) -> Result<DetectionResult, DmsError> {
        let evaluation = self.evaluate(frame)?;
        let drowsy = evaluation.drowsy_signal();
        Ok(DetectionResult {
            annotated_frame: self.annotator.render(frame, &evaluation, drowsy),
            is_drowsy_now: drowsy,
            drowsy_signal: drowsy,
            confidence: evaluation.confidence(),
        })
    }
}
