//! Model handles owned by the detection pipeline

use std::sync::Arc;

use tracing::{info, warn};

use crate::config::DmsConfig;
use crate::detector::{ObjectDetector, PatchClassifier};
#[cfg(not(feature = "backend-ort"))]
use crate::DmsError;

/// The four predictors the pipeline needs. Any slot may be empty, in which
/// case the pipeline runs degraded.
#[derive(Clone, Default)]
pub struct DetectionModels {
    face_detector: Option<Arc<dyn ObjectDetector>>,
    eye_detector: Option<Arc<dyn ObjectDetector>>,
    yawn_classifier: Option<Arc<dyn PatchClassifier>>,
    eye_classifier: Option<Arc<dyn PatchClassifier>>,
}

/// Borrowed view of a fully loaded model set
pub(crate) struct ReadyModels<'a> {
    pub face_detector: &'a dyn ObjectDetector,
    pub eye_detector: &'a dyn ObjectDetector,
    pub yawn_classifier: &'a dyn PatchClassifier,
    pub eye_classifier: &'a dyn PatchClassifier,
}

impl DetectionModels {
    /// No models loaded
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn with_face_detector(mut self, detector: Arc<dyn ObjectDetector>) -> Self {
        self.face_detector = Some(detector);
        self
    }

    pub fn with_eye_detector(mut self, detector: Arc<dyn ObjectDetector>) -> Self {
        self.eye_detector = Some(detector);
        self
    }

    pub fn with_yawn_classifier(mut self, classifier: Arc<dyn PatchClassifier>) -> Self {
        self.yawn_classifier = Some(classifier);
        self
    }

    pub fn with_eye_classifier(mut self, classifier: Arc<dyn PatchClassifier>) -> Self {
        self.eye_classifier = Some(classifier);
        self
    }

    /// Load every configured model. Each slot loads independently; a
    /// missing path or failed load leaves the slot empty.
    pub fn load(config: &DmsConfig) -> Self {
        let models = Self {
            face_detector: load_slot("face detector", config.face_model_path.as_deref(), |path| {
                backend::detector(path, config)
            }),
            eye_detector: load_slot("eye detector", config.eye_model_path.as_deref(), |path| {
                backend::detector(path, config)
            }),
            yawn_classifier: load_slot("yawn classifier", config.yawn_model_path.as_deref(), |path| {
                backend::classifier(path, config)
            }),
            eye_classifier: load_slot(
                "eye-state classifier",
                config.eye_state_model_path.as_deref(),
                |path| backend::classifier(path, config),
            ),
        };

        let missing = models.missing();
        if missing.is_empty() {
            info!("All detection models loaded");
        } else {
            warn!("Running in degraded mode, unavailable: {}", missing.join(", "));
        }
        models
    }

    /// Names of the empty slots
    pub fn missing(&self) -> Vec<&'static str> {
        let mut missing = Vec::new();
        if self.face_detector.is_none() {
            missing.push("face detector");
        }
        if self.eye_detector.is_none() {
            missing.push("eye detector");
        }
        if self.yawn_classifier.is_none() {
            missing.push("yawn classifier");
        }
        if self.eye_classifier.is_none() {
            missing.push("eye-state classifier");
        }
        missing
    }

    pub fn is_ready(&self) -> bool {
        self.ready().is_some()
    }

    pub(crate) fn ready(&self) -> Option<ReadyModels<'_>> {
        Some(ReadyModels {
            face_detector: self.face_detector.as_deref()?,
            eye_detector: self.eye_detector.as_deref()?,
            yawn_classifier: self.yawn_classifier.as_deref()?,
            eye_classifier: self.eye_classifier.as_deref()?,
        })
    }
}

impl std::fmt::Debug for DetectionModels {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DetectionModels")
            .field("missing", &self.missing())
            .finish()
    }
}

fn load_slot<T: ?Sized, E: std::fmt::Display>(
    name: &str,
    path: Option<&str>,
    loader: impl FnOnce(&str) -> Result<Arc<T>, E>,
) -> Option<Arc<T>> {
    let Some(path) = path else {
        warn!("No {} model path configured", name);
        return None;
    };
    match loader(path) {
        Ok(model) => {
            info!("Loaded {} from {}", name, path);
            Some(model)
        }
        Err(e) => {
            warn!("Failed to load {} from {}: {}", name, path, e);
            None
        }
    }
}

#[cfg(feature = "backend-ort")]
mod backend {
    use std::sync::Arc;

    use crate::backends::onnx::{OnnxBoxDetector, OnnxPatchClassifier};
    use crate::config::DmsConfig;
    use crate::detector::{ObjectDetector, PatchClassifier};
    use crate::DmsError;

    pub fn detector(path: &str, config: &DmsConfig) -> Result<Arc<dyn ObjectDetector>, DmsError> {
        Ok(Arc::new(OnnxBoxDetector::load(
            path,
            config.detector_input_width,
            config.detector_input_height,
            config.detector_score_threshold,
        )?))
    }

    pub fn classifier(path: &str, config: &DmsConfig) -> Result<Arc<dyn PatchClassifier>, DmsError> {
        Ok(Arc::new(OnnxPatchClassifier::load(path, config.patch_size)?))
    }
}

#[cfg(not(feature = "backend-ort"))]
mod backend {
    use super::*;

    pub fn detector(_path: &str, _config: &DmsConfig) -> Result<Arc<dyn ObjectDetector>, DmsError> {
        Err(DmsError::ModelLoad(
            "built without an inference backend (enable `backend-ort`)".into(),
        ))
    }

    pub fn classifier(_path: &str, _config: &DmsConfig) -> Result<Arc<dyn PatchClassifier>, DmsError> {
        Err(DmsError::ModelLoad(
            "built without an inference backend (enable `backend-ort`)".into(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DetectParams;
    use crate::detector::{Patch, Rect};
    use image::GrayImage;

    struct Nothing;

    impl ObjectDetector for Nothing {
        fn detect(&self, _: &GrayImage, _: &DetectParams) -> Result<Vec<Rect>, crate::DmsError> {
            Ok(vec![])
        }
    }

    impl PatchClassifier for Nothing {
        fn classify(&self, _: &Patch) -> Result<f32, crate::DmsError> {
            Ok(0.0)
        }
    }

    #[test]
    fn test_missing_slots() {
        let models = DetectionModels::empty()
            .with_face_detector(Arc::new(Nothing))
            .with_yawn_classifier(Arc::new(Nothing));
        assert!(!models.is_ready());
        assert_eq!(models.missing(), vec!["eye detector", "eye-state classifier"]);

        let models = models
            .with_eye_detector(Arc::new(Nothing))
            .with_eye_classifier(Arc::new(Nothing));
        assert!(models.is_ready());
        assert!(models.missing().is_empty());
    }

    #[test]
    fn test_load_without_paths_is_degraded() {
        let models = DetectionModels::load(&DmsConfig::default());
        assert_eq!(models.missing().len(), 4);
    }

    #[cfg(not(feature = "backend-ort"))]
    #[test]
    fn test_load_without_backend_is_degraded() {
        let config = DmsConfig {
            face_model_path: Some("face.onnx".into()),
            ..Default::default()
        };
        assert!(!DetectionModels::load(&config).is_ready());
    }
}
