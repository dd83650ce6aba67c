//! Per-region readings and per-frame detection results

use camera_capture::frame::VideoFrame;
use serde::{Deserialize, Serialize};

use crate::detector::Rect;

/// Result of classifying one region
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum RegionOutcome {
    /// Probability above the decision threshold ("Yawn" / "Open")
    Positive(f32),
    /// Probability at or below the decision threshold ("No Yawn" / "Closed")
    Negative(f32),
    /// Crop, resize or classification failed; the region is unknown
    Failed,
}

impl RegionOutcome {
    pub fn from_probability(probability: f32, threshold: f32) -> Self {
        if probability > threshold {
            RegionOutcome::Positive(probability)
        } else {
            RegionOutcome::Negative(probability)
        }
    }

    pub fn probability(&self) -> Option<f32> {
        match self {
            RegionOutcome::Positive(p) | RegionOutcome::Negative(p) => Some(*p),
            RegionOutcome::Failed => None,
        }
    }
}

/// One filtered eye inside a face
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EyeReading {
    /// Eye box in frame coordinates
    pub rect: Rect,
    pub outcome: RegionOutcome,
}

impl EyeReading {
    pub fn is_closed(&self) -> bool {
        matches!(self.outcome, RegionOutcome::Negative(_))
    }

    pub fn label(&self) -> &'static str {
        match self.outcome {
            RegionOutcome::Positive(_) => "Open",
            RegionOutcome::Negative(_) => "Closed",
            RegionOutcome::Failed => "EyeErr",
        }
    }

    /// Confidence in the reading that matters for drowsiness: the open
    /// probability for open eyes, the closed probability for closed ones
    pub fn confidence(&self) -> Option<f32> {
        match self.outcome {
            RegionOutcome::Positive(p) => Some(p),
            RegionOutcome::Negative(p) => Some(1.0 - p),
            RegionOutcome::Failed => None,
        }
    }
}

/// Eye search result for one face
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum EyeSearch {
    /// Eye detector ran; holds the filtered candidates (possibly none)
    Found(Vec<EyeReading>),
    /// Eye detector itself failed on this face
    Failed,
}

/// Everything read from one detected face
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FaceReading {
    /// Face box in frame coordinates
    pub rect: Rect,
    pub yawn: RegionOutcome,
    pub eyes: EyeSearch,
}

impl FaceReading {
    pub fn is_yawning(&self) -> bool {
        matches!(self.yawn, RegionOutcome::Positive(_))
    }

    pub fn yawn_label(&self) -> &'static str {
        match self.yawn {
            RegionOutcome::Positive(_) => "Yawn",
            RegionOutcome::Negative(_) => "No Yawn",
            RegionOutcome::Failed => "YawnErr",
        }
    }

    /// No filtered eye survived, which is read as "eyes shut"
    pub fn eyes_missing(&self) -> bool {
        matches!(&self.eyes, EyeSearch::Found(eyes) if eyes.is_empty())
    }

    pub fn eye_readings(&self) -> &[EyeReading] {
        match &self.eyes {
            EyeSearch::Found(eyes) => eyes.as_slice(),
            EyeSearch::Failed => &[],
        }
    }

    /// Raw per-face drowsiness signal
    pub fn is_drowsy(&self) -> bool {
        self.is_yawning() || self.eyes_missing() || self.eye_readings().iter().any(EyeReading::is_closed)
    }

    /// Readings this face contributes to the frame confidence
    pub fn confidences(&self) -> impl Iterator<Item = f32> + '_ {
        self.yawn
            .probability()
            .into_iter()
            .chain(self.eye_readings().iter().filter_map(EyeReading::confidence))
    }
}

/// Detection output for one frame before hysteresis
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct FrameEvaluation {
    /// Some model was unavailable; nothing was detected
    pub degraded: bool,
    pub faces: Vec<FaceReading>,
    /// Number of regions that failed to process
    pub region_errors: usize,
}

impl FrameEvaluation {
    pub fn degraded() -> Self {
        Self {
            degraded: true,
            ..Default::default()
        }
    }

    /// True when any face signalled drowsiness this frame
    pub fn drowsy_signal(&self) -> bool {
        !self.degraded && self.faces.iter().any(FaceReading::is_drowsy)
    }

    /// Mean of all recorded region confidences, 0.0 when there are none
    pub fn confidence(&self) -> f32 {
        let (sum, count) = self
            .faces
            .iter()
            .flat_map(FaceReading::confidences)
            .fold((0.0f32, 0usize), |(sum, count), c| (sum + c, count + 1));
        if count == 0 {
            0.0
        } else {
            sum / count as f32
        }
    }
}

/// Annotated frame plus the drowsiness decision
#[derive(Debug, Clone)]
pub struct DetectionResult {
    pub annotated_frame: VideoFrame,
    /// Debounced alert for live sessions; the raw per-frame signal for
    /// single-shot analysis
    pub is_drowsy_now: bool,
    /// Raw per-frame signal before hysteresis
    pub drowsy_signal: bool,
    pub confidence: f32,
}
