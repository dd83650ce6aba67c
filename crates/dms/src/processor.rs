//! Stateful frame processing for one live session

use std::sync::Arc;

use camera_capture::frame::VideoFrame;
use tracing::debug;

use crate::analysis::DetectionResult;
use crate::hysteresis::HysteresisCounter;
use crate::pipeline::DetectionPipeline;
use crate::DmsError;

/// Runs the pipeline and debounces its signal. One processor per session;
/// a new session starts with a fresh counter.
pub struct FrameProcessor {
    pipeline: Arc<DetectionPipeline>,
    counter: HysteresisCounter,
}

impl FrameProcessor {
    pub fn new(pipeline: Arc<DetectionPipeline>) -> Self {
        let counter = HysteresisCounter::new(pipeline.config().hysteresis_threshold);
        Self { pipeline, counter }
    }

    /// Analyze one frame and update the consecutive-drowsy count.
    ///
    /// In degraded mode the frame is marked and passed through; the counter
    /// is left untouched and no alert is raised.
    pub fn process_frame(&mut self, frame: &VideoFrame) -> Result<DetectionResult, DmsError> {
        let evaluation = self.pipeline.evaluate(frame)?;
        let annotator = self.pipeline.annotator();

        if evaluation.degraded {
            return Ok(DetectionResult {
                annotated_frame: annotator.render(frame, &evaluation, false),
                is_drowsy_now: false,
                drowsy_signal: false,
                confidence: 0.0,
            });
        }

        let signal = evaluation.drowsy_signal();
        let alert = self.counter.update(signal);
        debug!(
            "Frame {}: {} faces, signal={}, count={}, alert={}",
            frame.sequence,
            evaluation.faces.len(),
            signal,
            self.counter.count(),
            alert
        );

        Ok(DetectionResult {
            annotated_frame: annotator.render(frame, &evaluation, alert),
            is_drowsy_now: alert,
            drowsy_signal: signal,
            confidence: evaluation.confidence(),
        })
    }

    pub fn counter(&self) -> &HysteresisCounter {
        &self.counter
    }

    /// Forget accumulated drowsy frames
    pub fn reset(&mut self) {
        self.counter.reset();
    }
}
