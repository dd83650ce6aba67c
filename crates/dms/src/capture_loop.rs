//! Background capture loop driving a [`FrameProcessor`]

use std::sync::Arc;
use std::time::Duration;

use camera_capture::source::FrameSource;
use tracing::{info, warn};

use crate::processor::FrameProcessor;
use crate::state::{AlertStatus, SharedDetectionState};

/// Why the loop returned
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopExit {
    /// Running flag was cleared
    Stopped,
    /// Source produced no more frames
    Exhausted,
}

pub struct CaptureLoop {
    processor: FrameProcessor,
    state: Arc<SharedDetectionState>,
    interval: Duration,
}

impl CaptureLoop {
    pub fn new(processor: FrameProcessor, state: Arc<SharedDetectionState>, interval: Duration) -> Self {
        Self {
            processor,
            state,
            interval,
        }
    }

    /// Pull, process and publish frames until stopped or the source runs dry.
    /// Blocks the calling thread.
    pub fn run(mut self, mut source: Box<dyn FrameSource>) -> LoopExit {
        info!("Capture loop started");
        let mut alerting = false;
        let mut processed = 0u64;

        let exit = loop {
            if !self.state.is_running() {
                break LoopExit::Stopped;
            }
            let Some(frame) = source.read_frame() else {
                break LoopExit::Exhausted;
            };

            match self.processor.process_frame(&frame) {
                Ok(result) => {
                    processed += 1;
                    metrics::counter!("dms_frames_processed_total").increment(1);
                    metrics::gauge!("dms_confidence").set(result.confidence as f64);
                    if result.is_drowsy_now && !alerting {
                        warn!("Drowsiness alert raised at frame {}", frame.sequence);
                        metrics::counter!("dms_drowsy_alerts_total").increment(1);
                    }
                    alerting = result.is_drowsy_now;

                    self.state.publish(
                        result.annotated_frame,
                        AlertStatus::from_drowsy(result.is_drowsy_now),
                        result.confidence,
                    );
                }
                Err(e) => warn!("Skipping frame {}: {}", frame.sequence, e),
            }

            if !self.interval.is_zero() {
                std::thread::sleep(self.interval);
            }
        };

        self.state.finish();
        info!("Capture loop exited ({:?}) after {} frames", exit, processed);
        exit
    }
}
