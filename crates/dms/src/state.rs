//! Detection state shared between the capture loop and its readers

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use camera_capture::frame::VideoFrame;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;

/// Status reported to clients
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum AlertStatus {
    /// Detection is running and the driver looks awake
    Alert,
    /// Drowsiness has persisted past the hysteresis threshold
    Drowsy,
    #[default]
    Stopped,
}

impl AlertStatus {
    /// Status for a running session given the drowsiness decision
    pub fn from_drowsy(drowsy: bool) -> Self {
        if drowsy {
            AlertStatus::Drowsy
        } else {
            AlertStatus::Alert
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            AlertStatus::Alert => "Alert",
            AlertStatus::Drowsy => "Drowsy",
            AlertStatus::Stopped => "Stopped",
        }
    }
}

impl std::fmt::Display for AlertStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Latest annotated frame and the status computed from it. Published as a
/// unit so readers never see a frame paired with another frame's status.
#[derive(Debug, Clone, Default)]
pub struct DetectionSnapshot {
    pub frame: Option<Arc<VideoFrame>>,
    pub alert_status: AlertStatus,
    pub confidence: f32,
    /// Number of frames published since the service was created
    pub sequence: u64,
}

/// Answer to a status query
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct StatusSnapshot {
    pub is_running: bool,
    pub alert_status: AlertStatus,
    pub confidence: f32,
}

/// Running flag plus the most recent snapshot. The capture loop is the
/// only writer; any number of readers may poll or subscribe.
#[derive(Debug)]
pub struct SharedDetectionState {
    running: AtomicBool,
    latest: watch::Sender<Arc<DetectionSnapshot>>,
}

impl Default for SharedDetectionState {
    fn default() -> Self {
        Self::new()
    }
}

impl SharedDetectionState {
    pub fn new() -> Self {
        let (latest, _) = watch::channel(Arc::new(DetectionSnapshot::default()));
        Self {
            running: AtomicBool::new(false),
            latest,
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    pub fn set_running(&self, running: bool) {
        self.running.store(running, Ordering::Release);
    }

    /// Clear the running flag; returns whether it was set
    pub fn request_stop(&self) -> bool {
        self.running.swap(false, Ordering::AcqRel)
    }

    /// Start a session: set the running flag and publish an `Alert`
    /// snapshot with no frame and zero confidence, so nothing from an
    /// earlier session is reported while the source opens
    pub fn begin(&self) {
        let sequence = self.latest.borrow().sequence;
        self.latest.send_replace(Arc::new(DetectionSnapshot {
            frame: None,
            alert_status: AlertStatus::Alert,
            confidence: 0.0,
            sequence,
        }));
        self.set_running(true);
    }

    /// Replace the latest snapshot with one built from `frame`
    pub fn publish(&self, frame: VideoFrame, alert_status: AlertStatus, confidence: f32) {
        let sequence = self.latest.borrow().sequence + 1;
        self.latest.send_replace(Arc::new(DetectionSnapshot {
            frame: Some(Arc::new(frame)),
            alert_status,
            confidence,
            sequence,
        }));
    }

    /// Mark the session finished, keeping the last frame and confidence
    pub fn finish(&self) {
        self.set_running(false);
        let previous = self.snapshot();
        self.latest.send_replace(Arc::new(DetectionSnapshot {
            frame: previous.frame.clone(),
            alert_status: AlertStatus::Stopped,
            confidence: previous.confidence,
            sequence: previous.sequence,
        }));
    }

    pub fn snapshot(&self) -> Arc<DetectionSnapshot> {
        self.latest.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<Arc<DetectionSnapshot>> {
        self.latest.subscribe()
    }

    pub fn status(&self) -> StatusSnapshot {
        let is_running = self.is_running();
        let snapshot = self.snapshot();
        StatusSnapshot {
            is_running,
            alert_status: if is_running {
                snapshot.alert_status
            } else {
                AlertStatus::Stopped
            },
            confidence: snapshot.confidence,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_initial_state() {
        let state = SharedDetectionState::new();
        let status = state.status();
        assert!(!status.is_running);
        assert_eq!(status.alert_status, AlertStatus::Stopped);
        assert_eq!(status.confidence, 0.0);
        assert!(state.snapshot().frame.is_none());
    }

    #[test]
    fn test_publish_replaces_snapshot_atomically() {
        let state = SharedDetectionState::new();
        state.set_running(true);
        let mut rx = state.subscribe();

        state.publish(VideoFrame::filled(4, 4, [1, 1, 1]), AlertStatus::Alert, 0.4);
        state.publish(VideoFrame::filled(4, 4, [2, 2, 2]), AlertStatus::Drowsy, 0.7);

        assert!(rx.has_changed().unwrap());
        let snapshot = rx.borrow_and_update().clone();
        assert_eq!(snapshot.sequence, 2);
        assert_eq!(snapshot.alert_status, AlertStatus::Drowsy);
        assert_eq!(snapshot.frame.as_ref().unwrap().get_pixel(0, 0), Some([2, 2, 2]));
        assert_eq!(state.status().alert_status, AlertStatus::Drowsy);
    }

    #[test]
    fn test_finish_keeps_last_frame() {
        let state = SharedDetectionState::new();
        state.set_running(true);
        state.publish(VideoFrame::filled(4, 4, [3, 3, 3]), AlertStatus::Alert, 0.9);
        state.finish();

        let status = state.status();
        assert!(!status.is_running);
        assert_eq!(status.alert_status, AlertStatus::Stopped);
        assert!((status.confidence - 0.9).abs() < f32::EPSILON);
        assert!(state.snapshot().frame.is_some());
    }

    #[test]
    fn test_stopped_flag_overrides_stale_status() {
        let state = SharedDetectionState::new();
        state.set_running(true);
        state.publish(VideoFrame::filled(4, 4, [3, 3, 3]), AlertStatus::Alert, 0.9);
        assert!(state.request_stop());
        assert!(!state.request_stop());
        assert_eq!(state.status().alert_status, AlertStatus::Stopped);
    }

    #[test]
    fn test_begin_clears_previous_session() {
        let state = SharedDetectionState::new();
        state.begin();
        state.publish(VideoFrame::filled(4, 4, [3, 3, 3]), AlertStatus::Drowsy, 0.8);
        state.finish();

        state.begin();
        let status = state.status();
        assert!(status.is_running);
        assert_eq!(status.alert_status, AlertStatus::Alert);
        assert_eq!(status.confidence, 0.0);
        let snapshot = state.snapshot();
        assert!(snapshot.frame.is_none());
        assert_eq!(snapshot.sequence, 1);
    }

    #[test]
    fn test_readers_never_see_mixed_snapshots() {
        // each published frame carries its own confidence in its pixels,
        // and odd values are published as drowsy
        const WRITES: u32 = 5_000;
        let state = SharedDetectionState::new();
        state.begin();

        std::thread::scope(|scope| {
            scope.spawn(|| {
                for i in 0..WRITES {
                    let v = (i % 256) as u8;
                    state.publish(
                        VideoFrame::filled(4, 4, [v, v, v]),
                        AlertStatus::from_drowsy(v % 2 == 1),
                        v as f32 / 255.0,
                    );
                }
            });

            for _ in 0..3 {
                scope.spawn(|| {
                    let mut last_sequence = 0;
                    while last_sequence < WRITES as u64 {
                        let snapshot = state.snapshot();
                        assert!(snapshot.sequence >= last_sequence);
                        last_sequence = snapshot.sequence;
                        let Some(frame) = snapshot.frame.as_ref() else {
                            continue;
                        };
                        let [v, _, _] = frame.get_pixel(3, 3).unwrap();
                        assert_eq!(snapshot.confidence, v as f32 / 255.0);
                        assert_eq!(snapshot.alert_status, AlertStatus::from_drowsy(v % 2 == 1));
                    }
                });
            }

            scope.spawn(|| {
                for _ in 0..WRITES {
                    let status = state.status();
                    let v = (status.confidence * 255.0).round() as u8;
                    assert!(status.is_running);
                    assert_eq!(status.alert_status, AlertStatus::from_drowsy(v % 2 == 1));
                }
            });
        });

        assert_eq!(state.snapshot().sequence, WRITES as u64);
    }

    #[test]
    fn test_status_strings() {
        assert_eq!(AlertStatus::from_drowsy(true).as_str(), "Drowsy");
        assert_eq!(AlertStatus::from_drowsy(false).as_str(), "Alert");
        assert_eq!(AlertStatus::Stopped.to_string(), "Stopped");
    }
}
