//! Start/stop control of the live detection session

use std::sync::{mpsc, Arc, Mutex, PoisonError};
use std::thread::JoinHandle;
use std::time::Duration;

use camera_capture::codec::{decode_image, encode_jpeg};
use camera_capture::source::SourceOpener;
use tokio::sync::watch;
use tracing::{error, info, warn};

use crate::capture_loop::CaptureLoop;
use crate::pipeline::DetectionPipeline;
use crate::processor::FrameProcessor;
use crate::state::{AlertStatus, DetectionSnapshot, SharedDetectionState, StatusSnapshot};
use crate::DmsError;

/// Outcome of a start request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartOutcome {
    Started,
    AlreadyRunning,
}

/// Single-shot analysis of an uploaded image
#[derive(Debug, Clone)]
pub struct UploadAnalysis {
    pub annotated_jpeg: Vec<u8>,
    pub is_drowsy: bool,
    pub confidence: f32,
    pub status: AlertStatus,
}

/// Owns at most one capture loop at a time and the state it publishes.
/// Blocking methods (`start`, `preview_jpeg`, `analyze_upload`) should be
/// called off the async runtime.
pub struct DetectionService {
    pipeline: Arc<DetectionPipeline>,
    opener: Arc<dyn SourceOpener>,
    state: Arc<SharedDetectionState>,
    worker: Mutex<Option<JoinHandle<()>>>,
    frame_interval: Duration,
}

impl DetectionService {
    pub fn new(pipeline: Arc<DetectionPipeline>, opener: Arc<dyn SourceOpener>) -> Self {
        let frame_interval = pipeline.config().frame_interval();
        Self {
            pipeline,
            opener,
            state: Arc::new(SharedDetectionState::new()),
            worker: Mutex::new(None),
            frame_interval,
        }
    }

    pub fn pipeline(&self) -> &DetectionPipeline {
        &self.pipeline
    }

    /// Open camera `camera_index` and start the capture loop.
    ///
    /// The source is opened on the loop thread; this call waits for the
    /// open to succeed or fail before returning.
    pub fn start(&self, camera_index: u32) -> Result<StartOutcome, DmsError> {
        let mut worker = self.worker.lock().unwrap_or_else(PoisonError::into_inner);
        if self.state.is_running() {
            return Ok(StartOutcome::AlreadyRunning);
        }
        if let Some(previous) = worker.take() {
            if previous.join().is_err() {
                error!("Previous capture loop panicked");
            }
        }

        self.state.begin();
        let (opened_tx, opened_rx) = mpsc::sync_channel(1);
        let opener = self.opener.clone();
        let capture_loop = CaptureLoop::new(
            FrameProcessor::new(self.pipeline.clone()),
            self.state.clone(),
            self.frame_interval,
        );
        let state = self.state.clone();

        let spawned = std::thread::Builder::new()
            .name("capture-loop".into())
            .spawn(move || match opener.open(camera_index) {
                Ok(source) => {
                    let _ = opened_tx.send(Ok(()));
                    capture_loop.run(source);
                }
                Err(e) => {
                    state.finish();
                    let _ = opened_tx.send(Err(e));
                }
            });
        let handle = match spawned {
            Ok(handle) => handle,
            Err(e) => {
                self.state.finish();
                return Err(DmsError::Capture(format!("failed to spawn capture thread: {}", e)));
            }
        };

        match opened_rx.recv() {
            Ok(Ok(())) => {
                info!("Detection started on camera {}", camera_index);
                *worker = Some(handle);
                Ok(StartOutcome::Started)
            }
            Ok(Err(e)) => {
                let _ = handle.join();
                warn!("Cannot open camera {}: {}", camera_index, e);
                Err(DmsError::CaptureUnavailable(format!("camera {}: {}", camera_index, e)))
            }
            Err(_) => {
                self.state.finish();
                let _ = handle.join();
                Err(DmsError::Capture("capture thread exited before opening the source".into()))
            }
        }
    }

    /// Ask the loop to stop after its current frame. Returns whether a
    /// session was running. Does not wait for the loop to exit.
    pub fn stop(&self) -> bool {
        let was_running = self.state.request_stop();
        if was_running {
            info!("Detection stop requested");
        }
        was_running
    }

    /// Wait for the capture thread, if any, to exit
    pub fn join_worker(&self) {
        let handle = self
            .worker
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = handle {
            if handle.join().is_err() {
                error!("Capture loop panicked");
            }
        }
    }

    pub fn is_running(&self) -> bool {
        self.state.is_running()
    }

    pub fn status(&self) -> StatusSnapshot {
        self.state.status()
    }

    pub fn snapshot(&self) -> Arc<DetectionSnapshot> {
        self.state.snapshot()
    }

    pub fn subscribe(&self) -> watch::Receiver<Arc<DetectionSnapshot>> {
        self.state.subscribe()
    }

    /// Grab one frame from camera `camera_index` as JPEG. The camera is
    /// released before returning.
    pub fn preview_jpeg(&self, camera_index: u32) -> Result<Vec<u8>, DmsError> {
        let mut source = self
            .opener
            .open(camera_index)
            .map_err(|e| DmsError::CaptureUnavailable(format!("camera {}: {}", camera_index, e)))?;
        let frame = source
            .read_frame()
            .ok_or_else(|| DmsError::Capture(format!("camera {} produced no frame", camera_index)))?;
        Ok(encode_jpeg(&frame, self.pipeline.config().jpeg_quality)?)
    }

    /// Analyze an uploaded image without touching the live session
    pub fn analyze_upload(&self, bytes: &[u8]) -> Result<UploadAnalysis, DmsError> {
        let frame = decode_image(bytes)?;
        let result = self.pipeline.analyze_single(&frame)?;
        let annotated_jpeg = encode_jpeg(&result.annotated_frame, self.pipeline.config().jpeg_quality)?;
        Ok(UploadAnalysis {
            annotated_jpeg,
            is_drowsy: result.is_drowsy_now,
            confidence: result.confidence,
            status: AlertStatus::from_drowsy(result.is_drowsy_now),
        })
    }
}

impl Drop for DetectionService {
    fn drop(&mut self) {
        self.stop();
        self.join_worker();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detector::Rect;
    use crate::pipeline::tests::models;
    use camera_capture::frame::VideoFrame;
    use camera_capture::source::FrameSource;
    use camera_capture::CameraError;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Barrier;
    use std::time::Instant;

    struct Endless;

    impl FrameSource for Endless {
        fn read_frame(&mut self) -> Option<VideoFrame> {
            Some(VideoFrame::filled(320, 240, [60, 60, 60]))
        }
    }

    struct Finite(usize);

    impl FrameSource for Finite {
        fn read_frame(&mut self) -> Option<VideoFrame> {
            self.0 = self.0.checked_sub(1)?;
            Some(VideoFrame::filled(320, 240, [60, 60, 60]))
        }
    }

    /// Camera 0 streams forever, camera 1 yields three frames, camera 2
    /// is camera 1 behind two `gate` rendezvous, anything else fails to open
    struct TestOpener {
        opens: AtomicUsize,
        gate: Barrier,
    }

    impl SourceOpener for TestOpener {
        fn open(&self, camera_index: u32) -> Result<Box<dyn FrameSource>, CameraError> {
            self.opens.fetch_add(1, Ordering::SeqCst);
            match camera_index {
                0 => Ok(Box::new(Endless)),
                1 => Ok(Box::new(Finite(3))),
                2 => {
                    self.gate.wait();
                    self.gate.wait();
                    Ok(Box::new(Finite(3)))
                }
                n => Err(CameraError::Open(format!("no device {}", n))),
            }
        }
    }

    fn service() -> (DetectionService, Arc<TestOpener>) {
        let opener = Arc::new(TestOpener {
            opens: AtomicUsize::new(0),
            gate: Barrier::new(2),
        });
        let mut config = crate::DmsConfig::default();
        config.frame_interval_ms = 1;
        let pipeline = DetectionPipeline::new(
            Arc::new(models(vec![Rect::new(100, 50, 100, 100)], vec![], 0.1, 0.9)),
            config,
            crate::annotate::Annotator::default(),
        );
        (DetectionService::new(Arc::new(pipeline), opener.clone()), opener)
    }

    fn wait_for(mut condition: impl FnMut() -> bool) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while !condition() {
            assert!(Instant::now() < deadline, "condition not reached in time");
            std::thread::sleep(Duration::from_millis(5));
        }
    }

    #[test]
    fn test_start_stop_cycle() {
        let (service, opener) = service();
        assert_eq!(service.start(0).unwrap(), StartOutcome::Started);
        assert_eq!(service.start(0).unwrap(), StartOutcome::AlreadyRunning);
        assert_eq!(opener.opens.load(Ordering::SeqCst), 1);

        wait_for(|| service.snapshot().sequence > 0);
        assert!(service.status().is_running);
        assert_ne!(service.status().alert_status, AlertStatus::Stopped);

        assert!(service.stop());
        assert!(!service.stop());
        assert_eq!(service.status().alert_status, AlertStatus::Stopped);
        service.join_worker();

        let settled = service.snapshot().sequence;
        std::thread::sleep(Duration::from_millis(20));
        assert_eq!(service.snapshot().sequence, settled);
    }

    #[test]
    fn test_restart_uses_fresh_counter() {
        let (service, _) = service();
        service.start(0).unwrap();
        wait_for(|| service.status().alert_status == AlertStatus::Drowsy);
        service.stop();
        service.join_worker();
        let previous_end = service.snapshot().sequence;

        service.start(0).unwrap();
        wait_for(|| service.snapshot().sequence > previous_end);
        // the new session needs another 21 drowsy frames before alerting
        let snapshot = service.snapshot();
        if snapshot.sequence <= previous_end + 20 {
            assert_eq!(snapshot.alert_status, AlertStatus::Alert);
        }
        service.stop();
    }

    #[test]
    fn test_open_failure_leaves_service_stopped() {
        let (service, _) = service();
        assert!(matches!(service.start(7), Err(DmsError::CaptureUnavailable(_))));
        assert!(!service.is_running());
        assert_eq!(service.status().alert_status, AlertStatus::Stopped);
        // a later start still works
        assert_eq!(service.start(0).unwrap(), StartOutcome::Started);
        service.stop();
    }

    #[test]
    fn test_status_while_opening_is_fresh() {
        let (service, opener) = service();
        service.start(1).unwrap();
        wait_for(|| !service.is_running());
        service.join_worker();
        assert!(service.status().confidence > 0.0);

        std::thread::scope(|scope| {
            let starting = scope.spawn(|| service.start(2));
            opener.gate.wait();
            let status = service.status();
            assert!(status.is_running);
            assert_eq!(status.alert_status, AlertStatus::Alert);
            assert_eq!(status.confidence, 0.0);
            assert!(service.snapshot().frame.is_none());
            opener.gate.wait();
            assert_eq!(starting.join().unwrap().unwrap(), StartOutcome::Started);
        });
        service.stop();
    }

    #[test]
    fn test_exhausted_source_stops_session() {
        let (service, _) = service();
        service.start(1).unwrap();
        wait_for(|| !service.is_running());
        service.join_worker();
        assert_eq!(service.snapshot().sequence, 3);
        assert_eq!(service.status().alert_status, AlertStatus::Stopped);
        assert_eq!(service.start(1).unwrap(), StartOutcome::Started);
    }

    #[test]
    fn test_preview_and_upload_do_not_disturb_session() {
        let (service, _) = service();
        let jpeg = service.preview_jpeg(0).unwrap();
        assert_eq!(&jpeg[..2], &[0xFF, 0xD8]);
        assert!(service.preview_jpeg(9).is_err());

        let analysis = service.analyze_upload(&jpeg).unwrap();
        assert!(analysis.is_drowsy);
        assert_eq!(analysis.status, AlertStatus::Drowsy);
        assert_eq!(&analysis.annotated_jpeg[..2], &[0xFF, 0xD8]);
        assert!(!service.is_running());
        assert!(service.snapshot().frame.is_none());
    }

    #[test]
    fn test_upload_rejects_garbage() {
        let (service, _) = service();
        assert!(matches!(
            service.analyze_upload(b"definitely not an image"),
            Err(DmsError::Camera(CameraError::Decode(_)))
        ));
    }
}
