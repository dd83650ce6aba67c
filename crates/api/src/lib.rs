//! Drowsiness Monitor API Server
//!
//! HTTP surface for live detection control, status polling, the annotated
//! MJPEG feed and single-image analysis.

use axum::{
    extract::{DefaultBodyLimit, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use camera_capture::source::{DirectoryOpener, SourceOpener};
use dms::{DetectionPipeline, DetectionService};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use serde::Serialize;
use std::sync::Arc;
use std::time::Instant;
use tower::ServiceBuilder;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

pub mod config;
pub mod error;
pub mod routes;

use config::{AppConfig, CaptureConfig, SourceKind};

/// Largest accepted upload body
const MAX_UPLOAD_BYTES: usize = 16 * 1024 * 1024;

/// Application state shared across handlers
pub struct AppState {
    /// Live detection controller
    pub service: Arc<DetectionService>,
    /// Version string
    pub version: String,
    /// Start time
    pub start_time: Instant,
    /// Prometheus recorder handle, when installed
    pub metrics: Option<PrometheusHandle>,
}

impl AppState {
    pub fn new(service: Arc<DetectionService>) -> Self {
        Self {
            service,
            version: env!("CARGO_PKG_VERSION").to_string(),
            start_time: Instant::now(),
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, handle: Option<PrometheusHandle>) -> Self {
        self.metrics = handle;
        self
    }
}

/// Health response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub timestamp: u64,
    pub version: String,
    pub uptime_seconds: u64,
    pub models_loaded: bool,
    pub missing_models: Vec<&'static str>,
    pub is_running: bool,
}

/// Create the application router
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/api/v1/health", get(health_handler))
        .route("/start_detection", post(routes::detection::start_detection))
        .route("/stop_detection", post(routes::detection::stop_detection))
        .route("/get_status", get(routes::detection::get_status))
        .route("/video_feed", get(routes::stream::video_feed))
        .route(
            "/upload_image",
            post(routes::upload::upload_image).layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES)),
        )
        .route("/camera_preview", get(routes::upload::camera_preview))
        .route("/metrics", get(metrics_handler))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CorsLayer::permissive()),
        )
        .with_state(state)
}

/// Health check handler
async fn health_handler(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    let timestamp = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0);
    let models = state.service.pipeline().models();

    Json(HealthResponse {
        status: if models.is_ready() { "healthy" } else { "degraded" }.to_string(),
        timestamp,
        version: state.version.clone(),
        uptime_seconds: state.start_time.elapsed().as_secs(),
        models_loaded: models.is_ready(),
        missing_models: models.missing(),
        is_running: state.service.is_running(),
    })
}

/// Prometheus scrape endpoint
async fn metrics_handler(State(state): State<Arc<AppState>>) -> Response {
    match &state.metrics {
        Some(handle) => (
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            handle.render(),
        )
            .into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

/// Initialize logging. `RUST_LOG` overrides `default_level`.
pub fn init_logging(default_level: &str, json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let builder = tracing_subscriber::fmt().with_env_filter(filter).with_target(true);

    let result = if json {
        tracing::subscriber::set_global_default(builder.json().finish())
    } else {
        tracing::subscriber::set_global_default(builder.finish())
    };
    result.expect("Failed to set tracing subscriber");
}

/// Install the Prometheus recorder. Metrics are dropped if this fails.
pub fn install_metrics() -> Option<PrometheusHandle> {
    match PrometheusBuilder::new().install_recorder() {
        Ok(handle) => Some(handle),
        Err(e) => {
            warn!("Metrics recorder not installed: {}", e);
            None
        }
    }
}

/// Capture source factory for the configured source kind
pub fn build_opener(capture: &CaptureConfig) -> anyhow::Result<Arc<dyn SourceOpener>> {
    match capture.source {
        SourceKind::Directory => {
            info!("Reading frames from {}", capture.directory);
            Ok(Arc::new(DirectoryOpener::new(&capture.directory)))
        }
        #[cfg(feature = "webcam")]
        SourceKind::Webcam => Ok(Arc::new(camera_capture::source::WebcamOpener::new(
            capture.width,
            capture.height,
            capture.fps,
        ))),
        #[cfg(not(feature = "webcam"))]
        SourceKind::Webcam => {
            anyhow::bail!("webcam capture requested but this build lacks the `webcam` feature")
        }
    }
}

/// Run the server until Ctrl-C
pub async fn run_server(config: AppConfig) -> anyhow::Result<()> {
    let pipeline = Arc::new(DetectionPipeline::from_config(config.dms.clone()));
    let service = Arc::new(DetectionService::new(pipeline, build_opener(&config.capture)?));
    let state = Arc::new(AppState::new(service.clone()).with_metrics(install_metrics()));
    let app = create_router(state);

    info!("Starting API server on {}", config.server.addr);
    let listener = tokio::net::TcpListener::bind(&config.server.addr).await?;

    let shutdown_service = service.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!("Failed to listen for shutdown signal: {}", e);
            }
            info!("Shutting down");
            // ends open video feeds so the server can drain
            shutdown_service.stop();
        })
        .await?;

    tokio::task::spawn_blocking(move || service.join_worker()).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::{to_bytes, Body, BodyDataStream};
    use axum::http::Request;
    use camera_capture::{encode_jpeg, CameraError, FrameSource, VideoFrame};
    use dms::{Annotator, DetectParams, DetectionModels, DmsConfig, DmsError, ObjectDetector, Patch, PatchClassifier, Rect};
    use image::GrayImage;
    use serde_json::Value;
    use std::time::Duration;
    use tokio_stream::StreamExt;
    use tower::ServiceExt;

    struct OneFace;

    impl ObjectDetector for OneFace {
        fn detect(&self, image: &GrayImage, _: &DetectParams) -> Result<Vec<Rect>, DmsError> {
            // faces are searched on the full frame, eyes on a face crop
            if image.width() > 150 {
                Ok(vec![Rect::new(60, 40, 100, 100)])
            } else {
                Ok(vec![])
            }
        }
    }

    struct Constant(f32);

    impl PatchClassifier for Constant {
        fn classify(&self, _: &Patch) -> Result<f32, DmsError> {
            Ok(self.0)
        }
    }

    struct Endless;

    impl FrameSource for Endless {
        fn read_frame(&mut self) -> Option<VideoFrame> {
            Some(VideoFrame::filled(320, 240, [70, 80, 90]))
        }
    }

    struct TestOpener;

    impl SourceOpener for TestOpener {
        fn open(&self, camera_index: u32) -> Result<Box<dyn FrameSource>, CameraError> {
            match camera_index {
                0 => Ok(Box::new(Endless)),
                n => Err(CameraError::Open(format!("no device {}", n))),
            }
        }
    }

    fn app_with(models: DetectionModels, frame_interval_ms: u64) -> Router {
        let config = DmsConfig {
            frame_interval_ms,
            ..Default::default()
        };
        let pipeline = DetectionPipeline::new(Arc::new(models), config, Annotator::default());
        let service = Arc::new(DetectionService::new(Arc::new(pipeline), Arc::new(TestOpener)));
        create_router(Arc::new(AppState::new(service)))
    }

    fn one_face_models() -> DetectionModels {
        DetectionModels::empty()
            .with_face_detector(Arc::new(OneFace))
            .with_eye_detector(Arc::new(OneFace))
            .with_yawn_classifier(Arc::new(Constant(0.2)))
            .with_eye_classifier(Arc::new(Constant(0.9)))
    }

    fn app() -> Router {
        app_with(one_face_models(), 5)
    }

    async fn send(app: &Router, request: Request<Body>) -> (StatusCode, Vec<u8>) {
        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, body.to_vec())
    }

    async fn send_json(app: &Router, method: &str, uri: &str) -> (StatusCode, Value) {
        let request = Request::builder().method(method).uri(uri).body(Body::empty()).unwrap();
        let (status, body) = send(app, request).await;
        (status, serde_json::from_slice(&body).unwrap())
    }

    fn multipart_request(field: &str, filename: &str, payload: &[u8]) -> Request<Body> {
        let mut body = Vec::new();
        body.extend_from_slice(b"--BOUNDARY\r\n");
        body.extend_from_slice(
            format!(
                "Content-Disposition: form-data; name=\"{}\"; filename=\"{}\"\r\nContent-Type: application/octet-stream\r\n\r\n",
                field, filename
            )
            .as_bytes(),
        );
        body.extend_from_slice(payload);
        body.extend_from_slice(b"\r\n--BOUNDARY--\r\n");

        Request::builder()
            .method("POST")
            .uri("/upload_image")
            .header(header::CONTENT_TYPE, "multipart/form-data; boundary=BOUNDARY")
            .body(Body::from(body))
            .unwrap()
    }

    #[tokio::test]
    async fn test_health() {
        let (status, body) = send_json(&app(), "GET", "/api/v1/health").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "healthy");
        assert_eq!(body["models_loaded"], true);
        assert_eq!(body["is_running"], false);

        let (_, body) = send_json(&app_with(DetectionModels::empty(), 5), "GET", "/api/v1/health").await;
        assert_eq!(body["status"], "degraded");
        assert_eq!(body["missing_models"].as_array().unwrap().len(), 4);
    }

    #[tokio::test]
    async fn test_status_before_start() {
        let (status, body) = send_json(&app(), "GET", "/get_status").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["is_detecting"], false);
        assert_eq!(body["status"], "Stopped");
        assert_eq!(body["confidence"], 0.0);
    }

    #[tokio::test]
    async fn test_start_stop_lifecycle() {
        let app = app();

        let (status, body) = send_json(&app, "POST", "/start_detection?camera=0").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "started");
        assert_eq!(body["message"], "Detection started on camera 0");

        let (_, body) = send_json(&app, "POST", "/start_detection").await;
        assert_eq!(body["status"], "already_running");

        let (_, body) = send_json(&app, "GET", "/get_status").await;
        assert_eq!(body["is_detecting"], true);

        let (status, body) = send_json(&app, "POST", "/stop_detection").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "stopped");

        let (_, body) = send_json(&app, "GET", "/get_status").await;
        assert_eq!(body["is_detecting"], false);
        assert_eq!(body["status"], "Stopped");

        // stopping twice is harmless
        let (status, _) = send_json(&app, "POST", "/stop_detection").await;
        assert_eq!(status, StatusCode::OK);
    }

    #[tokio::test]
    async fn test_start_on_missing_camera() {
        let app = app();
        let (status, body) = send_json(&app, "POST", "/start_detection?camera=5").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"].as_str().unwrap().contains("camera 5"));

        let (_, body) = send_json(&app, "GET", "/get_status").await;
        assert_eq!(body["is_detecting"], false);
    }

    #[tokio::test]
    async fn test_upload_image() {
        let jpeg = encode_jpeg(&VideoFrame::filled(320, 240, [120, 120, 120]), 80).unwrap();
        let (status, body) = send(&app(), multipart_request("image", "face.jpg", &jpeg)).await;
        assert_eq!(status, StatusCode::OK);

        let body: Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(body["success"], true);
        assert!(body["processed_image"]
            .as_str()
            .unwrap()
            .starts_with("data:image/jpeg;base64,"));
        // one face, no eyes found
        assert_eq!(body["is_drowsy"], true);
        assert_eq!(body["status"], "Drowsy");
        assert_eq!(body["confidence"], 0.2);
    }

    #[tokio::test]
    async fn test_upload_rejections() {
        let app = app();

        let (status, body) = send(&app, multipart_request("other", "face.jpg", b"abc")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        let body: Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(body["error"], "No image uploaded");

        let (status, _) = send(&app, multipart_request("image", "", b"")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, body) = send(&app, multipart_request("image", "notes.txt", b"plain text")).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        let body: Value = serde_json::from_slice(&body).unwrap();
        assert!(body["error"].as_str().unwrap().starts_with("Error processing image"));
    }

    #[tokio::test]
    async fn test_camera_preview() {
        let app = app();
        let (status, body) = send_json(&app, "GET", "/camera_preview?camera=0").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["camera_index"], 0);
        assert!(body["preview_image"]
            .as_str()
            .unwrap()
            .starts_with("data:image/jpeg;base64,"));

        let (status, body) = send_json(&app, "GET", "/camera_preview?camera=2").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "Could not open camera 2");
    }

    #[tokio::test]
    async fn test_video_feed_without_detection_is_empty() {
        let request = Request::builder().uri("/video_feed").body(Body::empty()).unwrap();
        let response = app().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers()[header::CONTENT_TYPE],
            "multipart/x-mixed-replace; boundary=frame"
        );
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert!(body.is_empty());
    }

    async fn open_feed(app: &Router) -> BodyDataStream {
        let request = Request::builder().uri("/video_feed").body(Body::empty()).unwrap();
        let response = app.clone().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        response.into_body().into_data_stream()
    }

    async fn next_part(feed: &mut BodyDataStream) -> Option<Vec<u8>> {
        let chunk = tokio::time::timeout(Duration::from_secs(5), feed.next())
            .await
            .expect("video feed stalled")?;
        Some(chunk.unwrap().to_vec())
    }

    fn assert_jpeg_part(part: &[u8]) {
        let header = b"--frame\r\nContent-Type: image/jpeg\r\n\r\n";
        assert!(part.starts_with(header));
        let jpeg = &part[header.len()..part.len() - 2];
        assert_eq!(&jpeg[..2], &[0xFF, 0xD8]);
        assert_eq!(&jpeg[jpeg.len() - 2..], &[0xFF, 0xD9]);
        assert!(part.ends_with(b"\r\n"));
    }

    async fn stop_and_drain(app: &Router, feed: &mut BodyDataStream) {
        let (status, _) = send_json(app, "POST", "/stop_detection").await;
        assert_eq!(status, StatusCode::OK);
        // at most the parts already queued before the stop are delivered
        let mut trailing = 0;
        while let Some(part) = next_part(feed).await {
            assert_jpeg_part(&part);
            trailing += 1;
            assert!(trailing <= 4, "video feed kept streaming after stop");
        }
    }

    #[tokio::test]
    async fn test_video_feed_streams_jpeg_parts_until_stop() {
        let app = app();
        let (status, _) = send_json(&app, "POST", "/start_detection?camera=0").await;
        assert_eq!(status, StatusCode::OK);

        let mut feed = open_feed(&app).await;
        for _ in 0..3 {
            let part = next_part(&mut feed).await.expect("video feed ended while running");
            assert_jpeg_part(&part);
        }

        stop_and_drain(&app, &mut feed).await;
        let (_, body) = send_json(&app, "GET", "/get_status").await;
        assert_eq!(body["is_detecting"], false);
    }

    #[tokio::test]
    async fn test_video_feed_with_zero_frame_interval() {
        let app = app_with(one_face_models(), 0);
        let (status, _) = send_json(&app, "POST", "/start_detection?camera=0").await;
        assert_eq!(status, StatusCode::OK);

        let mut feed = open_feed(&app).await;
        for _ in 0..5 {
            let part = next_part(&mut feed).await.expect("video feed ended while running");
            assert_jpeg_part(&part);
        }
        stop_and_drain(&app, &mut feed).await;
    }

    #[tokio::test]
    async fn test_metrics_disabled() {
        let request = Request::builder().uri("/metrics").body(Body::empty()).unwrap();
        let (status, _) = send(&app(), request).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }
}
