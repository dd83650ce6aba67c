//! MJPEG video feed

use std::sync::Arc;

use axum::{
    body::Body,
    extract::State,
    http::header,
    response::{IntoResponse, Response},
};
use camera_capture::codec::encode_jpeg;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, warn};

use crate::AppState;

pub const MULTIPART_CONTENT_TYPE: &str = "multipart/x-mixed-replace; boundary=frame";

/// One part of the `multipart/x-mixed-replace` body
pub fn multipart_part(jpeg: &[u8]) -> Vec<u8> {
    let mut part = Vec::with_capacity(jpeg.len() + 48);
    part.extend_from_slice(b"--frame\r\nContent-Type: image/jpeg\r\n\r\n");
    part.extend_from_slice(jpeg);
    part.extend_from_slice(b"\r\n");
    part
}

/// Stream each newly published annotated frame. Frames published while
/// the previous part is still being sent are skipped. The stream ends when
/// detection stops, or at once if it is not running.
pub async fn video_feed(State(state): State<Arc<AppState>>) -> Response {
    let (tx, rx) = mpsc::channel::<Result<Vec<u8>, std::io::Error>>(2);
    let service = state.service.clone();
    let mut updates = service.subscribe();

    tokio::spawn(async move {
        let quality = service.pipeline().config().jpeg_quality;
        let mut sent = 0u64;

        loop {
            let snapshot = updates.borrow_and_update().clone();
            if !service.is_running() {
                break;
            }

            // running but nothing captured yet: wait for the first frame
            if let Some(frame) = snapshot.frame.clone() {
                let jpeg = match tokio::task::spawn_blocking(move || encode_jpeg(&frame, quality)).await {
                    Ok(Ok(jpeg)) => jpeg,
                    Ok(Err(e)) => {
                        warn!("Failed to encode video frame: {}", e);
                        break;
                    }
                    Err(e) => {
                        warn!("Video frame encoder task failed: {}", e);
                        break;
                    }
                };
                if tx.send(Ok(multipart_part(&jpeg))).await.is_err() {
                    debug!("Video feed client disconnected");
                    break;
                }
                sent += 1;
            }

            if updates.changed().await.is_err() {
                break;
            }
        }
        debug!("Video feed ended after {} frames", sent);
    });

    (
        [(header::CONTENT_TYPE, MULTIPART_CONTENT_TYPE)],
        Body::from_stream(ReceiverStream::new(rx)),
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_multipart_part_framing() {
        let part = multipart_part(&[1, 2, 3]);
        assert!(part.starts_with(b"--frame\r\nContent-Type: image/jpeg\r\n\r\n"));
        assert!(part.ends_with(&[1, 2, 3, b'\r', b'\n']));
    }
}
