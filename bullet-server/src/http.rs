//! HTTP surface: the multipart video feed and a viewer page

use axum::body::Body;
use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::{Html, IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use bullet_eye::{BulletDetector, DetectionState, FrameSource, ObjectDetector, STREAM_CONTENT_TYPE};
use bytes::Bytes;
use parking_lot::Mutex;
use std::convert::Infallible;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

/// Parts buffered between the capture thread and the socket.
pub const STREAM_BUFFER: usize = 2;

const INDEX_HTML: &str = r#"<!DOCTYPE html>
<html>
  <head><title>Bullet Detection</title></head>
  <body>
    <h1>Bullet Detection</h1>
    <img src="/video_feed" alt="annotated camera stream">
  </body>
</html>
"#;

/// Shared server state: the detector, its detection state and the single-viewer flag.
pub struct StreamState<D: ObjectDetector, S: FrameSource> {
    detector: Arc<Mutex<BulletDetector<D, S>>>,
    detection: Arc<DetectionState>,
    streaming: Arc<AtomicBool>,
}

impl<D: ObjectDetector, S: FrameSource> Clone for StreamState<D, S> {
    fn clone(&self) -> Self {
        Self {
            detector: self.detector.clone(),
            detection: self.detection.clone(),
            streaming: self.streaming.clone(),
        }
    }
}

impl<D: ObjectDetector, S: FrameSource> StreamState<D, S> {
    pub fn new(detector: BulletDetector<D, S>, detection: Arc<DetectionState>) -> Self {
        Self {
            detector: Arc::new(Mutex::new(detector)),
            detection,
            streaming: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn detection(&self) -> &Arc<DetectionState> {
        &self.detection
    }

    /// Whether a viewer currently holds the camera.
    pub fn is_streaming(&self) -> bool {
        self.streaming.load(Ordering::SeqCst)
    }
}

/// Clears the single-viewer flag when the capture thread exits.
struct StreamingGuard(Arc<AtomicBool>);

impl Drop for StreamingGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Create HTTP router
pub fn create_router<D, S>(state: StreamState<D, S>) -> Router
where
    D: ObjectDetector + 'static,
    S: FrameSource + 'static,
{
    Router::new()
        .route("/", get(index_handler))
        .route("/video_feed", get(video_feed_handler::<D, S>))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn index_handler() -> Html<&'static str> {
    Html(INDEX_HTML)
}

async fn video_feed_handler<D, S>(State(state): State<StreamState<D, S>>) -> Response
where
    D: ObjectDetector + 'static,
    S: FrameSource + 'static,
{
    if !state.detection.is_active() {
        return (StatusCode::SERVICE_UNAVAILABLE, "detection stopped").into_response();
    }

    if state
        .streaming
        .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
        .is_err()
    {
        warn!("Rejecting viewer: stream already in use");
        return (StatusCode::CONFLICT, "stream already in use").into_response();
    }

    let (tx, rx) = mpsc::channel::<Result<Bytes, Infallible>>(STREAM_BUFFER);
    let task_state = state.clone();

    tokio::task::spawn_blocking(move || {
        let _guard = StreamingGuard(task_state.streaming.clone());
        let mut detector = task_state.detector.lock();
        info!("Viewer connected to {}", detector.stream_url());

        for part in detector.generate_frames(task_state.detection.clone()) {
            if tx.blocking_send(Ok(Bytes::from(part))).is_err() {
                info!("Viewer disconnected");
                break;
            }
        }
    });

    (
        [
            (header::CONTENT_TYPE, STREAM_CONTENT_TYPE),
            (header::CACHE_CONTROL, "no-cache"),
        ],
        Body::from_stream(ReceiverStream::new(rx)),
    )
        .into_response()
}
