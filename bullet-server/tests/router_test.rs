//! Tests for the stream router

use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use axum::Router;
use bullet_eye::{
    BBox, BulletClass, BulletDetector, Detection, DetectionState, DetectorConfig, FrameSource,
    ObjectDetector, VisionError,
};
use bullet_server::{create_router, StreamState};
use image::{Rgb, RgbImage};
use std::sync::Arc;
use std::time::Duration;
use tokio_stream::StreamExt;
use tower::ServiceExt;

struct StaticCamera {
    opened: bool,
}

impl FrameSource for StaticCamera {
    fn open(&mut self) -> Result<(), VisionError> {
        self.opened = true;
        Ok(())
    }

    fn is_opened(&self) -> bool {
        self.opened
    }

    fn read_frame(&mut self) -> Result<RgbImage, VisionError> {
        Ok(RgbImage::from_pixel(48, 48, Rgb([90, 90, 90])))
    }

    fn release(&mut self) {
        self.opened = false;
    }
}

struct OneBullet;

impl ObjectDetector for OneBullet {
    fn predict(&mut self, _frame: &RgbImage) -> Result<Vec<Detection>, VisionError> {
        Ok(vec![Detection::new(
            BulletClass::Bullet,
            0.8,
            BBox::new(10.0, 20.0, 20.0, 30.0),
        )])
    }
}

fn setup() -> (Router, StreamState<OneBullet, StaticCamera>) {
    let config = DetectorConfig {
        camera_warmup_ms: 0,
        frame_interval_ms: 5,
        ..DetectorConfig::default()
    };
    let detector = BulletDetector::new(OneBullet, StaticCamera { opened: false }, &config);
    let state = StreamState::new(detector, Arc::new(DetectionState::new()));
    (create_router(state.clone()), state)
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

async fn wait_until_idle(state: &StreamState<OneBullet, StaticCamera>) {
    for _ in 0..200 {
        if !state.is_streaming() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("stream did not release the camera");
}

#[tokio::test]
async fn test_index_embeds_feed() {
    let (app, _) = setup();
    let response = app.oneshot(get("/")).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let html = String::from_utf8(body.to_vec()).unwrap();
    assert!(html.contains("<img src=\"/video_feed\""));
}

#[tokio::test]
async fn test_video_feed_streams_parts() {
    let (app, state) = setup();
    let response = app.oneshot(get("/video_feed")).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers()[header::CONTENT_TYPE],
        "multipart/x-mixed-replace; boundary=frame"
    );

    let mut body = response.into_body().into_data_stream();
    for _ in 0..2 {
        let chunk = body.next().await.unwrap().unwrap();
        assert!(chunk.starts_with(b"--frame\r\nContent-Type: image/jpeg\r\n\r\n"));
        assert!(chunk.ends_with(b"\r\n"));
    }
    assert_eq!(state.detection().bullets_detected(), 1);

    drop(body);
    wait_until_idle(&state).await;
}

#[tokio::test]
async fn test_second_viewer_is_refused() {
    let (app, state) = setup();

    let first = app.clone().oneshot(get("/video_feed")).await.unwrap();
    assert_eq!(first.status(), StatusCode::OK);
    assert!(state.is_streaming());

    let second = app.clone().oneshot(get("/video_feed")).await.unwrap();
    assert_eq!(second.status(), StatusCode::CONFLICT);

    // once the first viewer leaves the feed is available again
    drop(first);
    wait_until_idle(&state).await;
    let third = app.oneshot(get("/video_feed")).await.unwrap();
    assert_eq!(third.status(), StatusCode::OK);

    drop(third);
    wait_until_idle(&state).await;
}

#[tokio::test]
async fn test_stop_ends_stream() {
    let (app, state) = setup();
    let response = app.oneshot(get("/video_feed")).await.unwrap();
    let mut body = response.into_body().into_data_stream();
    assert!(body.next().await.is_some());

    state.detection().stop();

    // drain what was already buffered, then the stream closes
    let mut remaining = 0;
    while body.next().await.is_some() {
        remaining += 1;
        assert!(remaining < 10, "stream kept producing after stop");
    }
    wait_until_idle(&state).await;
}

#[tokio::test]
async fn test_feed_unavailable_after_stop() {
    let (app, state) = setup();
    state.detection().stop();

    let response = app.oneshot(get("/video_feed")).await.unwrap();
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    assert!(!state.is_streaming());
}
