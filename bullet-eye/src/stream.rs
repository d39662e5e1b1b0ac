//! Multipart MJPEG framing and the streaming frame generator

use crate::camera::FrameSource;
use crate::detector::BulletDetector;
use crate::models::ObjectDetector;
use crate::state::DetectionState;
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Multipart boundary between frames.
pub const BOUNDARY: &str = "frame";

/// Response content type of the frame stream.
pub const STREAM_CONTENT_TYPE: &str = "multipart/x-mixed-replace; boundary=frame";

/// Wrap one JPEG as a multipart part.
pub fn multipart_part(jpeg: &[u8]) -> Vec<u8> {
    let header = format!("--{}\r\nContent-Type: image/jpeg\r\n\r\n", BOUNDARY);
    let mut part = Vec::with_capacity(header.len() + jpeg.len() + 2);
    part.extend_from_slice(header.as_bytes());
    part.extend_from_slice(jpeg);
    part.extend_from_slice(b"\r\n");
    part
}

/// Blocking iterator of multipart parts, created by [`BulletDetector::generate_frames`].
///
/// Each step checks `active`, captures a frame and processes it; frames that
/// produced no bytes are skipped. Steps after the first wait `interval` first.
/// The camera is released when the stream ends or is dropped.
pub struct FrameStream<'a, D: ObjectDetector, S: FrameSource> {
    detector: &'a mut BulletDetector<D, S>,
    state: Arc<DetectionState>,
    interval: Duration,
    started: bool,
    finished: bool,
    yielded: u64,
}

impl<'a, D: ObjectDetector, S: FrameSource> FrameStream<'a, D, S> {
    pub(crate) fn new(
        detector: &'a mut BulletDetector<D, S>,
        state: Arc<DetectionState>,
        interval: Duration,
    ) -> Self {
        Self {
            detector,
            state,
            interval,
            started: false,
            finished: false,
            yielded: 0,
        }
    }

    /// Parts produced so far.
    pub fn yielded(&self) -> u64 {
        self.yielded
    }

    fn finish(&mut self) {
        if !self.finished {
            self.finished = true;
            info!("Frame stream finished after {} frames", self.yielded);
            self.detector.close_camera();
        }
    }
}

impl<D: ObjectDetector, S: FrameSource> Iterator for FrameStream<'_, D, S> {
    type Item = Vec<u8>;

    fn next(&mut self) -> Option<Self::Item> {
        while !self.finished {
            if self.started && !self.interval.is_zero() {
                thread::sleep(self.interval);
            }
            self.started = true;

            if !self.state.is_active() {
                self.finish();
                break;
            }

            let mut frame = self.detector.capture_single_frame();
            match self.detector.process_frame(frame.as_mut(), &self.state) {
                Ok(Some(jpeg)) => {
                    self.yielded += 1;
                    return Some(multipart_part(&jpeg));
                }
                Ok(None) => debug!("No frame bytes, skipping"),
                Err(e) => warn!("Frame processing failed, skipping: {}", e),
            }
        }
        None
    }
}

impl<D: ObjectDetector, S: FrameSource> Drop for FrameStream<'_, D, S> {
    fn drop(&mut self) {
        self.finish();
    }
}
