//! Bullet detector: camera, model and the two frame loops

use crate::camera::{camera_from_config, FrameSource};
use crate::config::DetectorConfig;
use crate::display::{FrameViewer, ViewerEvent};
use crate::error::VisionError;
use crate::models::{ObjectDetector, YoloModel};
use crate::processing::FrameProcessor;
use crate::state::DetectionState;
use crate::stream::FrameStream;
use image::RgbImage;
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tracing::{error, info};

/// Detector wired to the ONNX model and the configured camera backend.
pub type DefaultDetector = BulletDetector<YoloModel, Box<dyn FrameSource>>;

/// Outcome of [`BulletDetector::run_interactive`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InteractiveExit {
    /// The camera could not be opened; no frame was read.
    CameraUnavailable,
    /// A capture failed.
    CaptureFailed,
    /// The viewer asked to quit.
    Quit,
    /// `active` was cleared.
    Stopped,
}

/// Summary of an interactive session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InteractiveSummary {
    pub frames: u64,
    pub exit: InteractiveExit,
}

/// Holds one model and one camera connection for the fixed stream URL.
pub struct BulletDetector<D: ObjectDetector, S: FrameSource> {
    processor: FrameProcessor<D>,
    camera: S,
    stream_url: String,
    camera_warmup: Duration,
    frame_interval: Duration,
}

impl DefaultDetector {
    /// Load the model and prepare (but do not open) the camera named by `camera_backend`.
    pub fn from_config(config: &DetectorConfig) -> Result<Self, VisionError> {
        let camera = camera_from_config(config)?;
        let model = YoloModel::from_config(config)?;
        Ok(Self::new(model, camera, config))
    }
}

impl<D: ObjectDetector, S: FrameSource> BulletDetector<D, S> {
    pub fn new(model: D, camera: S, config: &DetectorConfig) -> Self {
        Self {
            processor: FrameProcessor::new(model, config.jpeg_quality),
            camera,
            stream_url: config.stream_url.clone(),
            camera_warmup: config.camera_warmup(),
            frame_interval: config.frame_interval(),
        }
    }

    pub fn stream_url(&self) -> &str {
        &self.stream_url
    }

    pub fn camera(&self) -> &S {
        &self.camera
    }

    /// Open the camera if needed. Returns whether it is open afterwards.
    pub fn initialize_camera(&mut self) -> bool {
        if self.camera.is_opened() {
            return true;
        }

        info!("Connecting to stream: {}", self.stream_url);
        if let Err(e) = self.camera.open() {
            error!("Failed to open MJPEG stream {}: {}", self.stream_url, e);
            return false;
        }

        if !self.camera_warmup.is_zero() {
            thread::sleep(self.camera_warmup);
        }

        if !self.camera.is_opened() {
            error!("Failed to open MJPEG stream {}", self.stream_url);
            return false;
        }

        info!("MJPEG stream opened");
        true
    }

    /// Release the camera if it is open.
    pub fn close_camera(&mut self) {
        if self.camera.is_opened() {
            self.camera.release();
            info!("Camera released");
        }
    }

    /// Read one frame, opening the camera first if needed.
    pub fn capture_single_frame(&mut self) -> Option<RgbImage> {
        if !self.initialize_camera() {
            error!("Camera not initialized");
            return None;
        }

        match self.camera.read_frame() {
            Ok(frame) => Some(frame),
            Err(e) => {
                error!("Unable to capture a frame: {}", e);
                None
            }
        }
    }

    /// Detect, annotate, count and JPEG-encode one frame.
    pub fn process_frame(
        &mut self,
        frame: Option<&mut RgbImage>,
        state: &DetectionState,
    ) -> Result<Option<Vec<u8>>, VisionError> {
        self.processor.process_frame(frame, state)
    }

    /// Multipart parts for the HTTP stream, one per configured interval.
    pub fn generate_frames(&mut self, state: Arc<DetectionState>) -> FrameStream<'_, D, S> {
        let interval = self.frame_interval;
        FrameStream::new(self, state, interval)
    }

    /// Capture and process a single frame, then release the camera.
    pub fn take_snapshot(&mut self, state: &DetectionState) -> Result<Option<Vec<u8>>, VisionError> {
        let mut frame = self.capture_single_frame();
        let result = self.process_frame(frame.as_mut(), state);
        self.close_camera();
        result
    }

    /// Local display loop: capture, annotate, show, until quit, stop or capture failure.
    ///
    /// The camera is released and the viewer closed on every exit.
    pub fn run_interactive<V: FrameViewer>(
        &mut self,
        state: &DetectionState,
        viewer: &mut V,
    ) -> Result<InteractiveSummary, VisionError> {
        let outcome = self.interactive_loop(state, viewer);
        self.close_camera();
        viewer.close();
        outcome
    }

    fn interactive_loop<V: FrameViewer>(
        &mut self,
        state: &DetectionState,
        viewer: &mut V,
    ) -> Result<InteractiveSummary, VisionError> {
        let mut frames = 0;

        if !self.initialize_camera() {
            error!("Unable to initialize the camera");
            return Ok(InteractiveSummary {
                frames,
                exit: InteractiveExit::CameraUnavailable,
            });
        }

        let exit = loop {
            if !state.is_active() {
                break InteractiveExit::Stopped;
            }

            let Some(mut frame) = self.capture_single_frame() else {
                error!("Unable to capture a frame, stopping");
                break InteractiveExit::CaptureFailed;
            };

            if let Err(e) = self.processor.annotate(&mut frame, state) {
                error!("Frame processing failed: {}", e);
            }
            frames += 1;

            if viewer.show(&frame, state)? == ViewerEvent::Quit {
                break InteractiveExit::Quit;
            }
        };

        info!("Interactive loop ended after {} frames ({:?})", frames, exit);
        Ok(InteractiveSummary { frames, exit })
    }
}

impl<D: ObjectDetector, S: FrameSource> Drop for BulletDetector<D, S> {
    fn drop(&mut self) {
        self.close_camera();
    }
}
