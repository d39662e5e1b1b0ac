//! bullet-eye: bullet impact detection on a network camera stream
//!
//! Connects to the range camera's MJPEG stream, runs a YOLOv5 model exported
//! to ONNX on each frame, draws `bullet` / `bullet_out` boxes and hands the
//! annotated frame to a local viewer or a multipart HTTP stream.

pub mod camera;
pub mod config;
pub mod detector;
pub mod display;
pub mod error;
pub mod models;
pub mod processing;
pub mod state;
pub mod stream;
mod utils;

pub use camera::{camera_from_config, FrameSource, HttpMjpegCamera, MjpegReader, StallReader};
#[cfg(feature = "opencv")]
pub use camera::OpenCvCamera;
pub use config::{CameraBackend, DetectorConfig};
pub use detector::{BulletDetector, DefaultDetector, InteractiveExit, InteractiveSummary};
pub use display::{FrameViewer, LogViewer, ViewerEvent};
#[cfg(feature = "opencv")]
pub use display::OpenCvWindow;
pub use error::VisionError;
pub use models::{BBox, BulletClass, Detection, ObjectDetector, YoloModel};
pub use processing::{FrameProcessor, CONFIDENCE_THRESHOLD};
pub use state::{DetectionSnapshot, DetectionState};
pub use stream::{multipart_part, FrameStream, STREAM_CONTENT_TYPE};
