//! Detection model and its output types

pub mod detection;
pub mod yolo;

pub use detection::{BBox, BulletClass, Detection};
pub use yolo::{Letterbox, YoloModel};

use crate::error::VisionError;
use image::RgbImage;

/// Anything that turns a frame into detections.
///
/// Implementations return boxes in frame coordinates, after their own
/// confidence floor and NMS. The 0.3 drawing cutoff is applied by the caller.
#[cfg_attr(test, mockall::automock)]
pub trait ObjectDetector: Send {
    fn predict(&mut self, frame: &RgbImage) -> Result<Vec<Detection>, VisionError>;
}
