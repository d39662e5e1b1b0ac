//! Error types for bullet-eye

use std::path::PathBuf;
use thiserror::Error;

/// Failures along the capture, detect and encode path.
#[derive(Error, Debug)]
pub enum VisionError {
    /// The camera stream could not be opened, ended, or went silent.
    #[error("Camera stream error: {0}")]
    Camera(String),

    #[error("Bullet model not found at {}", .0.display())]
    ModelNotFound(PathBuf),

    /// The model produced something the YOLOv5 decoder cannot read.
    #[error("Unexpected bullet model output: {0}")]
    Model(String),

    /// A frame could not be prepared for the model or encoded afterwards.
    #[error("Frame processing error: {0}")]
    Processing(String),

    #[error("Invalid detector configuration: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Camera request failed: {0}")]
    Network(#[from] reqwest::Error),

    #[error("Frame image error: {0}")]
    Image(#[from] image::ImageError),

    #[error("ONNX Runtime error: {0}")]
    Ort(String),

    #[error("OpenCV error: {0}")]
    OpenCv(String),
}

impl From<config::ConfigError> for VisionError {
    fn from(err: config::ConfigError) -> Self {
        VisionError::Config(err.to_string())
    }
}

#[cfg(feature = "opencv")]
impl From<opencv::Error> for VisionError {
    fn from(err: opencv::Error) -> Self {
        VisionError::OpenCv(err.message)
    }
}
