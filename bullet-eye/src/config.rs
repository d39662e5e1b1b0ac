//! Configuration for bullet-eye

use crate::error::VisionError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

/// Stream exposed by the range camera.
pub const DEFAULT_STREAM_URL: &str = "http://192.168.21.57/stream";

/// ONNX export of the trained bullet weights.
pub const DEFAULT_MODEL_PATH: &str = "best.onnx";

/// Prefix of the environment variables read by [`DetectorConfig::load`].
pub const ENV_PREFIX: &str = "BULLET";

/// How frames are pulled from the stream URL.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CameraBackend {
    /// Built-in multipart MJPEG reader over HTTP
    #[default]
    Http,
    /// OpenCV `VideoCapture` (requires the `opencv` feature)
    OpenCv,
}

impl CameraBackend {
    pub fn as_str(&self) -> &'static str {
        match self {
            CameraBackend::Http => "http",
            CameraBackend::OpenCv => "opencv",
        }
    }

    /// Whether this build can construct the backend.
    pub fn is_available(&self) -> bool {
        match self {
            CameraBackend::Http => true,
            CameraBackend::OpenCv => cfg!(feature = "opencv"),
        }
    }
}

impl fmt::Display for CameraBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CameraBackend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "http" => Ok(CameraBackend::Http),
            "opencv" => Ok(CameraBackend::OpenCv),
            other => Err(format!("Unknown camera backend '{}' (expected http or opencv)", other)),
        }
    }
}

/// Detector configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectorConfig {
    /// MJPEG stream URL of the camera
    pub stream_url: String,
    /// Reader used for the camera stream
    pub camera_backend: CameraBackend,
    /// Path to the ONNX model file
    pub model_path: PathBuf,
    /// Square model input size in pixels
    pub input_size: u32,
    /// Confidence floor applied inside the model stage, before NMS
    pub model_confidence: f32,
    /// IoU threshold for non-maximum suppression
    pub nms_iou: f32,
    /// Delay after opening the camera before the first read
    pub camera_warmup_ms: u64,
    /// Pause between two frames of the HTTP stream
    pub frame_interval_ms: u64,
    /// TCP connect timeout for the camera stream
    pub connect_timeout_ms: u64,
    /// Longest silence tolerated on an open stream before the read fails
    pub read_timeout_ms: u64,
    /// JPEG quality of the annotated frames (1-100)
    pub jpeg_quality: u8,
    /// Title of the local preview window
    pub window_title: String,
    /// Listen address of the stream server
    pub bind_address: String,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            stream_url: DEFAULT_STREAM_URL.to_string(),
            camera_backend: CameraBackend::Http,
            model_path: PathBuf::from(DEFAULT_MODEL_PATH),
            input_size: 640,
            model_confidence: 0.25,
            nms_iou: 0.45,
            camera_warmup_ms: 2000,
            frame_interval_ms: 1000,
            connect_timeout_ms: 5000,
            read_timeout_ms: 10_000,
            jpeg_quality: 90,
            window_title: "Bullet Detection".to_string(),
            bind_address: "0.0.0.0:5000".to_string(),
        }
    }
}

impl DetectorConfig {
    /// Load configuration from an optional TOML file, then `BULLET_*` environment variables.
    ///
    /// Missing keys fall back to [`DetectorConfig::default`]. The result is validated.
    pub fn load(path: Option<&Path>) -> Result<Self, VisionError> {
        let mut builder = config::Config::builder();

        if let Some(path) = path {
            if !path.exists() {
                return Err(VisionError::Config(format!(
                    "Configuration file not found: {}",
                    path.display()
                )));
            }
            builder = builder.add_source(
                config::File::from(path).format(config::FileFormat::Toml),
            );
        }

        builder = builder.add_source(
            config::Environment::with_prefix(ENV_PREFIX).try_parsing(true),
        );

        let loaded: DetectorConfig = builder.build()?.try_deserialize()?;
        loaded.validate().map_err(VisionError::Config)?;
        Ok(loaded)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), String> {
        if self.stream_url.trim().is_empty() {
            return Err("Stream URL must not be empty".to_string());
        }

        if !(self.stream_url.starts_with("http://") || self.stream_url.starts_with("https://")) {
            return Err(format!("Stream URL must be http(s): {}", self.stream_url));
        }

        if self.model_path.as_os_str().is_empty() {
            return Err("Model path must not be empty".to_string());
        }

        // YOLOv5 strides go up to 32
        if self.input_size == 0 || self.input_size % 32 != 0 || self.input_size > 4096 {
            return Err("Input size must be a non-zero multiple of 32 (max 4096)".to_string());
        }

        if !(0.0..=1.0).contains(&self.model_confidence) {
            return Err("Model confidence must be between 0 and 1".to_string());
        }

        if !(0.0..=1.0).contains(&self.nms_iou) {
            return Err("NMS IoU threshold must be between 0 and 1".to_string());
        }

        if self.jpeg_quality == 0 || self.jpeg_quality > 100 {
            return Err("JPEG quality must be between 1 and 100".to_string());
        }

        if self.connect_timeout_ms == 0 {
            return Err("Connect timeout must be non-zero".to_string());
        }

        if self.read_timeout_ms == 0 {
            return Err("Read timeout must be non-zero".to_string());
        }

        if !self.camera_backend.is_available() {
            return Err(format!(
                "Camera backend '{}' needs a build with the opencv feature",
                self.camera_backend
            ));
        }

        Ok(())
    }

    pub fn camera_warmup(&self) -> Duration {
        Duration::from_millis(self.camera_warmup_ms)
    }

    pub fn frame_interval(&self) -> Duration {
        Duration::from_millis(self.frame_interval_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }
}
