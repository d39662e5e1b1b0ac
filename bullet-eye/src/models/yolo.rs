//! YOLOv5 bullet detector on ONNX Runtime

use super::{BBox, BulletClass, Detection, ObjectDetector};
use crate::config::DetectorConfig;
use crate::error::VisionError;
use crate::utils::{letterbox, rgb_to_chw_tensor};
use image::RgbImage;
use ort::session::Session;
use ort::value::Tensor;
use std::cmp::Ordering;
use std::path::Path;
use tracing::{debug, info};

/// Upper bound on detections kept per frame after NMS.
pub const MAX_DETECTIONS: usize = 1000;

/// Geometry of a letterboxed model input, used to map boxes back to the frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Letterbox {
    pub scale: f32,
    pub pad_x: f32,
    pub pad_y: f32,
    /// Original frame width
    pub width: u32,
    /// Original frame height
    pub height: u32,
}

impl Letterbox {
    /// Map a box from model input space to frame space (unclamped).
    pub fn to_frame(&self, bbox: &BBox) -> BBox {
        BBox {
            x1: (bbox.x1 - self.pad_x) / self.scale,
            y1: (bbox.y1 - self.pad_y) / self.scale,
            x2: (bbox.x2 - self.pad_x) / self.scale,
            y2: (bbox.y2 - self.pad_y) / self.scale,
        }
    }
}

/// YOLO model for bullet detection
pub struct YoloModel {
    session: Session,
    input_size: u32,
    confidence: f32,
    iou: f32,
}

impl YoloModel {
    /// Load the model file named by `config.model_path`.
    pub fn from_config(config: &DetectorConfig) -> Result<Self, VisionError> {
        Self::new(&config.model_path, config)
    }

    /// Create a new YOLO model
    pub fn new(model_path: &Path, config: &DetectorConfig) -> Result<Self, VisionError> {
        if !model_path.exists() {
            return Err(VisionError::ModelNotFound(model_path.to_path_buf()));
        }

        let session = Session::builder()
            .map_err(|e| VisionError::Ort(format!("Failed to create session builder: {}", e)))?
            .commit_from_file(model_path)
            .map_err(|e| VisionError::Ort(format!("Failed to load YOLO model: {}", e)))?;

        info!("YOLO model loaded from {:?}", model_path);

        Ok(Self {
            session,
            input_size: config.input_size,
            confidence: config.model_confidence,
            iou: config.nms_iou,
        })
    }

    /// Detect bullets in frame
    pub fn detect(&mut self, frame: &RgbImage) -> Result<Vec<Detection>, VisionError> {
        let (canvas, geometry) = letterbox(frame, self.input_size)?;
        let input = Tensor::from_array(rgb_to_chw_tensor(&canvas))
            .map_err(|e| VisionError::Ort(format!("Failed to create input value: {}", e)))?;

        let (confidence, iou) = (self.confidence, self.iou);
        let outputs = self
            .session
            .run(ort::inputs![input])
            .map_err(|e| VisionError::Ort(format!("YOLO inference failed: {}", e)))?;

        if outputs.len() == 0 {
            return Ok(vec![]);
        }

        let (shape, data) = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(|e| VisionError::Ort(format!("Failed to extract output tensor: {}", e)))?;

        let detections = decode_predictions(shape, data, &geometry, confidence, iou)?;
        debug!("YOLO detected {} objects", detections.len());
        Ok(detections)
    }
}

impl ObjectDetector for YoloModel {
    fn predict(&mut self, frame: &RgbImage) -> Result<Vec<Detection>, VisionError> {
        self.detect(frame)
    }
}

/// Decode a `[1, N, 5 + nc]` YOLOv5 head into frame-space detections.
///
/// Rows are `cx, cy, w, h, objectness, class scores...` in letterboxed pixels.
/// Confidence is objectness times the best class score.
pub fn decode_predictions(
    shape: &[i64],
    data: &[f32],
    geometry: &Letterbox,
    confidence: f32,
    iou: f32,
) -> Result<Vec<Detection>, VisionError> {
    if shape.len() != 3 || shape[0] != 1 || shape[1] < 0 || shape[2] < 6 {
        return Err(VisionError::Model(format!(
            "Unexpected YOLO output shape {:?}",
            shape
        )));
    }

    let rows = shape[1] as usize;
    let features = shape[2] as usize;
    let expected = rows
        .checked_mul(features)
        .ok_or_else(|| VisionError::Model("Output size would overflow".to_string()))?;
    if data.len() < expected {
        return Err(VisionError::Model(format!(
            "Output holds {} values, shape {:?} needs {}",
            data.len(),
            shape,
            expected
        )));
    }

    let mut candidates = Vec::new();
    for row in data[..expected].chunks_exact(features) {
        let objectness = row[4];
        if !(objectness > confidence) {
            continue;
        }

        let (class_index, class_score) = row[5..]
            .iter()
            .copied()
            .enumerate()
            .fold((0, f32::MIN), |best, (i, score)| {
                if score > best.1 {
                    (i, score)
                } else {
                    best
                }
            });

        let score = objectness * class_score;
        if !score.is_finite() || score <= confidence {
            continue;
        }

        // Heads exported with extra classes are ignored past our two labels
        let Some(class) = BulletClass::from_index(class_index) else {
            continue;
        };

        let bbox = geometry.to_frame(&BBox::from_center(row[0], row[1], row[2], row[3]));
        if bbox.width() <= 0.0 || bbox.height() <= 0.0 {
            continue;
        }

        candidates.push(Detection::new(class, score, bbox));
    }

    let (width, height) = (geometry.width as f32, geometry.height as f32);
    let mut kept = non_max_suppression(candidates, iou);
    kept.truncate(MAX_DETECTIONS);
    for detection in &mut kept {
        detection.bbox = detection.bbox.clamp(width, height);
    }
    Ok(kept)
}

/// Class-aware non-maximum suppression, highest confidence first.
pub fn non_max_suppression(mut detections: Vec<Detection>, iou_threshold: f32) -> Vec<Detection> {
    detections.retain(|d| d.confidence.is_finite());
    detections.sort_by(|a, b| {
        b.confidence
            .partial_cmp(&a.confidence)
            .unwrap_or(Ordering::Equal)
    });

    let mut keep: Vec<Detection> = Vec::with_capacity(detections.len());
    for candidate in detections {
        let suppressed = keep.iter().any(|kept| {
            kept.class == candidate.class && kept.bbox.iou(&candidate.bbox) > iou_threshold
        });
        if !suppressed {
            keep.push(candidate);
        }
    }
    keep
}
