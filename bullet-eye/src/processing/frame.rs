//! Per-frame detection, annotation and encoding

use super::annotate::draw_detection;
use crate::error::VisionError;
use crate::models::{BulletClass, Detection, ObjectDetector};
use crate::state::DetectionState;
use crate::utils::encode_jpeg;
use image::RgbImage;
use tracing::{debug, error};

/// Detections at or below this confidence are neither drawn nor counted.
pub const CONFIDENCE_THRESHOLD: f32 = 0.3;

/// Keep only detections strictly above [`CONFIDENCE_THRESHOLD`].
pub fn filter_confident(detections: Vec<Detection>) -> Vec<Detection> {
    detections
        .into_iter()
        .filter(|d| d.confidence > CONFIDENCE_THRESHOLD)
        .collect()
}

/// Number of `bullet` detections (impacts outside the target are not counted).
pub fn count_bullets(detections: &[Detection]) -> usize {
    detections
        .iter()
        .filter(|d| d.class == BulletClass::Bullet)
        .count()
}

/// Runs the model on a frame, draws what it finds and encodes the result.
pub struct FrameProcessor<D> {
    model: D,
    jpeg_quality: u8,
}

impl<D: ObjectDetector> FrameProcessor<D> {
    pub fn new(model: D, jpeg_quality: u8) -> Self {
        Self {
            model,
            jpeg_quality,
        }
    }

    /// Detect, draw and count in place. Returns the detections that were drawn.
    pub fn annotate(
        &mut self,
        frame: &mut RgbImage,
        state: &DetectionState,
    ) -> Result<Vec<Detection>, VisionError> {
        let detections = filter_confident(self.model.predict(frame)?);

        for detection in &detections {
            draw_detection(frame, detection);
        }

        let bullets = count_bullets(&detections);
        state.set_bullets_detected(bullets);
        debug!(
            "Frame annotated: {} detections, {} bullets",
            detections.len(),
            bullets
        );

        Ok(detections)
    }

    /// Annotate `frame` and return it as JPEG bytes.
    ///
    /// An absent frame returns `Ok(None)` without running the model.
    pub fn process_frame(
        &mut self,
        frame: Option<&mut RgbImage>,
        state: &DetectionState,
    ) -> Result<Option<Vec<u8>>, VisionError> {
        let Some(frame) = frame else {
            error!("Invalid frame, nothing to process");
            return Ok(None);
        };

        self.annotate(frame, state)?;
        let jpeg = encode_jpeg(frame, self.jpeg_quality)?;
        Ok(Some(jpeg))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{BBox, MockObjectDetector};
    use image::Rgb;

    fn detection(class: BulletClass, confidence: f32) -> Detection {
        Detection::new(class, confidence, BBox::new(10.0, 30.0, 30.0, 50.0))
    }

    #[test]
    fn test_filter_is_strict() {
        let kept = filter_confident(vec![
            detection(BulletClass::Bullet, 0.3),
            detection(BulletClass::Bullet, 0.31),
            detection(BulletClass::BulletOut, 0.1),
        ]);
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].confidence, 0.31);
    }

    #[test]
    fn test_count_ignores_bullet_out() {
        let detections = vec![
            detection(BulletClass::Bullet, 0.9),
            detection(BulletClass::BulletOut, 0.9),
            detection(BulletClass::Bullet, 0.5),
        ];
        assert_eq!(count_bullets(&detections), 2);
    }

    #[test]
    fn test_absent_frame_skips_model() {
        let mut model = MockObjectDetector::new();
        model.expect_predict().never();

        let state = DetectionState::new();
        state.set_bullets_detected(5);
        let mut processor = FrameProcessor::new(model, 90);

        assert!(processor.process_frame(None, &state).unwrap().is_none());
        assert_eq!(state.bullets_detected(), 5);
    }

    #[test]
    fn test_process_frame_counts_and_encodes() {
        let mut model = MockObjectDetector::new();
        model.expect_predict().times(1).returning(|_| {
            Ok(vec![
                detection(BulletClass::Bullet, 0.8),
                detection(BulletClass::Bullet, 0.2),
                detection(BulletClass::BulletOut, 0.7),
            ])
        });

        let state = DetectionState::new();
        let mut processor = FrameProcessor::new(model, 90);
        let mut frame = RgbImage::new(64, 64);

        let jpeg = processor
            .process_frame(Some(&mut frame), &state)
            .unwrap()
            .unwrap();
        assert_eq!(&jpeg[..2], &[0xFF, 0xD8]);
        assert_eq!(state.bullets_detected(), 1);
    }

    #[test]
    fn test_low_confidence_leaves_frame_untouched() {
        let mut model = MockObjectDetector::new();
        model
            .expect_predict()
            .returning(|_| Ok(vec![detection(BulletClass::Bullet, 0.3)]));

        let state = DetectionState::new();
        state.set_bullets_detected(2);
        let mut processor = FrameProcessor::new(model, 90);
        let original = RgbImage::from_pixel(64, 64, Rgb([7, 7, 7]));
        let mut frame = original.clone();

        let drawn = processor.annotate(&mut frame, &state).unwrap();
        assert!(drawn.is_empty());
        assert_eq!(frame, original);
        assert_eq!(state.bullets_detected(), 0);
    }

    #[test]
    fn test_model_error_propagates() {
        let mut model = MockObjectDetector::new();
        model
            .expect_predict()
            .returning(|_| Err(VisionError::Model("boom".to_string())));

        let state = DetectionState::new();
        let mut processor = FrameProcessor::new(model, 90);
        let mut frame = RgbImage::new(8, 8);
        assert!(processor.process_frame(Some(&mut frame), &state).is_err());
    }
}
