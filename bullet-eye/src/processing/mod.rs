//! Frame processing

pub mod annotate;
pub mod frame;

pub use annotate::draw_detection;
pub use frame::{count_bullets, filter_confident, FrameProcessor, CONFIDENCE_THRESHOLD};
