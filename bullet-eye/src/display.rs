//! Local display of annotated frames

use crate::error::VisionError;
use crate::state::{DetectionSnapshot, DetectionState};
use image::RgbImage;
use tracing::info;

/// What the loop should do after a frame was shown.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ViewerEvent {
    Continue,
    Quit,
}

/// Sink for annotated frames in the interactive loop.
pub trait FrameViewer {
    fn show(&mut self, frame: &RgbImage, state: &DetectionState) -> Result<ViewerEvent, VisionError>;

    /// Tear down whatever `show` created.
    fn close(&mut self) {}
}

/// Headless viewer: logs the detection state after each frame.
#[derive(Debug, Default)]
pub struct LogViewer {
    max_frames: Option<u64>,
    shown: u64,
    last: Option<DetectionSnapshot>,
}

impl LogViewer {
    /// Quit after `max_frames` frames, or never with `None`.
    pub fn new(max_frames: Option<u64>) -> Self {
        Self {
            max_frames,
            shown: 0,
            last: None,
        }
    }

    pub fn shown(&self) -> u64 {
        self.shown
    }

    /// State as logged for the most recent frame.
    pub fn last_snapshot(&self) -> Option<DetectionSnapshot> {
        self.last
    }
}

impl FrameViewer for LogViewer {
    fn show(&mut self, frame: &RgbImage, state: &DetectionState) -> Result<ViewerEvent, VisionError> {
        self.shown += 1;
        let snapshot = state.snapshot();
        info!(
            ?snapshot,
            "Frame {} ({}x{}): {} bullets detected",
            self.shown,
            frame.width(),
            frame.height(),
            snapshot.bullets_detected
        );
        self.last = Some(snapshot);

        match self.max_frames {
            Some(max) if self.shown >= max => Ok(ViewerEvent::Quit),
            _ => Ok(ViewerEvent::Continue),
        }
    }
}

/// highgui window, closed with `q`.
#[cfg(feature = "opencv")]
pub struct OpenCvWindow {
    title: String,
    opened: bool,
}

#[cfg(feature = "opencv")]
impl OpenCvWindow {
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            opened: false,
        }
    }
}

#[cfg(feature = "opencv")]
impl FrameViewer for OpenCvWindow {
    fn show(&mut self, frame: &RgbImage, _state: &DetectionState) -> Result<ViewerEvent, VisionError> {
        use opencv::highgui;

        let mat = crate::utils::rgb_to_mat(frame)?;
        highgui::imshow(&self.title, &mat)?;
        self.opened = true;

        let key = highgui::wait_key(1)?;
        if key & 0xFF == 'q' as i32 {
            return Ok(ViewerEvent::Quit);
        }
        Ok(ViewerEvent::Continue)
    }

    fn close(&mut self) {
        if self.opened {
            self.opened = false;
            if let Err(e) = opencv::highgui::destroy_all_windows() {
                tracing::warn!("Failed to destroy windows: {}", e);
            }
        }
    }
}
