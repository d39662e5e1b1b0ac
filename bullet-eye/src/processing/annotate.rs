//! Box and label drawing

use crate::models::Detection;
use ab_glyph::{Font, FontRef, PxScale, ScaleFont};
use image::RgbImage;
use imageproc::drawing::{draw_hollow_rect_mut, draw_text_mut};
use imageproc::rect::Rect;
use std::sync::OnceLock;
use tracing::warn;

/// Stroke width of detection boxes, in pixels.
pub const BOX_THICKNESS: u32 = 2;

/// Gap between the box's top edge and the label baseline.
pub const LABEL_OFFSET: i32 = 10;

/// Label glyph height.
pub const LABEL_SCALE: f32 = 18.0;

static FONT_BYTES: &[u8] = include_bytes!("../../assets/fonts/DejaVuSans.ttf");
static LABEL_FONT: OnceLock<Option<FontRef<'static>>> = OnceLock::new();

fn label_font() -> Option<&'static FontRef<'static>> {
    LABEL_FONT
        .get_or_init(|| match FontRef::try_from_slice(FONT_BYTES) {
            Ok(font) => Some(font),
            Err(e) => {
                warn!("Label font unavailable, drawing boxes only: {}", e);
                None
            }
        })
        .as_ref()
}

/// Draw one detection: a class-coloured box and its `"<class> <conf>"` caption.
pub fn draw_detection(frame: &mut RgbImage, detection: &Detection) {
    let color = detection.class.color();
    let bbox = &detection.bbox;
    let (x1, y1) = (bbox.x1.round() as i32, bbox.y1.round() as i32);
    let (width, height) = (bbox.width().round() as u32, bbox.height().round() as u32);

    for inset in 0..BOX_THICKNESS {
        let w = width.saturating_sub(2 * inset).max(1);
        let h = height.saturating_sub(2 * inset).max(1);
        let rect = Rect::at(x1 + inset as i32, y1 + inset as i32).of_size(w, h);
        draw_hollow_rect_mut(frame, rect, color);
    }

    let Some(font) = label_font() else {
        return;
    };

    let label = detection.label();
    let scale = PxScale::from(LABEL_SCALE);
    // Baseline of the caption sits at (x1, y1 - 10)
    let ascent = font.as_scaled(scale).ascent().round() as i32;
    let text_top = y1 - LABEL_OFFSET - ascent;
    draw_text_mut(frame, color, x1, text_top, scale, font, &label);
}
