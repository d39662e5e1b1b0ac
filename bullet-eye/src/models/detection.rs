//! Detection types

use image::Rgb;
use std::fmt;

/// The two labels the bullet model was trained on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BulletClass {
    /// Impact inside the target
    Bullet,
    /// Impact outside the target
    BulletOut,
}

impl BulletClass {
    /// Classes in model output order.
    pub const ALL: [BulletClass; 2] = [BulletClass::Bullet, BulletClass::BulletOut];

    /// Map a model class index to its label. Unknown indices yield `None`.
    pub fn from_index(index: usize) -> Option<Self> {
        Self::ALL.get(index).copied()
    }

    pub fn index(self) -> usize {
        match self {
            BulletClass::Bullet => 0,
            BulletClass::BulletOut => 1,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            BulletClass::Bullet => "bullet",
            BulletClass::BulletOut => "bullet_out",
        }
    }

    /// Box and label colour: green inside, red outside.
    pub fn color(self) -> Rgb<u8> {
        match self {
            BulletClass::Bullet => Rgb([0, 255, 0]),
            BulletClass::BulletOut => Rgb([255, 0, 0]),
        }
    }
}

impl fmt::Display for BulletClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Axis-aligned box in frame pixels, corners `(x1, y1)` top-left and `(x2, y2)` bottom-right.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BBox {
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
}

impl BBox {
    pub fn new(x1: f32, y1: f32, x2: f32, y2: f32) -> Self {
        Self { x1, y1, x2, y2 }
    }

    /// Build from the centre/size layout of the YOLO head.
    pub fn from_center(cx: f32, cy: f32, w: f32, h: f32) -> Self {
        Self {
            x1: cx - w / 2.0,
            y1: cy - h / 2.0,
            x2: cx + w / 2.0,
            y2: cy + h / 2.0,
        }
    }

    pub fn width(&self) -> f32 {
        (self.x2 - self.x1).max(0.0)
    }

    pub fn height(&self) -> f32 {
        (self.y2 - self.y1).max(0.0)
    }

    pub fn area(&self) -> f32 {
        self.width() * self.height()
    }

    /// Intersection over union. Degenerate or non-finite boxes give 0.
    pub fn iou(&self, other: &BBox) -> f32 {
        let coords = [
            self.x1, self.y1, self.x2, self.y2, other.x1, other.y1, other.x2, other.y2,
        ];
        if coords.iter().any(|c| !c.is_finite()) {
            return 0.0;
        }

        let inter_w = (self.x2.min(other.x2) - self.x1.max(other.x1)).max(0.0);
        let inter_h = (self.y2.min(other.y2) - self.y1.max(other.y1)).max(0.0);
        let intersection = inter_w * inter_h;
        let union = self.area() + other.area() - intersection;

        if union <= 0.0 {
            0.0
        } else {
            intersection / union
        }
    }

    /// Clamp all corners into a `width` x `height` frame.
    pub fn clamp(&self, width: f32, height: f32) -> Self {
        Self {
            x1: self.x1.clamp(0.0, width),
            y1: self.y1.clamp(0.0, height),
            x2: self.x2.clamp(0.0, width),
            y2: self.y2.clamp(0.0, height),
        }
    }
}

/// A single model output
#[derive(Debug, Clone, PartialEq)]
pub struct Detection {
    pub class: BulletClass,
    pub confidence: f32,
    pub bbox: BBox,
}

impl Detection {
    pub fn new(class: BulletClass, confidence: f32, bbox: BBox) -> Self {
        Self {
            class,
            confidence,
            bbox,
        }
    }

    /// Caption drawn above the box, e.g. `bullet 0.87`.
    pub fn label(&self) -> String {
        format!("{} {:.2}", self.class.label(), self.confidence)
    }
}
