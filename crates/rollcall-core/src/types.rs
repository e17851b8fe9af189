use image::GrayImage;
use serde::{Deserialize, Serialize};

/// Bounding box for a detected face, in frame pixel coordinates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    pub confidence: f32,
}

/// Integer pixel rectangle, guaranteed to lie inside the frame it was clamped to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PixelRect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl BoundingBox {
    fn right(&self) -> f32 {
        self.x + self.width
    }

    fn bottom(&self) -> f32 {
        self.y + self.height
    }

    /// Intersection over union with `other`; 0 for degenerate boxes.
    pub fn iou(&self, other: &BoundingBox) -> f32 {
        let overlap_w = (self.right().min(other.right()) - self.x.max(other.x)).max(0.0);
        let overlap_h = (self.bottom().min(other.bottom()) - self.y.max(other.y)).max(0.0);
        let overlap = overlap_w * overlap_h;
        let union = self.width * self.height + other.width * other.height - overlap;
        if union > 0.0 {
            overlap / union
        } else {
            0.0
        }
    }

    /// Clamp the box to a `width`×`height` frame.
    ///
    /// Returns `None` when nothing of the box remains inside the frame.
    pub fn clamp_to(&self, width: u32, height: u32) -> Option<PixelRect> {
        let x0 = self.x.floor().max(0.0);
        let y0 = self.y.floor().max(0.0);
        let x1 = (self.x + self.width).ceil().min(width as f32);
        let y1 = (self.y + self.height).ceil().min(height as f32);

        if x1 <= x0 || y1 <= y0 {
            return None;
        }

        Some(PixelRect {
            x: x0 as u32,
            y: y0 as u32,
            width: (x1 - x0) as u32,
            height: (y1 - y0) as u32,
        })
    }
}

impl PixelRect {
    /// Copy the region out of `frame` as an owned grayscale image.
    pub fn crop(&self, frame: &GrayImage) -> GrayImage {
        image::imageops::crop_imm(frame, self.x, self.y, self.width, self.height).to_image()
    }
}

/// Raw classifier output for one face crop.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Prediction {
    /// Best-matching label id.
    pub label: i32,
    /// Distance to the best match. Lower means more similar.
    pub distance: f64,
}

/// Outcome of applying the recognition threshold to a [`Prediction`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Identity {
    Known(String),
    Unknown,
}

impl Identity {
    pub fn name(&self) -> &str {
        match self {
            Identity::Known(name) => name,
            Identity::Unknown => "Unknown",
        }
    }

    pub fn is_known(&self) -> bool {
        matches!(self, Identity::Known(_))
    }
}

/// One recognized face in a frame.
#[derive(Debug, Clone)]
pub struct Recognition {
    pub rect: PixelRect,
    pub identity: Identity,
    pub prediction: Prediction,
}

/// Strategy for scoring a face crop against a trained gallery.
pub trait Classifier {
    type Error: std::error::Error + Send + Sync + 'static;

    fn predict(&self, face: &GrayImage) -> Result<Prediction, Self::Error>;
}
