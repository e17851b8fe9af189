//! SCRFD face detection through ONNX Runtime.
//!
//! Frames are letterboxed into the 640×640 network input, the three stride
//! heads are decoded into frame-space boxes, then NMS and a minimum face
//! size are applied. Keypoint heads are ignored since LBPH works on plain
//! box crops.

use crate::types::BoundingBox;
use image::imageops::{self, FilterType};
use image::GrayImage;
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use std::path::Path;
use thiserror::Error;

const INPUT_SIDE: u32 = 640;
const PIXEL_MEAN: f32 = 127.5;
const PIXEL_SCALE: f32 = 1.0 / 128.0;
const STRIDES: [u32; 3] = [8, 16, 32];
const ANCHORS_PER_CELL: usize = 2;

#[derive(Error, Debug)]
pub enum DetectorError {
    #[error("no detector model at {0} (expected an SCRFD det_10g.onnx export)")]
    ModelNotFound(String),
    #[error("unexpected detector output: {0}")]
    BadOutput(String),
    #[error("onnx runtime: {0}")]
    Ort(#[from] ort::Error),
}

/// Thresholds applied to raw detector output.
#[derive(Debug, Clone, Copy)]
pub struct DetectorParams {
    /// Anchors scoring at or below this are discarded.
    pub score_threshold: f32,
    /// Overlap above which the lower-scoring box is dropped.
    pub nms_threshold: f32,
    /// Smallest accepted box side, in frame pixels.
    pub min_face_size: f32,
}

impl Default for DetectorParams {
    fn default() -> Self {
        Self {
            score_threshold: 0.5,
            nms_threshold: 0.4,
            min_face_size: 30.0,
        }
    }
}

/// Finds face regions in a grayscale frame.
pub trait FaceDetector {
    /// Boxes in frame coordinates, highest confidence first.
    fn detect(&mut self, frame: &GrayImage) -> Result<Vec<BoundingBox>, DetectorError>;
}

/// How a frame was fitted into the square network input.
#[derive(Debug, Clone, Copy)]
struct Letterbox {
    scale: f32,
    offset_x: u32,
    offset_y: u32,
    inner_w: u32,
    inner_h: u32,
}

impl Letterbox {
    fn fit(width: u32, height: u32) -> Self {
        let scale = (INPUT_SIDE as f32 / width as f32).min(INPUT_SIDE as f32 / height as f32);
        let inner_w = ((width as f32 * scale).round() as u32).clamp(1, INPUT_SIDE);
        let inner_h = ((height as f32 * scale).round() as u32).clamp(1, INPUT_SIDE);
        Self {
            scale,
            offset_x: (INPUT_SIDE - inner_w) / 2,
            offset_y: (INPUT_SIDE - inner_h) / 2,
            inner_w,
            inner_h,
        }
    }

    /// Network-input point → frame point.
    fn to_frame(&self, x: f32, y: f32) -> (f32, f32) {
        (
            (x - self.offset_x as f32) / self.scale,
            (y - self.offset_y as f32) / self.scale,
        )
    }
}

/// Which session output carries the scores and box distances of each stride.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct OutputLayout {
    scores: [usize; 3],
    boxes: [usize; 3],
}

impl OutputLayout {
    /// Exports with `score_<stride>`/`bbox_<stride>` names are matched by
    /// name; anything else is assumed to list the three score heads first,
    /// then the three box heads.
    fn from_names(names: &[String]) -> Self {
        let index_of = |head: &str, stride: u32| {
            let wanted = format!("{head}_{stride}");
            names.iter().position(|n| *n == wanted)
        };

        let mut layout = Self {
            scores: [0, 1, 2],
            boxes: [3, 4, 5],
        };
        for (slot, &stride) in STRIDES.iter().enumerate() {
            match (index_of("score", stride), index_of("bbox", stride)) {
                (Some(s), Some(b)) => {
                    layout.scores[slot] = s;
                    layout.boxes[slot] = b;
                }
                _ => {
                    tracing::debug!(?names, "output names not recognised, using positional layout");
                    return Self {
                        scores: [0, 1, 2],
                        boxes: [3, 4, 5],
                    };
                }
            }
        }
        layout
    }
}

/// SCRFD detector backed by an ONNX Runtime session.
pub struct ScrfdDetector {
    session: Session,
    params: DetectorParams,
    layout: OutputLayout,
}

impl ScrfdDetector {
    pub fn load(model_path: &Path, params: DetectorParams) -> Result<Self, DetectorError> {
        if !model_path.exists() {
            return Err(DetectorError::ModelNotFound(model_path.display().to_string()));
        }

        let session = Session::builder()?
            .with_intra_threads(2)?
            .commit_from_file(model_path)?;

        let names: Vec<String> = session.outputs().iter().map(|o| o.name().to_string()).collect();
        if names.len() < 6 {
            return Err(DetectorError::BadOutput(format!(
                "need score and box heads for three strides, model has {} outputs",
                names.len()
            )));
        }
        let layout = OutputLayout::from_names(&names);
        tracing::info!(path = %model_path.display(), ?layout, "face detector loaded");

        Ok(Self {
            session,
            params,
            layout,
        })
    }
}

impl FaceDetector for ScrfdDetector {
    fn detect(&mut self, frame: &GrayImage) -> Result<Vec<BoundingBox>, DetectorError> {
        if frame.width() == 0 || frame.height() == 0 {
            return Ok(Vec::new());
        }

        let (input, letterbox) = input_tensor(frame);
        let outputs = self
            .session
            .run(ort::inputs![TensorRef::from_array_view(input.view())?])?;

        let mut candidates = Vec::new();
        for (slot, &stride) in STRIDES.iter().enumerate() {
            let (_, scores) = outputs[self.layout.scores[slot]]
                .try_extract_tensor::<f32>()
                .map_err(|e| DetectorError::BadOutput(format!("stride {stride} scores: {e}")))?;
            let (_, distances) = outputs[self.layout.boxes[slot]]
                .try_extract_tensor::<f32>()
                .map_err(|e| DetectorError::BadOutput(format!("stride {stride} boxes: {e}")))?;

            candidates.extend(decode_head(
                scores,
                distances,
                stride,
                &letterbox,
                self.params.score_threshold,
            ));
        }

        Ok(select(candidates, &self.params))
    }
}

/// Resize `frame` into the network input, pad with the mean and normalise.
/// The gray channel is repeated across the three colour planes.
fn input_tensor(frame: &GrayImage) -> (Array4<f32>, Letterbox) {
    let letterbox = Letterbox::fit(frame.width(), frame.height());
    let resized = imageops::resize(frame, letterbox.inner_w, letterbox.inner_h, FilterType::Triangle);

    let side = INPUT_SIDE as usize;
    // Padding is the mean, which normalises to zero.
    let mut tensor = Array4::<f32>::zeros((1, 3, side, side));
    for (x, y, pixel) in resized.enumerate_pixels() {
        let value = (pixel[0] as f32 - PIXEL_MEAN) * PIXEL_SCALE;
        let row = (y + letterbox.offset_y) as usize;
        let col = (x + letterbox.offset_x) as usize;
        for channel in 0..3 {
            tensor[[0, channel, row, col]] = value;
        }
    }

    (tensor, letterbox)
}

/// Turn one stride head into frame-space candidate boxes.
///
/// Anchors sit on a `640 / stride` grid, two per cell; each box is given as
/// distances (left, top, right, bottom) from the anchor in stride units.
fn decode_head(
    scores: &[f32],
    distances: &[f32],
    stride: u32,
    letterbox: &Letterbox,
    score_threshold: f32,
) -> Vec<BoundingBox> {
    let cells_per_row = (INPUT_SIDE / stride) as usize;
    let step = stride as f32;

    scores
        .iter()
        .take(cells_per_row * cells_per_row * ANCHORS_PER_CELL)
        .enumerate()
        .filter(|&(_, &score)| score > score_threshold)
        .filter_map(|(anchor, &score)| {
            let d = distances.get(anchor * 4..anchor * 4 + 4)?;
            let cell = anchor / ANCHORS_PER_CELL;
            let cx = (cell % cells_per_row) as f32 * step;
            let cy = (cell / cells_per_row) as f32 * step;

            let (left, top) = letterbox.to_frame(cx - d[0] * step, cy - d[1] * step);
            let (right, bottom) = letterbox.to_frame(cx + d[2] * step, cy + d[3] * step);
            Some(BoundingBox {
                x: left,
                y: top,
                width: right - left,
                height: bottom - top,
                confidence: score,
            })
        })
        .collect()
}

/// Greedy NMS followed by the minimum-size filter. Output is ordered by
/// descending confidence.
fn select(mut candidates: Vec<BoundingBox>, params: &DetectorParams) -> Vec<BoundingBox> {
    candidates.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));

    let mut kept: Vec<BoundingBox> = Vec::with_capacity(candidates.len());
    for candidate in candidates {
        if kept.iter().all(|k| k.iou(&candidate) <= params.nms_threshold) {
            kept.push(candidate);
        }
    }

    kept.retain(|b| b.width >= params.min_face_size && b.height >= params.min_face_size);
    kept
}
