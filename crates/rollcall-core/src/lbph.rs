//! Local Binary Patterns Histogram (LBPH) face recognizer.
//!
//! Each face crop is turned into a circular LBP image, split into a grid of
//! cells, and summarised as one normalized 2^neighbors-bin histogram per cell.
//! Prediction is nearest-neighbour over all training histograms using the
//! alternative chi-square distance, so the returned distance is lower-is-better
//! and roughly bounded by `2 * grid_x * grid_y`.

use crate::staging;
use crate::types::{Classifier, Prediction};
use image::GrayImage;
use serde::{Deserialize, Serialize};
use std::f64::consts::PI;
use std::io::{BufWriter, Write};
use std::path::Path;
use thiserror::Error;

/// Tolerance for the "neighbour >= centre" comparison on interpolated samples.
const LBP_EPSILON: f64 = 1e-6;
const MAX_NEIGHBORS: u32 = 16;
const MAX_RADIUS: u32 = 32;
const MAX_GRID: u32 = 64;

#[derive(Error, Debug)]
pub enum LbphError {
    #[error("training set is empty")]
    EmptyTrainingSet,
    #[error("face crop {width}x{height} is smaller than the {min_width}x{min_height} minimum")]
    FaceTooSmall {
        width: u32,
        height: u32,
        min_width: u32,
        min_height: u32,
    },
    #[error("model has not been trained")]
    Untrained,
    #[error("invalid LBPH model: {0}")]
    InvalidModel(String),
    #[error("model file not found: {0}")]
    ModelNotFound(String),
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
    #[error("model serialization: {0}")]
    Serde(#[from] serde_json::Error),
}

/// LBP operator and grid layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LbphParams {
    pub radius: u32,
    pub neighbors: u32,
    pub grid_x: u32,
    pub grid_y: u32,
}

impl Default for LbphParams {
    fn default() -> Self {
        Self {
            radius: 1,
            neighbors: 8,
            grid_x: 8,
            grid_y: 8,
        }
    }
}

impl LbphParams {
    /// Smallest crop (width, height) that yields at least one LBP pixel per grid cell.
    pub fn min_face_dims(&self) -> (u32, u32) {
        (2 * self.radius + self.grid_x, 2 * self.radius + self.grid_y)
    }

    /// Reject layouts that would overflow the LBP codes or divide by zero.
    pub fn validate(&self) -> Result<(), LbphError> {
        let invalid = |what: String| Err(LbphError::InvalidModel(what));
        if !(1..=MAX_NEIGHBORS).contains(&self.neighbors) {
            return invalid(format!("neighbors {} outside 1..={MAX_NEIGHBORS}", self.neighbors));
        }
        if !(1..=MAX_RADIUS).contains(&self.radius) {
            return invalid(format!("radius {} outside 1..={MAX_RADIUS}", self.radius));
        }
        if !(1..=MAX_GRID).contains(&self.grid_x) || !(1..=MAX_GRID).contains(&self.grid_y) {
            return invalid(format!(
                "grid {}x{} outside 1..={MAX_GRID}",
                self.grid_x, self.grid_y
            ));
        }
        Ok(())
    }

    fn num_patterns(&self) -> usize {
        1usize << self.neighbors
    }

    /// Length of one sample's concatenated histogram.
    fn histogram_len(&self) -> usize {
        self.grid_x as usize * self.grid_y as usize * self.num_patterns()
    }

    fn check_size(&self, face: &GrayImage) -> Result<(), LbphError> {
        let (min_width, min_height) = self.min_face_dims();
        let (width, height) = face.dimensions();
        if width < min_width || height < min_height {
            return Err(LbphError::FaceTooSmall {
                width,
                height,
                min_width,
                min_height,
            });
        }
        Ok(())
    }
}

/// A trained LBPH model: one spatial histogram per training sample.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LbphModel {
    params: LbphParams,
    histograms: Vec<Vec<f32>>,
    labels: Vec<i32>,
}

impl LbphModel {
    /// Fit the model over `(face crop, label id)` pairs.
    pub fn train<'a, I>(samples: I, params: LbphParams) -> Result<Self, LbphError>
    where
        I: IntoIterator<Item = (&'a GrayImage, i32)>,
    {
        params.validate()?;
        let mut histograms = Vec::new();
        let mut labels = Vec::new();

        for (face, label) in samples {
            params.check_size(face)?;
            histograms.push(spatial_histogram(&elbp(face, &params), &params));
            labels.push(label);
        }

        if histograms.is_empty() {
            return Err(LbphError::EmptyTrainingSet);
        }

        tracing::info!(samples = labels.len(), ?params, "LBPH model trained");

        Ok(Self {
            params,
            histograms,
            labels,
        })
    }

    pub fn params(&self) -> LbphParams {
        self.params
    }

    /// Number of training samples held by the model.
    pub fn sample_count(&self) -> usize {
        self.labels.len()
    }

    /// Find the nearest training sample to `face`.
    pub fn predict(&self, face: &GrayImage) -> Result<Prediction, LbphError> {
        self.params.check_size(face)?;
        let query = spatial_histogram(&elbp(face, &self.params), &self.params);

        self.histograms
            .iter()
            .zip(&self.labels)
            .map(|(hist, &label)| Prediction {
                label,
                distance: chi_square_alt(hist, &query),
            })
            .min_by(|a, b| a.distance.total_cmp(&b.distance))
            .ok_or(LbphError::Untrained)
    }

    /// Serialize the model as JSON into `writer`.
    pub fn write_to<W: Write>(&self, writer: W) -> Result<(), LbphError> {
        let mut writer = BufWriter::new(writer);
        serde_json::to_writer(&mut writer, self)?;
        writer.flush()?;
        Ok(())
    }

    /// Write the model to `path`, atomically replacing any previous file.
    pub fn save(&self, path: &Path) -> Result<(), LbphError> {
        let mut tmp = staging::beside(path)?;
        self.write_to(tmp.as_file_mut())?;
        tmp.persist(path).map_err(|e| e.error)?;
        tracing::info!(path = %path.display(), samples = self.sample_count(), "LBPH model saved");
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Self, LbphError> {
        if !path.exists() {
            return Err(LbphError::ModelNotFound(path.display().to_string()));
        }
        let file = std::fs::File::open(path)?;
        let model: Self = serde_json::from_reader(std::io::BufReader::new(file))?;
        if model.labels.is_empty() || model.labels.len() != model.histograms.len() {
            return Err(LbphError::Untrained);
        }
        model.params.validate()?;
        let expected = model.params.histogram_len();
        if let Some(bad) = model.histograms.iter().position(|h| h.len() != expected) {
            return Err(LbphError::InvalidModel(format!(
                "sample {bad} has {} histogram bins, params need {expected}",
                model.histograms[bad].len()
            )));
        }
        tracing::info!(path = %path.display(), samples = model.sample_count(), "LBPH model loaded");
        Ok(model)
    }
}

impl Classifier for LbphModel {
    type Error = LbphError;

    fn predict(&self, face: &GrayImage) -> Result<Prediction, LbphError> {
        LbphModel::predict(self, face)
    }
}

/// Extended (circular) LBP with bilinear sampling.
///
/// The output is `(width - 2r) x (height - 2r)`, row-major.
fn elbp(src: &GrayImage, params: &LbphParams) -> LbpImage {
    let radius = params.radius as i64;
    let (width, height) = src.dimensions();
    let out_w = width as usize - 2 * radius as usize;
    let out_h = height as usize - 2 * radius as usize;
    let mut codes = vec![0u32; out_w * out_h];

    let px = |x: i64, y: i64| src.get_pixel(x as u32, y as u32)[0] as f64;

    for n in 0..params.neighbors {
        let angle = 2.0 * PI * n as f64 / params.neighbors as f64;
        let sx = radius as f64 * angle.cos();
        let sy = -(radius as f64) * angle.sin();

        let fx = sx.floor() as i64;
        let fy = sy.floor() as i64;
        let cx = sx.ceil() as i64;
        let cy = sy.ceil() as i64;
        let tx = sx - sx.floor();
        let ty = sy - sy.floor();

        let w1 = (1.0 - tx) * (1.0 - ty);
        let w2 = tx * (1.0 - ty);
        let w3 = (1.0 - tx) * ty;
        let w4 = tx * ty;

        for y in radius..height as i64 - radius {
            for x in radius..width as i64 - radius {
                let sample = w1 * px(x + fx, y + fy)
                    + w2 * px(x + cx, y + fy)
                    + w3 * px(x + fx, y + cy)
                    + w4 * px(x + cx, y + cy);
                if sample + LBP_EPSILON >= px(x, y) {
                    let idx = (y - radius) as usize * out_w + (x - radius) as usize;
                    codes[idx] |= 1 << n;
                }
            }
        }
    }

    LbpImage {
        width: out_w,
        height: out_h,
        codes,
    }
}

struct LbpImage {
    width: usize,
    height: usize,
    codes: Vec<u32>,
}

/// Concatenate one normalized histogram per grid cell.
fn spatial_histogram(lbp: &LbpImage, params: &LbphParams) -> Vec<f32> {
    let bins = params.num_patterns();
    let grid_x = params.grid_x as usize;
    let grid_y = params.grid_y as usize;
    let cell_w = lbp.width / grid_x;
    let cell_h = lbp.height / grid_y;
    let cell_pixels = (cell_w * cell_h) as f32;

    let mut result = vec![0f32; grid_x * grid_y * bins];
    for row in 0..grid_y {
        for col in 0..grid_x {
            let offset = (row * grid_x + col) * bins;
            let hist = &mut result[offset..offset + bins];
            for y in row * cell_h..(row + 1) * cell_h {
                for x in col * cell_w..(col + 1) * cell_w {
                    hist[lbp.codes[y * lbp.width + x] as usize] += 1.0;
                }
            }
            if cell_pixels > 0.0 {
                hist.iter_mut().for_each(|v| *v /= cell_pixels);
            }
        }
    }
    result
}

/// Alternative chi-square distance: `2 * Σ (a - b)² / (a + b)`.
fn chi_square_alt(a: &[f32], b: &[f32]) -> f64 {
    let sum: f64 = a
        .iter()
        .zip(b)
        .map(|(&a, &b)| {
            let (a, b) = (a as f64, b as f64);
            let denom = a + b;
            if denom.abs() > f64::EPSILON {
                (a - b).powi(2) / denom
            } else {
                0.0
            }
        })
        .sum();
    2.0 * sum
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Luma;

    fn vertical_stripes(size: u32) -> GrayImage {
        GrayImage::from_fn(size, size, |x, _| Luma([if (x / 2) % 2 == 0 { 40 } else { 200 }]))
    }

    fn horizontal_stripes(size: u32) -> GrayImage {
        GrayImage::from_fn(size, size, |_, y| Luma([if (y / 2) % 2 == 0 { 40 } else { 200 }]))
    }

    fn gradient(size: u32, offset: u8) -> GrayImage {
        GrayImage::from_fn(size, size, |x, y| Luma([offset + ((x * 3 + y * 2) % 120) as u8]))
    }

    #[test]
    fn test_spatial_histogram_cells_normalized() {
        let params = LbphParams::default();
        let hist = spatial_histogram(&elbp(&gradient(40, 0), &params), &params);
        assert_eq!(hist.len(), 8 * 8 * 256);
        for cell in hist.chunks(256) {
            let total: f32 = cell.iter().sum();
            assert!((total - 1.0).abs() < 1e-5, "cell sums to {total}");
        }
    }

    #[test]
    fn test_elbp_uniform_image_sets_all_bits() {
        let params = LbphParams::default();
        let flat = GrayImage::from_pixel(5, 5, Luma([90]));
        let lbp = elbp(&flat, &params);
        assert_eq!((lbp.width, lbp.height), (3, 3));
        assert!(lbp.codes.iter().all(|&c| c == 0xFF));
    }

    #[test]
    fn test_chi_square_identical_is_zero() {
        let a = vec![0.25f32, 0.25, 0.5, 0.0];
        assert_eq!(chi_square_alt(&a, &a), 0.0);
    }

    #[test]
    fn test_chi_square_disjoint() {
        let a = vec![1.0f32, 0.0];
        let b = vec![0.0f32, 1.0];
        // 2 * (1/1 + 1/1)
        assert!((chi_square_alt(&a, &b) - 4.0).abs() < 1e-9);
        assert_eq!(chi_square_alt(&a, &b), chi_square_alt(&b, &a));
    }

    #[test]
    fn test_predict_nearest_label() {
        let a = vertical_stripes(40);
        let b = horizontal_stripes(40);
        let model = LbphModel::train([(&a, 0), (&b, 1)], LbphParams::default()).unwrap();
        assert_eq!(model.sample_count(), 2);

        let pa = model.predict(&a).unwrap();
        assert_eq!(pa.label, 0);
        assert!(pa.distance < 1e-9);

        let pb = model.predict(&b).unwrap();
        assert_eq!(pb.label, 1);
        assert!(pb.distance < 1e-9);
    }

    #[test]
    fn test_predict_ignores_uniform_brightness_shift() {
        let base = gradient(40, 0);
        let other = vertical_stripes(40);
        let model = LbphModel::train([(&base, 7), (&other, 3)], LbphParams::default()).unwrap();

        let brighter = gradient(40, 60);
        let p = model.predict(&brighter).unwrap();
        assert_eq!(p.label, 7);
        assert!(p.distance < 1e-6, "distance {}", p.distance);
    }

    #[test]
    fn test_train_empty_fails() {
        let result = LbphModel::train(std::iter::empty(), LbphParams::default());
        assert!(matches!(result, Err(LbphError::EmptyTrainingSet)));
    }

    #[test]
    fn test_too_small_face_rejected() {
        let tiny = GrayImage::new(9, 9);
        let result = LbphModel::train([(&tiny, 0)], LbphParams::default());
        assert!(matches!(result, Err(LbphError::FaceTooSmall { min_width: 10, .. })));
    }

    #[test]
    fn test_save_load_preserves_predictions() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("trainer.json");

        let a = vertical_stripes(32);
        let b = horizontal_stripes(32);
        let model = LbphModel::train([(&a, 0), (&b, 1)], LbphParams::default()).unwrap();
        model.save(&path).unwrap();

        let loaded = LbphModel::load(&path).unwrap();
        assert_eq!(loaded.params(), LbphParams::default());
        assert_eq!(loaded.predict(&b).unwrap().label, 1);
    }

    fn write_model(path: &Path, params: LbphParams, bins: usize) {
        let model = LbphModel {
            params,
            histograms: vec![vec![0.0; bins]],
            labels: vec![0],
        };
        std::fs::write(path, serde_json::to_string(&model).unwrap()).unwrap();
    }

    #[test]
    fn test_load_rejects_out_of_range_params() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("trainer.json");

        let wide = LbphParams { neighbors: 40, ..LbphParams::default() };
        write_model(&path, wide, 4);
        assert!(matches!(LbphModel::load(&path), Err(LbphError::InvalidModel(_))));

        let no_grid = LbphParams { grid_x: 0, ..LbphParams::default() };
        write_model(&path, no_grid, 0);
        assert!(matches!(LbphModel::load(&path), Err(LbphError::InvalidModel(_))));
    }

    #[test]
    fn test_load_rejects_histogram_length_mismatch() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("trainer.json");

        write_model(&path, LbphParams::default(), 100);
        assert!(matches!(LbphModel::load(&path), Err(LbphError::InvalidModel(_))));

        write_model(&path, LbphParams::default(), 8 * 8 * 256);
        assert!(LbphModel::load(&path).is_ok());
    }

    #[test]
    fn test_train_rejects_invalid_params() {
        let face = gradient(40, 0);
        let params = LbphParams { neighbors: 0, ..LbphParams::default() };
        let result = LbphModel::train([(&face, 0)], params);
        assert!(matches!(result, Err(LbphError::InvalidModel(_))));
    }

    #[test]
    fn test_load_missing_model() {
        let dir = tempfile::tempdir().unwrap();
        let result = LbphModel::load(&dir.path().join("absent.json"));
        assert!(matches!(result, Err(LbphError::ModelNotFound(_))));
    }
}
