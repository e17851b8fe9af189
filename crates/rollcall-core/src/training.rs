//! Build a training set from a `dataset/<person>/<image>` tree and fit the
//! LBPH model over the detected face crops.

use crate::detector::{DetectorError, FaceDetector};
use crate::labels::{LabelError, LabelMap};
use crate::lbph::{LbphError, LbphModel, LbphParams};
use crate::staging;
use image::GrayImage;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum TrainError {
    #[error("cannot read dataset directory {path}: {source}")]
    DatasetUnreadable {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("no faces found in dataset")]
    NoFacesFound,
    #[error("detector error: {0}")]
    Detector(#[from] DetectorError),
    #[error("model error: {0}")]
    Model(#[from] LbphError),
    #[error("label file error: {0}")]
    Labels(#[from] LabelError),
}

/// Counters describing what a training pass consumed and discarded.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TrainReport {
    pub people: usize,
    pub images_loaded: usize,
    /// Files that could not be decoded as images.
    pub images_skipped: usize,
    pub faces: usize,
    /// Detected regions too small (or fully off-frame) to describe.
    pub faces_rejected: usize,
}

/// Labeled face crops gathered from a dataset directory.
#[derive(Debug, Default)]
pub struct TrainingSet {
    pub faces: Vec<(GrayImage, i32)>,
    pub labels: LabelMap,
    pub report: TrainReport,
}

/// A fitted model together with the names its label ids map to.
pub struct Trained {
    pub model: LbphModel,
    pub labels: LabelMap,
    pub report: TrainReport,
}

impl Trained {
    /// Write the model and label map, overwriting earlier files.
    ///
    /// Both files are fully written to temp files before either is renamed
    /// into place, so a failed write leaves the previous pair untouched.
    /// Labels are committed first: a model never appears without them.
    pub fn persist(&self, model_path: &Path, labels_path: &Path) -> Result<(), TrainError> {
        let mut model_tmp = staging::beside(model_path).map_err(LbphError::from)?;
        self.model.write_to(model_tmp.as_file_mut())?;
        let mut labels_tmp = staging::beside(labels_path).map_err(LabelError::from)?;
        self.labels.write_to(labels_tmp.as_file_mut())?;

        labels_tmp
            .persist(labels_path)
            .map_err(|e| LabelError::from(e.error))?;
        model_tmp
            .persist(model_path)
            .map_err(|e| LbphError::from(e.error))?;
        tracing::info!(
            model = %model_path.display(),
            labels = %labels_path.display(),
            samples = self.model.sample_count(),
            people = self.labels.len(),
            "model and labels saved"
        );
        Ok(())
    }
}

/// Walk `dataset_dir` and collect one crop per detected face.
///
/// Each immediate subdirectory is a person and gets the next label id, in
/// name order. Files that do not decode as images are counted and skipped.
pub fn collect_faces<D: FaceDetector + ?Sized>(
    dataset_dir: &Path,
    detector: &mut D,
    params: &LbphParams,
) -> Result<TrainingSet, TrainError> {
    let (min_w, min_h) = params.min_face_dims();
    let mut set = TrainingSet::default();

    for person_dir in sorted_entries(dataset_dir)?.into_iter().filter(|p| p.is_dir()) {
        let Some(person) = person_dir.file_name().and_then(|n| n.to_str()) else {
            tracing::warn!(path = %person_dir.display(), "skipping non UTF-8 person directory");
            continue;
        };
        let label = set.labels.push(person);
        set.report.people += 1;
        tracing::info!(person, label, "collecting faces");

        for image_path in sorted_entries(&person_dir)?.into_iter().filter(|p| p.is_file()) {
            let gray = match image::open(&image_path) {
                Ok(img) => img.to_luma8(),
                Err(e) => {
                    set.report.images_skipped += 1;
                    tracing::debug!(path = %image_path.display(), error = %e, "skipping unreadable image");
                    continue;
                }
            };
            set.report.images_loaded += 1;

            let (width, height) = gray.dimensions();
            for face in detector.detect(&gray)? {
                match face.clamp_to(width, height) {
                    Some(rect) if rect.width >= min_w && rect.height >= min_h => {
                        set.faces.push((rect.crop(&gray), label));
                        set.report.faces += 1;
                    }
                    _ => set.report.faces_rejected += 1,
                }
            }
        }
    }

    Ok(set)
}

/// Collect faces from `dataset_dir` and fit an LBPH model over them.
///
/// Fails with [`TrainError::NoFacesFound`] when the dataset yields no usable
/// face crops.
pub fn train<D: FaceDetector + ?Sized>(
    dataset_dir: &Path,
    detector: &mut D,
    params: LbphParams,
) -> Result<Trained, TrainError> {
    let set = collect_faces(dataset_dir, detector, &params)?;
    if set.faces.is_empty() {
        tracing::error!(dataset = %dataset_dir.display(), report = ?set.report, "no faces found in dataset");
        return Err(TrainError::NoFacesFound);
    }

    let model = LbphModel::train(set.faces.iter().map(|(face, label)| (face, *label)), params)?;
    tracing::info!(report = ?set.report, "training complete");

    Ok(Trained {
        model,
        labels: set.labels,
        report: set.report,
    })
}

/// [`train`], then persist the result. Nothing is written on failure.
pub fn train_and_save<D: FaceDetector + ?Sized>(
    dataset_dir: &Path,
    detector: &mut D,
    params: LbphParams,
    model_path: &Path,
    labels_path: &Path,
) -> Result<Trained, TrainError> {
    let trained = train(dataset_dir, detector, params)?;
    trained.persist(model_path, labels_path)?;
    Ok(trained)
}

fn sorted_entries(dir: &Path) -> Result<Vec<PathBuf>, TrainError> {
    let unreadable = |source| TrainError::DatasetUnreadable {
        path: dir.to_path_buf(),
        source,
    };
    let mut paths = std::fs::read_dir(dir)
        .map_err(unreadable)?
        .map(|entry| entry.map(|e| e.path()))
        .collect::<Result<Vec<_>, _>>()
        .map_err(unreadable)?;
    paths.sort();
    Ok(paths)
}
