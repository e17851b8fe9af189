use anyhow::{Context, Result};
use image::GrayImage;
use rollcall_core::{
    training, AttendanceStore, Config, FrameSource, LabelMap, LbphModel, LbphParams, LoopSummary,
    Recognizer, ScrfdDetector,
};
use rollcall_hw::{Camera, CameraError, CaptureSession, FrameError};
use std::sync::atomic::AtomicBool;

/// Feeds camera frames to the recognition loop.
struct CameraSource<'a> {
    session: CaptureSession<'a>,
}

impl FrameSource for CameraSource<'_> {
    type Error = CameraError;

    fn next_frame(&mut self) -> Result<GrayImage, CameraError> {
        let frame = self.session.next_frame()?;
        let got = frame.pixels.len();
        GrayImage::from_raw(frame.width, frame.height, frame.pixels).ok_or_else(|| {
            FrameError::ShortBuffer {
                format: "luma",
                needed: frame.width as usize * frame.height as usize,
                got,
            }
            .into()
        })
    }
}

pub fn load_detector(config: &Config) -> Result<ScrfdDetector> {
    let detector = ScrfdDetector::load(&config.detector_model_path, config.detector_params())
        .context("failed to load face detector")?;
    tracing::info!(path = %config.detector_model_path.display(), "SCRFD detector loaded");
    Ok(detector)
}

/// Retrain from the dataset and persist the model and labels.
pub fn train(config: &Config, detector: &mut ScrfdDetector) -> Result<training::Trained> {
    println!("Training from {}...", config.dataset_dir.display());
    let trained = training::train_and_save(
        &config.dataset_dir,
        detector,
        LbphParams::default(),
        &config.model_path,
        &config.labels_path,
    )?;

    let report = &trained.report;
    println!(
        "Training complete: {} people, {} faces from {} images ({} unreadable, {} faces rejected). Model saved to {}",
        report.people,
        report.faces,
        report.images_loaded,
        report.images_skipped,
        report.faces_rejected,
        config.model_path.display()
    );
    Ok(trained)
}

/// Load the persisted model, training first if there is none.
fn load_or_train(config: &Config, detector: &mut ScrfdDetector) -> Result<(LbphModel, LabelMap)> {
    if !config.model_path.exists() {
        tracing::info!(path = %config.model_path.display(), "no trained model, training now");
        let trained = train(config, detector)?;
        return Ok((trained.model, trained.labels));
    }

    let model = LbphModel::load(&config.model_path).context("failed to load trained model")?;
    let labels = LabelMap::load(&config.labels_path).context("failed to load label file")?;
    if labels.is_empty() {
        tracing::warn!(
            path = %config.labels_path.display(),
            "label map is empty, every face will be reported as unknown"
        );
    }
    Ok((model, labels))
}

/// Open the camera and run the recognition loop until `stop` is raised or
/// the camera fails.
pub fn run(config: &Config, stop: &AtomicBool) -> Result<LoopSummary> {
    let mut detector = load_detector(config)?;
    let (model, labels) = load_or_train(config, &mut detector)?;
    tracing::info!(people = labels.len(), samples = model.sample_count(), "recognizer ready");

    let camera = Camera::open(&config.camera_device, config.frame_width, config.frame_height)
        .with_context(|| format!("failed to open camera {}", config.camera_device))?;
    let (width, height) = camera.dimensions();
    tracing::info!(width, height, format = ?camera.pixel_format(), "capturing");
    let mut session = camera.stream()?;
    session.discard(config.warmup_frames)?;

    let mut source = CameraSource { session };
    let mut recognizer = Recognizer::new(detector, model, labels, config.confidence_threshold);
    let store = AttendanceStore::new(&config.attendance_path);

    println!("Running attendance system (type 'q' + Enter or press Ctrl-C to quit)");
    let summary = rollcall_core::run_session(
        &mut source,
        &mut recognizer,
        &store,
        stop,
        &config.session_options(),
        |name| {
            let now = chrono::Local::now();
            println!("{name} marked at {}", now.format("%Y-%m-%d %H:%M:%S"));
        },
    )?;
    Ok(summary)
}
