//! Detect → classify → record pipeline and the live capture loop.

use crate::attendance::AttendanceStore;
use crate::detector::{DetectorError, FaceDetector};
use crate::labels::LabelMap;
use crate::types::{Classifier, Identity, PixelRect, Prediction, Recognition};
use ab_glyph::FontRef;
use image::{GrayImage, Luma};
use imageproc::drawing::{draw_hollow_rect_mut, draw_text_mut, text_size};
use imageproc::rect::Rect;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use thiserror::Error;

const OVERLAY_THICKNESS: u32 = 2;
const LABEL_SCALE: f32 = 14.0;
const LABEL_GAP: i32 = 2;
const LABEL_FONT: &[u8] = include_bytes!("../assets/DejaVuSansMono.ttf");
const KNOWN_SHADE: Luma<u8> = Luma([255]);
const UNKNOWN_SHADE: Luma<u8> = Luma([0]);

#[derive(Error, Debug)]
pub enum LoopError {
    #[error("frame source failed: {0}")]
    Source(#[source] Box<dyn std::error::Error + Send + Sync>),
    #[error("detector error: {0}")]
    Detector(#[from] DetectorError),
}

/// Produces grayscale frames for the capture loop.
pub trait FrameSource {
    type Error: std::error::Error + Send + Sync + 'static;

    fn next_frame(&mut self) -> Result<GrayImage, Self::Error>;
}

/// Decide who a prediction refers to.
///
/// A face is known only when its distance is strictly below `threshold` and
/// its label id is in `labels`.
pub fn classify(prediction: &Prediction, labels: &LabelMap, threshold: f64) -> Identity {
    if prediction.distance >= threshold {
        return Identity::Unknown;
    }
    match labels.name(prediction.label) {
        Some(name) => Identity::Known(name.to_string()),
        None => Identity::Unknown,
    }
}

/// Detector, classifier and label map bundled for per-frame recognition.
pub struct Recognizer<D, C> {
    detector: D,
    classifier: C,
    labels: LabelMap,
    threshold: f64,
}

impl<D: FaceDetector, C: Classifier> Recognizer<D, C> {
    pub fn new(detector: D, classifier: C, labels: LabelMap, threshold: f64) -> Self {
        Self {
            detector,
            classifier,
            labels,
            threshold,
        }
    }

    pub fn labels(&self) -> &LabelMap {
        &self.labels
    }

    /// Detect and identify every face in `frame`.
    ///
    /// Faces the classifier cannot score (too small after clamping) are left out.
    pub fn recognize(&mut self, frame: &GrayImage) -> Result<Vec<Recognition>, DetectorError> {
        let (width, height) = frame.dimensions();
        let mut recognitions = Vec::new();

        for face in self.detector.detect(frame)? {
            let Some(rect) = face.clamp_to(width, height) else {
                continue;
            };
            let prediction = match self.classifier.predict(&rect.crop(frame)) {
                Ok(p) => p,
                Err(e) => {
                    tracing::debug!(?rect, error = %e, "skipping face the classifier cannot score");
                    continue;
                }
            };
            let identity = classify(&prediction, &self.labels, self.threshold);
            recognitions.push(Recognition {
                rect,
                identity,
                prediction,
            });
        }

        Ok(recognitions)
    }
}

/// Box every recognition and write its name above the box: bright for
/// known faces, dark for unknown.
pub fn draw_overlay(frame: &mut GrayImage, recognitions: &[Recognition]) {
    let font = match FontRef::try_from_slice(LABEL_FONT) {
        Ok(font) => Some(font),
        Err(e) => {
            tracing::warn!(error = %e, "overlay font unusable, drawing boxes only");
            None
        }
    };

    for r in recognitions {
        let shade = if r.identity.is_known() { KNOWN_SHADE } else { UNKNOWN_SHADE };
        draw_box(frame, &r.rect, shade);
        if let Some(font) = &font {
            draw_label(frame, font, &r.rect, r.identity.name(), shade);
        }
    }
}

fn draw_box(frame: &mut GrayImage, rect: &PixelRect, shade: Luma<u8>) {
    for inset in 0..OVERLAY_THICKNESS {
        let width = rect.width.saturating_sub(2 * inset);
        let height = rect.height.saturating_sub(2 * inset);
        if width == 0 || height == 0 {
            break;
        }
        let outline = Rect::at((rect.x + inset) as i32, (rect.y + inset) as i32).of_size(width, height);
        draw_hollow_rect_mut(frame, outline, shade);
    }
}

/// Above the box when it fits, otherwise just inside its top edge.
fn draw_label(frame: &mut GrayImage, font: &FontRef<'_>, rect: &PixelRect, name: &str, shade: Luma<u8>) {
    let (_, text_height) = text_size(LABEL_SCALE, font, name);
    let above = rect.y as i32 - text_height as i32 - LABEL_GAP;
    let y = if above >= 0 {
        above
    } else {
        (rect.y + OVERLAY_THICKNESS) as i32 + LABEL_GAP
    };
    draw_text_mut(frame, shade, rect.x as i32, y, LABEL_SCALE, font, name);
}

/// Capture loop options that do not affect recognition itself.
#[derive(Debug, Clone, Default)]
pub struct SessionOptions {
    /// Where to write the annotated frame, if anywhere.
    pub preview_path: Option<PathBuf>,
    /// Write the preview every N frames (0 disables it).
    pub preview_every: u64,
}

/// What a capture loop did before it stopped.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoopSummary {
    pub frames: u64,
    pub faces: u64,
    pub known: u64,
    pub unknown: u64,
    pub newly_marked: u64,
}

/// Run capture → recognize → record until `stop` is set or the source fails.
///
/// `on_marked` is called with each person newly recorded today. A source
/// failure ends the loop with [`LoopError::Source`]; it is not retried.
pub fn run_session<S, D, C, F>(
    source: &mut S,
    recognizer: &mut Recognizer<D, C>,
    store: &AttendanceStore,
    stop: &AtomicBool,
    options: &SessionOptions,
    mut on_marked: F,
) -> Result<LoopSummary, LoopError>
where
    S: FrameSource,
    D: FaceDetector,
    C: Classifier,
    F: FnMut(&str),
{
    let mut summary = LoopSummary::default();

    while !stop.load(Ordering::Relaxed) {
        let mut frame = match source.next_frame() {
            Ok(frame) => frame,
            Err(e) => {
                tracing::error!(error = %e, ?summary, "could not read from camera");
                return Err(LoopError::Source(Box::new(e)));
            }
        };
        summary.frames += 1;

        let recognitions = recognizer.recognize(&frame)?;
        for r in &recognitions {
            summary.faces += 1;
            let Identity::Known(name) = &r.identity else {
                summary.unknown += 1;
                tracing::debug!(distance = r.prediction.distance, "unknown face");
                continue;
            };
            summary.known += 1;
            tracing::debug!(name, distance = r.prediction.distance, "recognized face");

            match store.record_if_new(name) {
                Ok(true) => {
                    summary.newly_marked += 1;
                    on_marked(name);
                }
                Ok(false) => {}
                Err(e) => tracing::error!(name, error = %e, "failed to record attendance"),
            }
        }

        if let Some(path) = &options.preview_path {
            if options.preview_every > 0 && summary.frames % options.preview_every == 0 {
                draw_overlay(&mut frame, &recognitions);
                if let Err(e) = frame.save(path) {
                    tracing::warn!(path = %path.display(), error = %e, "failed to write preview frame");
                }
            }
        }
    }

    tracing::info!(?summary, "capture loop stopped");
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::BoundingBox;
    use std::collections::VecDeque;
    use std::sync::Arc;

    struct WholeFrameDetector;

    impl FaceDetector for WholeFrameDetector {
        fn detect(&mut self, frame: &GrayImage) -> Result<Vec<BoundingBox>, DetectorError> {
            let (w, h) = frame.dimensions();
            Ok(vec![BoundingBox { x: 0.0, y: 0.0, width: w as f32, height: h as f32, confidence: 0.9 }])
        }
    }

    struct FixedClassifier(Prediction);

    impl Classifier for FixedClassifier {
        type Error = std::io::Error;

        fn predict(&self, _face: &GrayImage) -> Result<Prediction, std::io::Error> {
            Ok(self.0)
        }
    }

    #[derive(Debug, Error)]
    #[error("camera unplugged")]
    struct Unplugged;

    /// Hands out queued frames. Raises `stop` with the last frame if asked to,
    /// otherwise fails once the queue is empty.
    struct QueueSource {
        frames: VecDeque<GrayImage>,
        stop_when_drained: Option<Arc<AtomicBool>>,
    }

    impl FrameSource for QueueSource {
        type Error = Unplugged;

        fn next_frame(&mut self) -> Result<GrayImage, Unplugged> {
            let frame = self.frames.pop_front().ok_or(Unplugged)?;
            if let (true, Some(stop)) = (self.frames.is_empty(), &self.stop_when_drained) {
                stop.store(true, Ordering::Relaxed);
            }
            Ok(frame)
        }
    }

    fn labels() -> LabelMap {
        let mut labels = LabelMap::new();
        labels.push("alice");
        labels
    }

    fn frames(n: usize) -> VecDeque<GrayImage> {
        (0..n).map(|_| GrayImage::from_pixel(48, 48, Luma([120]))).collect()
    }

    #[test]
    fn test_classify_threshold_is_strict() {
        let labels = labels();
        let p = |distance| Prediction { label: 0, distance };
        assert_eq!(classify(&p(69.9), &labels, 70.0), Identity::Known("alice".into()));
        assert_eq!(classify(&p(70.0), &labels, 70.0), Identity::Unknown);
        assert_eq!(classify(&p(120.0), &labels, 70.0), Identity::Unknown);
    }

    #[test]
    fn test_classify_unmapped_label_is_unknown() {
        let p = Prediction { label: 9, distance: 1.0 };
        assert_eq!(classify(&p, &labels(), 70.0), Identity::Unknown);
    }

    #[test]
    fn test_known_face_recorded_once_across_frames() {
        let dir = tempfile::tempdir().unwrap();
        let store = AttendanceStore::new(dir.path().join("attendance.csv"));
        let stop = Arc::new(AtomicBool::new(false));
        let mut source = QueueSource { frames: frames(3), stop_when_drained: Some(stop.clone()) };
        let mut recognizer = Recognizer::new(
            WholeFrameDetector,
            FixedClassifier(Prediction { label: 0, distance: 35.0 }),
            labels(),
            70.0,
        );

        let mut announced = Vec::new();
        let summary = run_session(
            &mut source,
            &mut recognizer,
            &store,
            &stop,
            &SessionOptions::default(),
            |name| announced.push(name.to_string()),
        )
        .unwrap();

        assert_eq!(summary.known, 3);
        assert_eq!(summary.newly_marked, 1);
        assert_eq!(announced, ["alice"]);
        assert_eq!(store.load().unwrap().records.len(), 1);
    }

    #[test]
    fn test_low_confidence_face_is_unknown_and_not_recorded() {
        let dir = tempfile::tempdir().unwrap();
        let store = AttendanceStore::new(dir.path().join("attendance.csv"));
        let stop = Arc::new(AtomicBool::new(false));
        let mut source = QueueSource { frames: frames(2), stop_when_drained: Some(stop.clone()) };
        let mut recognizer = Recognizer::new(
            WholeFrameDetector,
            FixedClassifier(Prediction { label: 0, distance: 70.0 }),
            labels(),
            70.0,
        );

        let summary =
            run_session(&mut source, &mut recognizer, &store, &stop, &SessionOptions::default(), |_| {})
                .unwrap();

        assert_eq!(summary.unknown, 2);
        assert_eq!(summary.known, 0);
        assert!(!store.path().exists());
    }

    #[test]
    fn test_source_failure_aborts_loop() {
        let dir = tempfile::tempdir().unwrap();
        let store = AttendanceStore::new(dir.path().join("attendance.csv"));
        let stop = AtomicBool::new(false);
        let mut source = QueueSource { frames: frames(1), stop_when_drained: None };
        let mut recognizer = Recognizer::new(
            WholeFrameDetector,
            FixedClassifier(Prediction { label: 0, distance: 10.0 }),
            labels(),
            70.0,
        );

        let result =
            run_session(&mut source, &mut recognizer, &store, &stop, &SessionOptions::default(), |_| {});
        assert!(matches!(result, Err(LoopError::Source(_))));
        // The frame before the failure was still processed.
        assert_eq!(store.load().unwrap().records.len(), 1);
    }

    #[test]
    fn test_stop_before_start_reads_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let store = AttendanceStore::new(dir.path().join("attendance.csv"));
        let stop = AtomicBool::new(true);
        let mut source = QueueSource { frames: frames(1), stop_when_drained: None };
        let mut recognizer = Recognizer::new(
            WholeFrameDetector,
            FixedClassifier(Prediction { label: 0, distance: 10.0 }),
            labels(),
            70.0,
        );

        let summary =
            run_session(&mut source, &mut recognizer, &store, &stop, &SessionOptions::default(), |_| {})
                .unwrap();
        assert_eq!(summary, LoopSummary::default());
        assert_eq!(source.frames.len(), 1);
    }

    struct FixedBoxDetector(BoundingBox);

    impl FaceDetector for FixedBoxDetector {
        fn detect(&mut self, _frame: &GrayImage) -> Result<Vec<BoundingBox>, DetectorError> {
            Ok(vec![self.0.clone()])
        }
    }

    fn changed_in(frame: &GrayImage, xs: std::ops::Range<u32>, ys: std::ops::Range<u32>, base: u8) -> bool {
        ys.flat_map(|y| xs.clone().map(move |x| (x, y)))
            .any(|(x, y)| frame.get_pixel(x, y)[0] != base)
    }

    #[test]
    fn test_preview_written_with_overlay() {
        let dir = tempfile::tempdir().unwrap();
        let store = AttendanceStore::new(dir.path().join("attendance.csv"));
        let preview = dir.path().join("preview.png");
        let stop = Arc::new(AtomicBool::new(false));
        let frame = GrayImage::from_pixel(96, 96, Luma([120]));
        let mut source = QueueSource { frames: VecDeque::from([frame]), stop_when_drained: Some(stop.clone()) };
        let face = BoundingBox { x: 20.0, y: 40.0, width: 50.0, height: 50.0, confidence: 0.9 };
        let mut recognizer = Recognizer::new(
            FixedBoxDetector(face),
            FixedClassifier(Prediction { label: 0, distance: 35.0 }),
            labels(),
            70.0,
        );
        let options = SessionOptions { preview_path: Some(preview.clone()), preview_every: 1 };

        run_session(&mut source, &mut recognizer, &store, &stop, &options, |_| {}).unwrap();

        let saved = image::open(&preview).unwrap().to_luma8();
        assert_eq!(saved.get_pixel(20, 40)[0], 255);
        assert_eq!(saved.get_pixel(21, 41)[0], 255);
        assert_eq!(saved.get_pixel(45, 65)[0], 120);
        // Name label sits in the band above the box.
        assert!(changed_in(&saved, 20..70, 20..40, 120));
        assert!(!changed_in(&saved, 0..96, 0..10, 120));
    }

    #[test]
    fn test_label_moves_inside_box_at_top_edge() {
        let mut frame = GrayImage::from_pixel(64, 64, Luma([120]));
        let recognition = Recognition {
            rect: PixelRect { x: 0, y: 0, width: 64, height: 64 },
            identity: Identity::Unknown,
            prediction: Prediction { label: 0, distance: 90.0 },
        };
        draw_overlay(&mut frame, &[recognition]);

        assert_eq!(frame.get_pixel(0, 0)[0], 0);
        assert!(changed_in(&frame, 4..60, 4..30, 120));
    }

    #[test]
    fn test_box_outline_only() {
        let mut frame = GrayImage::from_pixel(10, 10, Luma([100]));
        draw_box(&mut frame, &PixelRect { x: 1, y: 1, width: 8, height: 8 }, KNOWN_SHADE);
        assert_eq!(frame.get_pixel(0, 0)[0], 100);
        assert_eq!(frame.get_pixel(1, 1)[0], 255);
        assert_eq!(frame.get_pixel(2, 2)[0], 255);
        assert_eq!(frame.get_pixel(8, 8)[0], 255);
        assert_eq!(frame.get_pixel(4, 4)[0], 100);
        assert_eq!(frame.get_pixel(9, 9)[0], 100);
    }
}
