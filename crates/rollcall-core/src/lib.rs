//! rollcall-core — Face recognition attendance engine.
//!
//! SCRFD face detection via ONNX Runtime, an LBPH recognizer trained from a
//! directory of labeled images, and the once-per-day attendance ledger.

pub mod attendance;
pub mod config;
pub mod detector;
pub mod labels;
pub mod lbph;
pub mod recognition;
pub mod report;
mod staging;
pub mod training;
pub mod types;

pub use attendance::{AttendanceError, AttendanceRecord, AttendanceStore, Ledger};
pub use config::{Config, ConfigError};
pub use detector::{DetectorError, DetectorParams, FaceDetector, ScrfdDetector};
pub use labels::{LabelError, LabelMap};
pub use lbph::{LbphError, LbphModel, LbphParams};
pub use recognition::{
    classify, run_session, FrameSource, LoopError, LoopSummary, Recognizer, SessionOptions,
};
pub use training::{TrainError, TrainReport, Trained};
pub use types::{BoundingBox, Classifier, Identity, PixelRect, Prediction, Recognition};
