use crate::detector::DetectorParams;
use crate::recognition::SessionOptions;
use serde::Deserialize;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use thiserror::Error;

/// Default LBPH distance below which a face counts as recognized.
pub const DEFAULT_CONFIDENCE_THRESHOLD: f64 = 70.0;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("cannot read config file {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("invalid config file {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
}

/// Paths and tunables shared by the runner and the dashboard.
///
/// Layered as: built-in defaults, then an optional TOML file, then
/// `ROLLCALL_*` environment variables.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    /// One subdirectory of face images per person.
    pub dataset_dir: PathBuf,
    /// Trained LBPH model.
    pub model_path: PathBuf,
    /// `id,name` label file written next to the model.
    pub labels_path: PathBuf,
    /// Attendance ledger CSV.
    pub attendance_path: PathBuf,
    /// SCRFD ONNX export used for face detection.
    pub detector_model_path: PathBuf,
    /// V4L2 device path.
    pub camera_device: String,
    pub frame_width: u32,
    pub frame_height: u32,
    /// Frames discarded after opening the camera (AGC/AE settling).
    pub warmup_frames: usize,
    /// LBPH distance strictly below which a face is recognized.
    pub confidence_threshold: f64,
    /// Minimum SCRFD anchor score.
    pub detection_score: f32,
    pub nms_threshold: f32,
    /// Smallest face side, in pixels, the detector reports.
    pub min_face_size: f32,
    /// Annotated frame written every `preview_every` frames, if set.
    pub preview_path: Option<PathBuf>,
    pub preview_every: u64,
    pub dashboard_addr: SocketAddr,
    /// Dashboard page self-refresh period.
    pub refresh_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            dataset_dir: PathBuf::from("dataset"),
            model_path: PathBuf::from("trainer.json"),
            labels_path: PathBuf::from("labels.csv"),
            attendance_path: PathBuf::from("attendance.csv"),
            detector_model_path: PathBuf::from("models/det_10g.onnx"),
            camera_device: "/dev/video0".to_string(),
            frame_width: 640,
            frame_height: 480,
            warmup_frames: 4,
            confidence_threshold: DEFAULT_CONFIDENCE_THRESHOLD,
            detection_score: 0.5,
            nms_threshold: 0.4,
            min_face_size: 30.0,
            preview_path: None,
            preview_every: 15,
            dashboard_addr: SocketAddr::from(([127, 0, 0, 1], 8050)),
            refresh_secs: 5,
        }
    }
}

impl Config {
    /// Load defaults, then `file` if given, then environment overrides.
    pub fn load(file: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match file {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.apply_overrides(|key| std::env::var(key).ok());
        Ok(config)
    }

    /// Parse a TOML config file; missing keys keep their defaults.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Apply `ROLLCALL_*` overrides. Values that fail to parse are ignored.
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let path = |key: &str, slot: &mut PathBuf| {
            if let Some(v) = lookup(key) {
                *slot = PathBuf::from(v);
            }
        };
        path("ROLLCALL_DATASET_DIR", &mut self.dataset_dir);
        path("ROLLCALL_MODEL_PATH", &mut self.model_path);
        path("ROLLCALL_LABELS_PATH", &mut self.labels_path);
        path("ROLLCALL_ATTENDANCE_PATH", &mut self.attendance_path);
        path("ROLLCALL_DETECTOR_MODEL", &mut self.detector_model_path);

        if let Some(v) = lookup("ROLLCALL_CAMERA_DEVICE") {
            self.camera_device = v;
        }
        if let Some(v) = lookup("ROLLCALL_PREVIEW_PATH") {
            self.preview_path = (!v.is_empty()).then(|| PathBuf::from(v));
        }

        parsed(&lookup, "ROLLCALL_FRAME_WIDTH", &mut self.frame_width);
        parsed(&lookup, "ROLLCALL_FRAME_HEIGHT", &mut self.frame_height);
        parsed(&lookup, "ROLLCALL_WARMUP_FRAMES", &mut self.warmup_frames);
        parsed(&lookup, "ROLLCALL_CONFIDENCE_THRESHOLD", &mut self.confidence_threshold);
        parsed(&lookup, "ROLLCALL_DETECTION_SCORE", &mut self.detection_score);
        parsed(&lookup, "ROLLCALL_NMS_THRESHOLD", &mut self.nms_threshold);
        parsed(&lookup, "ROLLCALL_MIN_FACE_SIZE", &mut self.min_face_size);
        parsed(&lookup, "ROLLCALL_PREVIEW_EVERY", &mut self.preview_every);
        parsed(&lookup, "ROLLCALL_DASHBOARD_ADDR", &mut self.dashboard_addr);
        parsed(&lookup, "ROLLCALL_REFRESH_SECS", &mut self.refresh_secs);
    }

    pub fn detector_params(&self) -> DetectorParams {
        DetectorParams {
            score_threshold: self.detection_score,
            nms_threshold: self.nms_threshold,
            min_face_size: self.min_face_size,
        }
    }

    pub fn session_options(&self) -> SessionOptions {
        SessionOptions {
            preview_path: self.preview_path.clone(),
            preview_every: self.preview_every,
        }
    }
}

fn parsed<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str, slot: &mut T) {
    let Some(raw) = lookup(key) else {
        return;
    };
    match raw.trim().parse() {
        Ok(v) => *slot = v,
        Err(_) => tracing::warn!(key, value = %raw, "ignoring unparseable environment override"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> =
            pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.attendance_path, PathBuf::from("attendance.csv"));
        assert_eq!(config.confidence_threshold, 70.0);
        assert_eq!(config.refresh_secs, 5);
        assert!(config.preview_path.is_none());
    }

    #[test]
    fn test_toml_file_overrides_some_keys() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rollcall.toml");
        std::fs::write(
            &path,
            "attendance_path = \"/srv/attendance.csv\"\nconfidence_threshold = 55.5\ndashboard_addr = \"0.0.0.0:9000\"\n",
        )
        .unwrap();

        let config = Config::from_file(&path).unwrap();
        assert_eq!(config.attendance_path, PathBuf::from("/srv/attendance.csv"));
        assert_eq!(config.confidence_threshold, 55.5);
        assert_eq!(config.dashboard_addr.port(), 9000);
        assert_eq!(config.model_path, PathBuf::from("trainer.json"));
    }

    #[test]
    fn test_bad_toml_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rollcall.toml");
        std::fs::write(&path, "confidence_threshold = \"high\"\n").unwrap();
        assert!(matches!(Config::from_file(&path), Err(ConfigError::Parse { .. })));
    }

    #[test]
    fn test_env_overrides() {
        let mut config = Config::default();
        config.apply_overrides(lookup(&[
            ("ROLLCALL_ATTENDANCE_PATH", "/tmp/a.csv"),
            ("ROLLCALL_CONFIDENCE_THRESHOLD", "62"),
            ("ROLLCALL_WARMUP_FRAMES", "lots"),
            ("ROLLCALL_PREVIEW_PATH", "/tmp/preview.png"),
        ]));

        assert_eq!(config.attendance_path, PathBuf::from("/tmp/a.csv"));
        assert_eq!(config.confidence_threshold, 62.0);
        assert_eq!(config.warmup_frames, 4);
        assert_eq!(config.preview_path, Some(PathBuf::from("/tmp/preview.png")));
    }

    #[test]
    fn test_detector_params_follow_config() {
        let config = Config { detection_score: 0.7, min_face_size: 48.0, ..Config::default() };
        let params = config.detector_params();
        assert_eq!(params.score_threshold, 0.7);
        assert_eq!(params.min_face_size, 48.0);
    }
}
