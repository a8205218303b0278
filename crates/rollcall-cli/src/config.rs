use rollcall_core::smoother::DEFAULT_WINDOW;
use rollcall_core::tracker::{DEFAULT_IOU_THRESHOLD, DEFAULT_MAX_MISSED};
use rollcall_vision::{DetectorOptions, DEFAULT_CONFIDENCE_THRESHOLD};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Config file picked up from the working directory when `--config` is not given.
pub const DEFAULT_CONFIG_FILE: &str = "rollcall.toml";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("config file not found: {}", .0.display())]
    NotFound(PathBuf),
    #[error("{}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("{}: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Runtime configuration: defaults, then `rollcall.toml`, then `ROLLCALL_*` variables.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub camera: CameraConfig,
    pub models: ModelConfig,
    pub recognition: RecognitionConfig,
    pub tracking: TrackingConfig,
    pub ledger: LedgerConfig,
    pub preview: PreviewConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CameraConfig {
    /// V4L2 device path, or a bare index for `/dev/video<N>`.
    pub device: String,
    pub width: u32,
    pub height: u32,
    /// Frames discarded while exposure settles.
    pub warmup_frames: usize,
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            device: "/dev/video0".to_string(),
            width: 640,
            height: 480,
            warmup_frames: 4,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ModelConfig {
    /// SCRFD ONNX detector.
    pub detector: PathBuf,
    /// Trained LBPH model.
    pub recognizer: PathBuf,
    pub labels: PathBuf,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            detector: PathBuf::from("models/det_10g.onnx"),
            recognizer: PathBuf::from("face_model.json"),
            labels: PathBuf::from("labels.json"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RecognitionConfig {
    /// LBPH distance above which a face is unknown. Lower is a closer match.
    pub confidence_threshold: f32,
    /// Observations per face the quorum is taken over.
    pub quorum_window: usize,
    /// Minimum SCRFD score for a detection.
    pub detection_threshold: f32,
    pub nms_threshold: f32,
    /// Smallest face side in pixels.
    pub min_face_size: f32,
}

impl Default for RecognitionConfig {
    fn default() -> Self {
        let detector = DetectorOptions::default();
        Self {
            confidence_threshold: DEFAULT_CONFIDENCE_THRESHOLD,
            quorum_window: DEFAULT_WINDOW,
            detection_threshold: detector.confidence_threshold,
            nms_threshold: detector.nms_threshold,
            min_face_size: detector.min_face_size,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TrackingConfig {
    pub iou_threshold: f32,
    pub max_missed: u32,
}

impl Default for TrackingConfig {
    fn default() -> Self {
        Self {
            iou_threshold: DEFAULT_IOU_THRESHOLD,
            max_missed: DEFAULT_MAX_MISSED,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LedgerConfig {
    pub path: PathBuf,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("attendance.csv"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PreviewConfig {
    /// Draw the ASCII camera preview in the terminal.
    pub enabled: bool,
    /// Preview size in characters; sized from the terminal when unset.
    pub width: Option<usize>,
    pub height: Option<usize>,
}

impl Default for PreviewConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            width: None,
            height: None,
        }
    }
}

impl Config {
    /// Load configuration for this run.
    ///
    /// An explicit `path` must exist. Without one, `rollcall.toml` in the
    /// working directory is used if present, otherwise the defaults.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) if !path.exists() => return Err(ConfigError::NotFound(path.to_path_buf())),
            Some(path) => Self::from_file(path)?,
            None if Path::new(DEFAULT_CONFIG_FILE).exists() => {
                Self::from_file(Path::new(DEFAULT_CONFIG_FILE))?
            }
            None => Self::default(),
        };
        config.apply_overrides(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|e| ConfigError::Read {
            path: path.to_path_buf(),
            source: e,
        })?;
        let config = toml::from_str(&contents).map_err(|e| ConfigError::Parse {
            path: path.to_path_buf(),
            source: e,
        })?;
        tracing::debug!(path = %path.display(), "loaded config file");
        Ok(config)
    }

    /// Apply `ROLLCALL_*` overrides read through `var`.
    ///
    /// Values that do not parse are ignored with a warning.
    pub fn apply_overrides(&mut self, var: impl Fn(&str) -> Option<String>) {
        let var = &var;

        if let Some(device) = var("ROLLCALL_CAMERA_DEVICE") {
            self.camera.device = device;
        }
        env_parse(var, "ROLLCALL_CAMERA_WIDTH", &mut self.camera.width);
        env_parse(var, "ROLLCALL_CAMERA_HEIGHT", &mut self.camera.height);
        env_parse(var, "ROLLCALL_WARMUP_FRAMES", &mut self.camera.warmup_frames);

        env_path(var, "ROLLCALL_DETECTOR_MODEL", &mut self.models.detector);
        env_path(var, "ROLLCALL_MODEL_PATH", &mut self.models.recognizer);
        env_path(var, "ROLLCALL_LABELS_PATH", &mut self.models.labels);
        env_path(var, "ROLLCALL_LEDGER_PATH", &mut self.ledger.path);

        env_parse(var, "ROLLCALL_CONFIDENCE_THRESHOLD", &mut self.recognition.confidence_threshold);
        env_parse(var, "ROLLCALL_QUORUM_WINDOW", &mut self.recognition.quorum_window);
        env_parse(var, "ROLLCALL_DETECTION_THRESHOLD", &mut self.recognition.detection_threshold);
        env_parse(var, "ROLLCALL_MIN_FACE_SIZE", &mut self.recognition.min_face_size);

        env_parse(var, "ROLLCALL_TRACK_IOU_THRESHOLD", &mut self.tracking.iou_threshold);
        env_parse(var, "ROLLCALL_TRACK_MAX_MISSED", &mut self.tracking.max_missed);

        if let Some(v) = var("ROLLCALL_PREVIEW") {
            self.preview.enabled = v != "0";
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |msg: String| Err(ConfigError::Invalid(msg));

        for (name, value) in [
            ("camera width", self.camera.width),
            ("camera height", self.camera.height),
        ] {
            if value == 0 || value > 4096 {
                return invalid(format!("{name} must be between 1 and 4096, got {value}"));
            }
        }
        if self.recognition.quorum_window == 0 {
            return invalid("quorum_window must be at least 1".to_string());
        }
        let threshold = self.recognition.confidence_threshold;
        if !threshold.is_finite() || threshold < 0.0 {
            return invalid(format!(
                "confidence_threshold must be a non-negative distance, got {threshold}"
            ));
        }
        for (name, value) in [
            ("detection_threshold", self.recognition.detection_threshold),
            ("nms_threshold", self.recognition.nms_threshold),
            ("tracking.iou_threshold", self.tracking.iou_threshold),
        ] {
            if value.is_nan() || value <= 0.0 || value > 1.0 {
                return invalid(format!("{name} must be in (0, 1], got {value}"));
            }
        }
        let min_face_size = self.recognition.min_face_size;
        if min_face_size.is_nan() || min_face_size < 0.0 {
            return invalid(format!("min_face_size must be >= 0, got {min_face_size}"));
        }
        Ok(())
    }

    pub fn detector_options(&self) -> DetectorOptions {
        DetectorOptions {
            confidence_threshold: self.recognition.detection_threshold,
            nms_threshold: self.recognition.nms_threshold,
            min_face_size: self.recognition.min_face_size,
        }
    }
}

fn env_parse<T: std::str::FromStr>(
    var: &impl Fn(&str) -> Option<String>,
    key: &str,
    target: &mut T,
) {
    let Some(raw) = var(key) else {
        return;
    };
    match raw.parse() {
        Ok(value) => *target = value,
        Err(_) => tracing::warn!(key, value = %raw, "ignoring unparsable environment override"),
    }
}

fn env_path(var: &impl Fn(&str) -> Option<String>, key: &str, target: &mut PathBuf) {
    if let Some(raw) = var(key) {
        *target = PathBuf::from(raw);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tempfile::TempDir;

    fn vars(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults_are_valid() {
        let config = Config::default();
        config.validate().unwrap();
        assert_eq!(config.recognition.confidence_threshold, 100.0);
        assert_eq!(config.recognition.quorum_window, 3);
        assert_eq!(config.recognition.min_face_size, 50.0);
        assert_eq!(config.ledger.path, PathBuf::from("attendance.csv"));
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("rollcall.toml");
        std::fs::write(
            &path,
            "[camera]\ndevice = \"/dev/video2\"\n\n[recognition]\nquorum_window = 5\n",
        )
        .unwrap();

        let config = Config::from_file(&path).unwrap();
        assert_eq!(config.camera.device, "/dev/video2");
        assert_eq!(config.camera.width, 640);
        assert_eq!(config.recognition.quorum_window, 5);
        assert_eq!(config.recognition.confidence_threshold, 100.0);
    }

    #[test]
    fn test_unknown_keys_rejected() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("rollcall.toml");
        std::fs::write(&path, "[camera]\ndevise = \"/dev/video2\"\n").unwrap();
        assert!(matches!(Config::from_file(&path), Err(ConfigError::Parse { .. })));
    }

    #[test]
    fn test_explicit_missing_file() {
        let dir = TempDir::new().unwrap();
        let err = Config::load(Some(&dir.path().join("nope.toml"))).unwrap_err();
        assert!(matches!(err, ConfigError::NotFound(_)));
    }

    #[test]
    fn test_env_overrides() {
        let mut config = Config::default();
        config.apply_overrides(vars(&[
            ("ROLLCALL_CAMERA_DEVICE", "/dev/video4"),
            ("ROLLCALL_CONFIDENCE_THRESHOLD", "80.5"),
            ("ROLLCALL_QUORUM_WINDOW", "4"),
            ("ROLLCALL_LEDGER_PATH", "/tmp/att.csv"),
            ("ROLLCALL_PREVIEW", "0"),
        ]));
        assert_eq!(config.camera.device, "/dev/video4");
        assert_eq!(config.recognition.confidence_threshold, 80.5);
        assert_eq!(config.recognition.quorum_window, 4);
        assert_eq!(config.ledger.path, PathBuf::from("/tmp/att.csv"));
        assert!(!config.preview.enabled);
    }

    #[test]
    fn test_unparsable_override_ignored() {
        let mut config = Config::default();
        config.apply_overrides(vars(&[("ROLLCALL_QUORUM_WINDOW", "three")]));
        assert_eq!(config.recognition.quorum_window, 3);
    }

    #[test]
    fn test_validate_rejects_zero_window() {
        let mut config = Config::default();
        config.recognition.quorum_window = 0;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_validate_rejects_bad_thresholds() {
        let mut config = Config::default();
        config.recognition.confidence_threshold = f32::NAN;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.tracking.iou_threshold = 0.0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.camera.width = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_detector_options_follow_config() {
        let mut config = Config::default();
        config.recognition.detection_threshold = 0.7;
        config.recognition.min_face_size = 80.0;
        let options = config.detector_options();
        assert_eq!(options.confidence_threshold, 0.7);
        assert_eq!(options.min_face_size, 80.0);
        assert_eq!(options.nms_threshold, 0.4);
    }
}
