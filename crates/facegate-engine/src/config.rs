use facegate_core::BackendKind;
use std::path::PathBuf;

/// Pipeline configuration, loaded from environment variables.
pub struct Config {
    /// Root directory for galleries and capture artifacts.
    pub data_dir: PathBuf,
    /// Directory containing ONNX and cascade model files.
    pub model_dir: PathBuf,
    /// Embedding backend to load.
    pub backend: BackendKind,
    /// SCRFD confidence threshold.
    pub detector_threshold: f32,
    /// Cascade fallback confidence threshold.
    pub fallback_threshold: f32,
    /// Similarity threshold for verifying a claimed identity.
    pub verify_threshold: f32,
    /// Similarity threshold for open-set identification.
    pub identify_threshold: f32,
    /// Representative frames required to register an identity.
    pub frames_per_register: usize,
    /// Representative frames used per verification.
    pub frames_per_verify: usize,
    /// Whether to keep frames, crops and clips on disk as an audit trail.
    pub keep_artifacts: bool,
}

impl Config {
    /// Load configuration from `FACEGATE_*` environment variables with defaults.
    pub fn from_env() -> Self {
        let data_dir = std::env::var("FACEGATE_DATA_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| default_data_dir());

        let model_dir = std::env::var("FACEGATE_MODEL_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| data_dir.join("models"));

        let backend = match std::env::var("FACEGATE_BACKEND").as_deref() {
            Ok("histogram") => BackendKind::Histogram,
            _ => BackendKind::ArcFace,
        };

        Self {
            data_dir,
            model_dir,
            backend,
            detector_threshold: env_f32("FACEGATE_DETECTOR_THRESHOLD", 0.8),
            fallback_threshold: env_f32("FACEGATE_FALLBACK_THRESHOLD", 0.7),
            verify_threshold: env_f32("FACEGATE_VERIFY_THRESHOLD", 0.75),
            identify_threshold: env_f32("FACEGATE_IDENTIFY_THRESHOLD", 0.4),
            frames_per_register: env_usize("FACEGATE_FRAMES_PER_REGISTER", 10),
            frames_per_verify: env_usize("FACEGATE_FRAMES_PER_VERIFY", 3),
            keep_artifacts: std::env::var("FACEGATE_KEEP_ARTIFACTS")
                .map(|v| v != "0")
                .unwrap_or(true),
        }
    }

    /// Path to the SCRFD detection model.
    pub fn scrfd_model_path(&self) -> String {
        self.model_dir
            .join("det_10g.onnx")
            .to_string_lossy()
            .into_owned()
    }

    /// Path to the ArcFace recognition model.
    pub fn arcface_model_path(&self) -> String {
        self.model_dir
            .join("w600k_r50.onnx")
            .to_string_lossy()
            .into_owned()
    }

    /// Path to the SeetaFace cascade model for the fallback detector.
    pub fn cascade_model_path(&self) -> String {
        self.model_dir
            .join("seeta_fd_frontal_v1.0.bin")
            .to_string_lossy()
            .into_owned()
    }

    /// Path to the optional landmark regressor used by the fallback.
    pub fn landmark_model_path(&self) -> String {
        self.model_dir
            .join("landmarks.onnx")
            .to_string_lossy()
            .into_owned()
    }
}

fn default_data_dir() -> PathBuf {
    std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
            PathBuf::from(home).join(".local/share")
        })
        .join("facegate")
}

fn env_f32(key: &str, default: f32) -> f32 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_usize(key: &str, default: usize) -> usize {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
