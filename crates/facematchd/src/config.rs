use facematch_core::detector::SCRFD_CONFIDENCE_THRESHOLD;
use facematch_core::pipeline::DEFAULT_FACE_MARGIN;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;

const DEFAULT_MAX_UPLOAD_BYTES: usize = 16 * 1024 * 1024;
const DEFAULT_ENGINE_QUEUE: usize = 4;

/// Daemon configuration, loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Listen address (default: 0.0.0.0:5002).
    pub bind: SocketAddr,
    /// Directory containing ONNX model files.
    pub model_dir: PathBuf,
    /// Directory where uploaded images are staged while they are processed.
    pub upload_dir: PathBuf,
    /// Border around the detected face, in pixels of the 160×160 crop.
    pub face_margin: u32,
    /// Minimum detector score for a face candidate.
    pub detection_threshold: f32,
    /// Request body limit for `/extract` uploads.
    pub max_upload_bytes: usize,
    /// Requests that may wait for the engine thread before senders block.
    pub engine_queue: usize,
}

impl Config {
    /// Load configuration from `FACEMATCH_*` environment variables with defaults.
    pub fn from_env() -> Self {
        let upload_dir = std::env::var("FACEMATCH_UPLOAD_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| std::env::temp_dir());

        Self {
            bind: env_parse("FACEMATCH_BIND", default_bind()),
            model_dir: facematch_core::default_model_dir(),
            upload_dir,
            face_margin: env_parse("FACEMATCH_FACE_MARGIN", DEFAULT_FACE_MARGIN),
            detection_threshold: env_parse("FACEMATCH_DETECTION_THRESHOLD", SCRFD_CONFIDENCE_THRESHOLD),
            max_upload_bytes: env_parse("FACEMATCH_MAX_UPLOAD_BYTES", DEFAULT_MAX_UPLOAD_BYTES),
            engine_queue: env_parse("FACEMATCH_ENGINE_QUEUE", DEFAULT_ENGINE_QUEUE).max(1),
        }
    }

    /// Path to the SCRFD detection model.
    pub fn detector_model_path(&self) -> PathBuf {
        facematch_core::detector_model_path(&self.model_dir)
    }

    /// Path to the FaceNet recognition model.
    pub fn recognizer_model_path(&self) -> PathBuf {
        facematch_core::recognizer_model_path(&self.model_dir)
    }
}

fn default_bind() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 5002))
}

/// Parse `key` from the environment, falling back to `default` when unset
/// or unparseable.
fn env_parse<T: FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}
