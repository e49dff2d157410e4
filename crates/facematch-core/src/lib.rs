//! facematch-core — Face embedding extraction and matching.
//!
//! Uses SCRFD for face detection and FaceNet (InceptionResnetV1, VGGFace2)
//! for embeddings, both running via ONNX Runtime for CPU inference.

pub mod alignment;
pub mod detector;
pub mod pipeline;
pub mod recognizer;
pub mod types;

use std::path::{Path, PathBuf};

pub use detector::FaceDetector;
pub use pipeline::{FacePipeline, PipelineError};
pub use recognizer::FaceRecognizer;
pub use types::{score, BoundingBox, Embedding, Extraction, MatchTier, ScoreError, Similarity};

/// SCRFD detector file name inside the model directory.
pub const DETECTOR_MODEL_FILE: &str = "det_10g.onnx";
/// FaceNet recognizer file name inside the model directory.
pub const RECOGNIZER_MODEL_FILE: &str = "facenet_vggface2.onnx";

/// `$FACEMATCH_MODEL_DIR`, else `$XDG_DATA_HOME/facematch/models`, else
/// `~/.local/share/facematch/models`.
pub fn default_model_dir() -> PathBuf {
    if let Ok(dir) = std::env::var("FACEMATCH_MODEL_DIR") {
        return PathBuf::from(dir);
    }

    std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
            PathBuf::from(home).join(".local/share")
        })
        .join("facematch")
        .join("models")
}

pub fn detector_model_path(model_dir: &Path) -> PathBuf {
    model_dir.join(DETECTOR_MODEL_FILE)
}

pub fn recognizer_model_path(model_dir: &Path) -> PathBuf {
    model_dir.join(RECOGNIZER_MODEL_FILE)
}
