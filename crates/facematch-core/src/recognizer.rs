//! FaceNet face recognizer via ONNX Runtime.
//!
//! Runs an InceptionResnetV1 (VGGFace2 weights) export over 160×160 RGB face
//! crops and returns 512-dimensional L2-normalized embeddings.

use image::RgbImage;
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use std::path::Path;
use thiserror::Error;

pub const FACENET_INPUT_SIZE: u32 = 160;
// Fixed image standardization, not per-image whitening.
const FACENET_MEAN: f32 = 127.5;
const FACENET_STD: f32 = 128.0;
pub const FACENET_EMBEDDING_DIM: usize = 512;
pub const FACENET_MODEL_VERSION: &str = "vggface2";

#[derive(Error, Debug)]
pub enum RecognizerError {
    #[error("model file not found: {0} — export InceptionResnetV1 (vggface2) to ONNX and place it in the model directory")]
    ModelNotFound(String),
    #[error("inference failed: {0}")]
    InferenceFailed(String),
    #[error("face crop is {0}x{1}, expected 160x160")]
    BadCropSize(u32, u32),
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

/// FaceNet-based face recognizer.
pub struct FaceRecognizer {
    session: Session,
}

impl FaceRecognizer {
    /// Load the FaceNet ONNX model from the given path.
    pub fn load(model_path: &Path) -> Result<Self, RecognizerError> {
        if !model_path.exists() {
            return Err(RecognizerError::ModelNotFound(model_path.display().to_string()));
        }

        let session = Session::builder()?
            .with_intra_threads(2)?
            .commit_from_file(model_path)?;

        tracing::info!(
            path = %model_path.display(),
            inputs = ?session.inputs().iter().map(|i| i.name()).collect::<Vec<_>>(),
            "loaded FaceNet model"
        );

        Ok(Self { session })
    }

    /// Embed a 160×160 face crop. Gradients are never tracked; ort sessions
    /// are inference-only.
    pub fn embed(&mut self, face: &RgbImage) -> Result<Vec<f32>, RecognizerError> {
        if face.dimensions() != (FACENET_INPUT_SIZE, FACENET_INPUT_SIZE) {
            return Err(RecognizerError::BadCropSize(face.width(), face.height()));
        }

        let input = preprocess(face);
        let outputs = self.session.run(ort::inputs![TensorRef::from_array_view(input.view())?])?;

        let (_, raw_data) = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(|e| RecognizerError::InferenceFailed(format!("embedding extraction: {e}")))?;

        let raw = raw_data.to_vec();
        if raw.len() != FACENET_EMBEDDING_DIM {
            return Err(RecognizerError::InferenceFailed(format!(
                "expected {FACENET_EMBEDDING_DIM}-dim embedding, got {}",
                raw.len()
            )));
        }

        Ok(l2_normalize(raw))
    }
}

/// Convert an RGB crop into a normalized NCHW float tensor.
fn preprocess(face: &RgbImage) -> Array4<f32> {
    let (w, h) = (face.width() as usize, face.height() as usize);
    let mut tensor = Array4::<f32>::zeros((1, 3, h, w));

    for (x, y, pixel) in face.enumerate_pixels() {
        for c in 0..3 {
            tensor[[0, c, y as usize, x as usize]] = (pixel[c] as f32 - FACENET_MEAN) / FACENET_STD;
        }
    }

    tensor
}

fn l2_normalize(values: Vec<f32>) -> Vec<f32> {
    let norm: f32 = values.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        values.into_iter().map(|x| x / norm).collect()
    } else {
        values
    }
}
