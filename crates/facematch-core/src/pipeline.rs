//! Full extraction pipeline: decode → detect → crop → embed.

use crate::alignment;
use crate::detector::{self, DetectorError, FaceDetector};
use crate::recognizer::{FaceRecognizer, RecognizerError, FACENET_INPUT_SIZE, FACENET_MODEL_VERSION};
use crate::types::{Embedding, Extraction};
use image::RgbImage;
use std::path::Path;
use thiserror::Error;

/// Default crop margin, in output pixels.
pub const DEFAULT_FACE_MARGIN: u32 = 20;

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("detector error: {0}")]
    Detector(#[from] DetectorError),
    #[error("recognizer error: {0}")]
    Recognizer(#[from] RecognizerError),
}

/// Decode an image file into RGB8. Alpha and grayscale inputs are converted.
pub fn open_rgb(path: &Path) -> Result<RgbImage, image::ImageError> {
    Ok(image::ImageReader::open(path)?
        .with_guessed_format()?
        .decode()?
        .to_rgb8())
}

/// Detector + recognizer pair. Both sessions need `&mut` to run, so a
/// pipeline is owned by exactly one thread at a time.
pub struct FacePipeline {
    detector: FaceDetector,
    recognizer: FaceRecognizer,
    margin: u32,
}

impl FacePipeline {
    pub fn new(detector: FaceDetector, recognizer: FaceRecognizer) -> Self {
        Self {
            detector,
            recognizer,
            margin: DEFAULT_FACE_MARGIN,
        }
    }

    /// Load both models from disk.
    pub fn load(detector_path: &Path, recognizer_path: &Path) -> Result<Self, PipelineError> {
        let detector = FaceDetector::load(detector_path)?;
        let recognizer = FaceRecognizer::load(recognizer_path)?;
        Ok(Self::new(detector, recognizer))
    }

    pub fn with_margin(mut self, margin: u32) -> Self {
        self.margin = margin;
        self
    }

    pub fn with_detection_threshold(mut self, threshold: f32) -> Self {
        self.detector = self.detector.with_threshold(threshold);
        self
    }

    pub fn margin(&self) -> u32 {
        self.margin
    }

    /// Extract the embedding of the largest face in a decoded frame.
    pub fn extract(&mut self, frame: &RgbImage) -> Result<Extraction, PipelineError> {
        let faces = self.detector.detect(frame)?;

        let Some(face) = detector::largest_face(&faces) else {
            tracing::debug!(width = frame.width(), height = frame.height(), "no face detected");
            return Ok(Extraction::NotDetected);
        };

        tracing::debug!(
            candidates = faces.len(),
            confidence = face.confidence,
            width = face.width,
            height = face.height,
            "largest face selected"
        );

        let Some(crop) = alignment::crop_face(frame, face, FACENET_INPUT_SIZE, self.margin) else {
            return Ok(Extraction::NotDetected);
        };

        let values = self.recognizer.embed(&crop)?;

        Ok(Extraction::Detected(Embedding {
            values,
            model_version: Some(FACENET_MODEL_VERSION.to_string()),
        }))
    }

    /// Decode and extract from a file on disk. Decode failures are reported
    /// as [`Extraction::DecodeFailed`], not as errors.
    pub fn extract_path(&mut self, path: &Path) -> Result<Extraction, PipelineError> {
        match open_rgb(path) {
            Ok(frame) => self.extract(&frame),
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "image decode failed");
                Ok(Extraction::DecodeFailed(e.to_string()))
            }
        }
    }
}
