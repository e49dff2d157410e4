//! SCRFD face detector via ONNX Runtime.
//!
//! Letterboxes an RGB frame to 640x640, decodes the three anchor-free stride
//! levels and suppresses overlapping boxes with NMS. Landmark outputs of the
//! model are ignored; faces are cropped by box, not warped by keypoints.

use crate::types::BoundingBox;
use image::imageops::{self, FilterType};
use image::RgbImage;
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use std::path::Path;
use thiserror::Error;

const SCRFD_INPUT_SIZE: usize = 640;
const SCRFD_MEAN: f32 = 127.5;
const SCRFD_STD: f32 = 128.0;
pub const SCRFD_CONFIDENCE_THRESHOLD: f32 = 0.5;
const SCRFD_NMS_THRESHOLD: f32 = 0.4;
const SCRFD_STRIDES: [usize; 3] = [8, 16, 32];
const SCRFD_ANCHORS_PER_CELL: usize = 2;

#[derive(Error, Debug)]
pub enum DetectorError {
    #[error("model file not found: {0} — download det_10g.onnx from insightface and place it in the model directory")]
    ModelNotFound(String),
    #[error("inference failed: {0}")]
    InferenceFailed(String),
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

/// Metadata for coordinate de-mapping after letterbox resize.
struct LetterboxInfo {
    scale: f32,
    pad_x: f32,
    pad_y: f32,
}

/// Output tensor indices for one stride: (score_idx, bbox_idx).
type StrideOutputIndices = (usize, usize);

/// SCRFD-based face detector.
pub struct FaceDetector {
    session: Session,
    input_size: usize,
    threshold: f32,
    /// Per-stride output indices [(score, bbox)] for strides [8, 16, 32].
    stride_indices: [StrideOutputIndices; 3],
}

impl FaceDetector {
    /// Load the SCRFD ONNX model from the given path.
    pub fn load(model_path: &Path) -> Result<Self, DetectorError> {
        if !model_path.exists() {
            return Err(DetectorError::ModelNotFound(model_path.display().to_string()));
        }

        let session = Session::builder()?
            .with_intra_threads(2)?
            .commit_from_file(model_path)?;

        let output_names: Vec<String> = session.outputs().iter().map(|o| o.name().to_string()).collect();

        tracing::info!(
            path = %model_path.display(),
            outputs = ?output_names,
            "loaded SCRFD model"
        );

        // Keypoint-less exports only carry score + bbox per stride.
        if output_names.len() < 6 {
            return Err(DetectorError::InferenceFailed(format!(
                "SCRFD model requires at least 6 outputs (3 strides × score/bbox), got {}",
                output_names.len()
            )));
        }

        let stride_indices = discover_output_indices(&output_names);
        tracing::debug!(?stride_indices, "SCRFD output tensor mapping");

        Ok(Self {
            session,
            input_size: SCRFD_INPUT_SIZE,
            threshold: SCRFD_CONFIDENCE_THRESHOLD,
            stride_indices,
        })
    }

    /// Override the score threshold (default 0.5).
    pub fn with_threshold(mut self, threshold: f32) -> Self {
        self.threshold = threshold;
        self
    }

    /// Detect faces in an RGB frame, returning bounding boxes sorted by confidence.
    pub fn detect(&mut self, frame: &RgbImage) -> Result<Vec<BoundingBox>, DetectorError> {
        if frame.width() == 0 || frame.height() == 0 {
            return Ok(Vec::new());
        }

        let (input, letterbox) = letterbox(frame, self.input_size);

        let outputs = self.session.run(ort::inputs![TensorRef::from_array_view(input.view())?])?;

        let mut all_detections = Vec::new();

        for (stride_pos, &stride) in SCRFD_STRIDES.iter().enumerate() {
            let (score_idx, bbox_idx) = self.stride_indices[stride_pos];

            let (_, scores) = outputs[score_idx]
                .try_extract_tensor::<f32>()
                .map_err(|e| DetectorError::InferenceFailed(format!("scores stride {stride}: {e}")))?;
            let (_, bboxes) = outputs[bbox_idx]
                .try_extract_tensor::<f32>()
                .map_err(|e| DetectorError::InferenceFailed(format!("bboxes stride {stride}: {e}")))?;

            all_detections.extend(decode_stride(
                scores,
                bboxes,
                stride,
                self.input_size,
                &letterbox,
                self.threshold,
            ));
        }

        let mut result = nms(all_detections, SCRFD_NMS_THRESHOLD);
        result.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));

        tracing::debug!(faces = result.len(), "SCRFD detection complete");
        Ok(result)
    }
}

/// Pick the primary face: largest box area, ties broken by confidence.
pub fn largest_face(faces: &[BoundingBox]) -> Option<&BoundingBox> {
    faces.iter().max_by(|a, b| {
        a.area()
            .total_cmp(&b.area())
            .then(a.confidence.total_cmp(&b.confidence))
    })
}

/// Resize to fit `size`x`size` preserving aspect ratio, pad with the mean,
/// and normalize into a NCHW tensor.
fn letterbox(frame: &RgbImage, size: usize) -> (Array4<f32>, LetterboxInfo) {
    let (width, height) = (frame.width() as f32, frame.height() as f32);
    let scale = (size as f32 / width).min(size as f32 / height);

    let new_w = ((width * scale).round() as u32).clamp(1, size as u32);
    let new_h = ((height * scale).round() as u32).clamp(1, size as u32);
    let pad_x = (size as u32 - new_w) as f32 / 2.0;
    let pad_y = (size as u32 - new_h) as f32 / 2.0;

    let resized = imageops::resize(frame, new_w, new_h, FilterType::Triangle);

    let x0 = pad_x.floor() as usize;
    let y0 = pad_y.floor() as usize;

    // Padding stays at 0.0, which is the normalized mean.
    let mut tensor = Array4::<f32>::zeros((1, 3, size, size));
    for (x, y, pixel) in resized.enumerate_pixels() {
        let (tx, ty) = (x0 + x as usize, y0 + y as usize);
        for c in 0..3 {
            tensor[[0, c, ty, tx]] = (pixel[c] as f32 - SCRFD_MEAN) / SCRFD_STD;
        }
    }

    (tensor, LetterboxInfo { scale, pad_x, pad_y })
}

/// Discover output tensor ordering by name.
///
/// Named exports ("score_8", "bbox_16", ...) are mapped directly. Generic
/// numeric names fall back to the standard positional ordering
/// `[0-2] = scores, [3-5] = bboxes` for strides 8, 16, 32.
fn discover_output_indices(names: &[String]) -> [StrideOutputIndices; 3] {
    let find = |prefix: &str, stride: usize| -> Option<usize> {
        let target = format!("{prefix}_{stride}");
        names.iter().position(|n| n == &target)
    };

    let named: Option<Vec<StrideOutputIndices>> = SCRFD_STRIDES
        .iter()
        .map(|&stride| Some((find("score", stride)?, find("bbox", stride)?)))
        .collect();

    match named {
        Some(indices) => {
            tracing::info!("SCRFD: using name-based output tensor mapping");
            [indices[0], indices[1], indices[2]]
        }
        None => {
            tracing::info!(?names, "SCRFD: using positional output mapping");
            [(0, 3), (1, 4), (2, 5)]
        }
    }
}

/// Decode detections for a single stride level.
fn decode_stride(
    scores: &[f32],
    bboxes: &[f32],
    stride: usize,
    input_size: usize,
    letterbox: &LetterboxInfo,
    threshold: f32,
) -> Vec<BoundingBox> {
    let grid = input_size / stride;
    let num_anchors = grid * grid * SCRFD_ANCHORS_PER_CELL;
    let s = stride as f32;

    let unmap = |v: f32, pad: f32| (v - pad) / letterbox.scale;

    (0..num_anchors)
        .filter_map(|idx| {
            let score = scores.get(idx).copied().unwrap_or(0.0);
            if score <= threshold {
                return None;
            }

            let cell = idx / SCRFD_ANCHORS_PER_CELL;
            let anchor_x = (cell % grid) as f32 * s;
            let anchor_y = (cell / grid) as f32 * s;

            // Distances [left, top, right, bottom] from the anchor, in stride units.
            let d = bboxes.get(idx * 4..idx * 4 + 4)?;
            let x1 = unmap(anchor_x - d[0] * s, letterbox.pad_x);
            let y1 = unmap(anchor_y - d[1] * s, letterbox.pad_y);
            let x2 = unmap(anchor_x + d[2] * s, letterbox.pad_x);
            let y2 = unmap(anchor_y + d[3] * s, letterbox.pad_y);

            Some(BoundingBox {
                x: x1,
                y: y1,
                width: x2 - x1,
                height: y2 - y1,
                confidence: score,
            })
        })
        .collect()
}

/// Non-Maximum Suppression: remove overlapping detections.
fn nms(mut detections: Vec<BoundingBox>, iou_threshold: f32) -> Vec<BoundingBox> {
    detections.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));

    let mut keep: Vec<BoundingBox> = Vec::new();
    for det in detections {
        if keep.iter().all(|k| iou(k, &det) <= iou_threshold) {
            keep.push(det);
        }
    }
    keep
}

/// Compute Intersection-over-Union between two bounding boxes.
fn iou(a: &BoundingBox, b: &BoundingBox) -> f32 {
    let x1 = a.x.max(b.x);
    let y1 = a.y.max(b.y);
    let x2 = (a.x + a.width).min(b.x + b.width);
    let y2 = (a.y + a.height).min(b.y + b.height);

    let inter_area = (x2 - x1).max(0.0) * (y2 - y1).max(0.0);
    let union_area = a.area() + b.area() - inter_area;

    if union_area > 0.0 {
        inter_area / union_area
    } else {
        0.0
    }
}
