use serde::Serialize;
use std::fmt;
use thiserror::Error;

/// Similarity at or above which two embeddings are a strong match.
pub const STRONG_MATCH_THRESHOLD: f64 = 0.85;
/// Similarity at or above which two embeddings are a possible match.
pub const POSSIBLE_MATCH_THRESHOLD: f64 = 0.75;

/// Bounding box for a detected face, in source image pixels.
#[derive(Debug, Clone, PartialEq)]
pub struct BoundingBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    pub confidence: f32,
}

impl BoundingBox {
    pub fn area(&self) -> f32 {
        self.width.max(0.0) * self.height.max(0.0)
    }
}

/// Face embedding vector (512-dimensional for FaceNet VGGFace2).
#[derive(Debug, Clone, Serialize)]
pub struct Embedding {
    pub values: Vec<f32>,
    /// Model version that produced this embedding (e.g., "vggface2").
    pub model_version: Option<String>,
}

impl Embedding {
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Cosine similarity against another embedding, see [`score`].
    pub fn similarity(&self, other: &Embedding) -> Result<Similarity, ScoreError> {
        score(&widen(&self.values), &widen(&other.values))
    }
}

fn widen(values: &[f32]) -> Vec<f64> {
    values.iter().map(|&v| v as f64).collect()
}

/// Outcome of running the extraction pipeline over one image.
#[derive(Debug, Clone)]
pub enum Extraction {
    Detected(Embedding),
    NotDetected,
    /// The input could not be decoded as a raster image.
    DecodeFailed(String),
}

impl Extraction {
    pub fn embedding(self) -> Option<Embedding> {
        match self {
            Extraction::Detected(embedding) => Some(embedding),
            Extraction::NotDetected | Extraction::DecodeFailed(_) => None,
        }
    }
}

/// Discrete classification of a similarity score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum MatchTier {
    #[serde(rename = "Strong Match")]
    Strong,
    #[serde(rename = "Possible Match")]
    Possible,
    #[serde(rename = "No Match")]
    NoMatch,
}

impl MatchTier {
    /// Thresholds are inclusive: exactly 0.85 is strong, exactly 0.75 is possible.
    pub fn from_similarity(similarity: f64) -> Self {
        if similarity >= STRONG_MATCH_THRESHOLD {
            MatchTier::Strong
        } else if similarity >= POSSIBLE_MATCH_THRESHOLD {
            MatchTier::Possible
        } else {
            MatchTier::NoMatch
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            MatchTier::Strong => "Strong Match",
            MatchTier::Possible => "Possible Match",
            MatchTier::NoMatch => "No Match",
        }
    }
}

impl fmt::Display for MatchTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Cosine similarity of two vectors and its tier.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Similarity {
    pub similarity: f64,
    #[serde(rename = "result")]
    pub tier: MatchTier,
}

#[derive(Error, Debug, PartialEq)]
pub enum ScoreError {
    #[error("shapes ({0},) and ({1},) not aligned")]
    DimensionMismatch(usize, usize),
    #[error("cannot compare a zero-magnitude vector")]
    ZeroMagnitude,
    #[error("similarity is not finite")]
    NonFinite,
}

/// Cosine similarity `dot(a, b) / (|a| * |b|)` in double precision.
pub fn score(a: &[f64], b: &[f64]) -> Result<Similarity, ScoreError> {
    if a.len() != b.len() {
        return Err(ScoreError::DimensionMismatch(a.len(), b.len()));
    }

    let mut dot = 0.0f64;
    let mut norm_a = 0.0f64;
    let mut norm_b = 0.0f64;

    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom == 0.0 {
        return Err(ScoreError::ZeroMagnitude);
    }

    // Rounding can push |cos| a hair past 1 for parallel vectors.
    let similarity = (dot / denom).clamp(-1.0, 1.0);
    if !similarity.is_finite() {
        return Err(ScoreError::NonFinite);
    }

    Ok(Similarity {
        similarity,
        tier: MatchTier::from_similarity(similarity),
    })
}
