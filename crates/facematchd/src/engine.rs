use async_trait::async_trait;
use facematch_core::recognizer::{FACENET_EMBEDDING_DIM, FACENET_INPUT_SIZE, FACENET_MODEL_VERSION};
use facematch_core::{Extraction, FacePipeline, PipelineError};
use serde::Serialize;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

use crate::config::Config;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("pipeline error: {0}")]
    Pipeline(#[from] PipelineError),
    #[error("failed to spawn engine thread: {0}")]
    Spawn(#[source] std::io::Error),
    #[error("engine thread exited")]
    ChannelClosed,
}

/// Static description of the loaded models, reported by `GET /status`.
#[derive(Debug, Clone, Serialize)]
pub struct ModelInfo {
    pub detector: String,
    pub recognizer: String,
    pub embedding_dim: usize,
    pub input_size: u32,
    pub margin: u32,
}

/// Something that turns an image file into a face embedding.
///
/// The HTTP layer only sees this trait, so handlers can be exercised without
/// ONNX models.
#[async_trait]
pub trait Extractor: Send + Sync {
    async fn extract(&self, path: &Path) -> Result<Extraction, EngineError>;

    fn info(&self) -> ModelInfo;
}

/// Messages sent from HTTP handlers to the engine thread.
enum EngineRequest {
    Extract {
        path: PathBuf,
        reply: oneshot::Sender<Result<Extraction, EngineError>>,
    },
}

/// Clone-safe handle to the engine thread.
#[derive(Clone)]
pub struct EngineHandle {
    tx: mpsc::Sender<EngineRequest>,
    info: ModelInfo,
}

#[async_trait]
impl Extractor for EngineHandle {
    /// Queue an extraction and wait for the engine's answer.
    async fn extract(&self, path: &Path) -> Result<Extraction, EngineError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(EngineRequest::Extract {
                path: path.to_path_buf(),
                reply: reply_tx,
            })
            .await
            .map_err(|_| EngineError::ChannelClosed)?;
        reply_rx.await.map_err(|_| EngineError::ChannelClosed)?
    }

    fn info(&self) -> ModelInfo {
        self.info.clone()
    }
}

/// Spawn the engine on a dedicated OS thread.
///
/// Loads both ONNX models, then enters a request loop. Fails fast at startup
/// if either model is unavailable. ONNX sessions need exclusive access to
/// run, so all inference is serialized through this one thread.
pub fn spawn_engine(config: &Config) -> Result<EngineHandle, EngineError> {
    let detector_path = config.detector_model_path();
    let recognizer_path = config.recognizer_model_path();

    let mut pipeline = FacePipeline::load(&detector_path, &recognizer_path)?
        .with_margin(config.face_margin)
        .with_detection_threshold(config.detection_threshold);

    tracing::info!(
        detector = %detector_path.display(),
        recognizer = %recognizer_path.display(),
        margin = config.face_margin,
        threshold = config.detection_threshold,
        "face pipeline loaded"
    );

    let info = ModelInfo {
        detector: facematch_core::DETECTOR_MODEL_FILE.to_string(),
        recognizer: FACENET_MODEL_VERSION.to_string(),
        embedding_dim: FACENET_EMBEDDING_DIM,
        input_size: FACENET_INPUT_SIZE,
        margin: pipeline.margin(),
    };

    let (tx, mut rx) = mpsc::channel::<EngineRequest>(config.engine_queue);

    std::thread::Builder::new()
        .name("facematch-engine".into())
        .spawn(move || {
            tracing::info!("engine thread started");
            while let Some(req) = rx.blocking_recv() {
                match req {
                    EngineRequest::Extract { path, reply } => {
                        let result = pipeline.extract_path(&path).map_err(EngineError::from);
                        if let Err(e) = &result {
                            tracing::error!(path = %path.display(), error = %e, "extraction failed");
                        }
                        let _ = reply.send(result);
                    }
                }
            }
            tracing::info!("engine thread exiting");
        })
        .map_err(EngineError::Spawn)?;

    Ok(EngineHandle { tx, info })
}
