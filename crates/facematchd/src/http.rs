//! HTTP surface: `POST /extract`, `POST /match`, `GET /status`.

use axum::{
    body::Bytes,
    extract::{DefaultBodyLimit, FromRequest, Multipart, Request, State},
    http::{header::CONTENT_TYPE, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use facematch_core::{score, Extraction, Similarity};
use serde::Serialize;
use serde_json::{json, Map, Value};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::NamedTempFile;
use thiserror::Error;

use crate::engine::{Extractor, ModelInfo};

/// Multipart field carrying the uploaded image.
const IMAGE_FIELD: &str = "image";
/// JSON key carrying a server-side image path.
const IMAGE_PATH_KEY: &str = "imagePath";

#[derive(Clone)]
pub struct AppState {
    pub extractor: Arc<dyn Extractor>,
    pub upload_dir: PathBuf,
}

pub fn router(state: AppState, max_upload_bytes: usize) -> Router {
    Router::new()
        .route("/extract", post(extract))
        .route("/match", post(match_embeddings))
        .route("/status", get(status))
        .layer(DefaultBodyLimit::max(max_upload_bytes))
        .layer(
            tower_http::trace::TraceLayer::new_for_http()
                .make_span_with(tower_http::trace::DefaultMakeSpan::new().level(tracing::Level::INFO))
                .on_response(tower_http::trace::DefaultOnResponse::new().level(tracing::Level::INFO)),
        )
        .with_state(state)
}

#[derive(Error, Debug)]
pub enum HttpError {
    #[error("No image file or imagePath provided")]
    NoImage,
    #[error("File not found at {0}")]
    FileNotFound(String),
    #[error("No face detected")]
    NoFace,
    #[error("Invalid input")]
    InvalidInput,
    #[error("{0}")]
    Computation(String),
    #[error("failed to stage upload: {0}")]
    Upload(String),
    #[error("{message}")]
    Rejected { status: StatusCode, message: String },
}

impl HttpError {
    fn status(&self) -> StatusCode {
        match self {
            HttpError::NoImage
            | HttpError::FileNotFound(_)
            | HttpError::NoFace
            | HttpError::InvalidInput => StatusCode::BAD_REQUEST,
            HttpError::Computation(_) | HttpError::Upload(_) => StatusCode::INTERNAL_SERVER_ERROR,
            HttpError::Rejected { status, .. } => *status,
        }
    }
}

impl IntoResponse for HttpError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(error = %self, "request failed");
        } else {
            tracing::warn!(error = %self, "request rejected");
        }
        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}

impl From<axum::extract::multipart::MultipartRejection> for HttpError {
    fn from(rejection: axum::extract::multipart::MultipartRejection) -> Self {
        HttpError::Rejected {
            status: rejection.status(),
            message: rejection.body_text(),
        }
    }
}

impl From<axum::extract::multipart::MultipartError> for HttpError {
    fn from(err: axum::extract::multipart::MultipartError) -> Self {
        HttpError::Rejected {
            status: err.status(),
            message: err.body_text(),
        }
    }
}

/// The two ways an image can reach `/extract`, resolved once per request.
#[derive(Debug)]
enum ExtractInput {
    /// Upload staged to disk. The file is removed when this value drops.
    Upload(NamedTempFile),
    /// Path on the server's filesystem, supplied by the client.
    Path(PathBuf),
}

impl ExtractInput {
    fn path(&self) -> &Path {
        match self {
            ExtractInput::Upload(file) => file.path(),
            ExtractInput::Path(path) => path,
        }
    }
}

#[derive(Debug, Serialize)]
struct ExtractResponse {
    embedding: Vec<f32>,
}

async fn extract(State(state): State<AppState>, req: Request) -> Result<Json<ExtractResponse>, HttpError> {
    let input = resolve_input(&state, req).await?;

    if let ExtractInput::Path(path) = &input {
        if !tokio::fs::try_exists(path).await.unwrap_or(false) {
            return Err(HttpError::FileNotFound(path.display().to_string()));
        }
    }

    tracing::debug!(input = ?input, "extracting embedding");
    let outcome = state.extractor.extract(input.path()).await;
    // Release any staged upload before building the response.
    drop(input);

    match outcome {
        Ok(Extraction::Detected(embedding)) => {
            tracing::info!(dim = embedding.len(), "embedding extracted");
            Ok(Json(ExtractResponse { embedding: embedding.values }))
        }
        Ok(Extraction::NotDetected) => Err(HttpError::NoFace),
        Ok(Extraction::DecodeFailed(reason)) => {
            tracing::warn!(%reason, "input is not a decodable image");
            Err(HttpError::NoFace)
        }
        Err(e) => {
            tracing::error!(error = %e, "extraction engine failed");
            Err(HttpError::NoFace)
        }
    }
}

/// File upload first; JSON path only when no file was provided.
async fn resolve_input(state: &AppState, req: Request) -> Result<ExtractInput, HttpError> {
    let content_type = req
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_ascii_lowercase();

    if content_type.starts_with("multipart/form-data") {
        let mut multipart = Multipart::from_request(req, state).await?;
        while let Some(field) = multipart.next_field().await? {
            if field.name() != Some(IMAGE_FIELD) {
                continue;
            }
            let bytes = field.bytes().await?;
            tracing::debug!(len = bytes.len(), "received image upload");
            let file = stage_upload(state.upload_dir.clone(), bytes).await?;
            return Ok(ExtractInput::Upload(file));
        }
        return Err(HttpError::NoImage);
    }

    if content_type.starts_with("application/json") {
        let body = Bytes::from_request(req, state).await.map_err(|e| HttpError::Rejected {
            status: e.status(),
            message: e.body_text(),
        })?;
        if let Ok(Value::Object(map)) = serde_json::from_slice::<Value>(&body) {
            if let Some(Value::String(path)) = map.get(IMAGE_PATH_KEY) {
                tracing::debug!(path = %path, "received image path");
                return Ok(ExtractInput::Path(PathBuf::from(path)));
            }
        }
    }

    Err(HttpError::NoImage)
}

/// Write upload bytes to a fresh temporary file in `dir`.
async fn stage_upload(dir: PathBuf, bytes: Bytes) -> Result<NamedTempFile, HttpError> {
    tokio::task::spawn_blocking(move || -> std::io::Result<NamedTempFile> {
        let mut file = tempfile::Builder::new()
            .prefix("facematch-upload-")
            .tempfile_in(&dir)?;
        file.write_all(&bytes)?;
        file.flush()?;
        Ok(file)
    })
    .await
    .map_err(|e| HttpError::Upload(e.to_string()))?
    .map_err(|e| HttpError::Upload(e.to_string()))
}

async fn match_embeddings(body: Bytes) -> Result<Json<Similarity>, HttpError> {
    let Ok(Value::Object(mut map)) = serde_json::from_slice::<Value>(&body) else {
        return Err(HttpError::InvalidInput);
    };
    let (Some(first), Some(second)) = (take_field(&mut map, "embedding1"), take_field(&mut map, "embedding2")) else {
        return Err(HttpError::InvalidInput);
    };

    let first = to_vector("embedding1", first)?;
    let second = to_vector("embedding2", second)?;

    let result = score(&first, &second).map_err(|e| HttpError::Computation(e.to_string()))?;
    tracing::info!(similarity = result.similarity, result = %result.tier, "similarity calculated");
    Ok(Json(result))
}

/// A `null` field counts as missing.
fn take_field(map: &mut Map<String, Value>, key: &str) -> Option<Value> {
    map.remove(key).filter(|v| !v.is_null())
}

fn to_vector(name: &str, value: Value) -> Result<Vec<f64>, HttpError> {
    serde_json::from_value(value).map_err(|e| HttpError::Computation(format!("{name}: {e}")))
}

#[derive(Debug, Serialize)]
struct StatusResponse {
    version: &'static str,
    #[serde(flatten)]
    models: ModelInfo,
}

async fn status(State(state): State<AppState>) -> Json<StatusResponse> {
    Json(StatusResponse {
        version: env!("CARGO_PKG_VERSION"),
        models: state.extractor.info(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::EngineError;
    use async_trait::async_trait;
    use axum::body::Body;
    use axum::http::Request;
    use facematch_core::Embedding;
    use std::sync::Mutex;
    use tower::ServiceExt; // for `oneshot`

    const BOUNDARY: &str = "facematch-test-boundary";

    #[derive(Clone, Copy)]
    enum Outcome {
        Face,
        NoFace,
        Garbage,
        EngineDown,
    }

    /// Records each call and whether the path existed while it ran.
    struct MockExtractor {
        outcome: Outcome,
        calls: Mutex<Vec<(PathBuf, bool)>>,
    }

    impl MockExtractor {
        fn new(outcome: Outcome) -> Arc<Self> {
            Arc::new(Self { outcome, calls: Mutex::new(Vec::new()) })
        }

        fn calls(&self) -> Vec<(PathBuf, bool)> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Extractor for MockExtractor {
        async fn extract(&self, path: &Path) -> Result<Extraction, EngineError> {
            self.calls.lock().unwrap().push((path.to_path_buf(), path.exists()));
            match self.outcome {
                Outcome::Face => Ok(Extraction::Detected(Embedding {
                    values: vec![0.5, -0.25, 0.125],
                    model_version: None,
                })),
                Outcome::NoFace => Ok(Extraction::NotDetected),
                Outcome::Garbage => Ok(Extraction::DecodeFailed("unsupported format".into())),
                Outcome::EngineDown => Err(EngineError::ChannelClosed),
            }
        }

        fn info(&self) -> ModelInfo {
            ModelInfo {
                detector: "det_10g.onnx".into(),
                recognizer: "vggface2".into(),
                embedding_dim: 3,
                input_size: 160,
                margin: 20,
            }
        }
    }

    fn app(extractor: Arc<MockExtractor>, upload_dir: &Path) -> Router {
        router(
            AppState { extractor, upload_dir: upload_dir.to_path_buf() },
            1024 * 1024,
        )
    }

    async fn send(app: Router, req: Request<Body>) -> (StatusCode, Value) {
        let response = app.oneshot(req).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    fn json_request(uri: &str, body: Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    fn multipart_request(field: &str, payload: &[u8]) -> Request<Body> {
        let mut body = Vec::new();
        body.extend_from_slice(format!("--{BOUNDARY}\r\n").as_bytes());
        body.extend_from_slice(
            format!("Content-Disposition: form-data; name=\"{field}\"; filename=\"face.jpg\"\r\n").as_bytes(),
        );
        body.extend_from_slice(b"Content-Type: image/jpeg\r\n\r\n");
        body.extend_from_slice(payload);
        body.extend_from_slice(format!("\r\n--{BOUNDARY}--\r\n").as_bytes());

        Request::builder()
            .method("POST")
            .uri("/extract")
            .header("content-type", format!("multipart/form-data; boundary={BOUNDARY}"))
            .body(Body::from(body))
            .unwrap()
    }

    fn dir_is_empty(dir: &Path) -> bool {
        std::fs::read_dir(dir).unwrap().next().is_none()
    }

    #[tokio::test]
    async fn test_extract_without_input_is_rejected() {
        let uploads = tempfile::tempdir().unwrap();
        let mock = MockExtractor::new(Outcome::Face);

        let req = Request::builder()
            .method("POST")
            .uri("/extract")
            .body(Body::empty())
            .unwrap();
        let (status, body) = send(app(mock.clone(), uploads.path()), req).await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "No image file or imagePath provided");
        assert!(mock.calls().is_empty());
    }

    #[tokio::test]
    async fn test_extract_json_without_image_path_is_rejected() {
        let uploads = tempfile::tempdir().unwrap();
        let mock = MockExtractor::new(Outcome::Face);

        let req = json_request("/extract", json!({ "path": "/tmp/x.jpg" }));
        let (status, body) = send(app(mock.clone(), uploads.path()), req).await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "No image file or imagePath provided");
        assert!(mock.calls().is_empty());
    }

    #[tokio::test]
    async fn test_extract_non_string_image_path_is_rejected() {
        let uploads = tempfile::tempdir().unwrap();
        let mock = MockExtractor::new(Outcome::Face);

        let req = json_request("/extract", json!({ "imagePath": 5 }));
        let (status, body) = send(app(mock.clone(), uploads.path()), req).await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "No image file or imagePath provided");
        assert!(mock.calls().is_empty());
    }

    #[tokio::test]
    async fn test_extract_multipart_without_image_field_is_rejected() {
        let uploads = tempfile::tempdir().unwrap();
        let mock = MockExtractor::new(Outcome::Face);

        let (status, body) = send(app(mock.clone(), uploads.path()), multipart_request("photo", b"jpeg")).await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "No image file or imagePath provided");
        assert!(mock.calls().is_empty());
        assert!(dir_is_empty(uploads.path()));
    }

    #[tokio::test]
    async fn test_extract_missing_path_skips_extractor() {
        let uploads = tempfile::tempdir().unwrap();
        let mock = MockExtractor::new(Outcome::Face);
        let missing = uploads.path().join("nobody.jpg");

        let req = json_request("/extract", json!({ "imagePath": missing }));
        let (status, body) = send(app(mock.clone(), uploads.path()), req).await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], format!("File not found at {}", missing.display()));
        assert!(mock.calls().is_empty());
    }

    #[tokio::test]
    async fn test_extract_existing_path_returns_embedding() {
        let uploads = tempfile::tempdir().unwrap();
        let image = tempfile::NamedTempFile::new().unwrap();
        let mock = MockExtractor::new(Outcome::Face);

        let req = json_request("/extract", json!({ "imagePath": image.path() }));
        let (status, body) = send(app(mock.clone(), uploads.path()), req).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({ "embedding": [0.5, -0.25, 0.125] }));
        assert_eq!(mock.calls(), vec![(image.path().to_path_buf(), true)]);
        // Client-supplied files are never removed.
        assert!(image.path().exists());
    }

    #[tokio::test]
    async fn test_extract_upload_success_leaves_no_temp_file() {
        let uploads = tempfile::tempdir().unwrap();
        let mock = MockExtractor::new(Outcome::Face);

        let (status, body) = send(app(mock.clone(), uploads.path()), multipart_request("image", b"\xff\xd8\xff")).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["embedding"].as_array().unwrap().len(), 3);

        let calls = mock.calls();
        assert_eq!(calls.len(), 1);
        let (staged, existed) = &calls[0];
        assert!(*existed, "upload must be on disk while extracting");
        assert!(staged.starts_with(uploads.path()));
        assert!(!staged.exists());
        assert!(dir_is_empty(uploads.path()));
    }

    #[tokio::test]
    async fn test_extract_upload_failures_leave_no_temp_file() {
        for outcome in [Outcome::NoFace, Outcome::Garbage, Outcome::EngineDown] {
            let uploads = tempfile::tempdir().unwrap();
            let mock = MockExtractor::new(outcome);

            let (status, body) = send(app(mock.clone(), uploads.path()), multipart_request("image", b"not an image")).await;

            assert_eq!(status, StatusCode::BAD_REQUEST);
            assert_eq!(body["error"], "No face detected");
            assert_eq!(mock.calls().len(), 1);
            assert!(dir_is_empty(uploads.path()));
        }
    }

    #[tokio::test]
    async fn test_extract_no_face_from_path() {
        let uploads = tempfile::tempdir().unwrap();
        let image = tempfile::NamedTempFile::new().unwrap();
        let mock = MockExtractor::new(Outcome::NoFace);

        let req = json_request("/extract", json!({ "imagePath": image.path() }));
        let (status, body) = send(app(mock, uploads.path()), req).await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "No face detected");
    }

    #[tokio::test]
    async fn test_match_identical_is_strong() {
        let uploads = tempfile::tempdir().unwrap();
        let req = json_request("/match", json!({ "embedding1": [0.1, 0.2, 0.3], "embedding2": [0.1, 0.2, 0.3] }));
        let (status, body) = send(app(MockExtractor::new(Outcome::Face), uploads.path()), req).await;

        assert_eq!(status, StatusCode::OK);
        assert!((body["similarity"].as_f64().unwrap() - 1.0).abs() < 1e-9);
        assert_eq!(body["result"], "Strong Match");
    }

    #[tokio::test]
    async fn test_match_opposite_is_no_match() {
        let uploads = tempfile::tempdir().unwrap();
        let req = json_request("/match", json!({ "embedding1": [1.0, -2.0], "embedding2": [-1.0, 2.0] }));
        let (status, body) = send(app(MockExtractor::new(Outcome::Face), uploads.path()), req).await;

        assert_eq!(status, StatusCode::OK);
        assert!((body["similarity"].as_f64().unwrap() + 1.0).abs() < 1e-9);
        assert_eq!(body["result"], "No Match");
    }

    #[tokio::test]
    async fn test_match_possible_tier() {
        // cos = 0.8
        let uploads = tempfile::tempdir().unwrap();
        let req = json_request("/match", json!({ "embedding1": [1.0, 0.0], "embedding2": [0.8, 0.6] }));
        let (status, body) = send(app(MockExtractor::new(Outcome::Face), uploads.path()), req).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["result"], "Possible Match");
    }

    #[tokio::test]
    async fn test_match_missing_field_is_invalid_input() {
        let uploads = tempfile::tempdir().unwrap();
        let req = json_request("/match", json!({ "embedding1": [1.0, 0.0] }));
        let (status, body) = send(app(MockExtractor::new(Outcome::Face), uploads.path()), req).await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body, json!({ "error": "Invalid input" }));
    }

    #[tokio::test]
    async fn test_match_null_field_is_invalid_input() {
        let uploads = tempfile::tempdir().unwrap();
        let mock = MockExtractor::new(Outcome::Face);
        let req = json_request("/match", json!({ "embedding1": [1.0], "embedding2": null }));
        let (status, body) = send(app(mock.clone(), uploads.path()), req).await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body, json!({ "error": "Invalid input" }));
        assert!(mock.calls().is_empty());
    }

    #[tokio::test]
    async fn test_match_array_body_is_invalid_input() {
        // Positional arrays must not stand in for the named fields.
        let uploads = tempfile::tempdir().unwrap();
        let req = json_request("/match", json!([[1.0, 0.0], [1.0, 0.0]]));
        let (status, body) = send(app(MockExtractor::new(Outcome::Face), uploads.path()), req).await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body, json!({ "error": "Invalid input" }));
    }

    #[tokio::test]
    async fn test_match_non_json_is_invalid_input() {
        let uploads = tempfile::tempdir().unwrap();
        let req = Request::builder()
            .method("POST")
            .uri("/match")
            .body(Body::from("embedding1=1"))
            .unwrap();
        let (status, body) = send(app(MockExtractor::new(Outcome::Face), uploads.path()), req).await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "Invalid input");
    }

    #[tokio::test]
    async fn test_match_dimension_mismatch_is_server_error() {
        let uploads = tempfile::tempdir().unwrap();
        let req = json_request("/match", json!({ "embedding1": [1.0, 0.0, 0.0], "embedding2": [1.0, 0.0] }));
        let (status, body) = send(app(MockExtractor::new(Outcome::Face), uploads.path()), req).await;

        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body["error"], "shapes (3,) and (2,) not aligned");
    }

    #[tokio::test]
    async fn test_match_non_numeric_is_server_error() {
        let uploads = tempfile::tempdir().unwrap();
        let req = json_request("/match", json!({ "embedding1": ["a", "b"], "embedding2": [1.0, 0.0] }));
        let (status, body) = send(app(MockExtractor::new(Outcome::Face), uploads.path()), req).await;

        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert!(body["error"].as_str().unwrap().starts_with("embedding1: "));
    }

    #[tokio::test]
    async fn test_match_zero_vector_is_server_error() {
        let uploads = tempfile::tempdir().unwrap();
        let req = json_request("/match", json!({ "embedding1": [0.0, 0.0], "embedding2": [1.0, 0.0] }));
        let (status, _) = send(app(MockExtractor::new(Outcome::Face), uploads.path()), req).await;

        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[tokio::test]
    async fn test_status_reports_models() {
        let uploads = tempfile::tempdir().unwrap();
        let req = Request::builder().uri("/status").body(Body::empty()).unwrap();
        let (status, body) = send(app(MockExtractor::new(Outcome::Face), uploads.path()), req).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(
            body,
            json!({
                "version": env!("CARGO_PKG_VERSION"),
                "detector": "det_10g.onnx",
                "recognizer": "vggface2",
                "embedding_dim": 3,
                "input_size": 160,
                "margin": 20,
            })
        );
    }
}
