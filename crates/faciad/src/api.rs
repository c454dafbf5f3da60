//! HTTP surface of the gallery service.
//!
//! Thin layer: decode the upload, hand pixels to the analyzer, hand
//! embeddings to the gallery manager, map the error taxonomy onto
//! status codes. No gallery logic lives here.

use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use facia_core::{decode_image, AnalyzerError, FaceAnalyzer, FaceLocation};
use serde::{Deserialize, Serialize};
use serde_json::json;
use thiserror::Error;

use crate::manager::{GalleryError, GalleryManager};

#[derive(Error, Debug)]
pub enum ApiError {
    #[error("file must be a decodable image: {0}")]
    BadImage(String),
    #[error("face analysis failed: {0}")]
    Analysis(String),
    #[error(transparent)]
    Gallery(#[from] GalleryError),
}

impl From<AnalyzerError> for ApiError {
    fn from(err: AnalyzerError) -> Self {
        match err {
            AnalyzerError::Decode(e) => ApiError::BadImage(e.to_string()),
            AnalyzerError::Inference(msg) => ApiError::Analysis(msg),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self {
            ApiError::BadImage(_) => StatusCode::BAD_REQUEST,
            ApiError::Analysis(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ApiError::Gallery(err) => match err {
                GalleryError::InvalidIdentity | GalleryError::AmbiguousInput { .. } => {
                    StatusCode::BAD_REQUEST
                }
                GalleryError::NotFound(_) => StatusCode::NOT_FOUND,
                GalleryError::NotInitialized
                | GalleryError::Dimension(_)
                | GalleryError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
            },
        };
        if status.is_server_error() {
            tracing::error!(error = %self, "request failed");
        }
        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}

#[derive(Clone)]
pub struct AppState {
    pub manager: Arc<GalleryManager>,
    pub analyzer: Arc<dyn FaceAnalyzer>,
}

pub fn router(manager: Arc<GalleryManager>, analyzer: Arc<dyn FaceAnalyzer>) -> Router {
    let state = AppState { manager, analyzer };

    Router::new()
        .route("/", get(status))
        .route("/recognize", post(recognize))
        .route("/register", post(register))
        .route("/known_faces", get(known_faces))
        .route("/known_faces/{name}", delete(remove_identity))
        .with_state(state)
}

async fn status(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(json!({
        "running": state.manager.is_ready(),
        "known_face_count": state.manager.face_count(),
    }))
}

#[derive(Serialize)]
struct RecognizedFace {
    name: String,
    confidence: f32,
    location: FaceLocation,
}

async fn recognize(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<Json<serde_json::Value>, ApiError> {
    let image = decode_image(&body)?;
    let faces = state.analyzer.analyze(&image)?;

    let results: Vec<RecognizedFace> = faces
        .into_iter()
        .map(|face| {
            let matched = state.manager.match_embedding(&face.embedding);
            RecognizedFace {
                name: matched.identity.unwrap_or_else(|| "unknown".to_string()),
                confidence: matched.confidence,
                location: face.location,
            }
        })
        .collect();

    Ok(Json(json!({
        "faces_found": results.len(),
        "results": results,
    })))
}

#[derive(Deserialize)]
struct RegisterParams {
    name: String,
}

async fn register(
    State(state): State<AppState>,
    Query(params): Query<RegisterParams>,
    body: Bytes,
) -> Result<Json<serde_json::Value>, ApiError> {
    let ext = artifact_ext(&body);
    let image = decode_image(&body)?;
    let faces = state.analyzer.analyze(&image)?;

    let outcome = state
        .manager
        .enroll(&params.name, &faces, &body, ext)
        .await?;

    Ok(Json(json!({
        "message": format!("Face registered successfully for {}", outcome.identity),
        "file": outcome.provenance,
    })))
}

async fn known_faces(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(json!({ "known_faces": state.manager.known_identities() }))
}

async fn remove_identity(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let outcome = state.manager.revoke(&name).await?;
    Ok(Json(json!({
        "message": format!("Successfully removed all faces for {}", outcome.identity),
        "removed": outcome.removed,
    })))
}

/// Artifact extension from the image container format, defaulting to
/// "img" when the format is unrecognized (decode will reject it anyway).
fn artifact_ext(bytes: &[u8]) -> &'static str {
    image::guess_format(bytes)
        .ok()
        .and_then(|f| f.extensions_str().first().copied())
        .unwrap_or("img")
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use facia_core::{DetectedFace, Embedding};
    use facia_store::GalleryStore;
    use tower::ServiceExt;

    /// Analyzer that returns a scripted detection result for any image.
    struct FakeAnalyzer {
        faces: Vec<DetectedFace>,
    }

    impl FaceAnalyzer for FakeAnalyzer {
        fn analyze(
            &self,
            _image: &image::DynamicImage,
        ) -> Result<Vec<DetectedFace>, AnalyzerError> {
            Ok(self.faces.clone())
        }
    }

    fn one_face(values: Vec<f32>) -> DetectedFace {
        DetectedFace {
            location: FaceLocation {
                top: 10,
                right: 90,
                bottom: 90,
                left: 10,
            },
            embedding: Embedding::new(values),
        }
    }

    fn png_bytes() -> Vec<u8> {
        let mut bytes = Vec::new();
        let img = image::RgbImage::from_pixel(8, 8, image::Rgb([90, 120, 150]));
        image::DynamicImage::ImageRgb8(img)
            .write_to(
                &mut std::io::Cursor::new(&mut bytes),
                image::ImageFormat::Png,
            )
            .unwrap();
        bytes
    }

    async fn app_with(dir: &std::path::Path, faces: Vec<DetectedFace>) -> Router {
        let store = GalleryStore::open(&dir.join("faces.db"), &dir.join("known_faces"))
            .await
            .unwrap();
        let manager = Arc::new(GalleryManager::new(store, 0.6));
        manager.reload().await.unwrap();
        router(manager, Arc::new(FakeAnalyzer { faces }))
    }

    async fn body_json(response: Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_status_reports_running_and_count() {
        let dir = tempfile::tempdir().unwrap();
        let app = app_with(dir.path(), vec![]).await;

        let response = app
            .oneshot(Request::builder().uri("/").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let json = body_json(response).await;
        assert_eq!(json["running"], true);
        assert_eq!(json["known_face_count"], 0);
    }

    #[tokio::test]
    async fn test_register_then_list_then_recognize() {
        let dir = tempfile::tempdir().unwrap();
        let app = app_with(dir.path(), vec![one_face(vec![0.1, 0.2])]).await;

        let response = app
            .clone()
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/register?name=alice")
                    .body(Body::from(png_bytes()))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let json = body_json(response).await;
        assert!(json["file"].as_str().unwrap().starts_with("alice_"));

        let response = app
            .clone()
            .oneshot(
                Request::builder()
                    .uri("/known_faces")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        let json = body_json(response).await;
        assert_eq!(json["known_faces"], json!(["alice"]));

        // The fake analyzer reports the same embedding; recognize matches it.
        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/recognize")
                    .body(Body::from(png_bytes()))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let json = body_json(response).await;
        assert_eq!(json["faces_found"], 1);
        assert_eq!(json["results"][0]["name"], "alice");
        assert!(json["results"][0]["confidence"].as_f64().unwrap() > 0.9);
        assert_eq!(json["results"][0]["location"]["top"], 10);
    }

    #[tokio::test]
    async fn test_recognize_unknown_face() {
        let dir = tempfile::tempdir().unwrap();
        let app = app_with(dir.path(), vec![one_face(vec![9.0, 9.0])]).await;

        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/recognize")
                    .body(Body::from(png_bytes()))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let json = body_json(response).await;
        assert_eq!(json["results"][0]["name"], "unknown");
        assert_eq!(json["results"][0]["confidence"], 0.0);
    }

    #[tokio::test]
    async fn test_register_rejects_non_image() {
        let dir = tempfile::tempdir().unwrap();
        let app = app_with(dir.path(), vec![one_face(vec![1.0])]).await;

        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/register?name=alice")
                    .body(Body::from("not an image"))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let json = body_json(response).await;
        assert!(json["error"].as_str().unwrap().contains("image"));
    }

    #[tokio::test]
    async fn test_register_rejects_multiple_faces() {
        let dir = tempfile::tempdir().unwrap();
        let faces = vec![one_face(vec![1.0, 0.0]), one_face(vec![0.0, 1.0])];
        let app = app_with(dir.path(), faces).await;

        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/register?name=alice")
                    .body(Body::from(png_bytes()))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let json = body_json(response).await;
        assert!(json["error"].as_str().unwrap().contains("found 2"));
    }

    #[tokio::test]
    async fn test_register_rejects_zero_faces() {
        let dir = tempfile::tempdir().unwrap();
        let app = app_with(dir.path(), vec![]).await;

        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/register?name=alice")
                    .body(Body::from(png_bytes()))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_delete_unknown_is_404() {
        let dir = tempfile::tempdir().unwrap();
        let app = app_with(dir.path(), vec![]).await;

        let response = app
            .oneshot(
                Request::builder()
                    .method("DELETE")
                    .uri("/known_faces/nobody")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_delete_removes_identity() {
        let dir = tempfile::tempdir().unwrap();
        let app = app_with(dir.path(), vec![one_face(vec![0.3, 0.4])]).await;

        let response = app
            .clone()
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/register?name=carol")
                    .body(Body::from(png_bytes()))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let response = app
            .clone()
            .oneshot(
                Request::builder()
                    .method("DELETE")
                    .uri("/known_faces/carol")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let json = body_json(response).await;
        assert_eq!(json["removed"], 1);

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/known_faces")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        let json = body_json(response).await;
        assert_eq!(json["known_faces"], json!([]));
    }

    #[test]
    fn test_artifact_ext_detection() {
        assert_eq!(artifact_ext(&png_bytes()), "png");
        assert_eq!(artifact_ext(b"garbage"), "img");
    }
}
