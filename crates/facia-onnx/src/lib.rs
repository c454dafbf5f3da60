//! facia-onnx — The embedding collaborator behind [`FaceAnalyzer`].
//!
//! SCRFD face detection plus ArcFace embedding extraction, both via ONNX
//! Runtime CPU inference. The gallery core never depends on this crate;
//! the daemon wires it in at startup.

pub mod align;
pub mod detect;
pub mod embed;

use facia_core::{AnalyzerError, DetectedFace, FaceAnalyzer, FaceLocation};
use image::DynamicImage;
use parking_lot::Mutex;
use thiserror::Error;

pub use detect::{RawFace, ScrfdDetector};
pub use embed::ArcFaceEmbedder;

#[derive(Error, Debug)]
pub enum OnnxError {
    #[error("model file not found: {0} — download from insightface and place in the model dir")]
    ModelNotFound(String),
    #[error("inference failed: {0}")]
    Inference(String),
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

/// SCRFD + ArcFace pipeline implementing the collaborator contract.
///
/// Sessions are mutably shared behind mutexes; detection and extraction
/// for a single request run sequentially.
pub struct OnnxFaceAnalyzer {
    detector: Mutex<ScrfdDetector>,
    embedder: Mutex<ArcFaceEmbedder>,
}

impl OnnxFaceAnalyzer {
    /// Load both models, failing fast if either file is missing.
    pub fn load(detector_path: &str, embedder_path: &str) -> Result<Self, OnnxError> {
        let detector = ScrfdDetector::load(detector_path)?;
        let embedder = ArcFaceEmbedder::load(embedder_path)?;
        Ok(Self {
            detector: Mutex::new(detector),
            embedder: Mutex::new(embedder),
        })
    }
}

impl FaceAnalyzer for OnnxFaceAnalyzer {
    fn analyze(&self, image: &DynamicImage) -> Result<Vec<DetectedFace>, AnalyzerError> {
        let rgb = image.to_rgb8();

        let raw_faces = self
            .detector
            .lock()
            .detect(&rgb)
            .map_err(|e| AnalyzerError::Inference(e.to_string()))?;

        let mut faces = Vec::with_capacity(raw_faces.len());
        for raw in raw_faces {
            let aligned = align::align_face(&rgb, &raw.landmarks);
            let embedding = self
                .embedder
                .lock()
                .extract(&aligned)
                .map_err(|e| AnalyzerError::Inference(e.to_string()))?;

            faces.push(DetectedFace {
                location: FaceLocation {
                    top: raw.y1.round() as i64,
                    right: raw.x2.round() as i64,
                    bottom: raw.y2.round() as i64,
                    left: raw.x1.round() as i64,
                },
                embedding,
            });
        }

        tracing::debug!(faces = faces.len(), "analyzed image");
        Ok(faces)
    }
}
