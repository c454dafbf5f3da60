//! Contract for the image-decoding and embedding-extraction collaborator.
//!
//! The gallery never looks inside an image; it consumes (location,
//! embedding) pairs produced behind this trait. The daemon wires in the
//! ONNX pipeline from `facia-onnx`; tests substitute a scripted fake.

use image::DynamicImage;
use thiserror::Error;

use crate::types::{Embedding, FaceLocation};

#[derive(Error, Debug)]
pub enum AnalyzerError {
    #[error("image decode failed: {0}")]
    Decode(#[from] image::ImageError),
    #[error("inference failed: {0}")]
    Inference(String),
}

/// One detected face: where it is and what it looks like.
#[derive(Debug, Clone)]
pub struct DetectedFace {
    pub location: FaceLocation,
    pub embedding: Embedding,
}

/// Detect every face in a decoded image and extract an embedding for
/// each, in the detector's natural scan order. An empty result is not
/// an error — the image simply contains no faces.
pub trait FaceAnalyzer: Send + Sync {
    fn analyze(&self, image: &DynamicImage) -> Result<Vec<DetectedFace>, AnalyzerError>;
}

/// Decode uploaded bytes into pixel data.
pub fn decode_image(bytes: &[u8]) -> Result<DynamicImage, AnalyzerError> {
    Ok(image::load_from_memory(bytes)?)
}
