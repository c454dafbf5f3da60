//! ArcFace embedding extraction from aligned face crops.

use facia_core::Embedding;
use image::RgbImage;
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;

use crate::align::ALIGNED_SIZE;
use crate::OnnxError;

const ARCFACE_MEAN: f32 = 127.5;
const ARCFACE_STD: f32 = 127.5; // symmetric normalization, unlike SCRFD's 128.0
const ARCFACE_EMBEDDING_DIM: usize = 512;

pub struct ArcFaceEmbedder {
    session: Session,
}

impl ArcFaceEmbedder {
    pub fn load(model_path: &str) -> Result<Self, OnnxError> {
        if !std::path::Path::new(model_path).exists() {
            return Err(OnnxError::ModelNotFound(model_path.to_string()));
        }

        let session = Session::builder()?
            .with_intra_threads(2)?
            .commit_from_file(model_path)?;

        tracing::info!(path = model_path, "loaded ArcFace model");
        Ok(Self { session })
    }

    /// Extract an L2-normalized 512-dim embedding from a 112x112 aligned
    /// RGB crop.
    pub fn extract(&mut self, aligned: &RgbImage) -> Result<Embedding, OnnxError> {
        if aligned.dimensions() != (ALIGNED_SIZE, ALIGNED_SIZE) {
            return Err(OnnxError::Inference(format!(
                "expected {ALIGNED_SIZE}x{ALIGNED_SIZE} aligned crop, got {}x{}",
                aligned.width(),
                aligned.height()
            )));
        }

        let input = preprocess(aligned);
        let outputs = self
            .session
            .run(ort::inputs![TensorRef::from_array_view(input.view())?])?;

        let (_, raw) = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(|e| OnnxError::Inference(format!("embedding extraction: {e}")))?;

        if raw.len() != ARCFACE_EMBEDDING_DIM {
            return Err(OnnxError::Inference(format!(
                "expected {ARCFACE_EMBEDDING_DIM}-dim embedding, got {}",
                raw.len()
            )));
        }

        let norm: f32 = raw.iter().map(|x| x * x).sum::<f32>().sqrt();
        let values = if norm > 0.0 {
            raw.iter().map(|x| x / norm).collect()
        } else {
            raw.to_vec()
        };

        Ok(Embedding::new(values))
    }
}

/// Pack an aligned RGB crop into a NCHW float tensor with ArcFace
/// normalization.
fn preprocess(aligned: &RgbImage) -> Array4<f32> {
    let size = ALIGNED_SIZE as usize;
    let mut tensor = Array4::<f32>::zeros((1, 3, size, size));

    for (x, y, pixel) in aligned.enumerate_pixels() {
        for c in 0..3 {
            tensor[[0, c, y as usize, x as usize]] = (pixel[c] as f32 - ARCFACE_MEAN) / ARCFACE_STD;
        }
    }

    tensor
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_preprocess_shape() {
        let img = RgbImage::new(ALIGNED_SIZE, ALIGNED_SIZE);
        let tensor = preprocess(&img);
        assert_eq!(tensor.shape(), &[1, 3, 112, 112]);
    }

    #[test]
    fn test_preprocess_normalization() {
        let img = RgbImage::from_pixel(ALIGNED_SIZE, ALIGNED_SIZE, image::Rgb([128, 0, 255]));
        let tensor = preprocess(&img);

        assert!((tensor[[0, 0, 0, 0]] - (128.0 - 127.5) / 127.5).abs() < 1e-6);
        assert!((tensor[[0, 1, 0, 0]] - (-1.0)).abs() < 1e-6);
        assert!((tensor[[0, 2, 0, 0]] - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_preprocess_channel_order() {
        // Channels must land in NCHW order, not interleaved.
        let img = RgbImage::from_pixel(ALIGNED_SIZE, ALIGNED_SIZE, image::Rgb([255, 128, 0]));
        let tensor = preprocess(&img);
        assert!(tensor[[0, 0, 50, 50]] > tensor[[0, 1, 50, 50]]);
        assert!(tensor[[0, 1, 50, 50]] > tensor[[0, 2, 50, 50]]);
    }
}
