//! FaceNet embedding extractor via ONNX Runtime.
//!
//! Maps a 160×160 RGB face crop to a 512-dimensional, L2-normalized
//! embedding using an exported FaceNet-512 model.

use crate::types::{l2_normalize, Embedding, EmbeddingModel, EMBEDDING_DIM, NORMALIZED_FACE_SIZE};
use image::RgbImage;
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use std::path::Path;
use std::str::FromStr;
use thiserror::Error;

const FACENET_INPUT_SIZE: usize = NORMALIZED_FACE_SIZE as usize;

#[derive(Error, Debug)]
pub enum EmbedderError {
    #[error("model file not found: {0} — export FaceNet-512 to ONNX and place it in the model dir")]
    ModelNotFound(String),
    #[error("inference failed: {0}")]
    InferenceFailed(String),
    #[error("face crop must be {expected}x{expected}, got {width}x{height}")]
    WrongInputSize { expected: u32, width: u32, height: u32 },
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

/// Memory layout of the model's image input.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TensorLayout {
    /// `[1, 160, 160, 3]` — Keras exports.
    #[default]
    Nhwc,
    /// `[1, 3, 160, 160]` — PyTorch exports.
    Nchw,
}

impl FromStr for TensorLayout {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "nhwc" => Ok(Self::Nhwc),
            "nchw" => Ok(Self::Nchw),
            other => Err(format!("unknown tensor layout '{other}' (expected nhwc or nchw)")),
        }
    }
}

/// FaceNet-based embedding extractor.
pub struct FaceNetEmbedder {
    session: Session,
    layout: TensorLayout,
}

impl FaceNetEmbedder {
    /// Load the FaceNet ONNX model from the given path.
    pub fn load(model_path: &str, layout: TensorLayout) -> Result<Self, EmbedderError> {
        if !Path::new(model_path).exists() {
            return Err(EmbedderError::ModelNotFound(model_path.to_string()));
        }

        let session = Session::builder()?
            .with_intra_threads(2)?
            .commit_from_file(model_path)?;

        tracing::info!(
            path = model_path,
            ?layout,
            inputs = ?session.inputs().iter().map(|i| (i.name(), i.dtype())).collect::<Vec<_>>(),
            outputs = ?session.outputs().iter().map(|o| o.name()).collect::<Vec<_>>(),
            "loaded FaceNet model"
        );

        Ok(Self { session, layout })
    }

    /// Extract an embedding from a normalized 160×160 face crop.
    pub fn extract(&mut self, face: &RgbImage) -> Result<Embedding, EmbedderError> {
        let input = preprocess(face, self.layout)?;

        let outputs = self.session.run(ort::inputs![TensorRef::from_array_view(input.view())?])?;

        let (_, raw_data) = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(|e| EmbedderError::InferenceFailed(format!("embedding extraction: {e}")))?;

        let mut values: Vec<f32> = raw_data.to_vec();

        if values.len() != EMBEDDING_DIM {
            return Err(EmbedderError::InferenceFailed(format!(
                "expected {EMBEDDING_DIM}-dim embedding, got {}",
                values.len()
            )));
        }

        l2_normalize(&mut values);
        Ok(Embedding::new(values))
    }
}

impl EmbeddingModel for FaceNetEmbedder {
    fn embed(&mut self, face: &RgbImage) -> Result<Embedding, EmbedderError> {
        self.extract(face)
    }
}

/// Prewhiten a face crop into a float tensor.
///
/// FaceNet expects per-image standardization: `(x - mean) / max(std, 1/sqrt(n))`
/// over all pixels and channels.
fn preprocess(face: &RgbImage, layout: TensorLayout) -> Result<Array4<f32>, EmbedderError> {
    let (width, height) = face.dimensions();
    if width != NORMALIZED_FACE_SIZE || height != NORMALIZED_FACE_SIZE {
        return Err(EmbedderError::WrongInputSize {
            expected: NORMALIZED_FACE_SIZE,
            width,
            height,
        });
    }

    let raw = face.as_raw();
    let n = raw.len() as f32;
    let mean = raw.iter().map(|&v| v as f32).sum::<f32>() / n;
    let variance = raw.iter().map(|&v| (v as f32 - mean).powi(2)).sum::<f32>() / n;
    let std_adj = variance.sqrt().max(1.0 / n.sqrt());

    let size = FACENET_INPUT_SIZE;
    let mut tensor = match layout {
        TensorLayout::Nhwc => Array4::<f32>::zeros((1, size, size, 3)),
        TensorLayout::Nchw => Array4::<f32>::zeros((1, 3, size, size)),
    };

    for (x, y, pixel) in face.enumerate_pixels() {
        let (x, y) = (x as usize, y as usize);
        for c in 0..3 {
            let v = (pixel[c] as f32 - mean) / std_adj;
            match layout {
                TensorLayout::Nhwc => tensor[[0, y, x, c]] = v,
                TensorLayout::Nchw => tensor[[0, c, y, x]] = v,
            }
        }
    }

    Ok(tensor)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    fn gradient_face() -> RgbImage {
        RgbImage::from_fn(160, 160, |x, y| Rgb([(x % 256) as u8, (y % 256) as u8, ((x + y) % 256) as u8]))
    }

    #[test]
    fn test_preprocess_output_shape_nhwc() {
        let tensor = preprocess(&gradient_face(), TensorLayout::Nhwc).unwrap();
        assert_eq!(tensor.shape(), &[1, 160, 160, 3]);
    }

    #[test]
    fn test_preprocess_output_shape_nchw() {
        let tensor = preprocess(&gradient_face(), TensorLayout::Nchw).unwrap();
        assert_eq!(tensor.shape(), &[1, 3, 160, 160]);
    }

    #[test]
    fn test_preprocess_is_standardized() {
        let tensor = preprocess(&gradient_face(), TensorLayout::Nhwc).unwrap();
        let n = tensor.len() as f32;
        let mean = tensor.iter().sum::<f32>() / n;
        let var = tensor.iter().map(|v| (v - mean).powi(2)).sum::<f32>() / n;
        assert!(mean.abs() < 1e-3, "mean {mean}");
        assert!((var.sqrt() - 1.0).abs() < 1e-3, "std {}", var.sqrt());
    }

    #[test]
    fn test_preprocess_uniform_face_is_zero() {
        let face = RgbImage::from_pixel(160, 160, Rgb([255, 255, 255]));
        let tensor = preprocess(&face, TensorLayout::Nchw).unwrap();
        assert!(tensor.iter().all(|v| v.abs() < 1e-6));
    }

    #[test]
    fn test_layouts_agree() {
        let face = gradient_face();
        let nhwc = preprocess(&face, TensorLayout::Nhwc).unwrap();
        let nchw = preprocess(&face, TensorLayout::Nchw).unwrap();
        assert_eq!(nhwc[[0, 12, 34, 2]], nchw[[0, 2, 12, 34]]);
    }

    #[test]
    fn test_preprocess_rejects_wrong_size() {
        let face = RgbImage::new(112, 112);
        let err = preprocess(&face, TensorLayout::Nhwc).unwrap_err();
        assert!(matches!(err, EmbedderError::WrongInputSize { width: 112, height: 112, .. }));
    }

    #[test]
    fn test_layout_from_str() {
        assert_eq!("NHWC".parse::<TensorLayout>(), Ok(TensorLayout::Nhwc));
        assert_eq!("nchw".parse::<TensorLayout>(), Ok(TensorLayout::Nchw));
        assert!("hwc".parse::<TensorLayout>().is_err());
    }
}
