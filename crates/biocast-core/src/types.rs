use image::RgbImage;
use serde::{Deserialize, Serialize};

use crate::detector::DetectorError;
use crate::embedder::EmbedderError;
use crate::index::IndexError;

/// Dimension of every embedding in the catalog (FaceNet-512).
pub const EMBEDDING_DIM: usize = 512;

/// Side length of the square face crop fed to the embedding model.
pub const NORMALIZED_FACE_SIZE: u32 = 160;

/// Number of catalog entries returned per query.
pub const TOP_K: usize = 3;

/// Pixel-space bounding box of a detected face.
///
/// Always lies inside the raster it was detected in.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
    /// Detector confidence in [0, 1].
    pub confidence: f32,
}

impl BoundingBox {
    /// Build a box from floating-point corners, clamped to a `width`×`height` raster.
    pub fn from_corners(
        x1: f32,
        y1: f32,
        x2: f32,
        y2: f32,
        confidence: f32,
        width: u32,
        height: u32,
    ) -> Self {
        let clamp_x = |v: f32| v.round().clamp(0.0, width as f32) as u32;
        let clamp_y = |v: f32| v.round().clamp(0.0, height as f32) as u32;

        let (left, right) = (clamp_x(x1.min(x2)), clamp_x(x1.max(x2)));
        let (top, bottom) = (clamp_y(y1.min(y2)), clamp_y(y1.max(y2)));

        Self {
            x: left,
            y: top,
            width: right - left,
            height: bottom - top,
            confidence,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }
}

/// Face embedding vector (512-dimensional for FaceNet).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Embedding {
    pub values: Vec<f32>,
}

impl Embedding {
    pub fn new(values: Vec<f32>) -> Self {
        Self { values }
    }

    pub fn dim(&self) -> usize {
        self.values.len()
    }

    /// Squared Euclidean distance, the value a flat L2 index reports.
    pub fn squared_l2_distance(&self, other: &[f32]) -> f32 {
        squared_l2(&self.values, other)
    }
}

/// Squared Euclidean distance between two equally sized slices.
pub fn squared_l2(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b.iter()).map(|(x, y)| (x - y).powi(2)).sum()
}

/// Scale `values` to unit length in place. Zero vectors are left untouched.
pub fn l2_normalize(values: &mut [f32]) {
    let norm = values.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm > 0.0 && norm.is_finite() {
        for v in values.iter_mut() {
            *v /= norm;
        }
    }
}

/// One catalog hit: a label and its distance to the query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Match {
    pub label: String,
    /// Distance reported by the index; smaller is closer.
    pub distance: f32,
}

/// Locates faces in an RGB raster.
pub trait FaceDetector {
    /// Return the first face the underlying detector reports, or `None`.
    fn locate(&mut self, image: &RgbImage) -> Result<Option<BoundingBox>, DetectorError>;
}

/// Maps a normalized face crop to an embedding.
pub trait EmbeddingModel {
    fn embed(&mut self, face: &RgbImage) -> Result<Embedding, EmbedderError>;
}

/// Nearest-neighbour lookup over the catalog.
pub trait VectorIndex {
    /// Return up to `k` matches ordered nearest first.
    fn search(&self, query: &Embedding, k: usize) -> Result<Vec<Match>, IndexError>;

    /// Number of catalog entries.
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_corners_clamps_to_raster() {
        let b = BoundingBox::from_corners(-10.0, -5.0, 120.0, 90.0, 0.9, 100, 80);
        assert_eq!((b.x, b.y, b.width, b.height), (0, 0, 100, 80));
    }

    #[test]
    fn test_from_corners_swapped() {
        let b = BoundingBox::from_corners(50.0, 40.0, 10.0, 20.0, 0.5, 100, 100);
        assert_eq!((b.x, b.y, b.width, b.height), (10, 20, 40, 20));
    }

    #[test]
    fn test_from_corners_outside_is_empty() {
        let b = BoundingBox::from_corners(200.0, 200.0, 300.0, 300.0, 0.7, 100, 100);
        assert!(b.is_empty());
    }

    #[test]
    fn test_squared_l2() {
        let e = Embedding::new(vec![1.0, 2.0, 3.0]);
        assert!((e.squared_l2_distance(&[1.0, 0.0, 3.0]) - 4.0).abs() < 1e-6);
        assert_eq!(e.squared_l2_distance(&[1.0, 2.0, 3.0]), 0.0);
    }

    #[test]
    fn test_l2_normalize_unit_length() {
        let mut v = vec![3.0, 4.0];
        l2_normalize(&mut v);
        assert!((v[0] - 0.6).abs() < 1e-6);
        assert!((v[1] - 0.8).abs() < 1e-6);
    }

    #[test]
    fn test_l2_normalize_zero_vector() {
        let mut v = vec![0.0, 0.0];
        l2_normalize(&mut v);
        assert_eq!(v, vec![0.0, 0.0]);
    }
}
