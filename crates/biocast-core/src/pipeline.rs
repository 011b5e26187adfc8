//! The per-request pipeline: locate → normalize → embed → search.

use crate::config::Config;
use crate::detector::{DetectorError, ScrfdDetector};
use crate::embedder::{EmbedderError, FaceNetEmbedder};
use crate::index::{IndexError, SimilarityIndex};
use crate::normalizer::{normalize_face, NormalizeError};
use crate::types::{Embedding, EmbeddingModel, FaceDetector, Match, VectorIndex, EMBEDDING_DIM, TOP_K};
use image::RgbImage;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("could not decode image: {0}")]
    Decode(#[from] image::ImageError),
    #[error("detector error: {0}")]
    Detector(#[from] DetectorError),
    #[error("normalize error: {0}")]
    Normalize(#[from] NormalizeError),
    #[error("embedder error: {0}")]
    Embedder(#[from] EmbedderError),
    #[error("index error: {0}")]
    Index(#[from] IndexError),
}

/// Decode uploaded bytes (JPEG or PNG) into an RGB raster.
pub fn decode_image(bytes: &[u8]) -> Result<RgbImage, PipelineError> {
    Ok(image::load_from_memory(bytes)?.to_rgb8())
}

/// Detector, embedding model and index, loaded once and reused for every request.
pub struct Pipeline {
    detector: Box<dyn FaceDetector + Send>,
    embedder: Box<dyn EmbeddingModel + Send>,
    index: Box<dyn VectorIndex + Send>,
}

impl Pipeline {
    pub fn new(
        detector: impl FaceDetector + Send + 'static,
        embedder: impl EmbeddingModel + Send + 'static,
        index: impl VectorIndex + Send + 'static,
    ) -> Self {
        Self {
            detector: Box::new(detector),
            embedder: Box::new(embedder),
            index: Box::new(index),
        }
    }

    /// Load SCRFD, FaceNet and the catalog index named by `config`.
    ///
    /// Any missing or malformed artifact fails here, before a request is served.
    pub fn load(config: &Config) -> Result<Self, PipelineError> {
        let detector = ScrfdDetector::load(&config.scrfd_model_path())?;
        let embedder = FaceNetEmbedder::load(&config.facenet_model_path(), config.embedding_layout)?;
        let index = SimilarityIndex::load(&config.index_path, &config.labels_path, EMBEDDING_DIM)?;
        Ok(Self::new(detector, embedder, index))
    }

    pub fn catalog_size(&self) -> usize {
        self.index.len()
    }

    /// Embedding of the first detected face, or `None` when there is no face.
    pub fn face_embedding(&mut self, image: &RgbImage) -> Result<Option<Embedding>, PipelineError> {
        let Some(face) = self.detector.locate(image)? else {
            tracing::debug!(width = image.width(), height = image.height(), "no face detected");
            return Ok(None);
        };
        tracing::debug!(?face, "face located");

        let normalized = normalize_face(image, &face)?;
        Ok(Some(self.embedder.embed(&normalized)?))
    }

    /// Top-3 catalog matches for the face in `image`, nearest first, or `None` when there is no face.
    pub fn find_best_match(&mut self, image: &RgbImage) -> Result<Option<Vec<Match>>, PipelineError> {
        let Some(embedding) = self.face_embedding(image)? else {
            return Ok(None);
        };
        let matches = self.index.search(&embedding, TOP_K)?;
        tracing::debug!(count = matches.len(), "catalog search complete");
        Ok(Some(matches))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::BoundingBox;
    use image::Rgb;

    /// Reports a face wherever the image is not uniformly white.
    struct FakeDetector;

    impl FaceDetector for FakeDetector {
        fn locate(&mut self, image: &RgbImage) -> Result<Option<BoundingBox>, DetectorError> {
            if image.pixels().all(|p| *p == Rgb([255, 255, 255])) {
                return Ok(None);
            }
            Ok(Some(BoundingBox {
                x: 0,
                y: 0,
                width: image.width() / 2,
                height: image.height(),
                confidence: 0.99,
            }))
        }
    }

    /// Embeds a face as a one-hot vector chosen by its mean red value.
    struct FakeEmbedder;

    impl EmbeddingModel for FakeEmbedder {
        fn embed(&mut self, face: &RgbImage) -> Result<Embedding, EmbedderError> {
            assert_eq!(face.dimensions(), (160, 160));
            let red = face.pixels().map(|p| p[0] as usize).sum::<usize>() / (160 * 160);
            Ok(Embedding::new(one_hot(red % EMBEDDING_DIM)))
        }
    }

    fn one_hot(hot: usize) -> Vec<f32> {
        let mut v = vec![0.0; EMBEDDING_DIM];
        v[hot] = 1.0;
        v
    }

    fn pipeline() -> Pipeline {
        let mut labels: Vec<String> = (0..10).map(|i| format!("Actor {i}")).collect();
        labels[5] = "Actor A".into();
        let vectors: Vec<f32> = (0..10).flat_map(one_hot).collect();
        let index = SimilarityIndex::from_parts(EMBEDDING_DIM, vectors, labels).unwrap();
        Pipeline::new(FakeDetector, FakeEmbedder, index)
    }

    fn face_image(red: u8) -> RgbImage {
        RgbImage::from_pixel(200, 120, Rgb([red, 40, 40]))
    }

    #[test]
    fn test_blank_image_has_no_match() {
        let blank = RgbImage::from_pixel(64, 64, Rgb([255, 255, 255]));
        assert!(pipeline().find_best_match(&blank).unwrap().is_none());
    }

    #[test]
    fn test_known_face_is_top_match() {
        let matches = pipeline().find_best_match(&face_image(5)).unwrap().unwrap();
        assert_eq!(matches.len(), 3);
        assert_eq!(matches[0].label, "Actor A");
        assert!(matches[0].distance.abs() < 1e-6);
        assert!(matches.windows(2).all(|w| w[0].distance <= w[1].distance));
        assert!(matches.iter().all(|m| m.distance >= 0.0));
    }

    #[test]
    fn test_pipeline_is_idempotent() {
        let mut p = pipeline();
        let image = face_image(7);
        let first = p.find_best_match(&image).unwrap();
        let second = p.find_best_match(&image).unwrap();
        assert_eq!(first, second);
    }

    /// Index that always answers with the same fixed list.
    struct FixedIndex(Vec<Match>);

    impl VectorIndex for FixedIndex {
        fn search(&self, _query: &Embedding, k: usize) -> Result<Vec<Match>, IndexError> {
            Ok(self.0.iter().take(k).cloned().collect())
        }

        fn len(&self) -> usize {
            self.0.len()
        }
    }

    #[test]
    fn test_catalog_size_follows_index() {
        assert_eq!(pipeline().catalog_size(), 10);

        let fixed = FixedIndex(vec![Match {
            label: "Solo".into(),
            distance: 0.5,
        }]);
        let mut p = Pipeline::new(FakeDetector, FakeEmbedder, fixed);
        assert_eq!(p.catalog_size(), 1);
        let matches = p.find_best_match(&face_image(9)).unwrap().unwrap();
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].label, "Solo");
    }

    #[test]
    fn test_decode_rejects_garbage() {
        assert!(matches!(decode_image(b"definitely not a jpeg"), Err(PipelineError::Decode(_))));
    }

    #[test]
    fn test_decode_png() {
        let mut bytes = Vec::new();
        face_image(3)
            .write_to(&mut std::io::Cursor::new(&mut bytes), image::ImageFormat::Png)
            .unwrap();
        let decoded = decode_image(&bytes).unwrap();
        assert_eq!(decoded.dimensions(), (200, 120));
    }
}
