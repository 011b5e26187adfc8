//! biocast-core — Face lookup against a casting catalog.
//!
//! Locates a face with SCRFD, embeds it with FaceNet (both via ONNX Runtime),
//! and finds the nearest catalog entries in a precomputed flat L2 index.

pub mod catalog;
pub mod config;
pub mod detector;
pub mod embedder;
pub mod index;
pub mod normalizer;
pub mod pipeline;
pub mod types;

pub use catalog::{Catalog, PresentedMatch, Representative};
pub use config::{default_model_dir, Config};
pub use pipeline::{decode_image, Pipeline, PipelineError};
pub use types::{BoundingBox, Embedding, EmbeddingModel, FaceDetector, Match, VectorIndex};
