use crate::embedder::TensorLayout;
use std::path::PathBuf;

/// Catalog and model locations, loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Serialized FAISS flat L2 index over the catalog embeddings.
    pub index_path: PathBuf,
    /// JSON array of labels, index-aligned with `index_path`.
    pub labels_path: PathBuf,
    /// One subdirectory of display photos per label.
    pub catalog_dir: PathBuf,
    /// Directory containing the ONNX model files.
    pub model_dir: PathBuf,
    /// Input layout of the FaceNet export.
    pub embedding_layout: TensorLayout,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            index_path: PathBuf::from("data/faiss_index.bin"),
            labels_path: PathBuf::from("data/actor_names.json"),
            catalog_dir: PathBuf::from("actors_dataset/Indian_actors_faces"),
            model_dir: default_model_dir(),
            embedding_layout: TensorLayout::Nhwc,
        }
    }
}

impl Config {
    /// Load configuration from `BIOCAST_*` environment variables with defaults.
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let embedding_layout = match std::env::var("BIOCAST_EMBEDDING_LAYOUT") {
            Ok(v) => v.parse().unwrap_or_else(|err| {
                tracing::warn!(error = %err, "ignoring BIOCAST_EMBEDDING_LAYOUT");
                defaults.embedding_layout
            }),
            Err(_) => defaults.embedding_layout,
        };

        Self {
            index_path: env_path("BIOCAST_INDEX_PATH", defaults.index_path),
            labels_path: env_path("BIOCAST_LABELS_PATH", defaults.labels_path),
            catalog_dir: env_path("BIOCAST_CATALOG_DIR", defaults.catalog_dir),
            model_dir: env_path("BIOCAST_MODEL_DIR", defaults.model_dir),
            embedding_layout,
        }
    }

    /// Path to the SCRFD detection model.
    pub fn scrfd_model_path(&self) -> String {
        self.model_dir
            .join("det_10g.onnx")
            .to_string_lossy()
            .into_owned()
    }

    /// Path to the FaceNet embedding model.
    pub fn facenet_model_path(&self) -> String {
        self.model_dir
            .join("facenet512.onnx")
            .to_string_lossy()
            .into_owned()
    }
}

/// Model directory used when `BIOCAST_MODEL_DIR` is unset.
pub fn default_model_dir() -> PathBuf {
    PathBuf::from("models")
}

fn env_path(key: &str, default: PathBuf) -> PathBuf {
    std::env::var(key).map(PathBuf::from).unwrap_or(default)
}
