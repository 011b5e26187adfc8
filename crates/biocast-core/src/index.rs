//! Catalog similarity index.
//!
//! Reads a FAISS flat L2 index (`IxF2`) and its parallel JSON label list,
//! and answers exact top-k queries by squared Euclidean distance, the same
//! values `IndexFlatL2::search` reports.

use crate::types::{squared_l2, Embedding, Match, VectorIndex};
use std::path::Path;
use thiserror::Error;

const FOURCC_FLAT_L2: [u8; 4] = *b"IxF2";
const FOURCC_FLAT_IP: [u8; 4] = *b"IxFI";
const METRIC_L2: i32 = 1;

#[derive(Error, Debug)]
pub enum IndexError {
    #[error("index file not found: {0}")]
    IndexNotFound(String),
    #[error("label file not found: {0}")]
    LabelsNotFound(String),
    #[error("io error reading {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("malformed index file: {0}")]
    Malformed(String),
    #[error("unsupported index type {0:?}: only flat L2 indexes (IxF2) are supported")]
    UnsupportedIndex(String),
    #[error("malformed label file: {0}")]
    MalformedLabels(#[from] serde_json::Error),
    #[error("label count {labels} does not match index size {vectors}")]
    CardinalityMismatch { labels: usize, vectors: usize },
    #[error("dimension mismatch: index holds {expected}-dim vectors, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },
}

/// Exact nearest-neighbour index over the catalog embeddings and their labels.
#[derive(Debug, Clone)]
pub struct SimilarityIndex {
    dim: usize,
    /// Row-major `len() * dim` floats.
    vectors: Vec<f32>,
    labels: Vec<String>,
}

impl SimilarityIndex {
    /// Build an index from already-loaded rows. Row `i` of `vectors` belongs to `labels[i]`.
    pub fn from_parts(dim: usize, vectors: Vec<f32>, labels: Vec<String>) -> Result<Self, IndexError> {
        if dim == 0 || vectors.len() % dim != 0 {
            return Err(IndexError::Malformed(format!(
                "{} floats do not form whole {dim}-dim rows",
                vectors.len()
            )));
        }
        let rows = vectors.len() / dim;
        if rows != labels.len() {
            return Err(IndexError::CardinalityMismatch {
                labels: labels.len(),
                vectors: rows,
            });
        }
        if let Some(pos) = vectors.iter().position(|v| !v.is_finite()) {
            return Err(IndexError::Malformed(format!(
                "non-finite value in row {} (column {})",
                pos / dim,
                pos % dim
            )));
        }
        Ok(Self { dim, vectors, labels })
    }

    /// Load the index file and label file, checking they describe the same catalog.
    pub fn load(index_path: &Path, labels_path: &Path, expected_dim: usize) -> Result<Self, IndexError> {
        if !index_path.exists() {
            return Err(IndexError::IndexNotFound(index_path.display().to_string()));
        }
        if !labels_path.exists() {
            return Err(IndexError::LabelsNotFound(labels_path.display().to_string()));
        }

        let bytes = std::fs::read(index_path).map_err(|source| IndexError::Io {
            path: index_path.display().to_string(),
            source,
        })?;
        let (dim, vectors) = parse_flat_l2(&bytes)?;
        if dim != expected_dim {
            return Err(IndexError::DimensionMismatch {
                expected: expected_dim,
                actual: dim,
            });
        }

        let labels = read_labels(labels_path)?;
        let index = Self::from_parts(dim, vectors, labels)?;

        tracing::info!(
            index = %index_path.display(),
            labels = %labels_path.display(),
            entries = index.len(),
            dim,
            "loaded catalog index"
        );
        Ok(index)
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    pub fn dim(&self) -> usize {
        self.dim
    }

    pub fn labels(&self) -> &[String] {
        &self.labels
    }

    fn row(&self, i: usize) -> &[f32] {
        &self.vectors[i * self.dim..(i + 1) * self.dim]
    }
}

impl VectorIndex for SimilarityIndex {
    fn search(&self, query: &Embedding, k: usize) -> Result<Vec<Match>, IndexError> {
        if query.dim() != self.dim {
            return Err(IndexError::DimensionMismatch {
                expected: self.dim,
                actual: query.dim(),
            });
        }

        let mut scored: Vec<(usize, f32)> = (0..self.len())
            .map(|i| (i, squared_l2(&query.values, self.row(i))))
            .collect();

        // Nearest first; ties keep catalog order.
        scored.sort_by(|a, b| a.1.total_cmp(&b.1).then(a.0.cmp(&b.0)));
        scored.truncate(k);

        Ok(scored
            .into_iter()
            .map(|(i, distance)| Match {
                label: self.labels[i].clone(),
                distance,
            })
            .collect())
    }

    fn len(&self) -> usize {
        self.labels.len()
    }
}

/// Read the ordered label list (a JSON array of strings).
pub fn read_labels(path: &Path) -> Result<Vec<String>, IndexError> {
    let text = std::fs::read_to_string(path).map_err(|source| IndexError::Io {
        path: path.display().to_string(),
        source,
    })?;
    Ok(serde_json::from_str(&text)?)
}

/// Little-endian cursor over the index bytes.
struct Reader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn take(&mut self, n: usize, what: &str) -> Result<&'a [u8], IndexError> {
        let end = self.pos.checked_add(n).filter(|&end| end <= self.bytes.len()).ok_or_else(|| {
            IndexError::Malformed(format!("truncated while reading {what} at byte {}", self.pos))
        })?;
        let slice = &self.bytes[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    fn array<const N: usize>(&mut self, what: &str) -> Result<[u8; N], IndexError> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N, what)?);
        Ok(out)
    }

    fn i32(&mut self, what: &str) -> Result<i32, IndexError> {
        Ok(i32::from_le_bytes(self.array(what)?))
    }

    fn i64(&mut self, what: &str) -> Result<i64, IndexError> {
        Ok(i64::from_le_bytes(self.array(what)?))
    }

    fn u64(&mut self, what: &str) -> Result<u64, IndexError> {
        Ok(u64::from_le_bytes(self.array(what)?))
    }
}

/// Parse a serialized FAISS `IndexFlatL2`.
///
/// Layout: fourcc `IxF2`, `d: i32`, `ntotal: i64`, two `i64` placeholders,
/// `is_trained: u8`, `metric_type: i32`, then a `u64` float count followed
/// by `ntotal * d` little-endian `f32` values.
fn parse_flat_l2(bytes: &[u8]) -> Result<(usize, Vec<f32>), IndexError> {
    let mut r = Reader { bytes, pos: 0 };

    let fourcc: [u8; 4] = r.array("fourcc")?;
    if fourcc == FOURCC_FLAT_IP {
        return Err(IndexError::UnsupportedIndex("IxFI (inner product)".into()));
    }
    if fourcc != FOURCC_FLAT_L2 {
        return Err(IndexError::UnsupportedIndex(String::from_utf8_lossy(&fourcc).into_owned()));
    }

    let d = r.i32("dimension")?;
    let ntotal = r.i64("ntotal")?;
    r.i64("placeholder")?;
    r.i64("placeholder")?;
    r.take(1, "is_trained")?;
    let metric = r.i32("metric_type")?;

    if d <= 0 || ntotal < 0 {
        return Err(IndexError::Malformed(format!("invalid header: d={d}, ntotal={ntotal}")));
    }
    if metric != METRIC_L2 {
        return Err(IndexError::UnsupportedIndex(format!("metric_type {metric}")));
    }

    let (d, ntotal) = (d as usize, ntotal as usize);
    let count = r.u64("vector count")? as usize;
    let expected = ntotal
        .checked_mul(d)
        .ok_or_else(|| IndexError::Malformed("ntotal * d overflows".into()))?;
    if count != expected {
        return Err(IndexError::Malformed(format!(
            "header declares {ntotal} vectors of dim {d} ({expected} floats), payload has {count}"
        )));
    }

    let payload = r.take(
        count
            .checked_mul(4)
            .ok_or_else(|| IndexError::Malformed("payload size overflows".into()))?,
        "vectors",
    )?;
    let vectors = payload
        .chunks_exact(4)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect();

    Ok((d, vectors))
}
