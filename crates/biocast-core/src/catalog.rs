//! Display catalog: one folder of reference photos per label.
//!
//! Photos are only ever shown next to a match, never used for matching.

use crate::types::Match;
use serde::Serialize;
use std::path::{Component, Path, PathBuf};
use thiserror::Error;

/// Extensions accepted for catalog photos and uploads.
pub const IMAGE_EXTENSIONS: [&str; 3] = ["jpg", "jpeg", "png"];

#[derive(Error, Debug)]
pub enum CatalogError {
    #[error("catalog directory not found: {0}")]
    RootNotFound(String),
}

/// What to show next to a match.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "path", rename_all = "snake_case")]
pub enum Representative {
    Image(PathBuf),
    FolderNotFound,
    NoImageAvailable,
}

impl Representative {
    /// Inline marker text for the degraded cases.
    pub fn marker(&self) -> Option<&'static str> {
        match self {
            Self::Image(_) => None,
            Self::FolderNotFound => Some("Folder Not Found"),
            Self::NoImageAvailable => Some("No Image Available"),
        }
    }
}

/// A match resolved against the display catalog, ready to render.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PresentedMatch {
    /// 1-based position in the result list.
    pub rank: usize,
    pub label: String,
    pub distance: f32,
    pub representative: Representative,
}

impl PresentedMatch {
    /// `"<label> (Score: 0.1234)"`, used as an image caption.
    pub fn caption(&self) -> String {
        format!("{} (Score: {:.4})", self.label, self.distance)
    }

    /// Full text line for matches without a photo, e.g.
    /// `"2. Actor B (Score: 0.8100) - [Folder Not Found]"`.
    pub fn degraded_line(&self) -> Option<String> {
        self.representative
            .marker()
            .map(|marker| format!("{}. {} - [{marker}]", self.rank, self.caption()))
    }
}

/// Read-only view of the catalog directory tree.
#[derive(Debug, Clone)]
pub struct Catalog {
    root: PathBuf,
}

impl Catalog {
    /// Open the catalog rooted at `root`, which must be an existing directory.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self, CatalogError> {
        let root = root.into();
        if !root.is_dir() {
            return Err(CatalogError::RootNotFound(root.display().to_string()));
        }
        tracing::info!(root = %root.display(), "catalog opened");
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Pick the photo shown for `label`: the lexicographically first image file
    /// in `<root>/<label>`.
    pub fn representative(&self, label: &str) -> Representative {
        let Some(folder) = self.label_folder(label) else {
            tracing::warn!(label, "label is not a plain folder name");
            return Representative::FolderNotFound;
        };

        let entries = match std::fs::read_dir(&folder) {
            Ok(entries) => entries,
            Err(err) => {
                tracing::debug!(label, folder = %folder.display(), error = %err, "catalog folder unavailable");
                return Representative::FolderNotFound;
            }
        };

        let mut images: Vec<PathBuf> = entries
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            .filter(|path| path.is_file() && has_image_extension(path))
            .collect();
        images.sort();

        match images.into_iter().next() {
            Some(path) => Representative::Image(path),
            None => Representative::NoImageAvailable,
        }
    }

    /// Resolve every match in order, ranks starting at 1.
    pub fn present(&self, matches: &[Match]) -> Vec<PresentedMatch> {
        matches
            .iter()
            .enumerate()
            .map(|(i, m)| PresentedMatch {
                rank: i + 1,
                label: m.label.clone(),
                distance: m.distance,
                representative: self.representative(&m.label),
            })
            .collect()
    }

    /// `<root>/<label>`, or `None` when the label would escape the root.
    fn label_folder(&self, label: &str) -> Option<PathBuf> {
        let mut components = Path::new(label).components();
        match (components.next(), components.next()) {
            (Some(Component::Normal(_)), None) => Some(self.root.join(label)),
            _ => None,
        }
    }
}

/// Whether `path` ends in one of [`IMAGE_EXTENSIONS`], case-insensitively.
pub fn has_image_extension(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| IMAGE_EXTENSIONS.iter().any(|known| ext.eq_ignore_ascii_case(known)))
        .unwrap_or(false)
}
