//! Known-face gallery, built from a directory of reference images.
//!
//! Each `<label>.<jpg|jpeg|png>` file contributes one entry: the first face
//! the encoder reports. Files are visited in lexicographic file-name order,
//! which fixes both the stored sequence (used for matcher tie-breaks) and the
//! winner when two files share a label (first wins).

use crate::encoder::FaceEncoder;
use crate::types::Signature;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Reference image extensions, compared case-insensitively.
pub const SUPPORTED_EXTENSIONS: [&str; 3] = ["jpg", "jpeg", "png"];

#[derive(Error, Debug)]
pub enum GalleryError {
    #[error("gallery directory not found: {}", .0.display())]
    MissingDirectory(PathBuf),
    #[error("failed to read gallery directory {}: {source}", path.display())]
    ReadDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("signature dimension mismatch for '{label}': expected {expected}, got {actual}")]
    DimensionMismatch {
        label: String,
        expected: usize,
        actual: usize,
    },
    #[error("duplicate gallery label: {0}")]
    DuplicateLabel(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct GalleryEntry {
    pub label: String,
    pub signature: Signature,
}

/// Immutable set of known (label, signature) pairs.
///
/// A gallery is never edited in place; reloading builds a new one.
#[derive(Debug, Clone, Default)]
pub struct Gallery {
    entries: Vec<GalleryEntry>,
}

impl Gallery {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Build a gallery from explicit entries, keeping their order.
    pub fn from_entries(entries: Vec<GalleryEntry>) -> Result<Self, GalleryError> {
        let mut gallery = Self { entries: Vec::with_capacity(entries.len()) };
        for entry in entries {
            if gallery.contains(&entry.label) {
                return Err(GalleryError::DuplicateLabel(entry.label));
            }
            gallery.check_dimension(&entry)?;
            gallery.entries.push(entry);
        }
        Ok(gallery)
    }

    /// Scan `dir` and encode every supported image in it.
    ///
    /// Unreadable images, images without a detectable face and encoder
    /// failures on a single file are skipped with a warning. A missing
    /// directory or a signature of the wrong dimension is an error.
    pub fn load<E: FaceEncoder + ?Sized>(dir: &Path, encoder: &mut E) -> Result<Self, GalleryError> {
        if !dir.is_dir() {
            return Err(GalleryError::MissingDirectory(dir.to_path_buf()));
        }

        let read_dir = std::fs::read_dir(dir).map_err(|source| GalleryError::ReadDir {
            path: dir.to_path_buf(),
            source,
        })?;
        let mut files: Vec<PathBuf> = Vec::new();
        for entry in read_dir {
            match entry {
                Ok(entry) => {
                    let path = entry.path();
                    if path.is_file() && is_supported_image(&path) {
                        files.push(path);
                    }
                }
                Err(e) => tracing::warn!(dir = %dir.display(), error = %e, "unreadable directory entry; skipping"),
            }
        }
        files.sort();

        let mut gallery = Self::empty();
        for path in files {
            let Some(label) = label_for(&path) else {
                tracing::warn!(file = %path.display(), "file name is not a usable UTF-8 label; skipping");
                continue;
            };
            if gallery.contains(&label) {
                tracing::warn!(file = %path.display(), label = %label, "duplicate label; keeping the earlier file");
                continue;
            }

            let image = match image::open(&path) {
                Ok(image) => image.to_rgb8(),
                Err(e) => {
                    tracing::warn!(file = %path.display(), error = %e, "cannot decode reference image; skipping");
                    continue;
                }
            };

            let faces = match encoder.encode(&image) {
                Ok(faces) => faces,
                Err(e) => {
                    tracing::warn!(file = %path.display(), error = %e, "encoding failed; skipping");
                    continue;
                }
            };
            let detected = faces.len();
            let Some(face) = faces.into_iter().next() else {
                tracing::warn!(file = %path.display(), "no face found; skipping");
                continue;
            };
            if detected > 1 {
                tracing::debug!(file = %path.display(), detected, "multiple faces; using the first");
            }

            let entry = GalleryEntry { label, signature: face.signature };
            gallery.check_dimension(&entry)?;
            tracing::info!(label = %entry.label, "loaded face");
            gallery.entries.push(entry);
        }

        tracing::info!(dir = %dir.display(), count = gallery.len(), "gallery loaded");
        Ok(gallery)
    }

    fn check_dimension(&self, entry: &GalleryEntry) -> Result<(), GalleryError> {
        match self.dimension() {
            Some(expected) if expected != entry.signature.dimension() => {
                Err(GalleryError::DimensionMismatch {
                    label: entry.label.clone(),
                    expected,
                    actual: entry.signature.dimension(),
                })
            }
            _ => Ok(()),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn contains(&self, label: &str) -> bool {
        self.entries.iter().any(|e| e.label == label)
    }

    /// Entries in stored order.
    pub fn entries(&self) -> &[GalleryEntry] {
        &self.entries
    }

    pub fn labels(&self) -> Vec<String> {
        self.entries.iter().map(|e| e.label.clone()).collect()
    }

    /// Signature dimension shared by all entries, `None` when empty.
    pub fn dimension(&self) -> Option<usize> {
        self.entries.first().map(|e| e.signature.dimension())
    }
}

fn is_supported_image(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| SUPPORTED_EXTENSIONS.iter().any(|s| s.eq_ignore_ascii_case(ext)))
        .unwrap_or(false)
}

fn label_for(path: &Path) -> Option<String> {
    path.file_stem()
        .and_then(|stem| stem.to_str())
        .filter(|stem| !stem.is_empty())
        .map(str::to_string)
}
