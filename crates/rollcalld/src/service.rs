//! Recognition over the currently published gallery.

use crate::engine::{EngineError, EngineHandle};
use image::RgbImage;
use rollcall_core::{EuclideanMatcher, FaceRegion, Gallery, GalleryError, MatchError, Matcher};
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{Mutex, RwLock};

#[derive(Error, Debug)]
pub enum ServiceError {
    #[error(transparent)]
    Engine(#[from] EngineError),
    #[error(transparent)]
    Match(#[from] MatchError),
}

/// What a single recognition request found.
#[derive(Debug, Clone, PartialEq)]
pub enum Recognition {
    NoFace,
    NoKnownFaces,
    Unknown,
    Matched {
        label: String,
        confidence: f32,
        distance: f32,
        face_location: FaceRegion,
    },
}

#[derive(Debug, Clone)]
pub struct ReloadSummary {
    pub labels: Vec<String>,
}

/// Read-only view of the published gallery.
#[derive(Debug, Clone)]
pub struct GallerySnapshot {
    pub labels: Vec<String>,
    pub signatures: usize,
    pub tolerance: f32,
}

pub struct RecognitionService {
    engine: EngineHandle,
    gallery: RwLock<Arc<Gallery>>,
    /// Serialises reloads so the last one to finish loading is the one published.
    reload_lock: Mutex<()>,
    gallery_dir: PathBuf,
    tolerance: f32,
}

impl RecognitionService {
    /// Starts with an empty gallery; call [`reload`](Self::reload) to populate it.
    pub fn new(engine: EngineHandle, gallery_dir: PathBuf, tolerance: f32) -> Self {
        Self {
            engine,
            gallery: RwLock::new(Arc::new(Gallery::empty())),
            reload_lock: Mutex::new(()),
            gallery_dir,
            tolerance,
        }
    }

    async fn current(&self) -> Arc<Gallery> {
        self.gallery.read().await.clone()
    }

    /// Classify the first face found in `image`.
    pub async fn recognize(&self, image: RgbImage) -> Result<Recognition, ServiceError> {
        let faces = self.engine.encode(image).await?;
        let Some(face) = faces.into_iter().next() else {
            return Ok(Recognition::NoFace);
        };

        let gallery = self.current().await;
        if gallery.is_empty() {
            return Ok(Recognition::NoKnownFaces);
        }

        let result = EuclideanMatcher.classify(&face.signature, &gallery, self.tolerance)?;
        Ok(match (result.matched_label, result.distance) {
            (Some(label), Some(distance)) => {
                tracing::info!(label = %label, distance, "face recognized");
                Recognition::Matched {
                    label,
                    confidence: result.confidence,
                    distance,
                    face_location: face.region,
                }
            }
            _ => {
                tracing::debug!("face detected but not a known person");
                Recognition::Unknown
            }
        })
    }

    /// Rebuild the gallery from disk and swap it in.
    ///
    /// The new gallery is built completely before the write lock is taken,
    /// so in-flight requests keep classifying against the old one. On error
    /// the published gallery is left as it was; a missing directory counts
    /// as an empty gallery. Concurrent reloads run one after another.
    pub async fn reload(&self) -> Result<ReloadSummary, ServiceError> {
        let _reloading = self.reload_lock.lock().await;
        let gallery = match self.engine.load_gallery(self.gallery_dir.clone()).await {
            Ok(gallery) => gallery,
            Err(EngineError::Gallery(GalleryError::MissingDirectory(dir))) => {
                tracing::warn!(dir = %dir.display(), "gallery directory not found; serving no known faces");
                Gallery::empty()
            }
            Err(e) => {
                tracing::error!(error = %e, "gallery reload failed; keeping previous gallery");
                return Err(e.into());
            }
        };

        let labels = gallery.labels();
        *self.gallery.write().await = Arc::new(gallery);
        tracing::info!(count = labels.len(), labels = ?labels, "gallery published");
        Ok(ReloadSummary { labels })
    }

    pub async fn snapshot(&self) -> GallerySnapshot {
        let gallery = self.current().await;
        GallerySnapshot {
            labels: gallery.labels(),
            signatures: gallery.len(),
            tolerance: self.tolerance,
        }
    }
}
