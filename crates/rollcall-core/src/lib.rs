//! rollcall-core: identity matching and session state for attendance capture.
//!
//! Faces are turned into fixed-length signatures by a [`FaceEncoder`]
//! (SCRFD detection + ArcFace embedding via ONNX Runtime in production),
//! compared against a [`Gallery`] of known signatures by a [`Matcher`], and
//! gated to at most one logged event per label by a [`SessionTracker`].

pub mod alignment;
pub mod detector;
pub mod encoder;
pub mod gallery;
pub mod matcher;
pub mod recognizer;
pub mod session;
pub mod types;

pub use encoder::{EncoderError, FaceEncoder, OnnxEncoder};
pub use gallery::{Gallery, GalleryEntry, GalleryError};
pub use matcher::{EuclideanMatcher, MatchError, Matcher, DEFAULT_TOLERANCE};
pub use session::SessionTracker;
pub use types::{AttendanceRecord, ClassificationResult, EncodedFace, FaceRegion, Signature};

use std::path::PathBuf;

/// Default location of the ONNX model files: `$XDG_DATA_HOME/rollcall/models`.
pub fn default_model_dir() -> PathBuf {
    std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
            PathBuf::from(home).join(".local/share")
        })
        .join("rollcall")
        .join("models")
}
