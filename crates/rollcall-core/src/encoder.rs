//! Face encoder seam: image in, one signature per detected face out.

use crate::detector::{DetectorError, FaceDetector};
use crate::matcher::DEFAULT_TOLERANCE;
use crate::recognizer::{FaceRecognizer, RecognizerError};
use crate::types::EncodedFace;
use image::RgbImage;
use std::path::Path;
use thiserror::Error;

/// SCRFD detection model file name inside the model directory.
pub const DETECTOR_MODEL_FILE: &str = "det_10g.onnx";
/// ArcFace recognition model file name inside the model directory.
pub const RECOGNIZER_MODEL_FILE: &str = "w600k_r50.onnx";
/// Starting point for unit-length ArcFace signatures, where same-person
/// distances usually land between 0.8 and 1.1.
pub const ONNX_SUGGESTED_TOLERANCE: f32 = 1.0;

#[derive(Error, Debug)]
pub enum EncoderError {
    #[error("detector error: {0}")]
    Detector(#[from] DetectorError),
    #[error("recognizer error: {0}")]
    Recognizer(#[from] RecognizerError),
}

/// Produces face signatures from an image.
///
/// Faces are returned in detection order (highest confidence first), so the
/// first element is "the" face wherever only one is used.
pub trait FaceEncoder {
    fn encode(&mut self, image: &RgbImage) -> Result<Vec<EncodedFace>, EncoderError>;
}

impl<E: FaceEncoder + ?Sized> FaceEncoder for Box<E> {
    fn encode(&mut self, image: &RgbImage) -> Result<Vec<EncodedFace>, EncoderError> {
        (**self).encode(image)
    }
}

/// SCRFD + ArcFace encoder running on ONNX Runtime.
pub struct OnnxEncoder {
    detector: FaceDetector,
    recognizer: FaceRecognizer,
}

impl OnnxEncoder {
    /// Load both models from `model_dir`. Fails fast if either is missing.
    pub fn load(model_dir: &Path) -> Result<Self, EncoderError> {
        let detector = FaceDetector::load(&model_dir.join(DETECTOR_MODEL_FILE))?;
        let recognizer = FaceRecognizer::load(&model_dir.join(RECOGNIZER_MODEL_FILE))?;
        Ok(Self { detector, recognizer })
    }

    /// Warn when `tolerance` is still [`DEFAULT_TOLERANCE`], which rejects
    /// nearly every ArcFace match. Returns whether a warning was logged.
    pub fn check_tolerance(tolerance: f32) -> bool {
        if tolerance != DEFAULT_TOLERANCE {
            return false;
        }
        tracing::warn!(
            tolerance,
            suggested = ONNX_SUGGESTED_TOLERANCE,
            "tolerance left at its default; ArcFace signatures need a looser value, set ROLLCALL_TOLERANCE"
        );
        true
    }
}

impl FaceEncoder for OnnxEncoder {
    fn encode(&mut self, image: &RgbImage) -> Result<Vec<EncodedFace>, EncoderError> {
        let regions = self.detector.detect(image)?;
        let mut faces = Vec::with_capacity(regions.len());

        for region in regions {
            if region.landmarks.is_none() {
                tracing::debug!(confidence = region.confidence, "skipping face without landmarks");
                continue;
            }
            let signature = self.recognizer.extract(image, &region)?;
            faces.push(EncodedFace { region, signature });
        }

        Ok(faces)
    }
}
