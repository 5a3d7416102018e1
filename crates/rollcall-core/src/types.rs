use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

/// Region of a detected face in image pixel coordinates, with optional landmarks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FaceRegion {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    pub confidence: f32,
    /// Five-point facial landmarks: [left_eye, right_eye, nose, left_mouth, right_mouth].
    pub landmarks: Option<[(f32, f32); 5]>,
}

impl FaceRegion {
    pub fn area(&self) -> f32 {
        self.width.max(0.0) * self.height.max(0.0)
    }

    /// Intersection-over-union with another region.
    pub fn iou(&self, other: &FaceRegion) -> f32 {
        let left = self.x.max(other.x);
        let top = self.y.max(other.y);
        let right = (self.x + self.width).min(other.x + other.width);
        let bottom = (self.y + self.height).min(other.y + other.height);

        let intersection = (right - left).max(0.0) * (bottom - top).max(0.0);
        let union = self.area() + other.area() - intersection;
        if union > 0.0 {
            intersection / union
        } else {
            0.0
        }
    }

    /// Multiply every coordinate (box and landmarks) by `factor`.
    ///
    /// Used to map detections on a downsampled frame back to full resolution.
    pub fn scaled(&self, factor: f32) -> FaceRegion {
        FaceRegion {
            x: self.x * factor,
            y: self.y * factor,
            width: self.width * factor,
            height: self.height * factor,
            confidence: self.confidence,
            landmarks: self
                .landmarks
                .map(|points| points.map(|(x, y)| (x * factor, y * factor))),
        }
    }
}

/// Fixed-length face signature produced by a [`FaceEncoder`](crate::FaceEncoder).
///
/// Signatures are only ever compared by Euclidean distance; lower is more similar.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Signature {
    values: Vec<f32>,
}

impl Signature {
    pub fn new(values: Vec<f32>) -> Self {
        Self { values }
    }

    pub fn dimension(&self) -> usize {
        self.values.len()
    }

    pub fn values(&self) -> &[f32] {
        &self.values
    }

    /// Euclidean distance to `other`. Callers check dimensions first.
    pub fn distance(&self, other: &Signature) -> f32 {
        self.values
            .iter()
            .zip(other.values.iter())
            .map(|(a, b)| (a - b).powi(2))
            .sum::<f32>()
            .sqrt()
    }
}

/// One detected face and its signature.
#[derive(Debug, Clone)]
pub struct EncodedFace {
    pub region: FaceRegion,
    pub signature: Signature,
}

/// Outcome of classifying one signature against a gallery.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClassificationResult {
    pub matched_label: Option<String>,
    /// Distance to the matched entry; only present on a match.
    pub distance: Option<f32>,
    /// `1 - distance` on a match, `0` otherwise. Monotonic, not calibrated.
    pub confidence: f32,
}

impl ClassificationResult {
    pub fn matched(label: impl Into<String>, distance: f32) -> Self {
        Self {
            matched_label: Some(label.into()),
            distance: Some(distance),
            confidence: 1.0 - distance,
        }
    }

    pub fn unmatched() -> Self {
        Self {
            matched_label: None,
            distance: None,
            confidence: 0.0,
        }
    }

    pub fn is_match(&self) -> bool {
        self.matched_label.is_some()
    }

    /// Label for on-screen display; unmatched faces show as "Unknown".
    pub fn display_label(&self) -> &str {
        self.matched_label.as_deref().unwrap_or("Unknown")
    }
}

/// A single attendance event as written to the attendance store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AttendanceRecord {
    pub label: String,
    /// `YYYY-MM-DD`
    pub date: String,
    /// `HH:MM:SS`
    pub time: String,
}

impl AttendanceRecord {
    pub fn new(label: &str, timestamp: NaiveDateTime) -> Self {
        Self {
            label: label.to_string(),
            date: timestamp.format("%Y-%m-%d").to_string(),
            time: timestamp.format("%H:%M:%S").to_string(),
        }
    }
}
