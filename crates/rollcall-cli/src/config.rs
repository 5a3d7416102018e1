use crate::attendance::AttendanceBackend;
use crate::pipeline::{PipelineOptions, DEFAULT_DETECTION_SCALE};
use rollcall_core::DEFAULT_TOLERANCE;
use rollcall_hw::DEFAULT_DEVICES;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("cannot read config file {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid config file {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
}

/// Interactive client configuration.
///
/// Defaults, then the TOML file named by `ROLLCALL_CONFIG` (if any), then
/// `ROLLCALL_*` variables. Command-line flags are applied on top by `main`.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Directory of `<label>.<jpg|jpeg|png>` reference images.
    pub gallery_dir: PathBuf,
    /// Directory containing the ONNX model files.
    pub model_dir: PathBuf,
    /// Largest Euclidean distance still accepted as a match (exclusive).
    pub tolerance: f32,
    /// V4L2 device path; unset tries the first three video devices.
    pub camera_device: Option<String>,
    pub detection_scale: u32,
    pub attendance_path: PathBuf,
    pub attendance_backend: AttendanceBackend,
    /// Where to keep an annotated copy of the latest frame.
    pub preview_path: Option<PathBuf>,
    /// TrueType font for preview labels; unset tries common system fonts.
    pub font_path: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            gallery_dir: PathBuf::from("known_faces"),
            model_dir: rollcall_core::default_model_dir(),
            tolerance: DEFAULT_TOLERANCE,
            camera_device: None,
            detection_scale: DEFAULT_DETECTION_SCALE,
            attendance_path: PathBuf::from("attendance.csv"),
            attendance_backend: AttendanceBackend::Csv,
            preview_path: None,
            font_path: None,
        }
    }
}

impl Config {
    /// Load configuration from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut config = match lookup("ROLLCALL_CONFIG") {
            Some(path) => Self::from_file(Path::new(&path))?,
            None => Self::default(),
        };

        if let Some(dir) = lookup("ROLLCALL_GALLERY_DIR") {
            config.gallery_dir = PathBuf::from(dir);
        }
        if let Some(dir) = lookup("ROLLCALL_MODEL_DIR") {
            config.model_dir = PathBuf::from(dir);
        }
        if let Some(device) = lookup("ROLLCALL_CAMERA_DEVICE") {
            config.camera_device = Some(device);
        }
        if let Some(path) = lookup("ROLLCALL_ATTENDANCE_PATH") {
            config.attendance_path = PathBuf::from(path);
        }
        if let Some(path) = lookup("ROLLCALL_PREVIEW_PATH") {
            config.preview_path = Some(PathBuf::from(path));
        }
        if let Some(path) = lookup("ROLLCALL_FONT_PATH") {
            config.font_path = Some(PathBuf::from(path));
        }
        config.tolerance = env_parse(&lookup, "ROLLCALL_TOLERANCE", config.tolerance);
        config.detection_scale = env_parse(&lookup, "ROLLCALL_DETECTION_SCALE", config.detection_scale);
        config.attendance_backend =
            env_parse(&lookup, "ROLLCALL_ATTENDANCE_BACKEND", config.attendance_backend);

        Ok(config)
    }

    /// Devices to try, in order, when opening the camera.
    pub fn camera_candidates(&self) -> Vec<&str> {
        match &self.camera_device {
            Some(device) => vec![device.as_str()],
            None => DEFAULT_DEVICES.to_vec(),
        }
    }

    pub fn pipeline_options(&self) -> PipelineOptions {
        PipelineOptions {
            tolerance: self.tolerance,
            detection_scale: self.detection_scale.max(1),
        }
    }
}

fn env_parse<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> T {
    match lookup(key) {
        Some(raw) => raw.parse().unwrap_or_else(|_| {
            tracing::warn!(key, value = %raw, "ignoring unparsable setting");
            default
        }),
        None => default,
    }
}
