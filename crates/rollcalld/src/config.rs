use rollcall_core::DEFAULT_TOLERANCE;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use thiserror::Error;

const DEFAULT_MAX_BODY_BYTES: usize = 50 * 1024 * 1024;

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

/// Daemon configuration: defaults, then an optional TOML file named by
/// `ROLLCALL_CONFIG`, then `ROLLCALL_*` environment variables.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    pub gallery_dir: PathBuf,
    pub model_dir: PathBuf,
    pub tolerance: f32,
    /// Listen address, `host:port`.
    pub bind: String,
    /// Largest accepted JSON request body.
    pub max_body_bytes: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            gallery_dir: PathBuf::from("known_faces"),
            model_dir: rollcall_core::default_model_dir(),
            tolerance: DEFAULT_TOLERANCE,
            bind: "0.0.0.0:5000".to_string(),
            max_body_bytes: DEFAULT_MAX_BODY_BYTES,
        }
    }
}

impl Config {
    /// Load configuration from the process environment.
    ///
    /// An unreadable or invalid config file is logged and skipped; the
    /// environment variables still apply on top of the defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = match lookup("ROLLCALL_CONFIG") {
            Some(path) => Self::from_file(Path::new(&path)).unwrap_or_else(|e| {
                tracing::warn!(error = %e, "config file unusable; using defaults plus environment");
                Self::default()
            }),
            None => Self::default(),
        };

        if let Some(dir) = lookup("ROLLCALL_GALLERY_DIR") {
            config.gallery_dir = PathBuf::from(dir);
        }
        if let Some(dir) = lookup("ROLLCALL_MODEL_DIR") {
            config.model_dir = PathBuf::from(dir);
        }
        if let Some(bind) = lookup("ROLLCALL_BIND") {
            config.bind = bind;
        }
        config.tolerance = env_parse(&lookup, "ROLLCALL_TOLERANCE", config.tolerance);
        config.max_body_bytes = env_parse(&lookup, "ROLLCALL_MAX_BODY_BYTES", config.max_body_bytes);

        config
    }

    fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
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
