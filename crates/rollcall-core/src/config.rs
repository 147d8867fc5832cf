//! Runtime configuration for the daemon and the CLI.
//!
//! Defaults, then an optional TOML file, then `ROLLCALL_*` environment
//! overrides. [`Config::validate`] runs last.

use crate::capture::CaptureSettings;
use crate::error::ErrorKind;
use crate::matcher::DEFAULT_MATCH_THRESHOLD;
use crate::sampler::{DEFAULT_DOWNSAMPLE, DEFAULT_SAMPLE_EVERY};
use crate::session::SessionConfig;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("cannot read config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid config {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("invalid value for {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

impl ConfigError {
    pub fn kind(&self) -> ErrorKind {
        ErrorKind::InvalidInput
    }
}

/// Runtime configuration: an optional TOML file, then `ROLLCALL_*`
/// environment variables on top, then built-in defaults.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// Directory of reference images, one per identity.
    pub faces_dir: PathBuf,
    /// Directory holding the per-day attendance logs.
    pub log_dir: PathBuf,
    /// Directory containing ONNX model files.
    pub model_dir: PathBuf,
    /// Euclidean distance below which a face is accepted.
    pub match_threshold: f32,
    /// Run detection on every Nth frame.
    pub sample_every: u32,
    /// Linear downscale factor applied before detection.
    pub downsample: u32,
    pub tick_interval_ms: u64,
    /// Capture device indices tried in order.
    pub device_indices: Vec<u32>,
    pub capture_width: u32,
    pub capture_height: u32,
    pub capture_fps: u32,
}

impl Default for Config {
    fn default() -> Self {
        let capture = CaptureSettings::default();
        Self {
            faces_dir: PathBuf::from("faces"),
            log_dir: PathBuf::from("."),
            model_dir: PathBuf::from("models"),
            match_threshold: DEFAULT_MATCH_THRESHOLD,
            sample_every: DEFAULT_SAMPLE_EVERY,
            downsample: DEFAULT_DOWNSAMPLE,
            tick_interval_ms: 30,
            device_indices: vec![0, 1],
            capture_width: capture.width,
            capture_height: capture.height,
            capture_fps: capture.fps,
        }
    }
}

impl Config {
    /// Load from `path` (if given), apply environment overrides, validate.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let base = match path {
            Some(p) => Self::from_file(p)?,
            None => Self::default(),
        };
        let config = base.with_env(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
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

    /// Overlay `ROLLCALL_*` variables looked up through `var`.
    /// Unparseable values are ignored with a warning.
    pub fn with_env(mut self, var: impl Fn(&str) -> Option<String>) -> Self {
        if let Some(v) = var("ROLLCALL_FACES_DIR") {
            self.faces_dir = PathBuf::from(v);
        }
        if let Some(v) = var("ROLLCALL_LOG_DIR") {
            self.log_dir = PathBuf::from(v);
        }
        if let Some(v) = var("ROLLCALL_MODEL_DIR") {
            self.model_dir = PathBuf::from(v);
        }
        env_parse(&var, "ROLLCALL_MATCH_THRESHOLD", &mut self.match_threshold);
        env_parse(&var, "ROLLCALL_SAMPLE_EVERY", &mut self.sample_every);
        env_parse(&var, "ROLLCALL_DOWNSAMPLE", &mut self.downsample);
        env_parse(&var, "ROLLCALL_TICK_INTERVAL_MS", &mut self.tick_interval_ms);
        env_parse(&var, "ROLLCALL_CAPTURE_WIDTH", &mut self.capture_width);
        env_parse(&var, "ROLLCALL_CAPTURE_HEIGHT", &mut self.capture_height);
        env_parse(&var, "ROLLCALL_CAPTURE_FPS", &mut self.capture_fps);
        if let Some(v) = var("ROLLCALL_DEVICE_INDICES") {
            match v.split(',').map(|s| s.trim().parse()).collect::<Result<Vec<u32>, _>>() {
                Ok(indices) => self.device_indices = indices,
                Err(e) => tracing::warn!(value = %v, error = %e, "ignoring ROLLCALL_DEVICE_INDICES"),
            }
        }
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.match_threshold.is_finite() || self.match_threshold <= 0.0 {
            return Err(ConfigError::Invalid {
                field: "match_threshold",
                reason: format!("must be a positive number, got {}", self.match_threshold),
            });
        }
        if self.sample_every == 0 {
            return Err(ConfigError::Invalid {
                field: "sample_every",
                reason: "must be at least 1".into(),
            });
        }
        if self.downsample == 0 {
            return Err(ConfigError::Invalid {
                field: "downsample",
                reason: "must be at least 1".into(),
            });
        }
        if self.device_indices.is_empty() {
            return Err(ConfigError::Invalid {
                field: "device_indices",
                reason: "at least one capture device index is required".into(),
            });
        }
        Ok(())
    }

    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            device_indices: self.device_indices.clone(),
            capture: CaptureSettings {
                width: self.capture_width,
                height: self.capture_height,
                fps: self.capture_fps,
            },
            sample_every: self.sample_every,
            downsample: self.downsample,
            match_threshold: self.match_threshold,
        }
    }
}

fn env_parse<T: std::str::FromStr>(var: &impl Fn(&str) -> Option<String>, key: &str, slot: &mut T) {
    if let Some(v) = var(key) {
        match v.trim().parse() {
            Ok(parsed) => *slot = parsed,
            Err(_) => tracing::warn!(key, value = %v, "ignoring unparseable environment override"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults_match_reference_behaviour() {
        let c = Config::default();
        assert_eq!(c.match_threshold, 0.6);
        assert_eq!(c.sample_every, 3);
        assert_eq!(c.downsample, 4);
        assert_eq!(c.tick_interval_ms, 30);
        assert_eq!(c.device_indices, vec![0, 1]);
        assert!(c.validate().is_ok());
    }

    #[test]
    fn test_env_overrides() {
        let c = Config::default().with_env(env(&[
            ("ROLLCALL_MATCH_THRESHOLD", "0.45"),
            ("ROLLCALL_SAMPLE_EVERY", "5"),
            ("ROLLCALL_DEVICE_INDICES", "2, 0"),
            ("ROLLCALL_FACES_DIR", "/srv/faces"),
        ]));
        assert_eq!(c.match_threshold, 0.45);
        assert_eq!(c.sample_every, 5);
        assert_eq!(c.device_indices, vec![2, 0]);
        assert_eq!(c.faces_dir, PathBuf::from("/srv/faces"));
    }

    #[test]
    fn test_bad_env_values_ignored() {
        let c = Config::default().with_env(env(&[
            ("ROLLCALL_DOWNSAMPLE", "four"),
            ("ROLLCALL_DEVICE_INDICES", "0,x"),
        ]));
        assert_eq!(c.downsample, 4);
        assert_eq!(c.device_indices, vec![0, 1]);
    }

    #[test]
    fn test_toml_partial_file() {
        let c: Config = toml::from_str("match_threshold = 0.5\nlog_dir = \"/var/lib/rollcall\"\n").unwrap();
        assert_eq!(c.match_threshold, 0.5);
        assert_eq!(c.log_dir, PathBuf::from("/var/lib/rollcall"));
        assert_eq!(c.sample_every, 3);
    }

    #[test]
    fn test_toml_unknown_field_rejected() {
        assert!(toml::from_str::<Config>("treshold = 0.5\n").is_err());
    }

    #[test]
    fn test_validate_rejects_zero_ratio_and_bad_threshold() {
        let c = Config { sample_every: 0, ..Config::default() };
        assert!(matches!(c.validate(), Err(ConfigError::Invalid { field: "sample_every", .. })));
        let c = Config { match_threshold: f32::NAN, ..Config::default() };
        assert!(c.validate().is_err());
        let c = Config { device_indices: vec![], ..Config::default() };
        assert!(c.validate().is_err());
    }

    #[test]
    fn test_session_config_mapping() {
        let s = Config::default().session_config();
        assert_eq!(s, SessionConfig::default());
    }
}
