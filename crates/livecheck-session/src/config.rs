use std::path::{Path, PathBuf};
use std::time::Duration;

use livecheck_core::{SoftResetPolicy, Thresholds};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Session configuration.
///
/// Layered as defaults, then an optional TOML file, then `LIVECHECK_*`
/// environment variables.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Endpoint of the remote scoring service.
    pub scoring_url: String,
    /// Per-request timeout for a scoring round-trip.
    pub scoring_timeout_secs: u64,
    /// Total session budget; the hard deadline.
    pub hard_limit_secs: u64,
    /// Soft "no valid face" deadline. Zero disables it.
    pub soft_limit_secs: u64,
    /// Which non-qualifying results re-arm the soft deadline.
    pub soft_policy: SoftResetPolicy,
    /// Qualifying submissions needed to pass.
    pub success_threshold: u32,
    /// Spoof scores at or above this value do not qualify.
    pub spoof_threshold: f32,
    /// Face-match scores at or above this value do not qualify.
    pub face_match_threshold: f32,
    /// Sampler tick interval in milliseconds.
    pub tick_ms: u64,
    /// A still is produced every `still_every` ticks.
    pub still_every: u64,
    /// Width of the encoded still in pixels.
    pub still_width: u32,
    /// JPEG quality of the encoded still (1-100).
    pub still_quality: u8,
    /// Display width of the preview surface in pixels.
    pub preview_width: u32,
    /// Mirror the preview horizontally. Stills are never mirrored.
    pub mirrored: bool,
    /// Resolution requested from hardware cameras; drivers may pick the
    /// nearest mode they support.
    pub capture_width: u32,
    pub capture_height: u32,
}

impl Default for Config {
    fn default() -> Self {
        let thresholds = Thresholds::default();
        Self {
            scoring_url: "http://127.0.0.1:8080/predictions/biometric".to_string(),
            scoring_timeout_secs: 10,
            hard_limit_secs: 900,
            soft_limit_secs: 120,
            soft_policy: SoftResetPolicy::default(),
            success_threshold: livecheck_core::state::DEFAULT_SUCCESS_THRESHOLD,
            spoof_threshold: thresholds.spoof,
            face_match_threshold: thresholds.face_match,
            tick_ms: 100,
            still_every: 15,
            still_width: 600,
            still_quality: 100,
            preview_width: 640,
            mirrored: false,
            capture_width: 640,
            capture_height: 480,
        }
    }
}

impl Config {
    /// Load from an optional TOML file, then apply environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.apply_overrides(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&raw).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Apply `LIVECHECK_*` overrides from `lookup`. Unparsable values are
    /// ignored with a warning.
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(url) = lookup("LIVECHECK_SCORING_URL") {
            self.scoring_url = url;
        }
        override_parsed(&lookup, "LIVECHECK_SCORING_TIMEOUT_SECS", &mut self.scoring_timeout_secs);
        override_parsed(&lookup, "LIVECHECK_HARD_LIMIT_SECS", &mut self.hard_limit_secs);
        override_parsed(&lookup, "LIVECHECK_SOFT_LIMIT_SECS", &mut self.soft_limit_secs);
        override_parsed(&lookup, "LIVECHECK_SOFT_POLICY", &mut self.soft_policy);
        override_parsed(&lookup, "LIVECHECK_SUCCESS_THRESHOLD", &mut self.success_threshold);
        override_parsed(&lookup, "LIVECHECK_SPOOF_THRESHOLD", &mut self.spoof_threshold);
        override_parsed(&lookup, "LIVECHECK_FACE_MATCH_THRESHOLD", &mut self.face_match_threshold);
        override_parsed(&lookup, "LIVECHECK_TICK_MS", &mut self.tick_ms);
        override_parsed(&lookup, "LIVECHECK_STILL_EVERY", &mut self.still_every);
        override_parsed(&lookup, "LIVECHECK_STILL_WIDTH", &mut self.still_width);
        override_parsed(&lookup, "LIVECHECK_STILL_QUALITY", &mut self.still_quality);
        override_parsed(&lookup, "LIVECHECK_PREVIEW_WIDTH", &mut self.preview_width);
        override_parsed(&lookup, "LIVECHECK_CAPTURE_WIDTH", &mut self.capture_width);
        override_parsed(&lookup, "LIVECHECK_CAPTURE_HEIGHT", &mut self.capture_height);
        if let Some(v) = lookup("LIVECHECK_MIRRORED") {
            self.mirrored = v != "0" && !v.eq_ignore_ascii_case("false");
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |msg: &str| Err(ConfigError::Invalid(msg.to_string()));
        if self.hard_limit_secs == 0 {
            return invalid("hard_limit_secs must be greater than zero");
        }
        if self.success_threshold == 0 {
            return invalid("success_threshold must be greater than zero");
        }
        if self.tick_ms == 0 || self.still_every == 0 {
            return invalid("tick_ms and still_every must be greater than zero");
        }
        if self.still_width == 0 || self.preview_width == 0 {
            return invalid("still_width and preview_width must be greater than zero");
        }
        if self.capture_width == 0 || self.capture_height == 0 {
            return invalid("capture_width and capture_height must be greater than zero");
        }
        if !(1..=100).contains(&self.still_quality) {
            return invalid("still_quality must be within 1..=100");
        }
        for (name, value) in [
            ("spoof_threshold", self.spoof_threshold),
            ("face_match_threshold", self.face_match_threshold),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(ConfigError::Invalid(format!(
                    "{name} must be within [0, 1], got {value}"
                )));
            }
        }
        Ok(())
    }

    pub fn thresholds(&self) -> Thresholds {
        Thresholds {
            spoof: self.spoof_threshold,
            face_match: self.face_match_threshold,
        }
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_ms)
    }

    pub fn scoring_timeout(&self) -> Duration {
        Duration::from_secs(self.scoring_timeout_secs)
    }
}

fn override_parsed<T: std::str::FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
    slot: &mut T,
) {
    let Some(raw) = lookup(key) else {
        return;
    };
    match raw.parse() {
        Ok(value) => *slot = value,
        Err(_) => tracing::warn!(key, value = %raw, "ignoring unparsable override"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key: &str| map.get(key).cloned()
    }

    #[test]
    fn test_defaults_are_valid() {
        let config = Config::default();
        config.validate().unwrap();
        assert_eq!(config.hard_limit_secs, 900);
        assert_eq!(config.still_every, 15);
        assert_eq!(config.still_width, 600);
        assert_eq!(config.success_threshold, 5);
        assert_eq!(config.tick_interval(), Duration::from_millis(100));
    }

    #[test]
    fn test_env_overrides() {
        let mut config = Config::default();
        config.apply_overrides(lookup(&[
            ("LIVECHECK_HARD_LIMIT_SECS", "60"),
            ("LIVECHECK_SOFT_POLICY", "any-failure"),
            ("LIVECHECK_SPOOF_THRESHOLD", "0.25"),
            ("LIVECHECK_MIRRORED", "1"),
            ("LIVECHECK_CAPTURE_WIDTH", "1280"),
            ("LIVECHECK_CAPTURE_HEIGHT", "720"),
        ]));
        assert_eq!((config.capture_width, config.capture_height), (1280, 720));
        assert_eq!(config.hard_limit_secs, 60);
        assert_eq!(config.soft_policy, SoftResetPolicy::AnyFailure);
        assert!((config.spoof_threshold - 0.25).abs() < 1e-6);
        assert!(config.mirrored);
    }

    #[test]
    fn test_bad_override_keeps_value() {
        let mut config = Config::default();
        config.apply_overrides(lookup(&[
            ("LIVECHECK_TICK_MS", "fast"),
            ("LIVECHECK_SOFT_POLICY", "never"),
        ]));
        assert_eq!(config.tick_ms, 100);
        assert_eq!(config.soft_policy, SoftResetPolicy::LowMatch);
    }

    #[test]
    fn test_toml_partial_file() {
        let config: Config = toml::from_str(
            r#"
            hard_limit_secs = 300
            soft_policy = "any-failure"
            mirrored = true
            "#,
        )
        .unwrap();
        assert_eq!(config.hard_limit_secs, 300);
        assert_eq!(config.soft_policy, SoftResetPolicy::AnyFailure);
        assert!(config.mirrored);
        // Unspecified keys keep their defaults
        assert_eq!(config.still_width, 600);
    }

    #[test]
    fn test_missing_file_reported() {
        let path = std::env::temp_dir().join("livecheck-config-test-does-not-exist.toml");
        let err = Config::from_file(&path).unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
    }

    #[test]
    fn test_validation_rejects() {
        let mut config = Config::default();
        config.hard_limit_secs = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.face_match_threshold = 1.5;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.still_every = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.capture_height = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.soft_limit_secs = 0;
        assert!(config.validate().is_ok());
    }
}
