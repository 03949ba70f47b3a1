//! Application configuration.
//!
//! One [`AppConfig`] is built at startup from defaults, an optional TOML file
//! and command-line overrides, validated once, then handed to each component.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::capture::{CaptureConfig, WatchdogConfig};
use crate::controller::{ControllerSettings, RetryPolicy};
use crate::postprocess::PostProcessConfig;
use crate::validator::ValidationConfig;
use crate::{Error, Result};

pub const DEFAULT_BASE_URL: &str = "https://twitcasting.tv";
pub const LOCAL_CONFIG_FILE: &str = "castcorder.toml";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Channels to watch. Empty means "pick from the streamers file".
    pub channels: Vec<String>,
    pub streamers_file: PathBuf,
    pub base_url: String,
    /// Recordings go to `<save_dir>/<channel>/`.
    pub save_dir: PathBuf,
    pub log_dir: PathBuf,
    /// Treat the first interrupt as an immediate stop.
    pub fast_exit: bool,
    /// Stop a channel after its first accepted recording.
    pub stop_after_success: bool,
    pub capture: CaptureConfig,
    pub watchdog: WatchdogConfig,
    pub retry: RetryPolicy,
    pub validation: ValidationConfig,
    pub postprocess: PostProcessConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            channels: Vec::new(),
            streamers_file: PathBuf::from("streamers.txt"),
            base_url: DEFAULT_BASE_URL.to_string(),
            save_dir: PathBuf::from("."),
            log_dir: PathBuf::from("logs"),
            fast_exit: false,
            stop_after_success: false,
            capture: CaptureConfig::default(),
            watchdog: WatchdogConfig::default(),
            retry: RetryPolicy::default(),
            validation: ValidationConfig::default(),
            postprocess: PostProcessConfig::default(),
        }
    }
}

impl AppConfig {
    pub fn from_toml_str(s: &str) -> Result<Self> {
        toml::from_str(s).map_err(|e| Error::config(e.to_string()))
    }

    pub fn from_toml_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::io_path("reading config file", path, e))?;
        toml::from_str(&content)
            .map_err(|e| Error::config(format!("{}: {e}", path.display())))
    }

    /// Load from `explicit`, or the first config file found in the usual
    /// places, or fall back to defaults.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        if let Some(path) = explicit {
            return Self::from_toml_file(path);
        }
        match default_config_paths().into_iter().find(|p| p.is_file()) {
            Some(path) => {
                debug!(path = %path.display(), "Loading config file");
                Self::from_toml_file(&path)
            }
            None => Ok(Self::default()),
        }
    }

    /// Check cross-field constraints. All problems are reported at once.
    pub fn validate(&self) -> Result<()> {
        let mut errors = Vec::new();

        if self.capture.quality.trim().is_empty() {
            errors.push("capture.quality must not be empty".to_string());
        }
        if self.capture.streamlink_path.trim().is_empty() {
            errors.push("capture.streamlink_path must not be empty".to_string());
        }
        if self.watchdog.sample_interval.is_zero() {
            errors.push("watchdog.sample_interval_secs must be > 0".to_string());
        }
        if self.watchdog.stall_threshold <= self.watchdog.sample_interval {
            errors.push(format!(
                "watchdog.stall_threshold_secs ({}) must be greater than sample_interval_secs ({})",
                self.watchdog.stall_threshold.as_secs(),
                self.watchdog.sample_interval.as_secs()
            ));
        }
        if !(self.retry.backoff_multiplier >= 1.0) {
            errors.push(format!(
                "retry.backoff_multiplier must be >= 1.0, got {}",
                self.retry.backoff_multiplier
            ));
        }
        if self.retry.max_delay < self.retry.retry_delay {
            errors.push("retry.max_delay_secs must be >= retry_delay_secs".to_string());
        }
        if let Err(e) = url::Url::parse(&self.base_url) {
            errors.push(format!("base_url {:?} is not a valid URL: {e}", self.base_url));
        }
        if let Some(bad) = self.channels.iter().find(|c| !is_valid_channel(c)) {
            errors.push(format!("invalid channel name {bad:?}"));
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(Error::config(errors.join("; ")))
        }
    }

    /// Directory a channel's recordings are written to.
    pub fn channel_dir(&self, channel: &str) -> PathBuf {
        self.save_dir.join(channel)
    }

    pub fn controller_settings(&self, channel: &str) -> ControllerSettings {
        ControllerSettings {
            output_dir: self.channel_dir(channel),
            retry: self.retry.clone(),
            capture_timeout: self.capture.max_duration,
            invalid_artifacts: self.validation.invalid_artifacts,
            stop_after_success: self.stop_after_success,
        }
    }
}

/// Channel ids are path segments, both in URLs and on disk.
pub fn is_valid_channel(name: &str) -> bool {
    !name.is_empty()
        && name != "."
        && name != ".."
        && !name.contains(['/', '\\'])
        && !name.chars().any(|c| c.is_whitespace() || c.is_control())
}

fn default_config_paths() -> Vec<PathBuf> {
    let mut paths = vec![PathBuf::from(LOCAL_CONFIG_FILE)];
    if let Some(dir) = dirs::config_dir() {
        paths.push(dir.join("castcorder").join("config.toml"));
    }
    paths
}

/// Serde adapter for durations written as whole seconds.
pub mod secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_secs)
    }
}

/// Like [`secs`], for optional limits; `0` means no limit.
pub mod opt_secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(
        value: &Option<Duration>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        match value {
            Some(d) => serializer.serialize_some(&d.as_secs()),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<Duration>, D::Error> {
        let secs = Option::<u64>::deserialize(deserializer)?;
        Ok(secs.filter(|s| *s > 0).map(Duration::from_secs))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::validator::InvalidArtifactPolicy;
    use std::time::Duration;

    const SAMPLE: &str = r#"
        channels = ["alice", "bob"]
        save_dir = "/srv/rec"
        fast_exit = true

        [capture]
        quality = "720p,best"
        max_duration_secs = 0

        [watchdog]
        sample_interval_secs = 5
        stall_threshold_secs = 60

        [retry]
        retry_delay_secs = 10
        backoff_multiplier = 2.0
        max_consecutive_failures = 3
        max_failure_window_secs = 3600

        [validation]
        min_size_bytes = 2048
        invalid_artifacts = "keep"

        [postprocess]
        keep_raw = true
    "#;

    #[test]
    fn parses_full_file() {
        let cfg = AppConfig::from_toml_str(SAMPLE).unwrap();
        assert_eq!(cfg.channels, vec!["alice", "bob"]);
        assert_eq!(cfg.channel_dir("alice"), PathBuf::from("/srv/rec/alice"));
        assert!(cfg.fast_exit);
        assert_eq!(cfg.capture.quality, "720p,best");
        assert_eq!(cfg.capture.max_duration, None);
        assert_eq!(cfg.watchdog.stall_threshold, Duration::from_secs(60));
        assert_eq!(cfg.retry.max_failure_window, Some(Duration::from_secs(3600)));
        assert_eq!(cfg.retry.check_interval, Duration::from_secs(15));
        assert_eq!(cfg.validation.invalid_artifacts, InvalidArtifactPolicy::Keep);
        assert!(cfg.postprocess.keep_raw);
        cfg.validate().unwrap();
    }

    #[test]
    fn defaults_are_valid() {
        let cfg = AppConfig::default();
        cfg.validate().unwrap();
        assert_eq!(cfg.base_url, "https://twitcasting.tv");
        assert_eq!(cfg.retry.max_consecutive_failures, 5);
        assert_eq!(cfg.validation.min_size_bytes, 1024 * 1024);
    }

    #[test]
    fn reports_every_violation() {
        let mut cfg = AppConfig::default();
        cfg.capture.quality = " ".into();
        cfg.watchdog.sample_interval = Duration::ZERO;
        cfg.retry.backoff_multiplier = 0.5;
        cfg.channels = vec!["../etc".into()];

        let msg = cfg.validate().unwrap_err().to_string();
        assert!(msg.contains("capture.quality"));
        assert!(msg.contains("sample_interval_secs must be > 0"));
        assert!(msg.contains("backoff_multiplier"));
        assert!(msg.contains("invalid channel name"));
    }

    #[test]
    fn stall_threshold_must_exceed_sample_interval() {
        let mut cfg = AppConfig::default();
        cfg.watchdog.stall_threshold = cfg.watchdog.sample_interval;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn unknown_value_type_is_a_config_error() {
        let err = AppConfig::from_toml_str("fast_exit = \"sometimes\"").unwrap_err();
        assert!(matches!(err, Error::Configuration(_)));
    }

    #[test]
    fn explicit_missing_file_is_an_error() {
        let temp = tempfile::TempDir::new().unwrap();
        let err = AppConfig::load(Some(&temp.path().join("nope.toml"))).unwrap_err();
        assert!(matches!(err, Error::Io { .. }));
    }

    #[test]
    fn explicit_file_is_loaded() {
        let temp = tempfile::TempDir::new().unwrap();
        let path = temp.path().join("c.toml");
        std::fs::write(&path, "stop_after_success = true\n").unwrap();
        assert!(AppConfig::load(Some(&path)).unwrap().stop_after_success);
    }

    #[test]
    fn channel_names() {
        assert!(is_valid_channel("c:alice"));
        assert!(is_valid_channel("g:117191000000"));
        assert!(!is_valid_channel(""));
        assert!(!is_valid_channel("a/b"));
        assert!(!is_valid_channel(".."));
        assert!(!is_valid_channel("a b"));
    }
}
