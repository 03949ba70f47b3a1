//! Artifact validation.
//!
//! Classifies a finished capture as usable, too short or empty. Validation is
//! read-only: moving or deleting a bad file is the controller's job.

use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::config::secs;
use crate::utils::fs::file_size;

const PROBE_TIMEOUT: Duration = Duration::from_secs(30);

/// What to do with a capture that failed validation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InvalidArtifactPolicy {
    /// Move into a `failed/` directory next to the recordings.
    #[default]
    Backup,
    Delete,
    Keep,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ValidationConfig {
    pub min_size_bytes: u64,
    #[serde(rename = "min_duration_secs", with = "secs")]
    pub min_duration: Duration,
    pub ffprobe_path: String,
    /// Use ffprobe for duration checks. Without it only size is checked.
    pub probe: bool,
    pub invalid_artifacts: InvalidArtifactPolicy,
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            min_size_bytes: 1024 * 1024,
            min_duration: Duration::from_secs(10),
            ffprobe_path: "ffprobe".to_string(),
            probe: true,
            invalid_artifacts: InvalidArtifactPolicy::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Validation {
    /// Media duration, when a probe could read it.
    Usable { duration: Option<Duration> },
    TooShort,
    Empty,
}

impl Validation {
    pub fn is_usable(&self) -> bool {
        matches!(self, Self::Usable { .. })
    }
}

#[async_trait]
pub trait ArtifactValidator: Send + Sync {
    async fn validate(&self, path: &Path) -> Validation;
}

/// Size check plus an optional ffprobe duration check.
pub struct FileValidator {
    config: ValidationConfig,
}

impl FileValidator {
    pub fn new(config: ValidationConfig) -> Self {
        Self { config }
    }

    /// Media duration via ffprobe; `None` when ffprobe is unavailable or unsure.
    async fn probe_duration(&self, path: &Path) -> Option<Duration> {
        let mut cmd = process_utils::tokio_command(&self.config.ffprobe_path);
        cmd.args([
            "-v",
            "error",
            "-show_entries",
            "format=duration",
            "-of",
            "default=noprint_wrappers=1:nokey=1",
        ])
        .arg(path)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

        let output = match tokio::time::timeout(PROBE_TIMEOUT, cmd.output()).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => {
                debug!("ffprobe unavailable, validating by size only: {}", e);
                return None;
            }
            Err(_) => {
                warn!(path = %path.display(), "ffprobe timed out");
                return None;
            }
        };

        if !output.status.success() {
            debug!(
                path = %path.display(),
                "ffprobe failed: {}",
                String::from_utf8_lossy(&output.stderr).trim()
            );
            return None;
        }
        parse_probe_output(&String::from_utf8_lossy(&output.stdout))
    }
}

#[async_trait]
impl ArtifactValidator for FileValidator {
    async fn validate(&self, path: &Path) -> Validation {
        let size = match file_size(path).await {
            None | Some(0) => return Validation::Empty,
            Some(size) => size,
        };
        if size < self.config.min_size_bytes {
            debug!(path = %path.display(), size, "Below minimum size");
            return Validation::TooShort;
        }

        if !self.config.probe {
            return Validation::Usable { duration: None };
        }

        match self.probe_duration(path).await {
            Some(duration) if duration < self.config.min_duration => {
                debug!(path = %path.display(), duration = ?duration, "Below minimum duration");
                Validation::TooShort
            }
            duration => Validation::Usable { duration },
        }
    }
}

/// Parse ffprobe's bare `format=duration` output.
pub fn parse_probe_output(stdout: &str) -> Option<Duration> {
    let secs: f64 = stdout.lines().next()?.trim().parse().ok()?;
    Duration::try_from_secs_f64(secs).ok()
}
