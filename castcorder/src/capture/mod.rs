//! Capture supervision.
//!
//! The [`Recorder`] trait is the seam between the controller and the external
//! capture tool. [`StreamlinkRecorder`] is the production implementation: it
//! owns exactly one streamlink process per call, runs a [`watchdog::Watchdog`]
//! alongside it and turns however the process ended into an [`AttemptOutcome`].

pub mod output;
pub mod process;
pub mod supervisor;
pub mod watchdog;

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::config::{opt_secs, secs};
use crate::resolver::ResolvedEndpoint;

pub use supervisor::StreamlinkRecorder;
pub use watchdog::{StallDetector, Watchdog, WatchdogConfig, WatchdogEvent};

pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/101.0.4951.67 Safari/537.36";

/// How one capture attempt ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttemptOutcome {
    /// The tool finished and left a file behind; the validator decides if it is usable.
    Success { path: PathBuf, duration: Duration },
    TooShort { path: PathBuf },
    Empty { path: Option<PathBuf> },
    /// The broadcast ended between the liveness check and the capture start.
    OfflineBeforeStart,
    /// The watchdog saw no growth for longer than the stall threshold.
    StalledTimeout { path: Option<PathBuf>, last_size: u64 },
    UserCancelled,
    ProcessError {
        code: Option<i32>,
        path: Option<PathBuf>,
    },
}

impl AttemptOutcome {
    /// The (possibly partial) file this attempt left behind.
    pub fn path(&self) -> Option<&Path> {
        match self {
            Self::Success { path, .. } | Self::TooShort { path } => Some(path),
            Self::Empty { path }
            | Self::StalledTimeout { path, .. }
            | Self::ProcessError { path, .. } => path.as_deref(),
            Self::OfflineBeforeStart | Self::UserCancelled => None,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Success { .. } => "success",
            Self::TooShort { .. } => "too-short",
            Self::Empty { .. } => "empty",
            Self::OfflineBeforeStart => "offline-before-start",
            Self::StalledTimeout { .. } => "stalled",
            Self::UserCancelled => "cancelled",
            Self::ProcessError { .. } => "process-error",
        }
    }
}

/// Records one resolved endpoint into `destination`.
#[async_trait]
pub trait Recorder: Send + Sync {
    /// Block until the capture ends, is stopped by the watchdog, hits
    /// `timeout` or is cancelled. The capture process is gone when this returns.
    async fn capture(
        &self,
        endpoint: &ResolvedEndpoint,
        destination: &Path,
        timeout: Option<Duration>,
    ) -> AttemptOutcome;
}

/// Streamlink invocation settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    pub streamlink_path: String,
    pub quality: String,
    pub user_agent: String,
    /// Passed to `--retry-streams`.
    pub retry_streams: u32,
    pub extra_args: Vec<String>,
    /// Hard cap on one capture's length.
    #[serde(rename = "max_duration_secs", with = "opt_secs")]
    pub max_duration: Option<Duration>,
    #[serde(rename = "grace_period_secs", with = "secs")]
    pub grace_period: Duration,
    #[serde(rename = "force_kill_secs", with = "secs")]
    pub force_kill_bound: Duration,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            streamlink_path: "streamlink".to_string(),
            quality: "best".to_string(),
            user_agent: DEFAULT_USER_AGENT.to_string(),
            retry_streams: 30,
            extra_args: Vec::new(),
            max_duration: None,
            grace_period: Duration::from_secs(10),
            force_kill_bound: Duration::from_secs(2),
        }
    }
}
