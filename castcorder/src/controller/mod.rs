//! Per-channel recording controller.
//!
//! [`Controller::run`] drives the [`machine::StateMachine`] for one channel:
//! it performs each effect the machine asks for (resolve, capture, validate,
//! hand off, sleep) against the injected collaborators and feeds the result
//! back in. Cancellation is checked before every step and raced against every
//! wait.

pub mod machine;
pub mod retry;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Local};
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::capture::{AttemptOutcome, Recorder};
use crate::interrupt::ShutdownSignal;
use crate::postprocess::{Handoff, PostProcessor, ThumbnailDownloader};
use crate::resolver::{LiveStatus, LivenessResolver, ResolvedEndpoint};
use crate::session::Session;
use crate::utils::filename::{recording_stem, unique_path};
use crate::utils::fs::{ensure_dir_all_with_op, move_into};
use crate::validator::{ArtifactValidator, InvalidArtifactPolicy};
use crate::Result;

use machine::{Effect, Event, StateMachine};
pub use retry::{RetryPolicy, RetryState};

const FAILED_DIR: &str = "failed";

/// How a channel's run ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    /// Stopped after a successful recording as configured.
    Completed,
    /// The retry bound was exceeded.
    Abandoned { failures: u32 },
    AuthRequired,
    Cancelled,
    /// Unrecoverable error, such as an unwritable recording directory.
    Failed(String),
}

impl RunOutcome {
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Completed => 0,
            Self::Failed(_) => 1,
            Self::Abandoned { .. } => 2,
            Self::AuthRequired => 3,
            Self::Cancelled => 130,
        }
    }

    /// Ordering used to pick one exit code for several channels.
    pub fn severity(&self) -> u8 {
        match self {
            Self::Completed => 0,
            Self::Cancelled => 1,
            Self::Failed(_) => 2,
            Self::Abandoned { .. } => 3,
            Self::AuthRequired => 4,
        }
    }
}

/// Per-channel settings taken from the application config.
#[derive(Debug, Clone)]
pub struct ControllerSettings {
    /// Directory recordings are written to.
    pub output_dir: PathBuf,
    pub retry: RetryPolicy,
    pub capture_timeout: Option<Duration>,
    pub invalid_artifacts: InvalidArtifactPolicy,
    pub stop_after_success: bool,
}

/// The collaborators a controller drives.
#[derive(Clone)]
pub struct Collaborators {
    pub resolver: Arc<dyn LivenessResolver>,
    pub recorder: Arc<dyn Recorder>,
    pub validator: Arc<dyn ArtifactValidator>,
    pub postprocessor: Arc<dyn PostProcessor>,
    pub thumbnails: Option<Arc<ThumbnailDownloader>>,
}

pub struct Controller {
    channel: String,
    settings: ControllerSettings,
    collaborators: Collaborators,
    session: Arc<Session>,
    shutdown: ShutdownSignal,
}

impl Controller {
    pub fn new(
        channel: impl Into<String>,
        settings: ControllerSettings,
        collaborators: Collaborators,
        session: Arc<Session>,
        shutdown: ShutdownSignal,
    ) -> Self {
        Self {
            channel: channel.into(),
            settings,
            collaborators,
            session,
            shutdown,
        }
    }

    pub fn channel(&self) -> &str {
        &self.channel
    }

    /// Watch the channel until the run ends.
    pub async fn run(&self) -> RunOutcome {
        info!(channel = %self.channel, "Watching channel");
        // A manual URL names a single broadcast, so one recording ends the run.
        let manual = self.session.manual_endpoint.is_some();
        let mut machine = StateMachine::new(
            self.channel.clone(),
            self.settings.retry.clone(),
            self.settings.stop_after_success || manual,
        );
        let mut started_at = Local::now();
        let mut event = Event::Start;

        loop {
            if self.shutdown.is_cancelled() {
                event = Event::Cancelled;
            }

            event = match machine.step(event, Instant::now()) {
                Effect::Resolve => self.resolve().await,
                Effect::Capture(endpoint) => {
                    started_at = Local::now();
                    match self.capture(&endpoint, started_at).await {
                        Ok(outcome) => Event::Captured(outcome),
                        Err(e) => {
                            error!(channel = %self.channel, "{}", e);
                            return RunOutcome::Failed(e.to_string());
                        }
                    }
                }
                Effect::Validate(path) => self.validate(&path).await,
                Effect::Handoff {
                    endpoint,
                    path,
                    duration,
                } => {
                    self.handoff(&endpoint, path, duration, started_at).await;
                    Event::HandedOff
                }
                Effect::Sleep(delay) => self.sleep(delay).await,
                Effect::Retry { discard, delay } => {
                    if let Some(path) = discard {
                        self.dispose(&path).await;
                    }
                    self.sleep(delay).await
                }
                Effect::Abandon { discard, failures } => {
                    if let Some(path) = discard {
                        self.dispose(&path).await;
                    }
                    return RunOutcome::Abandoned { failures };
                }
                Effect::Finish(outcome) => {
                    info!(channel = %self.channel, outcome = ?outcome, "Stopped watching channel");
                    return outcome;
                }
            };
        }
    }

    async fn resolve(&self) -> Event {
        let resolver = &self.collaborators.resolver;
        tokio::select! {
            _ = self.shutdown.cancelled() => Event::Cancelled,
            status = resolver.resolve(&self.channel, &self.session) => {
                if let LiveStatus::Offline = status {
                    info!(
                        channel = %self.channel,
                        "Offline, checking again in {:?}",
                        self.settings.retry.check_interval
                    );
                }
                Event::Status(status)
            }
        }
    }

    async fn validate(&self, path: &Path) -> Event {
        tokio::select! {
            _ = self.shutdown.cancelled() => Event::Cancelled,
            verdict = self.collaborators.validator.validate(path) => Event::Validated(verdict),
        }
    }

    async fn sleep(&self, delay: Duration) -> Event {
        if self.shutdown.sleep(delay).await {
            Event::DelayElapsed
        } else {
            Event::Cancelled
        }
    }

    /// Capture into a fresh file; a failed start is retried once on the
    /// alternate URL within the same attempt.
    async fn capture(
        &self,
        endpoint: &ResolvedEndpoint,
        started_at: DateTime<Local>,
    ) -> Result<AttemptOutcome> {
        ensure_dir_all_with_op("creating recording directory", &self.settings.output_dir).await?;
        let stem = recording_stem(&endpoint.title, &endpoint.channel, &endpoint.stream_id, started_at);
        let destination = unique_path(&self.settings.output_dir, &stem, "mp4");

        let recorder = &self.collaborators.recorder;
        let timeout = self.settings.capture_timeout;
        let outcome = recorder.capture(endpoint, &destination, timeout).await;

        if let AttemptOutcome::ProcessError { code, .. } = &outcome
            && !self.shutdown.is_cancelled()
            && let Some(alternate) = endpoint.alternate()
        {
            warn!(
                channel = %self.channel,
                code = ?code,
                url = %alternate.url,
                "Capture failed, trying alternate URL"
            );
            return Ok(recorder.capture(&alternate, &destination, timeout).await);
        }
        Ok(outcome)
    }

    async fn handoff(
        &self,
        endpoint: &ResolvedEndpoint,
        path: PathBuf,
        duration: Duration,
        recorded_at: DateTime<Local>,
    ) {
        let thumbnail = match (&self.collaborators.thumbnails, &endpoint.thumbnail_url) {
            (Some(downloader), Some(url)) => {
                downloader.fetch(url, &path.with_extension("jpg")).await
            }
            _ => None,
        };

        info!(
            channel = %self.channel,
            path = %path.display(),
            duration = ?duration,
            "Handing off recording"
        );
        self.collaborators.postprocessor.handoff(Handoff {
            raw_path: path,
            title: endpoint.title.clone(),
            channel: endpoint.channel.clone(),
            stream_id: endpoint.stream_id.clone(),
            recorded_at,
            thumbnail,
        });
    }

    /// Apply the invalid-artifact policy to a rejected file.
    async fn dispose(&self, path: &Path) {
        if tokio::fs::metadata(path).await.is_err() {
            return;
        }
        match self.settings.invalid_artifacts {
            InvalidArtifactPolicy::Keep => {
                debug!(path = %path.display(), "Keeping rejected recording");
            }
            InvalidArtifactPolicy::Delete => match tokio::fs::remove_file(path).await {
                Ok(()) => info!(path = %path.display(), "Deleted rejected recording"),
                Err(e) => warn!(path = %path.display(), "Failed to delete rejected recording: {}", e),
            },
            InvalidArtifactPolicy::Backup => {
                let dir = self.settings.output_dir.join(FAILED_DIR);
                match move_into(path, &dir).await {
                    Ok(moved) => info!(path = %moved.display(), "Moved rejected recording"),
                    Err(e) => warn!(path = %path.display(), "Failed to move rejected recording: {}", e),
                }
            }
        }
    }
}

/// The most severe outcome across channels.
pub fn combine_outcomes<'a>(outcomes: impl IntoIterator<Item = &'a RunOutcome>) -> Option<&'a RunOutcome> {
    outcomes.into_iter().max_by_key(|o| o.severity())
}
