use std::path::Path;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use super::output::{OutputSummary, drain};
use super::process::ManagedProcess;
use super::watchdog::{Watchdog, WatchdogConfig, WatchdogEvent};
use super::{AttemptOutcome, CaptureConfig, Recorder};
use crate::interrupt::{ShutdownSignal, StopLevel};
use crate::resolver::ResolvedEndpoint;
use crate::session::Session;
use crate::utils::format::{format_duration, format_size};
use crate::utils::fs::file_size;

const PROGRESS_LOG_INTERVAL: Duration = Duration::from_secs(60);
const DRAIN_JOIN_TIMEOUT: Duration = Duration::from_secs(1);

/// Build the streamlink command line for one capture.
pub fn build_streamlink_args(
    config: &CaptureConfig,
    endpoint: &ResolvedEndpoint,
    session: &Session,
    destination: &Path,
) -> Vec<String> {
    let mut args = vec![
        endpoint.url.clone(),
        endpoint.quality.clone(),
        "-o".to_string(),
        destination.to_string_lossy().into_owned(),
        "--force".to_string(),
        "--http-header".to_string(),
        format!("User-Agent={}", config.user_agent),
        "--hls-live-restart".to_string(),
        "--retry-streams".to_string(),
        config.retry_streams.to_string(),
        "-v".to_string(),
    ];
    args.extend(session.password_args());
    args.extend(session.cookie_args());
    args.extend(config.extra_args.iter().cloned());
    args
}

/// Why the wait loop stopped.
enum StopReason {
    Exited(std::io::Result<std::process::ExitStatus>),
    Deadline,
    Stalled { last_size: u64, idle: Duration },
    Cancelled(StopLevel),
}

/// Runs streamlink under supervision.
pub struct StreamlinkRecorder {
    config: CaptureConfig,
    watchdog: WatchdogConfig,
    session: Arc<Session>,
    shutdown: ShutdownSignal,
}

impl StreamlinkRecorder {
    pub fn new(
        config: CaptureConfig,
        watchdog: WatchdogConfig,
        session: Arc<Session>,
        shutdown: ShutdownSignal,
    ) -> Self {
        Self {
            config,
            watchdog,
            session,
            shutdown,
        }
    }

    fn command(&self, endpoint: &ResolvedEndpoint, destination: &Path) -> tokio::process::Command {
        let mut cmd = process_utils::supervised_command(&self.config.streamlink_path);
        cmd.args(build_streamlink_args(
            &self.config,
            endpoint,
            &self.session,
            destination,
        ))
        .env("PYTHONIOENCODING", "utf-8")
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
        cmd
    }

    /// Wait for whichever comes first: exit, deadline, stall or cancellation.
    async fn wait_for_stop(
        &self,
        process: &mut ManagedProcess,
        channel: &str,
        timeout: Option<Duration>,
        events: &mut Option<mpsc::Receiver<WatchdogEvent>>,
    ) -> StopReason {
        let deadline = timeout.map(|t| Instant::now() + t);
        let deadline_sleep = async move {
            match deadline {
                Some(at) => tokio::time::sleep_until(at).await,
                None => std::future::pending::<()>().await,
            }
        };
        tokio::pin!(deadline_sleep);

        let mut last_logged: Option<Instant> = None;
        loop {
            tokio::select! {
                biased;
                _ = self.shutdown.fast_cancelled() => return StopReason::Cancelled(StopLevel::Fast),
                _ = self.shutdown.cancelled() => return StopReason::Cancelled(StopLevel::Graceful),
                status = process.wait() => return StopReason::Exited(status),
                _ = &mut deadline_sleep => return StopReason::Deadline,
                event = recv_event(events) => match event {
                    Some(WatchdogEvent::Progress { size, elapsed }) => {
                        let now = Instant::now();
                        if last_logged.is_none_or(|at| now - at >= PROGRESS_LOG_INTERVAL) {
                            last_logged = Some(now);
                            info!(
                                channel,
                                size = %format_size(size),
                                elapsed = %format_duration(elapsed),
                                "Recording in progress"
                            );
                        }
                    }
                    Some(WatchdogEvent::Stalled { last_size, idle }) => {
                        return StopReason::Stalled { last_size, idle };
                    }
                    None => *events = None,
                },
            }
        }
    }
}

/// Next watchdog event, or never when there is no watchdog.
async fn recv_event(events: &mut Option<mpsc::Receiver<WatchdogEvent>>) -> Option<WatchdogEvent> {
    match events {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

async fn join_drains(tasks: Vec<JoinHandle<OutputSummary>>) -> OutputSummary {
    let mut summary = OutputSummary::default();
    for mut task in tasks {
        match tokio::time::timeout(DRAIN_JOIN_TIMEOUT, &mut task).await {
            Ok(Ok(part)) => summary = summary.merge(part),
            Ok(Err(e)) => debug!("Output drain task failed: {}", e),
            Err(_) => {
                debug!("Output drain did not finish in time");
                task.abort();
            }
        }
    }
    summary
}

#[async_trait]
impl Recorder for StreamlinkRecorder {
    async fn capture(
        &self,
        endpoint: &ResolvedEndpoint,
        destination: &Path,
        timeout: Option<Duration>,
    ) -> AttemptOutcome {
        let channel = endpoint.channel.as_str();
        if self.shutdown.is_cancelled() {
            return AttemptOutcome::UserCancelled;
        }

        let mut process = ManagedProcess::new("streamlink", self.command(endpoint, destination));
        let (stdout, stderr) = match process.spawn() {
            Ok(pipes) => pipes,
            Err(e) => {
                error!(channel, "Could not start capture: {}", e);
                return AttemptOutcome::ProcessError {
                    code: None,
                    path: None,
                };
            }
        };
        info!(
            channel,
            url = %endpoint.url,
            path = %destination.display(),
            "Recording started"
        );

        let mut drains = Vec::with_capacity(2);
        if let Some(out) = stdout {
            drains.push(tokio::spawn(drain(out, channel.to_string(), "stdout")));
        }
        if let Some(err) = stderr {
            drains.push(tokio::spawn(drain(err, channel.to_string(), "stderr")));
        }

        let (tx, rx) = mpsc::channel(8);
        let watchdog = Watchdog::spawn(destination.to_path_buf(), &self.watchdog, tx);
        let mut events = watchdog.is_some().then_some(rx);

        let started = Instant::now();
        let reason = self
            .wait_for_stop(&mut process, channel, timeout, &mut events)
            .await;

        let fast = self.shutdown.fast_token();
        let grace = self.config.grace_period;
        let bound = self.config.force_kill_bound;
        let exit = match &reason {
            StopReason::Exited(status) => status.as_ref().ok().copied(),
            StopReason::Deadline => {
                info!(channel, "Maximum capture duration reached, stopping");
                process.terminate(grace, bound, &fast).await
            }
            StopReason::Stalled { last_size, idle } => {
                warn!(
                    channel,
                    last_size,
                    idle = ?idle,
                    "No output growth, stopping stalled capture"
                );
                process.terminate(grace, bound, &fast).await
            }
            StopReason::Cancelled(StopLevel::Graceful) => {
                info!(channel, "Stopping capture gracefully");
                process.terminate(grace, bound, &fast).await
            }
            StopReason::Cancelled(StopLevel::Fast) => {
                info!(channel, "Killing capture");
                process.kill(bound).await
            }
        };

        drop(events);
        if let Some(watchdog) = watchdog {
            watchdog.stop().await;
        }
        let summary = join_drains(drains).await;
        let elapsed = started.elapsed();
        let size = file_size(destination).await;
        let path = size.map(|_| destination.to_path_buf());

        debug!(
            channel,
            exit = ?exit,
            size = ?size,
            elapsed = ?elapsed,
            "Capture process finished"
        );

        match reason {
            StopReason::Cancelled(_) => AttemptOutcome::UserCancelled,
            StopReason::Stalled { last_size, .. } => {
                AttemptOutcome::StalledTimeout { path, last_size }
            }
            StopReason::Deadline => match path {
                Some(path) => AttemptOutcome::Success {
                    path,
                    duration: elapsed,
                },
                None => AttemptOutcome::ProcessError {
                    code: exit.and_then(|s| s.code()),
                    path: None,
                },
            },
            StopReason::Exited(Err(e)) => {
                error!(channel, "Failed waiting for capture process: {}", e);
                AttemptOutcome::ProcessError { code: None, path }
            }
            StopReason::Exited(Ok(status)) if status.success() => match path {
                Some(path) => AttemptOutcome::Success {
                    path,
                    duration: elapsed,
                },
                None => {
                    warn!(channel, "Capture exited cleanly but wrote no file");
                    AttemptOutcome::ProcessError {
                        code: status.code(),
                        path: None,
                    }
                }
            },
            StopReason::Exited(Ok(status)) => {
                if summary.no_streams && size.unwrap_or(0) == 0 {
                    return AttemptOutcome::OfflineBeforeStart;
                }
                if let Some(last) = &summary.last_error {
                    warn!(channel, code = ?status.code(), "Capture failed: {}", last);
                }
                AttemptOutcome::ProcessError {
                    code: status.code(),
                    path,
                }
            }
        }
    }
}
