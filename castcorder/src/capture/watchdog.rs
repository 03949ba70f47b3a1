//! Output-growth watchdog.
//!
//! Samples the destination file's size on a fixed interval and reports
//! progress or a stall over a channel. It never touches the capture process;
//! the supervisor decides what to do with a [`WatchdogEvent::Stalled`].

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::config::secs;
use crate::utils::fs::file_size;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WatchdogConfig {
    /// When off, only the capture timeout bounds an attempt.
    pub enabled: bool,
    #[serde(rename = "sample_interval_secs", with = "secs")]
    pub sample_interval: Duration,
    #[serde(rename = "stall_threshold_secs", with = "secs")]
    pub stall_threshold: Duration,
}

impl Default for WatchdogConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            sample_interval: Duration::from_secs(10),
            stall_threshold: Duration::from_secs(120),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchdogEvent {
    Progress { size: u64, elapsed: Duration },
    Stalled { last_size: u64, idle: Duration },
}

/// Pure stall detection over a series of size samples.
#[derive(Debug, Clone)]
pub struct StallDetector {
    threshold: Duration,
    started: Instant,
    last_size: u64,
    last_growth: Instant,
}

impl StallDetector {
    pub fn new(threshold: Duration, now: Instant) -> Self {
        Self {
            threshold,
            started: now,
            last_size: 0,
            last_growth: now,
        }
    }

    /// Feed one sample. A missing file counts as zero bytes.
    pub fn observe(&mut self, size: Option<u64>, now: Instant) -> WatchdogEvent {
        let size = size.unwrap_or(0);
        if size > self.last_size {
            self.last_size = size;
            self.last_growth = now;
        }

        let idle = now.saturating_duration_since(self.last_growth);
        if idle > self.threshold {
            WatchdogEvent::Stalled {
                last_size: self.last_size,
                idle,
            }
        } else {
            WatchdogEvent::Progress {
                size: self.last_size,
                elapsed: now.saturating_duration_since(self.started),
            }
        }
    }

    pub fn last_size(&self) -> u64 {
        self.last_size
    }
}

/// Handle to a running watchdog task.
pub struct Watchdog {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

impl Watchdog {
    /// Start sampling `path`. Returns `None` when the watchdog is disabled.
    ///
    /// The task stops on its own after reporting a stall or when `tx` is closed.
    pub fn spawn(
        path: PathBuf,
        config: &WatchdogConfig,
        tx: mpsc::Sender<WatchdogEvent>,
    ) -> Option<Self> {
        if !config.enabled {
            return None;
        }

        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let interval = config.sample_interval;
        let threshold = config.stall_threshold;

        let handle = tokio::spawn(async move {
            let mut detector = StallDetector::new(threshold, Instant::now());
            let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {}
                }

                let size = file_size(&path).await;
                let event = detector.observe(size, Instant::now());
                let stalled = matches!(event, WatchdogEvent::Stalled { .. });
                // The receiver may be busy terminating the process; never outlive cancel.
                let sent = tokio::select! {
                    _ = token.cancelled() => false,
                    r = tx.send(event) => r.is_ok(),
                };
                if !sent || stalled {
                    break;
                }
            }
            debug!(path = %path.display(), "Watchdog stopped");
        });

        Some(Self { cancel, handle })
    }

    /// Stop the task and wait for it to finish.
    pub async fn stop(self) {
        self.cancel.cancel();
        if let Err(e) = self.handle.await
            && e.is_panic()
        {
            debug!("Watchdog task panicked: {}", e);
        }
    }
}
