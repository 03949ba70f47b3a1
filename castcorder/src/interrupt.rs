//! Process-wide stop signal with a graceful and a fast level.
//!
//! A [`ShutdownSignal`] is created once at startup and cloned into every
//! component. Every blocking wait in the recorder selects on it. Levels only
//! ever escalate (`None -> Graceful -> Fast`) and are never cleared in a run.

use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::{CancellationToken, WaitForCancellationFuture};
use tracing::{info, warn};

const LEVEL_NONE: u8 = 0;
const LEVEL_GRACEFUL: u8 = 1;
const LEVEL_FAST: u8 = 2;

/// How urgently the operator asked the recorder to stop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum StopLevel {
    /// Let the capture tool finalize its output before exiting.
    Graceful,
    /// Kill immediately, accepting an unplayable partial file.
    Fast,
}

impl std::fmt::Display for StopLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Graceful => write!(f, "graceful"),
            Self::Fast => write!(f, "fast"),
        }
    }
}

struct Inner {
    level: AtomicU8,
    /// Cancelled on any stop request.
    any: CancellationToken,
    /// Cancelled only on a fast stop request.
    fast: CancellationToken,
}

/// Shared, cloneable cancellation state.
#[derive(Clone)]
pub struct ShutdownSignal {
    inner: Arc<Inner>,
}

impl ShutdownSignal {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                level: AtomicU8::new(LEVEL_NONE),
                any: CancellationToken::new(),
                fast: CancellationToken::new(),
            }),
        }
    }

    /// Raise the stop level. Returns `true` if this call changed the level.
    ///
    /// Requesting a level at or below the current one is a no-op.
    pub fn request(&self, level: StopLevel) -> bool {
        let target = match level {
            StopLevel::Graceful => LEVEL_GRACEFUL,
            StopLevel::Fast => LEVEL_FAST,
        };
        let previous = self.inner.level.fetch_max(target, Ordering::SeqCst);
        if previous >= target {
            return false;
        }

        self.inner.any.cancel();
        if target == LEVEL_FAST {
            self.inner.fast.cancel();
        }
        true
    }

    /// Raise the level by one step; returns the new level.
    pub fn escalate(&self) -> StopLevel {
        match self.level() {
            None => {
                self.request(StopLevel::Graceful);
            }
            Some(_) => {
                self.request(StopLevel::Fast);
            }
        }
        self.level().unwrap_or(StopLevel::Fast)
    }

    pub fn level(&self) -> Option<StopLevel> {
        match self.inner.level.load(Ordering::SeqCst) {
            LEVEL_NONE => None,
            LEVEL_GRACEFUL => Some(StopLevel::Graceful),
            _ => Some(StopLevel::Fast),
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.any.is_cancelled()
    }

    pub fn is_fast(&self) -> bool {
        self.inner.fast.is_cancelled()
    }

    /// Resolves once any stop level has been requested.
    pub fn cancelled(&self) -> WaitForCancellationFuture<'_> {
        self.inner.any.cancelled()
    }

    /// Resolves once a fast stop has been requested.
    pub fn fast_cancelled(&self) -> WaitForCancellationFuture<'_> {
        self.inner.fast.cancelled()
    }

    /// Token cancelled on any stop request, for handing to spawned tasks.
    pub fn token(&self) -> CancellationToken {
        self.inner.any.clone()
    }

    /// Token cancelled only on a fast stop request.
    pub fn fast_token(&self) -> CancellationToken {
        self.inner.fast.clone()
    }

    /// Sleep for `duration` unless a stop is requested first.
    ///
    /// Returns `true` if the full duration elapsed.
    pub async fn sleep(&self, duration: Duration) -> bool {
        tokio::select! {
            _ = self.cancelled() => false,
            _ = tokio::time::sleep(duration) => !self.is_cancelled(),
        }
    }
}

impl Default for ShutdownSignal {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for ShutdownSignal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ShutdownSignal")
            .field("level", &self.level())
            .finish()
    }
}

/// Listen for Ctrl+C (and SIGTERM on unix) for the rest of the process lifetime.
///
/// The first signal requests a graceful stop, or a fast one when `fast_exit`
/// is set; any further signal escalates to a fast stop.
pub fn spawn_signal_listener(signal: ShutdownSignal, fast_exit: bool) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            if let Err(e) = wait_for_os_signal().await {
                warn!("Failed to listen for shutdown signals: {}", e);
                return;
            }

            let level = if fast_exit {
                signal.request(StopLevel::Fast);
                StopLevel::Fast
            } else {
                signal.escalate()
            };

            match level {
                StopLevel::Graceful => info!(
                    "Stop requested, finishing the current recording cleanly (press Ctrl+C again to stop immediately)"
                ),
                StopLevel::Fast => {
                    info!("Immediate stop requested, killing active captures");
                    return;
                }
            }
        }
    })
}

async fn wait_for_os_signal() -> std::io::Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        let mut term = signal(SignalKind::terminate())?;
        tokio::select! {
            res = tokio::signal::ctrl_c() => res,
            _ = term.recv() => Ok(()),
        }
    }
    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await
    }
}
