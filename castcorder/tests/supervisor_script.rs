//! The real capture supervisor driving a shell script that stands in for streamlink.
//!
//! The script's behaviour is picked by the endpoint URL, which streamlink
//! receives as its first argument.
#![cfg(unix)]

use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::Local;
use tempfile::TempDir;
use tokio::time::Instant;

use castcorder::capture::{AttemptOutcome, CaptureConfig, Recorder, StreamlinkRecorder, WatchdogConfig};
use castcorder::interrupt::{ShutdownSignal, StopLevel};
use castcorder::resolver::ResolvedEndpoint;
use castcorder::session::Session;

const FAKE_STREAMLINK: &str = r#"#!/bin/sh
mode="$1"
dest=""
while [ $# -gt 0 ]; do
    if [ "$1" = "-o" ]; then dest="$2"; fi
    shift
done

case "$mode" in
    clean)
        echo "[cli][info] Opening stream: best (hls)"
        printf 'recorded bytes' > "$dest"
        echo "[cli][info] Stream ended"
        exit 0
        ;;
    nofile)
        exit 0
        ;;
    nostreams)
        echo "error: No playable streams found on this URL: $mode" >&2
        exit 1
        ;;
    stall)
        printf 'abc' > "$dest"
        trap 'exit 0' INT
        sleep 60
        ;;
    hang)
        printf 'abc' > "$dest"
        trap 'exit 0' INT
        while :; do printf 'x' >> "$dest"; sleep 0.1; done
        ;;
    stubborn)
        printf 'abc' > "$dest"
        trap '' INT
        sleep 60
        ;;
esac
"#;

struct Fixture {
    temp: TempDir,
    script: PathBuf,
}

impl Fixture {
    fn new() -> Self {
        let temp = TempDir::new().unwrap();
        let script = temp.path().join("fake-streamlink");
        std::fs::write(&script, FAKE_STREAMLINK).unwrap();
        std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();
        Self { temp, script }
    }

    fn destination(&self) -> PathBuf {
        self.temp.path().join("capture.mp4")
    }

    fn recorder(&self, watchdog: WatchdogConfig, shutdown: &ShutdownSignal) -> StreamlinkRecorder {
        let config = CaptureConfig {
            streamlink_path: self.script.to_string_lossy().into_owned(),
            grace_period: Duration::from_secs(5),
            force_kill_bound: Duration::from_secs(2),
            ..CaptureConfig::default()
        };
        StreamlinkRecorder::new(config, watchdog, Arc::new(Session::default()), shutdown.clone())
    }
}

fn endpoint(mode: &str) -> ResolvedEndpoint {
    ResolvedEndpoint::new(mode, "best", "alice", None, None, Local::now())
}

fn no_watchdog() -> WatchdogConfig {
    WatchdogConfig {
        enabled: false,
        ..WatchdogConfig::default()
    }
}

async fn capture(
    recorder: &StreamlinkRecorder,
    mode: &str,
    destination: &Path,
    timeout: Option<Duration>,
) -> AttemptOutcome {
    recorder.capture(&endpoint(mode), destination, timeout).await
}

#[tokio::test]
async fn clean_exit_with_file_is_a_success() {
    let fx = Fixture::new();
    let shutdown = ShutdownSignal::new();
    let recorder = fx.recorder(WatchdogConfig::default(), &shutdown);
    let dest = fx.destination();

    let outcome = capture(&recorder, "clean", &dest, None).await;

    assert!(matches!(&outcome, AttemptOutcome::Success { path, .. } if path == &dest), "{outcome:?}");
    assert_eq!(std::fs::read_to_string(&dest).unwrap(), "recorded bytes");
}

#[tokio::test]
async fn clean_exit_without_file_is_a_process_error() {
    let fx = Fixture::new();
    let shutdown = ShutdownSignal::new();
    let recorder = fx.recorder(no_watchdog(), &shutdown);

    let outcome = capture(&recorder, "nofile", &fx.destination(), None).await;

    assert_eq!(outcome, AttemptOutcome::ProcessError { code: Some(0), path: None });
}

#[tokio::test]
async fn no_playable_streams_means_offline() {
    let fx = Fixture::new();
    let shutdown = ShutdownSignal::new();
    let recorder = fx.recorder(no_watchdog(), &shutdown);

    let outcome = capture(&recorder, "nostreams", &fx.destination(), None).await;

    assert_eq!(outcome, AttemptOutcome::OfflineBeforeStart);
}

#[tokio::test]
async fn stalled_capture_is_stopped() {
    let fx = Fixture::new();
    let shutdown = ShutdownSignal::new();
    let watchdog = WatchdogConfig {
        enabled: true,
        sample_interval: Duration::from_millis(100),
        stall_threshold: Duration::from_millis(500),
    };
    let recorder = fx.recorder(watchdog, &shutdown);
    let dest = fx.destination();

    let started = Instant::now();
    let outcome = capture(&recorder, "stall", &dest, None).await;

    assert_eq!(
        outcome,
        AttemptOutcome::StalledTimeout {
            path: Some(dest),
            last_size: 3
        }
    );
    assert!(started.elapsed() < Duration::from_secs(10));
}

#[tokio::test]
async fn deadline_stops_a_growing_capture_as_success() {
    let fx = Fixture::new();
    let shutdown = ShutdownSignal::new();
    let recorder = fx.recorder(no_watchdog(), &shutdown);
    let dest = fx.destination();

    let outcome = capture(&recorder, "hang", &dest, Some(Duration::from_millis(500))).await;

    assert!(matches!(outcome, AttemptOutcome::Success { .. }), "{outcome:?}");
    assert!(std::fs::metadata(&dest).unwrap().len() >= 3);
}

#[tokio::test]
async fn graceful_stop_interrupts_the_child() {
    let fx = Fixture::new();
    let shutdown = ShutdownSignal::new();
    let recorder = fx.recorder(no_watchdog(), &shutdown);
    let dest = fx.destination();

    let stopper = {
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(300)).await;
            shutdown.request(StopLevel::Graceful);
        })
    };
    let started = Instant::now();
    let outcome = capture(&recorder, "hang", &dest, None).await;
    stopper.await.unwrap();

    assert_eq!(outcome, AttemptOutcome::UserCancelled);
    assert!(started.elapsed() < Duration::from_secs(5), "exited within the grace period");
}

#[tokio::test]
async fn fast_stop_kills_within_the_force_bound() {
    let fx = Fixture::new();
    let shutdown = ShutdownSignal::new();
    let recorder = fx.recorder(no_watchdog(), &shutdown);

    let stopper = {
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(300)).await;
            shutdown.request(StopLevel::Fast);
        })
    };
    let started = Instant::now();
    let outcome = capture(&recorder, "stubborn", &fx.destination(), None).await;
    stopper.await.unwrap();

    assert_eq!(outcome, AttemptOutcome::UserCancelled);
    assert!(started.elapsed() < Duration::from_millis(300) + Duration::from_secs(2));
}

#[tokio::test]
async fn escalation_skips_the_rest_of_the_grace_period() {
    let fx = Fixture::new();
    let shutdown = ShutdownSignal::new();
    let recorder = fx.recorder(no_watchdog(), &shutdown);

    let stopper = {
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(300)).await;
            shutdown.escalate();
            tokio::time::sleep(Duration::from_millis(300)).await;
            shutdown.escalate();
        })
    };
    let started = Instant::now();
    let outcome = capture(&recorder, "stubborn", &fx.destination(), None).await;
    stopper.await.unwrap();

    assert_eq!(outcome, AttemptOutcome::UserCancelled);
    assert!(
        started.elapsed() < Duration::from_secs(4),
        "did not wait out the 5s grace period"
    );
}

#[tokio::test]
async fn long_grace_period_with_fast_sampling_still_returns() {
    let fx = Fixture::new();
    let shutdown = ShutdownSignal::new();
    let config = CaptureConfig {
        streamlink_path: fx.script.to_string_lossy().into_owned(),
        grace_period: Duration::from_secs(1),
        force_kill_bound: Duration::from_secs(2),
        ..CaptureConfig::default()
    };
    let watchdog = WatchdogConfig {
        enabled: true,
        sample_interval: Duration::from_millis(50),
        stall_threshold: Duration::from_secs(100),
    };
    let recorder = StreamlinkRecorder::new(config, watchdog, Arc::new(Session::default()), shutdown);
    let dest = fx.destination();

    let outcome = tokio::time::timeout(
        Duration::from_secs(10),
        capture(&recorder, "stubborn", &dest, Some(Duration::from_millis(300))),
    )
    .await
    .expect("capture hung while the watchdog kept sampling");

    assert!(matches!(outcome, AttemptOutcome::Success { .. }), "{outcome:?}");
}
