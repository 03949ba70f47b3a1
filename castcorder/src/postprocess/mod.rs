//! Post-processing handoff.
//!
//! Once a recording is accepted the controller hands it to a
//! [`PostProcessor`] and moves on. [`MkvPostProcessor`] remuxes the raw file
//! into Matroska with metadata and the thumbnail attached, on a tracked
//! background task so shutdown can wait for (or kill) running conversions.

mod thumbnail;

use std::path::{Path, PathBuf};
use std::process::Stdio;

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

use crate::utils::filename::unique_path;

pub use thumbnail::ThumbnailDownloader;

/// A finished, validated recording.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Handoff {
    pub raw_path: PathBuf,
    pub title: String,
    pub channel: String,
    pub stream_id: String,
    pub recorded_at: DateTime<Local>,
    pub thumbnail: Option<PathBuf>,
}

/// Receives accepted recordings. Must not block on the conversion itself.
pub trait PostProcessor: Send + Sync {
    fn handoff(&self, job: Handoff);
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PostProcessConfig {
    /// Convert to MKV. When off, raw recordings are left as they are.
    pub enabled: bool,
    pub ffmpeg_path: String,
    /// Keep the raw file after a successful conversion.
    pub keep_raw: bool,
    pub download_thumbnail: bool,
}

impl Default for PostProcessConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            ffmpeg_path: "ffmpeg".to_string(),
            keep_raw: false,
            download_thumbnail: true,
        }
    }
}

/// Container metadata written into the converted file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordingMetadata {
    pub title: String,
    pub artist: String,
    pub date: String,
    pub comment: String,
}

impl RecordingMetadata {
    pub fn new(job: &Handoff, channel_url: &str) -> Self {
        Self {
            title: job.title.clone(),
            artist: job.channel.clone(),
            date: job.recorded_at.format("%Y-%m-%d").to_string(),
            comment: format!(
                "Recorded from {} on {}",
                channel_url,
                job.recorded_at.format("%Y-%m-%d %H:%M:%S")
            ),
        }
    }
}

/// ffmpeg arguments for a stream-copy remux into `output`.
pub fn build_ffmpeg_args(
    input: &Path,
    output: &Path,
    metadata: &RecordingMetadata,
    thumbnail: Option<&Path>,
) -> Vec<String> {
    let mut args: Vec<String> = vec![
        "-y".into(),
        "-hide_banner".into(),
        "-i".into(),
        input.to_string_lossy().into_owned(),
        "-map".into(),
        "0".into(),
        "-c".into(),
        "copy".into(),
    ];
    for (key, value) in [
        ("title", &metadata.title),
        ("artist", &metadata.artist),
        ("date", &metadata.date),
        ("comment", &metadata.comment),
    ] {
        args.push("-metadata".into());
        args.push(format!("{key}={value}"));
    }
    if let Some(thumb) = thumbnail {
        args.push("-attach".into());
        args.push(thumb.to_string_lossy().into_owned());
        args.push("-metadata:s:t".into());
        args.push("mimetype=image/jpeg".into());
    }
    args.push(output.to_string_lossy().into_owned());
    args
}

pub struct MkvPostProcessor {
    config: PostProcessConfig,
    base_url: String,
    tracker: TaskTracker,
    /// Cancelled on a fast stop; kills running conversions.
    kill: CancellationToken,
}

impl MkvPostProcessor {
    pub fn new(config: PostProcessConfig, base_url: &str, kill: CancellationToken) -> Self {
        Self {
            config,
            base_url: base_url.trim_end_matches('/').to_string(),
            tracker: TaskTracker::new(),
            kill,
        }
    }

    /// Number of conversions still running.
    pub fn pending(&self) -> usize {
        self.tracker.len()
    }

    /// Stop accepting work and wait for running conversions.
    pub async fn wait(&self) {
        self.tracker.close();
        self.tracker.wait().await;
    }
}

impl PostProcessor for MkvPostProcessor {
    fn handoff(&self, job: Handoff) {
        if !self.config.enabled {
            info!(path = %job.raw_path.display(), "Conversion disabled, keeping raw recording");
            return;
        }

        let config = self.config.clone();
        let channel_url = format!("{}/{}", self.base_url, job.channel);
        let kill = self.kill.clone();
        self.tracker.spawn(async move {
            convert(config, channel_url, job, kill).await;
        });
    }
}

async fn convert(config: PostProcessConfig, channel_url: String, job: Handoff, kill: CancellationToken) {
    let dir = job
        .raw_path
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_default();
    let stem = job
        .raw_path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| job.stream_id.clone());
    let output = unique_path(&dir, &stem, "mkv");
    let metadata = RecordingMetadata::new(&job, &channel_url);
    let args = build_ffmpeg_args(&job.raw_path, &output, &metadata, job.thumbnail.as_deref());

    info!(
        channel = %job.channel,
        input = %job.raw_path.display(),
        output = %output.display(),
        "Converting recording to MKV"
    );
    debug!("ffmpeg args: {:?}", args);

    let mut cmd = process_utils::supervised_command(&config.ffmpeg_path);
    cmd.args(&args)
        .env("LC_ALL", "C")
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::piped());

    let result = tokio::select! {
        out = cmd.output() => out,
        _ = kill.cancelled() => {
            warn!(channel = %job.channel, "Conversion killed by shutdown; raw file kept");
            let _ = tokio::fs::remove_file(&output).await;
            return;
        }
    };

    match result {
        Ok(out) if out.status.success() => {
            info!(channel = %job.channel, path = %output.display(), "Conversion finished");
            if !config.keep_raw
                && let Err(e) = tokio::fs::remove_file(&job.raw_path).await
            {
                warn!(path = %job.raw_path.display(), "Failed to remove raw recording: {}", e);
            }
            if let Some(thumb) = &job.thumbnail
                && let Err(e) = tokio::fs::remove_file(thumb).await
            {
                debug!(path = %thumb.display(), "Failed to remove thumbnail: {}", e);
            }
        }
        Ok(out) => {
            error!(
                channel = %job.channel,
                code = ?out.status.code(),
                "ffmpeg failed, keeping raw recording: {}",
                String::from_utf8_lossy(&out.stderr).trim()
            );
        }
        Err(e) => {
            error!(channel = %job.channel, "Failed to run ffmpeg, keeping raw recording: {}", e);
        }
    }
}
