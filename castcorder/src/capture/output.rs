//! Streamlink output handling.
//!
//! Streamlink's `-v` output is drained line by line into debug logs so the
//! pipes never fill up. A few well-known status lines are recognised and folded
//! into an [`OutputSummary`]; classification never depends on anything else in
//! the output.

use std::io;

use tokio::io::{AsyncRead, AsyncReadExt};
use tracing::{debug, info, warn};

const READ_CHUNK: usize = 4096;

/// Reads an async stream as text records split on `\n` or `\r`.
pub struct RecordReader<R> {
    inner: R,
    buf: Vec<u8>,
    eof: bool,
}

impl<R: AsyncRead + Unpin> RecordReader<R> {
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            buf: Vec::with_capacity(READ_CHUNK),
            eof: false,
        }
    }

    /// Next non-blank record, or `None` at end of stream.
    pub async fn next_record(&mut self) -> io::Result<Option<String>> {
        loop {
            if let Some(end) = self.buf.iter().position(|b| matches!(b, b'\n' | b'\r')) {
                let rest = self.buf.split_off(end + 1);
                let record = std::mem::replace(&mut self.buf, rest);
                let text = String::from_utf8_lossy(&record[..end]).trim().to_string();
                if text.is_empty() {
                    continue;
                }
                return Ok(Some(text));
            }

            if self.eof {
                let text = String::from_utf8_lossy(&self.buf).trim().to_string();
                self.buf.clear();
                return Ok((!text.is_empty()).then_some(text));
            }

            let mut chunk = [0u8; READ_CHUNK];
            let n = self.inner.read(&mut chunk).await?;
            if n == 0 {
                self.eof = true;
            } else {
                self.buf.extend_from_slice(&chunk[..n]);
            }
        }
    }
}

/// Status lines streamlink prints that the supervisor cares about.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamlinkStatus {
    StreamOpened,
    StreamEnded,
    NoPlayableStreams,
    Error(String),
}

pub fn parse_status(line: &str) -> Option<StreamlinkStatus> {
    let lower = line.to_lowercase();
    if lower.contains("no playable streams") || lower.contains("no streams found") {
        return Some(StreamlinkStatus::NoPlayableStreams);
    }
    if line.contains("[cli][info] Opening stream") {
        return Some(StreamlinkStatus::StreamOpened);
    }
    if line.contains("[cli][info] Stream ended") {
        return Some(StreamlinkStatus::StreamEnded);
    }
    if line.contains("[cli][error]") || line.starts_with("error: ") {
        return Some(StreamlinkStatus::Error(line.to_string()));
    }
    None
}

/// What the drained output said, merged across stdout and stderr.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OutputSummary {
    pub opened: bool,
    pub ended: bool,
    pub no_streams: bool,
    pub last_error: Option<String>,
}

impl OutputSummary {
    pub fn merge(mut self, other: OutputSummary) -> Self {
        self.opened |= other.opened;
        self.ended |= other.ended;
        self.no_streams |= other.no_streams;
        if other.last_error.is_some() {
            self.last_error = other.last_error;
        }
        self
    }

    fn record(&mut self, channel: &str, status: StreamlinkStatus) {
        match status {
            StreamlinkStatus::StreamOpened => {
                self.opened = true;
                info!(channel, "Streamlink opened the stream");
            }
            StreamlinkStatus::StreamEnded => {
                self.ended = true;
                info!(channel, "Streamlink reports the stream ended");
            }
            StreamlinkStatus::NoPlayableStreams => {
                self.no_streams = true;
                debug!(channel, "Streamlink found no playable streams");
            }
            StreamlinkStatus::Error(line) => {
                warn!(channel, "Streamlink error: {}", line);
                self.last_error = Some(line);
            }
        }
    }
}

/// Read `reader` to its end, logging every record at debug.
pub async fn drain<R>(reader: R, channel: String, stream: &'static str) -> OutputSummary
where
    R: AsyncRead + Unpin,
{
    let mut records = RecordReader::new(reader);
    let mut summary = OutputSummary::default();
    loop {
        match records.next_record().await {
            Ok(Some(line)) => {
                debug!(channel = %channel, stream, "{}", line);
                if let Some(status) = parse_status(&line) {
                    summary.record(&channel, status);
                }
            }
            Ok(None) => break,
            Err(e) => {
                debug!(channel = %channel, stream, "Output read failed: {}", e);
                break;
            }
        }
    }
    summary
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use tokio::io::AsyncWriteExt;

    #[tokio::test]
    async fn records_split_on_cr_and_lf() {
        let (mut tx, rx) = tokio::io::duplex(64);
        tokio::spawn(async move {
            let _ = tx.write_all(b"a\r\rb\nc\r\n\n  d  ").await;
        });

        let mut reader = RecordReader::new(rx);
        let mut out = Vec::new();
        while let Some(r) = reader.next_record().await.unwrap() {
            out.push(r);
        }
        assert_eq!(out, vec!["a", "b", "c", "d"]);
    }

    #[rstest]
    #[case("[cli][info] Opening stream: 1080p (hls)", Some(StreamlinkStatus::StreamOpened))]
    #[case("[cli][info] Stream ended", Some(StreamlinkStatus::StreamEnded))]
    #[case(
        "error: No playable streams found on this URL: https://twitcasting.tv/a",
        Some(StreamlinkStatus::NoPlayableStreams)
    )]
    #[case(
        "[cli][error] Try 1/30: Could not open stream",
        Some(StreamlinkStatus::Error("[cli][error] Try 1/30: Could not open stream".into()))
    )]
    #[case("[stream.hls][debug] Reloading playlist", None)]
    fn parses_status_lines(#[case] line: &str, #[case] expected: Option<StreamlinkStatus>) {
        assert_eq!(parse_status(line), expected);
    }

    #[tokio::test]
    async fn drain_summarizes_output() {
        let text: &[u8] =
            b"[cli][info] Found matching plugin twitcasting\nerror: No playable streams found\n";
        let summary = drain(text, "alice".to_string(), "stdout").await;
        assert!(summary.no_streams);
        assert!(!summary.opened);
    }

    #[test]
    fn merge_keeps_flags_from_both_sides() {
        let a = OutputSummary {
            opened: true,
            last_error: Some("first".into()),
            ..Default::default()
        };
        let b = OutputSummary {
            no_streams: true,
            last_error: Some("second".into()),
            ..Default::default()
        };
        let merged = a.merge(b);
        assert!(merged.opened && merged.no_streams);
        assert_eq!(merged.last_error.as_deref(), Some("second"));
    }
}
