//! `streamlink --json` liveness probe, used when the channel page is unreachable.

use std::process::Stdio;
use std::time::Duration;

use serde::Deserialize;
use tracing::debug;

use crate::session::Session;

const PROBE_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Debug, Default, Deserialize)]
pub(crate) struct StreamlinkJson {
    #[serde(default)]
    pub plugin: Option<String>,
    #[serde(default)]
    pub metadata: Option<StreamlinkMetadata>,
    #[serde(default)]
    pub streams: Option<serde_json::Map<String, serde_json::Value>>,
    #[serde(default)]
    pub error: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub(crate) struct StreamlinkMetadata {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
}

/// Interpretation of a probe's JSON document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProbeVerdict {
    Live {
        title: Option<String>,
        stream_id: Option<String>,
    },
    Offline,
    AuthRequired,
    Failed(String),
}

/// Classify streamlink's `--json` stdout.
///
/// Streamlink prints JSON even when it exits non-zero, so the exit status is
/// not consulted.
pub fn classify_probe(stdout: &str, has_private_password: bool) -> ProbeVerdict {
    let json: StreamlinkJson = match serde_json::from_str(stdout.trim()) {
        Ok(json) => json,
        Err(e) => return ProbeVerdict::Failed(format!("unparseable streamlink output: {e}")),
    };

    if let Some(error) = json.error {
        let lower = error.to_lowercase();
        if lower.contains("password") && !has_private_password {
            return ProbeVerdict::AuthRequired;
        }
        if lower.contains("no playable streams") || lower.contains("no streams found") {
            return ProbeVerdict::Offline;
        }
        return ProbeVerdict::Failed(error);
    }

    if json.streams.as_ref().is_some_and(|s| s.is_empty()) {
        return ProbeVerdict::Offline;
    }

    if let Some(plugin) = json.plugin.as_deref() {
        debug!(plugin, "Streamlink probe matched plugin");
    }
    let metadata = json.metadata.unwrap_or_default();
    ProbeVerdict::Live {
        title: metadata.title,
        stream_id: metadata.id,
    }
}

/// Run `streamlink --json` against `url` and classify the result.
pub(crate) async fn probe(
    streamlink_path: &str,
    url: &str,
    quality: &str,
    user_agent: &str,
    session: &Session,
) -> ProbeVerdict {
    let mut cmd = process_utils::tokio_command(streamlink_path);
    cmd.arg("--json")
        .arg(url)
        .arg(quality)
        .arg("--http-header")
        .arg(format!("User-Agent={user_agent}"))
        .args(session.password_args())
        .args(session.cookie_args())
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let output = match tokio::time::timeout(PROBE_TIMEOUT, cmd.output()).await {
        Ok(Ok(output)) => output,
        Ok(Err(e)) => return ProbeVerdict::Failed(format!("failed to spawn streamlink: {e}")),
        Err(_) => return ProbeVerdict::Failed("streamlink probe timed out".to_string()),
    };

    let stdout = String::from_utf8_lossy(&output.stdout);
    match classify_probe(&stdout, session.private_password.is_some()) {
        ProbeVerdict::Failed(reason) if !output.status.success() => {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let stderr = stderr.trim();
            if stderr.is_empty() {
                ProbeVerdict::Failed(reason)
            } else {
                ProbeVerdict::Failed(format!("{reason}; stderr: {stderr}"))
            }
        }
        verdict => verdict,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[test]
    fn live_document_carries_metadata() {
        let json = r#"{
            "plugin": "twitcasting",
            "metadata": {"id": "812345678", "author": "alice", "title": "hello"},
            "streams": {"best": {"type": "hls", "url": "https://x/y.m3u8"}}
        }"#;
        assert_eq!(
            classify_probe(json, false),
            ProbeVerdict::Live {
                title: Some("hello".into()),
                stream_id: Some("812345678".into()),
            }
        );
    }

    #[rstest]
    #[case("No playable streams found on this URL: https://twitcasting.tv/a", false, ProbeVerdict::Offline)]
    #[case("This stream is password-protected", false, ProbeVerdict::AuthRequired)]
    #[case(
        "This stream is password-protected",
        true,
        ProbeVerdict::Failed("This stream is password-protected".into())
    )]
    #[case("Unable to open URL: 503", false, ProbeVerdict::Failed("Unable to open URL: 503".into()))]
    fn error_documents(#[case] error: &str, #[case] has_pw: bool, #[case] expected: ProbeVerdict) {
        let json = serde_json::json!({ "error": error }).to_string();
        assert_eq!(classify_probe(&json, has_pw), expected);
    }

    #[test]
    fn empty_stream_map_is_offline() {
        assert_eq!(classify_probe(r#"{"streams": {}}"#, false), ProbeVerdict::Offline);
    }

    #[test]
    fn garbage_is_a_failure() {
        assert!(matches!(
            classify_probe("[cli][info] something", false),
            ProbeVerdict::Failed(_)
        ));
    }

    #[tokio::test]
    async fn missing_binary_is_a_failure() {
        let verdict = probe(
            "/nonexistent/streamlink",
            "https://twitcasting.tv/alice",
            "best",
            "ua",
            &Session::default(),
        )
        .await;
        assert!(matches!(verdict, ProbeVerdict::Failed(_)));
    }
}
