//! Liveness resolution.
//!
//! A [`LivenessResolver`] answers "is this channel live right now?" and, when
//! it is, hands back a fresh [`ResolvedEndpoint`] for the capture supervisor.
//! Resolution never fails with an error: network and parse problems come back
//! as [`LiveStatus::TransientError`].

mod page;
mod streamlink;
mod twitcasting;

use async_trait::async_trait;
use chrono::{DateTime, Local};

use crate::session::Session;

pub use page::{PageScrape, scrape};
pub use streamlink::{ProbeVerdict, classify_probe};
pub use twitcasting::TwitcastingResolver;

/// Everything the capture supervisor needs to record one broadcast.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedEndpoint {
    /// URL handed to the capture tool.
    pub url: String,
    /// Secondary URL tried once when the primary one fails to start.
    pub alternate_url: Option<String>,
    pub quality: String,
    pub channel: String,
    pub title: String,
    pub stream_id: String,
    pub thumbnail_url: Option<String>,
}

impl ResolvedEndpoint {
    /// Build an endpoint, filling in the fallback title and stream id.
    pub fn new(
        url: impl Into<String>,
        quality: impl Into<String>,
        channel: impl Into<String>,
        title: Option<String>,
        stream_id: Option<String>,
        now: DateTime<Local>,
    ) -> Self {
        let channel = channel.into();
        let title = title
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty())
            .unwrap_or_else(|| fallback_title(&channel));
        let stream_id = stream_id
            .filter(|id| !id.is_empty())
            .unwrap_or_else(|| fallback_stream_id(now));

        Self {
            url: url.into(),
            alternate_url: None,
            quality: quality.into(),
            channel,
            title,
            stream_id,
            thumbnail_url: None,
        }
    }

    pub fn with_alternate_url(mut self, url: Option<String>) -> Self {
        self.alternate_url = url;
        self
    }

    pub fn with_thumbnail_url(mut self, url: Option<String>) -> Self {
        self.thumbnail_url = url.filter(|u| !u.is_empty());
        self
    }

    /// A non-empty URL is the only requirement for starting a capture.
    pub fn is_actionable(&self) -> bool {
        !self.url.trim().is_empty()
    }

    /// The same endpoint pointed at its alternate URL, if it has one.
    pub fn alternate(&self) -> Option<Self> {
        let url = self.alternate_url.clone()?;
        if url == self.url {
            return None;
        }
        Some(Self {
            url,
            alternate_url: None,
            ..self.clone()
        })
    }
}

pub fn fallback_title(channel: &str) -> String {
    format!("{channel}'s TwitCasting Stream")
}

pub fn fallback_stream_id(now: DateTime<Local>) -> String {
    now.format("%Y%m%d_%H%M%S").to_string()
}

/// Result of one liveness check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LiveStatus {
    Offline,
    Live(ResolvedEndpoint),
    /// A private-stream password is needed and none is configured.
    AuthRequired,
    /// Network or parse failure; scheduled like `Offline` but logged louder.
    TransientError(String),
}

impl LiveStatus {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Offline => "offline",
            Self::Live(_) => "live",
            Self::AuthRequired => "auth-required",
            Self::TransientError(_) => "transient-error",
        }
    }
}

#[async_trait]
pub trait LivenessResolver: Send + Sync {
    async fn resolve(&self, channel: &str, session: &Session) -> LiveStatus;
}
