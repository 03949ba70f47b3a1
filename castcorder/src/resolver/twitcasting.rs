use std::time::Duration;

use async_trait::async_trait;
use chrono::Local;
use reqwest::Client;
use reqwest::header::{COOKIE, HeaderMap, HeaderValue};
use tracing::{debug, info, warn};

use super::page::scrape;
use super::streamlink::{ProbeVerdict, probe};
use super::{LiveStatus, LivenessResolver, ResolvedEndpoint};
use crate::capture::CaptureConfig;
use crate::session::Session;
use crate::{Error, Result};

const PAGE_TIMEOUT: Duration = Duration::from_secs(10);

/// Resolves TwitCasting channels by scraping the channel page, falling back
/// to a `streamlink --json` probe when the page cannot be fetched.
pub struct TwitcastingResolver {
    client: Client,
    base_url: String,
    quality: String,
    user_agent: String,
    streamlink_path: String,
}

impl TwitcastingResolver {
    pub fn new(base_url: &str, capture: &CaptureConfig) -> Result<Self> {
        let client = Client::builder()
            .user_agent(capture.user_agent.clone())
            .timeout(PAGE_TIMEOUT)
            .build()?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            quality: capture.quality.clone(),
            user_agent: capture.user_agent.clone(),
            streamlink_path: capture.streamlink_path.clone(),
        })
    }

    pub fn channel_url(&self, channel: &str) -> String {
        format!("{}/{}", self.base_url, channel)
    }

    async fn fetch_page(&self, url: &str, session: &Session) -> Result<String> {
        let mut headers = HeaderMap::new();
        if let Some(cookie) = session.cookie_header() {
            let value = HeaderValue::from_str(&cookie)
                .map_err(|e| Error::config(format!("invalid cookie string: {e}")))?;
            headers.insert(COOKIE, value);
        }

        let body = self
            .client
            .get(url)
            .headers(headers)
            .send()
            .await?
            .error_for_status()?
            .text()
            .await?;
        Ok(body)
    }

    fn endpoint(
        &self,
        channel: &str,
        title: Option<String>,
        stream_id: Option<String>,
        thumbnail_url: Option<String>,
    ) -> ResolvedEndpoint {
        let channel_url = self.channel_url(channel);
        let alternate = stream_id
            .as_deref()
            .filter(|id| id.chars().all(|c| c.is_ascii_digit()))
            .map(|id| format!("{channel_url}/movie/{id}"));

        ResolvedEndpoint::new(
            channel_url,
            self.quality.clone(),
            channel,
            title,
            stream_id,
            Local::now(),
        )
        .with_alternate_url(alternate)
        .with_thumbnail_url(thumbnail_url)
    }

    async fn probe_fallback(&self, channel: &str, session: &Session) -> LiveStatus {
        let url = self.channel_url(channel);
        match probe(
            &self.streamlink_path,
            &url,
            &self.quality,
            &self.user_agent,
            session,
        )
        .await
        {
            ProbeVerdict::Live { title, stream_id } => {
                info!(channel, "Streamlink probe reports the channel live");
                LiveStatus::Live(self.endpoint(channel, title, stream_id, None))
            }
            ProbeVerdict::Offline => LiveStatus::Offline,
            ProbeVerdict::AuthRequired => LiveStatus::AuthRequired,
            ProbeVerdict::Failed(reason) => LiveStatus::TransientError(reason),
        }
    }
}

#[async_trait]
impl LivenessResolver for TwitcastingResolver {
    async fn resolve(&self, channel: &str, session: &Session) -> LiveStatus {
        if let Some(url) = &session.manual_endpoint {
            debug!(channel, url = %url, "Using manual endpoint");
            return LiveStatus::Live(ResolvedEndpoint::new(
                url.clone(),
                self.quality.clone(),
                channel,
                None,
                None,
                Local::now(),
            ));
        }

        let url = self.channel_url(channel);
        let html = match self.fetch_page(&url, session).await {
            Ok(html) => html,
            Err(e) => {
                warn!(channel, error = %e, "Channel page fetch failed, probing with streamlink");
                return self.probe_fallback(channel, session).await;
            }
        };

        let page = scrape(&html);
        if !page.live {
            return LiveStatus::Offline;
        }
        if page.password_required && session.private_password.is_none() {
            return LiveStatus::AuthRequired;
        }

        LiveStatus::Live(self.endpoint(channel, page.title, page.stream_id, page.thumbnail_url))
    }
}
