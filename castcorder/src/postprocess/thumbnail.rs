//! Broadcast thumbnail download.

use std::path::{Path, PathBuf};
use std::time::Duration;

use reqwest::Client;
use tracing::{debug, warn};

use crate::{Error, Result};

const THUMBNAIL_TIMEOUT: Duration = Duration::from_secs(10);

pub struct ThumbnailDownloader {
    client: Client,
}

impl ThumbnailDownloader {
    pub fn new(user_agent: &str) -> Result<Self> {
        let client = Client::builder()
            .user_agent(user_agent.to_string())
            .timeout(THUMBNAIL_TIMEOUT)
            .build()?;
        Ok(Self { client })
    }

    /// Save the image at `url` to `destination`. Failures are logged, not returned.
    pub async fn fetch(&self, url: &str, destination: &Path) -> Option<PathBuf> {
        match self.try_fetch(url, destination).await {
            Ok(()) => {
                debug!(path = %destination.display(), "Thumbnail saved");
                Some(destination.to_path_buf())
            }
            Err(e) => {
                warn!(url, "Thumbnail download failed: {}", e);
                let _ = tokio::fs::remove_file(destination).await;
                None
            }
        }
    }

    async fn try_fetch(&self, url: &str, destination: &Path) -> Result<()> {
        let bytes = self
            .client
            .get(url)
            .send()
            .await?
            .error_for_status()?
            .bytes()
            .await?;
        if bytes.is_empty() {
            return Err(Error::Other("empty thumbnail response".to_string()));
        }
        tokio::fs::write(destination, &bytes)
            .await
            .map_err(|e| Error::io_path("writing thumbnail", destination, e))
    }
}
