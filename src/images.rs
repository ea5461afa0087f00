use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;

/// Downloads product images before they are attached to outgoing photos.
/// The command path fetches without a timeout; the notification path caps
/// the wait so a slow image host cannot stall the sweep.
#[async_trait]
pub trait ImageFetcher: Send + Sync {
    async fn fetch(&self, url: &str, timeout: Option<Duration>) -> Result<Vec<u8>>;
}

pub struct HttpImageFetcher {
    client: reqwest::Client,
}

impl HttpImageFetcher {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl ImageFetcher for HttpImageFetcher {
    async fn fetch(&self, url: &str, timeout: Option<Duration>) -> Result<Vec<u8>> {
        let mut request = self.client.get(url);
        if let Some(timeout) = timeout {
            request = request.timeout(timeout);
        }

        let response = request
            .send()
            .await
            .with_context(|| format!("Failed to download image from {}", url))?;

        let status = response.status();
        if !status.is_success() {
            anyhow::bail!("Image host returned {} for {}", status, url);
        }

        let bytes = response
            .bytes()
            .await
            .with_context(|| format!("Failed to read image body from {}", url))?;

        Ok(bytes.to_vec())
    }
}
