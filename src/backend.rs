use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::config::BackendConfig;

/// The pending-notification poll runs on every loop iteration, so it gets a
/// short timeout; the backend being down must not stall the whole cycle.
const PENDING_POLL_TIMEOUT: Duration = Duration::from_secs(2);

/// Alert record as stored by the backend. The backend persists whatever the
/// frontend posted, so every field is optional on the wire.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Alert {
    #[serde(default)]
    pub title: String,
    #[serde(rename = "formattedPrice", default)]
    pub formatted_price: String,
    #[serde(default)]
    pub image: String,
}

/// A price-drop event awaiting delivery. `id` is the alert identifier; the
/// backend owns the notification lifecycle.
#[derive(Debug, Clone, Deserialize)]
pub struct PendingNotification {
    pub id: String,
    pub chat_id: i64,
    #[serde(default)]
    pub title: String,
    #[serde(rename = "formattedPrice", default)]
    pub formatted_price: String,
    #[serde(default)]
    pub image: Option<String>,
}

#[derive(Debug, Serialize)]
struct RegisterUserParams<'a> {
    alert_id: &'a str,
    chat_id: i64,
}

#[derive(Debug, Serialize)]
struct MarkNotifiedParams<'a> {
    id: &'a str,
}

/// Operations the relay needs from the alert backend.
#[async_trait]
pub trait AlertBackend: Send + Sync {
    async fn get_alert(&self, alert_id: &str) -> Result<Alert>;

    /// Bind an alert to the chat that should receive its notifications.
    async fn register_user(&self, alert_id: &str, chat_id: i64) -> Result<()>;

    async fn pending_notifications(&self) -> Result<Vec<PendingNotification>>;

    async fn mark_notified(&self, id: &str) -> Result<()>;
}

/// HTTP client for the alert backend service.
pub struct BackendClient {
    client: reqwest::Client,
    base_url: String,
}

impl BackendClient {
    pub fn new(config: &BackendConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: config.base_url.clone(),
        }
    }
}

#[async_trait]
impl AlertBackend for BackendClient {
    async fn get_alert(&self, alert_id: &str) -> Result<Alert> {
        let url = format!("{}/get_alert/{}", self.base_url, alert_id);

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .with_context(|| format!("Backend unreachable while fetching alert {}", alert_id))?;

        let status = response.status();
        if !status.is_success() {
            anyhow::bail!("Backend returned {} for alert {}", status, alert_id);
        }

        response
            .json()
            .await
            .with_context(|| format!("Failed to parse alert {}", alert_id))
    }

    async fn register_user(&self, alert_id: &str, chat_id: i64) -> Result<()> {
        let url = format!("{}/register_user", self.base_url);
        let params = RegisterUserParams { alert_id, chat_id };

        let response = self
            .client
            .post(&url)
            .json(&params)
            .send()
            .await
            .with_context(|| format!("Failed to register binding for alert {}", alert_id))?;

        let status = response.status();
        if !status.is_success() {
            anyhow::bail!("Backend returned {} registering alert {}", status, alert_id);
        }
        Ok(())
    }

    async fn pending_notifications(&self) -> Result<Vec<PendingNotification>> {
        let url = format!("{}/pending_notifications", self.base_url);

        let response = self
            .client
            .get(&url)
            .timeout(PENDING_POLL_TIMEOUT)
            .send()
            .await
            .context("Failed to fetch pending notifications")?;

        let status = response.status();
        if !status.is_success() {
            anyhow::bail!("Backend returned {} for pending notifications", status);
        }

        response
            .json()
            .await
            .context("Failed to parse pending notifications")
    }

    async fn mark_notified(&self, id: &str) -> Result<()> {
        let url = format!("{}/mark_notified", self.base_url);
        let params = MarkNotifiedParams { id };

        let response = self
            .client
            .post(&url)
            .json(&params)
            .send()
            .await
            .with_context(|| format!("Failed to mark notification {} as delivered", id))?;

        let status = response.status();
        if !status.is_success() {
            anyhow::bail!("Backend returned {} marking notification {}", status, id);
        }
        Ok(())
    }
}
