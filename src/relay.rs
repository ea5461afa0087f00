use std::time::Duration;

use anyhow::Result;
use tracing::{debug, error, info, warn};

use crate::backend::{Alert, AlertBackend, PendingNotification};
use crate::images::ImageFetcher;
use crate::telegram::{ChatApi, Update};

/// Cap on image downloads in the notification path; a slow image host must
/// not stall the sweep. The command path downloads without a timeout.
const NOTIFY_IMAGE_TIMEOUT: Duration = Duration::from_secs(5);

const START_HELP_TEXT: &str =
    "Tap the alert button on the website to finish setting up your price watch.";
const ALERT_FETCH_FAILED_TEXT: &str = "❌ Could not load that alert. It may have expired.";
const ALERT_SETUP_FAILED_TEXT: &str =
    "Something went wrong while creating your alert. Please try again.";

/// The polling relay loop: merges inbound user commands and outbound
/// pending notifications into one serialized stream.
///
/// The watermark is the highest update identifier processed so far; it only
/// ever advances, and the next poll fetches strictly past it. It lives in
/// process memory only, so a restart may replay or skip updates depending
/// on the platform's retention.
pub struct Relay<C, B, F> {
    chat: C,
    backend: B,
    images: F,
    poll_interval: Duration,
    watermark: i64,
}

impl<C: ChatApi, B: AlertBackend, F: ImageFetcher> Relay<C, B, F> {
    pub fn new(chat: C, backend: B, images: F, poll_interval: Duration) -> Self {
        Self {
            chat,
            backend,
            images,
            poll_interval,
            watermark: 0,
        }
    }

    /// Highest update identifier seen so far.
    #[allow(dead_code)]
    pub fn watermark(&self) -> i64 {
        self.watermark
    }

    /// Run forever. Nothing short of process death stops the loop.
    pub async fn run(&mut self) -> Result<()> {
        info!(
            "Relay loop started (poll interval: {}s)",
            self.poll_interval.as_secs()
        );

        loop {
            self.run_once().await;
            tokio::time::sleep(self.poll_interval).await;
        }
    }

    /// One full iteration: command intake, then notification delivery.
    /// Each phase is contained so a failure in one cannot take down the
    /// other or the loop.
    pub async fn run_once(&mut self) {
        if let Err(e) = self.poll_commands().await {
            error!("Update poll failed: {:#}", e);
        }

        if let Err(e) = self.deliver_pending().await {
            // Transient backend outages hit this on every iteration, so it
            // stays below the default log level.
            debug!("Pending notification sweep skipped: {:#}", e);
        }
    }

    /// Phase A: fetch updates past the watermark and react to commands.
    ///
    /// The watermark advances over every delivered update before handling
    /// it, and a handler failure is logged without aborting the rest of
    /// the batch.
    pub async fn poll_commands(&mut self) -> Result<()> {
        let updates = self.chat.get_updates(self.watermark + 1).await?;

        for update in updates {
            if update.update_id > self.watermark {
                self.watermark = update.update_id;
            }

            if let Err(e) = self.handle_update(&update).await {
                warn!("Failed to handle update {}: {:#}", update.update_id, e);
            }
        }

        Ok(())
    }

    async fn handle_update(&self, update: &Update) -> Result<()> {
        let message = match &update.message {
            Some(m) => m,
            None => return Ok(()),
        };

        let text = match &message.text {
            Some(t) => t,
            None => return Ok(()),
        };

        // Anything that is not a start command is silently ignored.
        if !text.starts_with("/start") {
            return Ok(());
        }

        let chat_id = message.chat.id;
        let sender = message
            .from
            .as_ref()
            .map(|u| u.first_name.as_str())
            .unwrap_or("unknown");

        info!("Start command from {} ({}): {}", sender, chat_id, text);

        let alert_id = text
            .split_once(' ')
            .map(|(_, rest)| rest.trim())
            .filter(|id| !id.is_empty());

        let alert_id = match alert_id {
            Some(id) => id,
            None => {
                self.chat.send_text(chat_id, START_HELP_TEXT).await?;
                return Ok(());
            }
        };

        match self.backend.get_alert(alert_id).await {
            Ok(alert) => {
                if let Err(e) = self.announce_alert(chat_id, alert_id, &alert).await {
                    warn!("Failed to announce alert {}: {:#}", alert_id, e);
                    self.chat.send_text(chat_id, ALERT_SETUP_FAILED_TEXT).await?;
                }
            }
            Err(e) => {
                warn!("Failed to fetch alert {}: {:#}", alert_id, e);
                self.chat.send_text(chat_id, ALERT_FETCH_FAILED_TEXT).await?;
            }
        }

        Ok(())
    }

    /// Bind the chat to the alert and confirm with a photo message.
    async fn announce_alert(&self, chat_id: i64, alert_id: &str, alert: &Alert) -> Result<()> {
        self.backend.register_user(alert_id, chat_id).await?;

        let caption = format!(
            "🔔 *Alert created!*\n\n📦 *{}*\n💰 *{}*\n\nI'll keep an eye on this price for you.",
            alert.title, alert.formatted_price
        );

        let photo = self.images.fetch(&alert.image, None).await?;
        self.chat.send_photo(chat_id, &caption, photo).await?;

        info!("Alert {} bound to chat {}", alert_id, chat_id);
        Ok(())
    }

    /// Phase B: relay price-drop notifications and mark them delivered.
    pub async fn deliver_pending(&self) -> Result<()> {
        let pending = self.backend.pending_notifications().await?;
        if pending.is_empty() {
            return Ok(());
        }

        info!("Found {} pending notification(s)", pending.len());

        for notification in &pending {
            self.deliver_notification(notification).await;
        }

        Ok(())
    }

    /// Deliver one notification: photo if an image is available, text
    /// otherwise or as fallback. Marking happens regardless of the send
    /// outcome; the backend owns delivery state and a failed send must not
    /// leave the notification re-delivering forever.
    async fn deliver_notification(&self, notification: &PendingNotification) {
        let text = format!(
            "📉 *PRICE DROP!* 📉\n\n📦 {}\n💰 *{}*\n\nGrab it before it goes back up!",
            notification.title, notification.formatted_price
        );

        info!(
            "Notifying chat {} about \"{}\"",
            notification.chat_id, notification.title
        );

        let mut delivered = false;
        if let Some(image_url) = notification.image.as_deref().filter(|u| !u.is_empty()) {
            match self.images.fetch(image_url, Some(NOTIFY_IMAGE_TIMEOUT)).await {
                Ok(photo) => {
                    match self
                        .chat
                        .send_photo(notification.chat_id, &text, photo)
                        .await
                    {
                        Ok(()) => delivered = true,
                        Err(e) => warn!(
                            "Photo send failed for {}, falling back to text: {:#}",
                            notification.id, e
                        ),
                    }
                }
                Err(e) => warn!(
                    "Image download failed for {}, falling back to text: {:#}",
                    notification.id, e
                ),
            }
        }

        if !delivered {
            if let Err(e) = self.chat.send_text(notification.chat_id, &text).await {
                warn!("Text send failed for {}: {:#}", notification.id, e);
            }
        }

        if let Err(e) = self.backend.mark_notified(&notification.id).await {
            warn!("Failed to mark notification {}: {:#}", notification.id, e);
        }
    }
}
