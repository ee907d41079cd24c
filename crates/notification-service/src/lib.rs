mod history;
mod telegram;
mod templates;

pub use history::{extract_symbol, FirstAlertPolicy, HistoryNotifier, MessageLog, SavedMessage};
pub use telegram::{RetryPolicy, TelegramConfig, TelegramNotifier};
pub use templates::MessageTemplate;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Delivers text to a chat/channel. Implementations own their retry policy;
/// callers log a returned error and move on.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, channel_id: &str, text: &str) -> Result<(), NotificationError>;

    fn name(&self) -> &str;
}

/// One row of the waiting-list broadcast.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WaitingEntry {
    pub symbol: String,
    pub address: String,
    pub added_at: DateTime<Utc>,
    pub confirmed: bool,
}

/// Receives the full waiting set every time it changes.
#[async_trait]
pub trait ListingChannel: Send + Sync {
    async fn publish(&self, snapshot: &[WaitingEntry]) -> Result<(), NotificationError>;
}

/// Errors from the notification system.
#[derive(Debug, Clone, thiserror::Error)]
pub enum NotificationError {
    #[error("Telegram error: {0}")]
    Telegram(String),
    #[error("Telegram returned status {0}")]
    Status(u16),
    #[error("Gave up after {attempts} attempts: {last}")]
    Exhausted { attempts: u32, last: String },
    #[error("Configuration error: {0}")]
    Config(String),
}

/// Renders the waiting set and sends it through a [`Notifier`].
pub struct NotifierListing {
    notifier: Arc<dyn Notifier>,
    channel_id: String,
}

impl NotifierListing {
    pub fn new(notifier: Arc<dyn Notifier>, channel_id: impl Into<String>) -> Self {
        Self {
            notifier,
            channel_id: channel_id.into(),
        }
    }
}

#[async_trait]
impl ListingChannel for NotifierListing {
    async fn publish(&self, snapshot: &[WaitingEntry]) -> Result<(), NotificationError> {
        let text = MessageTemplate::waiting_list(snapshot, Utc::now());
        self.notifier.notify(&self.channel_id, &text).await
    }
}

/// Drops every message. Used when a channel is not configured.
pub struct NoopNotifier;

#[async_trait]
impl Notifier for NoopNotifier {
    async fn notify(&self, channel_id: &str, text: &str) -> Result<(), NotificationError> {
        tracing::debug!(channel = channel_id, "Notification channel disabled, dropping: {}", text);
        Ok(())
    }

    fn name(&self) -> &str {
        "noop"
    }
}
