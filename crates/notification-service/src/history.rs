use crate::{MessageTemplate, NotificationError, Notifier};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::Arc;

pub const DEFAULT_LOG_CAPACITY: usize = 100;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SavedMessage {
    pub text: String,
    pub timestamp: DateTime<Utc>,
}

/// Bounded log of delivered messages, oldest evicted first.
pub struct MessageLog {
    messages: RwLock<VecDeque<SavedMessage>>,
    capacity: usize,
}

impl Default for MessageLog {
    fn default() -> Self {
        Self::new(DEFAULT_LOG_CAPACITY)
    }
}

impl MessageLog {
    pub fn new(capacity: usize) -> Self {
        Self {
            messages: RwLock::new(VecDeque::with_capacity(capacity)),
            capacity: capacity.max(1),
        }
    }

    pub fn push(&self, message: SavedMessage) {
        Self::push_locked(&mut self.messages.write(), self.capacity, message);
    }

    /// Append `message` and return the newest earlier entry mentioning
    /// `symbol`, both under one write guard.
    pub fn push_and_last_mention(&self, message: SavedMessage, symbol: &str) -> Option<SavedMessage> {
        let mut messages = self.messages.write();
        let previous = messages
            .iter()
            .rev()
            .find(|m| extract_symbol(&m.text).as_deref() == Some(symbol))
            .cloned();
        Self::push_locked(&mut messages, self.capacity, message);
        previous
    }

    fn push_locked(messages: &mut VecDeque<SavedMessage>, capacity: usize, message: SavedMessage) {
        if messages.len() >= capacity {
            messages.pop_front();
        }
        messages.push_back(message);
    }

    /// Newest first, at most `n`.
    pub fn latest(&self, n: usize) -> Vec<SavedMessage> {
        self.messages.read().iter().rev().take(n).cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.messages.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.read().is_empty()
    }
}

/// Pull the ticker out of a signal message.
///
/// Signal messages start with a marker emoji and optional `$`, e.g.
/// `🟢FOO` or `⚠️ $FOO`. Falls back to the word after a colon.
pub fn extract_symbol(text: &str) -> Option<String> {
    let first_line = text.lines().next().unwrap_or_default();
    let leading: String = first_line
        .chars()
        .skip_while(|c| !c.is_ascii_alphanumeric())
        .take_while(|c| c.is_ascii_alphanumeric())
        .collect();
    if !leading.is_empty() {
        return Some(leading.to_ascii_uppercase());
    }

    let (_, after) = text.split_once([':', '：'])?;
    let word: String = after
        .trim_start()
        .chars()
        .take_while(|c| c.is_ascii_alphanumeric())
        .collect();
    (!word.is_empty()).then(|| word.to_ascii_uppercase())
}

/// Where "first alert" notices go, and how long a symbol must be quiet
/// before it counts as new again.
#[derive(Clone)]
pub struct FirstAlertPolicy {
    pub notifier: Arc<dyn Notifier>,
    pub channel_id: String,
    pub quiet_window: Duration,
}

impl FirstAlertPolicy {
    pub fn new(notifier: Arc<dyn Notifier>, channel_id: impl Into<String>) -> Self {
        Self {
            notifier,
            channel_id: channel_id.into(),
            quiet_window: Duration::minutes(30),
        }
    }
}

/// Records successful deliveries in a [`MessageLog`] and, optionally, raises
/// a "first alert" when a symbol shows up for the first time in a while.
pub struct HistoryNotifier {
    inner: Arc<dyn Notifier>,
    log: Arc<MessageLog>,
    first_alert: Option<FirstAlertPolicy>,
}

impl HistoryNotifier {
    pub fn new(inner: Arc<dyn Notifier>, log: Arc<MessageLog>) -> Self {
        Self {
            inner,
            log,
            first_alert: None,
        }
    }

    pub fn with_first_alert(mut self, policy: FirstAlertPolicy) -> Self {
        self.first_alert = Some(policy);
        self
    }

    pub fn log(&self) -> &Arc<MessageLog> {
        &self.log
    }

    /// Log `message`; returns the symbol and reason when it is a first alert.
    fn record(&self, message: SavedMessage) -> Option<(String, &'static str)> {
        let (policy, symbol) = match (&self.first_alert, extract_symbol(&message.text)) {
            (Some(policy), Some(symbol)) => (policy, symbol),
            _ => {
                self.log.push(message);
                return None;
            }
        };
        let timestamp = message.timestamp;
        match self.log.push_and_last_mention(message, &symbol) {
            None => Some((symbol, "never_seen_before")),
            Some(prev) if timestamp - prev.timestamp >= policy.quiet_window => Some((symbol, "quiet_for_window")),
            Some(_) => None,
        }
    }
}

#[async_trait]
impl Notifier for HistoryNotifier {
    async fn notify(&self, channel_id: &str, text: &str) -> Result<(), NotificationError> {
        self.inner.notify(channel_id, text).await?;

        let message = SavedMessage {
            text: text.to_string(),
            timestamp: Utc::now(),
        };
        let first_alert = self.record(message.clone());

        if let Some(((symbol, reason), policy)) = first_alert.zip(self.first_alert.as_ref()) {
            tracing::info!(symbol = %symbol, reason, "First alert");
            let alert = MessageTemplate::first_alert(&message.text, message.timestamp, reason);
            if let Err(e) = policy.notifier.notify(&policy.channel_id, &alert).await {
                tracing::warn!(symbol = %symbol, "Failed to send first alert: {}", e);
            }
        }

        Ok(())
    }

    fn name(&self) -> &str {
        self.inner.name()
    }
}
