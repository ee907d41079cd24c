use crate::{NotificationError, Notifier};
use async_trait::async_trait;
use rand::Rng;
use std::time::Duration;

pub const DEFAULT_API_BASE: &str = "https://api.telegram.org";

/// Exponential backoff with symmetric jitter.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    /// Fraction of the delay added or removed at random, e.g. 0.1 for ±10%.
    pub jitter: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(10),
            jitter: 0.1,
        }
    }
}

impl RetryPolicy {
    /// Delay to wait after failed attempt number `attempt` (1-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(16);
        let delay = self.base_delay.saturating_mul(1u32 << exp).min(self.max_delay);
        if self.jitter <= 0.0 {
            return delay;
        }
        let spread = rand::thread_rng().gen_range(-1.0..=1.0) * self.jitter;
        delay.mul_f64((1.0 + spread).max(0.0))
    }
}

#[derive(Debug, Clone)]
pub struct TelegramConfig {
    pub api_base: String,
    pub bot_token: String,
    pub proxy_url: Option<String>,
    pub request_timeout: Duration,
    /// Sent as `parse_mode` when set, e.g. "Markdown".
    pub parse_mode: Option<String>,
    pub retry: RetryPolicy,
}

impl TelegramConfig {
    pub fn new(bot_token: impl Into<String>) -> Self {
        Self {
            api_base: DEFAULT_API_BASE.to_string(),
            bot_token: bot_token.into(),
            proxy_url: None,
            request_timeout: Duration::from_secs(10),
            parse_mode: Some("Markdown".to_string()),
            retry: RetryPolicy::default(),
        }
    }
}

/// Telegram Bot API sender.
pub struct TelegramNotifier {
    config: TelegramConfig,
    client: reqwest::Client,
}

impl TelegramNotifier {
    pub fn new(config: TelegramConfig) -> Result<Self, NotificationError> {
        if config.bot_token.is_empty() {
            return Err(NotificationError::Config("bot token is empty".to_string()));
        }

        let mut builder = reqwest::Client::builder().timeout(config.request_timeout);
        if let Some(proxy) = config.proxy_url.as_deref().filter(|p| !p.is_empty()) {
            let proxy = reqwest::Proxy::all(proxy)
                .map_err(|e| NotificationError::Config(format!("bad proxy url: {e}")))?;
            builder = builder.proxy(proxy);
        }
        let client = builder
            .build()
            .map_err(|e| NotificationError::Config(e.to_string()))?;

        Ok(Self { config, client })
    }

    fn send_url(&self) -> String {
        format!("{}/bot{}/sendMessage", self.config.api_base, self.config.bot_token)
    }

    async fn send_once(&self, payload: &serde_json::Value) -> Result<(), NotificationError> {
        let response = self
            .client
            .post(self.send_url())
            .json(payload)
            .send()
            .await
            .map_err(|e| NotificationError::Telegram(e.to_string()))?;

        if !response.status().is_success() {
            return Err(NotificationError::Status(response.status().as_u16()));
        }
        Ok(())
    }
}

#[async_trait]
impl Notifier for TelegramNotifier {
    async fn notify(&self, channel_id: &str, text: &str) -> Result<(), NotificationError> {
        let mut payload = serde_json::json!({
            "chat_id": channel_id,
            "text": text,
        });
        if let Some(mode) = &self.config.parse_mode {
            payload["parse_mode"] = serde_json::Value::String(mode.clone());
        }

        let retry = self.config.retry;
        let attempts = retry.max_attempts.max(1);
        let mut last = String::new();

        for attempt in 1..=attempts {
            match self.send_once(&payload).await {
                Ok(()) => return Ok(()),
                Err(e) => {
                    last = e.to_string();
                    if attempt < attempts {
                        let delay = retry.delay_for(attempt);
                        tracing::warn!(
                            attempt,
                            max_attempts = attempts,
                            delay_ms = delay.as_millis() as u64,
                            "Telegram send failed: {}",
                            e
                        );
                        tokio::time::sleep(delay).await;
                    }
                }
            }
        }

        Err(NotificationError::Exhausted { attempts, last })
    }

    fn name(&self) -> &str {
        "telegram"
    }
}
