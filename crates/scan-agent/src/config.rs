use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::env;
use std::path::Path;
use std::str::FromStr;

/// Optional JSON file named by `SCAN_AGENT_CONFIG`. Fills in whatever the
/// environment leaves unset.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FileConfig {
    pub url: Option<String>,
    pub proxy: Option<String>,
    #[serde(rename = "botToken")]
    pub bot_token: Option<String>,
    #[serde(rename = "waitingBotToken")]
    pub waiting_bot_token: Option<String>,
    #[serde(rename = "chatId")]
    pub chat_id: Option<String>,
    #[serde(rename = "banListUrl")]
    pub ban_list_url: Option<String>,
    #[serde(rename = "1_aggregate")]
    pub one_min_aggregate: Option<u32>,
    #[serde(rename = "5_aggregate")]
    pub five_min_aggregate: Option<u32>,
    #[serde(rename = "15_aggregate")]
    pub fifteen_min_aggregate: Option<u32>,
}

impl FileConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;
        serde_json::from_str(&raw)
            .with_context(|| format!("failed to parse config file {}", path.display()))
    }

    fn get(&self, key: &str) -> Option<String> {
        match key {
            "RANKING_URL" => self.url.clone(),
            "HTTP_PROXY_URL" => self.proxy.clone(),
            "TELEGRAM_BOT_TOKEN" => self.bot_token.clone(),
            "TELEGRAM_WAITING_BOT_TOKEN" => self.waiting_bot_token.clone(),
            "TELEGRAM_CHAT_ID" => self.chat_id.clone(),
            "BAN_LIST_URL" => self.ban_list_url.clone(),
            "ONE_MIN_AGGREGATE" => self.one_min_aggregate.map(|v| v.to_string()),
            "FIVE_MIN_AGGREGATE" => self.five_min_aggregate.map(|v| v.to_string()),
            "FIFTEEN_MIN_AGGREGATE" => self.fifteen_min_aggregate.map(|v| v.to_string()),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    // Sources
    pub ranking_url: String,
    pub ban_list_url: Option<String>,
    pub proxy_url: Option<String>,
    pub gecko_base_url: String,
    pub gecko_rate_limit: usize,    // requests per minute
    pub network: String,            // "solana"
    pub min_smart_money_count: i64, // 4

    // Telegram
    pub telegram_bot_token: String,
    pub telegram_waiting_bot_token: String,
    pub telegram_chat_id: String,
    pub alert_bot_token: Option<String>,
    pub alert_chat_id: Option<String>,

    // Scheduling
    pub scan_interval_minutes: u64,  // 5
    pub sweep_interval_minutes: u64, // 1
    pub candidate_ttl_minutes: i64,  // 120
    pub scan_concurrency: usize,     // 10
    pub retain_confirmed: bool,

    // Retry
    pub ranking_max_attempts: u32,     // 5
    pub ranking_retry_delay_secs: u64, // 2
    pub series_fetch_attempts: u32,    // 3
    pub series_retry_delay_secs: u64,  // 2

    // Series shape
    pub series_limit: u32, // 200
    pub one_min_aggregate: u32,
    pub five_min_aggregate: u32,
    pub fifteen_min_aggregate: u32,

    // Storage / API
    pub database_url: Option<String>,
    pub api_bind_addr: String,

    pub metrics_log_interval_cycles: u64,
}

impl AgentConfig {
    /// Environment (after `.env`) first, then the optional JSON file.
    pub fn from_env() -> Result<Self> {
        let file = match env::var("SCAN_AGENT_CONFIG") {
            Ok(path) if !path.is_empty() => FileConfig::load(Path::new(&path))?,
            _ => FileConfig::default(),
        };
        let config = Self::from_lookup(|key| env::var(key).ok(), &file)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_lookup<F>(lookup: F, file: &FileConfig) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| {
            lookup(key)
                .filter(|v| !v.trim().is_empty())
                .or_else(|| file.get(key))
        };
        let parse_or = |key: &str, default: &str| -> Result<String> {
            Ok(get(key).unwrap_or_else(|| default.to_string()))
        };

        let telegram_bot_token = get("TELEGRAM_BOT_TOKEN").context("TELEGRAM_BOT_TOKEN not set")?;

        Ok(Self {
            ranking_url: get("RANKING_URL").context("RANKING_URL not set")?,
            ban_list_url: get("BAN_LIST_URL"),
            proxy_url: get("HTTP_PROXY_URL"),
            gecko_base_url: parse_or("GECKO_BASE_URL", gecko_client::DEFAULT_BASE_URL)?,
            gecko_rate_limit: parse(&parse_or("GECKO_RATE_LIMIT", "30")?, "GECKO_RATE_LIMIT")?,
            network: parse_or("NETWORK", "solana")?,
            min_smart_money_count: parse(&parse_or("MIN_SMART_MONEY_COUNT", "4")?, "MIN_SMART_MONEY_COUNT")?,

            telegram_waiting_bot_token: get("TELEGRAM_WAITING_BOT_TOKEN")
                .unwrap_or_else(|| telegram_bot_token.clone()),
            telegram_bot_token,
            telegram_chat_id: get("TELEGRAM_CHAT_ID").context("TELEGRAM_CHAT_ID not set")?,
            alert_bot_token: get("ALERT_BOT_TOKEN"),
            alert_chat_id: get("ALERT_CHAT_ID"),

            scan_interval_minutes: parse(&parse_or("SCAN_INTERVAL_MINUTES", "5")?, "SCAN_INTERVAL_MINUTES")?,
            sweep_interval_minutes: parse(&parse_or("SWEEP_INTERVAL_MINUTES", "1")?, "SWEEP_INTERVAL_MINUTES")?,
            candidate_ttl_minutes: parse(&parse_or("CANDIDATE_TTL_MINUTES", "120")?, "CANDIDATE_TTL_MINUTES")?,
            scan_concurrency: parse(&parse_or("SCAN_CONCURRENCY", "10")?, "SCAN_CONCURRENCY")?,
            retain_confirmed: parse(&parse_or("RETAIN_CONFIRMED", "true")?, "RETAIN_CONFIRMED")?,

            ranking_max_attempts: parse(&parse_or("RANKING_MAX_ATTEMPTS", "5")?, "RANKING_MAX_ATTEMPTS")?,
            ranking_retry_delay_secs: parse(&parse_or("RANKING_RETRY_DELAY_SECS", "2")?, "RANKING_RETRY_DELAY_SECS")?,
            series_fetch_attempts: parse(&parse_or("SERIES_FETCH_ATTEMPTS", "3")?, "SERIES_FETCH_ATTEMPTS")?,
            series_retry_delay_secs: parse(&parse_or("SERIES_RETRY_DELAY_SECS", "2")?, "SERIES_RETRY_DELAY_SECS")?,

            series_limit: parse(&parse_or("SERIES_LIMIT", "200")?, "SERIES_LIMIT")?,
            one_min_aggregate: parse(&parse_or("ONE_MIN_AGGREGATE", "1")?, "ONE_MIN_AGGREGATE")?,
            five_min_aggregate: parse(&parse_or("FIVE_MIN_AGGREGATE", "5")?, "FIVE_MIN_AGGREGATE")?,
            fifteen_min_aggregate: parse(&parse_or("FIFTEEN_MIN_AGGREGATE", "15")?, "FIFTEEN_MIN_AGGREGATE")?,

            database_url: get("DATABASE_URL"),
            api_bind_addr: parse_or("API_BIND_ADDR", "0.0.0.0:8080")?,

            metrics_log_interval_cycles: parse(
                &parse_or("METRICS_LOG_INTERVAL_CYCLES", "12")?,
                "METRICS_LOG_INTERVAL_CYCLES",
            )?,
        })
    }

    pub fn validate(&self) -> Result<()> {
        if self.scan_interval_minutes == 0 {
            bail!("SCAN_INTERVAL_MINUTES must be > 0");
        }
        if self.sweep_interval_minutes == 0 {
            bail!("SWEEP_INTERVAL_MINUTES must be > 0");
        }
        if self.candidate_ttl_minutes <= 0 {
            bail!("CANDIDATE_TTL_MINUTES must be > 0");
        }
        if self.scan_concurrency == 0 {
            bail!("SCAN_CONCURRENCY must be > 0");
        }
        if self.ranking_max_attempts == 0 || self.series_fetch_attempts == 0 {
            bail!("retry attempt ceilings must be > 0");
        }
        if self.gecko_rate_limit == 0 {
            bail!("GECKO_RATE_LIMIT must be > 0");
        }
        if self.series_limit == 0 {
            bail!("SERIES_LIMIT must be > 0");
        }
        for (name, agg) in [
            ("ONE_MIN_AGGREGATE", self.one_min_aggregate),
            ("FIVE_MIN_AGGREGATE", self.five_min_aggregate),
            ("FIFTEEN_MIN_AGGREGATE", self.fifteen_min_aggregate),
        ] {
            if agg == 0 {
                bail!("{name} must be > 0");
            }
        }
        if !self.ranking_url.starts_with("http") {
            bail!("RANKING_URL must be an http(s) URL, got {}", self.ranking_url);
        }
        if self.alert_chat_id.is_some() != self.alert_bot_token.is_some() {
            tracing::warn!("ALERT_BOT_TOKEN and ALERT_CHAT_ID must both be set; first alerts disabled");
        }
        Ok(())
    }

    /// Both halves of the alert channel, if configured.
    pub fn alert_channel(&self) -> Option<(&str, &str)> {
        Some((self.alert_bot_token.as_deref()?, self.alert_chat_id.as_deref()?))
    }
}

fn parse<T>(raw: &str, key: &str) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    raw.trim()
        .parse()
        .with_context(|| format!("invalid value for {key}: {raw:?}"))
}
