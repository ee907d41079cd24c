use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// OHLCV bar data
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bar {
    pub timestamp: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

/// One row of the smart-money ranking feed.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AssetSummary {
    #[serde(default)]
    pub id: i64,
    #[serde(default)]
    pub chain: String,
    pub address: String,
    pub symbol: String,
    #[serde(default)]
    pub price: f64,
    #[serde(default)]
    pub price_change_percent: f64,
    #[serde(default)]
    pub volume: f64,
    #[serde(default)]
    pub liquidity: f64,
    #[serde(default)]
    pub market_cap: f64,
    #[serde(default)]
    pub holder_count: i64,
    #[serde(default)]
    pub buys: i64,
    #[serde(default)]
    pub sells: i64,
    #[serde(default)]
    pub pool_type_str: String,
    #[serde(default)]
    pub twitter_username: String,
    #[serde(default)]
    pub website: String,
    #[serde(default)]
    pub smart_degen_count: i64,
    #[serde(default)]
    pub renowned_count: i64,
    /// Filled in by pool resolution, never sent by the ranking feed.
    #[serde(default)]
    pub pool_address: String,
}

impl AssetSummary {
    /// Key used to dedupe rows coming from the ranking feed.
    pub fn dedupe_key(&self) -> String {
        format!("{}|{}", self.chain, self.address)
    }
}

/// Candle resolution class understood by the OHLCV endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Timeframe {
    Minute,
    Hour,
    Day,
}

impl Timeframe {
    pub fn as_str(&self) -> &'static str {
        match self {
            Timeframe::Minute => "minute",
            Timeframe::Hour => "hour",
            Timeframe::Day => "day",
        }
    }

    /// How long a fetched series stays fresh. Finer resolutions go stale faster.
    pub fn cache_ttl(&self) -> Duration {
        match self {
            Timeframe::Minute => Duration::from_secs(20),
            Timeframe::Hour => Duration::from_secs(60),
            Timeframe::Day => Duration::from_secs(300),
        }
    }
}

impl std::str::FromStr for Timeframe {
    type Err = crate::AnalysisError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "minute" => Ok(Timeframe::Minute),
            "hour" => Ok(Timeframe::Hour),
            "day" => Ok(Timeframe::Day),
            other => Err(crate::AnalysisError::InvalidData(format!(
                "unknown timeframe '{other}'"
            ))),
        }
    }
}

/// Query options sent alongside an OHLCV request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeriesOptions {
    pub aggregate: u32,
    pub limit: u32,
    /// `base` or `quote`
    pub token: String,
    pub currency: String,
    pub include_empty_intervals: bool,
}

impl SeriesOptions {
    pub fn new(aggregate: u32, limit: u32) -> Self {
        Self {
            aggregate,
            limit,
            token: "base".to_string(),
            currency: "usd".to_string(),
            include_empty_intervals: true,
        }
    }

    pub fn query_pairs(&self) -> Vec<(&'static str, String)> {
        vec![
            ("aggregate", self.aggregate.to_string()),
            ("limit", self.limit.to_string()),
            ("token", self.token.clone()),
            ("currency", self.currency.clone()),
            (
                "include_empty_intervals",
                self.include_empty_intervals.to_string(),
            ),
        ]
    }
}

/// Everything needed to fetch (and cache) one candle series.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeriesRequest {
    pub network: String,
    pub pool_address: String,
    pub timeframe: Timeframe,
    pub options: SeriesOptions,
}

impl SeriesRequest {
    pub fn new(
        network: impl Into<String>,
        pool_address: impl Into<String>,
        timeframe: Timeframe,
        options: SeriesOptions,
    ) -> Self {
        Self {
            network: network.into(),
            pool_address: pool_address.into(),
            timeframe,
            options,
        }
    }

    /// Deterministic cache key. Field order is fixed so equal requests
    /// always collapse onto the same entry.
    pub fn fingerprint(&self) -> String {
        format!(
            "{}|{}|{}|agg={}|lim={}|tok={}|cur={}|empty={}",
            self.network,
            self.pool_address,
            self.timeframe.as_str(),
            self.options.aggregate,
            self.options.limit,
            self.options.token,
            self.options.currency,
            self.options.include_empty_intervals,
        )
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TokenInfo {
    #[serde(default)]
    pub address: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub symbol: String,
    #[serde(default)]
    pub coingecko_coin_id: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SeriesMeta {
    #[serde(default)]
    pub base: TokenInfo,
    #[serde(default)]
    pub quote: TokenInfo,
}

/// Candle series in chronological order (oldest first).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Series {
    pub bars: Vec<Bar>,
    pub meta: SeriesMeta,
}

impl Series {
    pub fn closes(&self) -> Vec<f64> {
        self.bars.iter().map(|b| b.close).collect()
    }

    pub fn last_close(&self) -> Option<f64> {
        self.bars.last().map(|b| b.close)
    }
}

/// Timeframes whose verdicts get persisted between stages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum VerdictTimeframe {
    M5,
    M15,
}

impl VerdictTimeframe {
    pub fn as_str(&self) -> &'static str {
        match self {
            VerdictTimeframe::M5 => "5m",
            VerdictTimeframe::M15 => "15m",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TrendStatus {
    /// 15m trend up with MACD momentum behind it
    BuyMacd,
    /// 5m trend up
    Up,
    Range,
}

impl TrendStatus {
    pub fn to_label(&self) -> &'static str {
        match self {
            TrendStatus::BuyMacd => "BUYMACD",
            TrendStatus::Up => "UP",
            TrendStatus::Range => "RANGE",
        }
    }
}

/// Latest indicator snapshot for a symbol on one timeframe.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimeframeVerdict {
    pub symbol: String,
    pub timeframe: VerdictTimeframe,
    pub candle_time: DateTime<Utc>,
    pub price: f64,
    pub ema25: f64,
    pub ema50: f64,
    pub ma60: f64,
    pub macd_up: bool,
    pub status: TrendStatus,
    pub price_above_ema25: bool,
    pub updated_at: DateTime<Utc>,
}

impl TimeframeVerdict {
    pub fn ema_trend_up(&self) -> bool {
        self.ema25 > self.ema50
    }
}

/// Result of scoring an asset across 15m, 5m and 1m.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Assessment {
    pub price: f64,
    /// Higher timeframes agree on an uptrend.
    pub trend_aligned: bool,
    /// The 1m timeframe confirms entry.
    pub micro_confirmed: bool,
    /// Higher-timeframe trend no longer holds.
    pub trend_broken: bool,
    /// Secondary momentum model fired.
    pub momentum: bool,
}

impl Assessment {
    pub fn is_confirmed(&self) -> bool {
        self.trend_aligned && self.micro_confirmed
    }

    pub fn is_near_miss(&self) -> bool {
        self.trend_aligned && !self.micro_confirmed
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SignalKind {
    /// Full multi-timeframe alignment with 1m confirmation.
    Primary,
    /// Momentum model, looser higher-timeframe requirement.
    Momentum,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fingerprint_is_deterministic() {
        let a = SeriesRequest::new("solana", "Pool1", Timeframe::Minute, SeriesOptions::new(15, 200));
        let b = SeriesRequest::new("solana", "Pool1", Timeframe::Minute, SeriesOptions::new(15, 200));
        assert_eq!(a.fingerprint(), b.fingerprint());
        assert_eq!(
            a.fingerprint(),
            "solana|Pool1|minute|agg=15|lim=200|tok=base|cur=usd|empty=true"
        );
    }

    #[test]
    fn test_fingerprint_distinguishes_options() {
        let m15 = SeriesRequest::new("solana", "Pool1", Timeframe::Minute, SeriesOptions::new(15, 200));
        let m5 = SeriesRequest::new("solana", "Pool1", Timeframe::Minute, SeriesOptions::new(5, 200));
        assert_ne!(m15.fingerprint(), m5.fingerprint());
    }

    #[test]
    fn test_ttl_grows_with_resolution() {
        assert!(Timeframe::Minute.cache_ttl() < Timeframe::Hour.cache_ttl());
        assert!(Timeframe::Hour.cache_ttl() < Timeframe::Day.cache_ttl());
    }

    #[test]
    fn test_asset_summary_tolerates_missing_fields() {
        let json = r#"{"address":"So1","symbol":"FOO","smart_degen_count":5}"#;
        let asset: AssetSummary = serde_json::from_str(json).unwrap();
        assert_eq!(asset.symbol, "FOO");
        assert_eq!(asset.smart_degen_count, 5);
        assert!(asset.pool_address.is_empty());
    }

    #[test]
    fn test_assessment_classification() {
        let mut a = Assessment {
            price: 1.0,
            trend_aligned: true,
            micro_confirmed: false,
            trend_broken: false,
            momentum: false,
        };
        assert!(a.is_near_miss());
        assert!(!a.is_confirmed());
        a.micro_confirmed = true;
        assert!(a.is_confirmed());
        assert!(!a.is_near_miss());
    }
}
