use crate::candidates::{CandidateManager, CandidateScorer};
use crate::scanner::{AssetOutcome, AssetPipeline};
use analysis_core::{
    AnalysisError, Assessment, AssetSummary, PoolResolver, Series, SeriesOptions, SeriesRequest, SeriesSource,
    SignalKind, Timeframe, TimeframeVerdict, TrendStatus, VerdictStore, VerdictTimeframe,
};
use async_trait::async_trait;
use chrono::Utc;
use notification_service::{MessageTemplate, Notifier};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use technical_analysis::{buy_macd, ema_last, ma_last, MacdHistogramSignal, MacdParams, MacdPattern, TrendSignal};

#[derive(Debug, Clone)]
pub struct EvaluatorSettings {
    pub network: String,
    pub series_limit: u32,
    pub one_min_aggregate: u32,
    pub five_min_aggregate: u32,
    pub fifteen_min_aggregate: u32,
    pub fetch_attempts: u32,
    pub retry_delay: Duration,
    pub macd: MacdParams,
}

impl Default for EvaluatorSettings {
    fn default() -> Self {
        Self {
            network: "solana".to_string(),
            series_limit: 200,
            one_min_aggregate: 1,
            five_min_aggregate: 5,
            fifteen_min_aggregate: 15,
            fetch_attempts: 3,
            retry_delay: Duration::from_secs(2),
            macd: MacdParams::default(),
        }
    }
}

/// Indicator snapshot for one timeframe. `status` is `pass` when price sits
/// above EMA25 and MA60 and `signal` fires, else `Range`.
pub fn timeframe_verdict(
    symbol: &str,
    timeframe: VerdictTimeframe,
    series: &Series,
    signal: &dyn TrendSignal,
    pass: TrendStatus,
) -> Result<TimeframeVerdict, AnalysisError> {
    let last = series
        .bars
        .last()
        .ok_or_else(|| AnalysisError::InsufficientData(format!("{symbol} {} series is empty", timeframe.as_str())))?;
    let closes = series.closes();
    let price = last.close;
    let ema25 = ema_last(&closes, 25).unwrap_or(price);
    let ema50 = ema_last(&closes, 50).unwrap_or(price);
    let ma60 = ma_last(&closes, 60).unwrap_or(price);
    let macd_up = signal.evaluate(&closes);

    let status = if price > ema25 && price > ma60 && macd_up {
        pass
    } else {
        TrendStatus::Range
    };

    Ok(TimeframeVerdict {
        symbol: symbol.to_string(),
        timeframe,
        candle_time: last.timestamp,
        price,
        ema25,
        ema50,
        ma60,
        macd_up,
        status,
        price_above_ema25: price > ema25,
        updated_at: Utc::now(),
    })
}

/// Combine the 1m closes with the stored 15m and 5m verdicts.
pub fn assess(closes_1m: &[f64], m15: &TimeframeVerdict, m5: &TimeframeVerdict, params: MacdParams) -> Option<Assessment> {
    let price = *closes_1m.last()?;
    let ema25 = ema_last(closes_1m, 25)?;
    let ema50 = ema_last(closes_1m, 50)?;
    let micro_trend_up = ema25 > ema50;
    let buy = buy_macd(closes_1m, price, ema25, params);

    Some(Assessment {
        price,
        trend_aligned: price > m15.ema25 && m15.ema_trend_up() && m5.ema_trend_up() && price > m5.ema25,
        micro_confirmed: micro_trend_up && m5.macd_up && buy,
        trend_broken: m5.ema25 < m5.ema50 || price < m15.ema25 || m15.ema25 < m15.ema50,
        momentum: price > m15.ema25 && m5.ema_trend_up() && micro_trend_up && m5.macd_up && buy,
    })
}

/// Fetches series, computes per-timeframe verdicts and scores assets.
pub struct MarketAssessor {
    series: Arc<dyn SeriesSource>,
    pools: Arc<dyn PoolResolver>,
    verdicts: Arc<dyn VerdictStore>,
    settings: EvaluatorSettings,
}

impl MarketAssessor {
    pub fn new(
        series: Arc<dyn SeriesSource>,
        pools: Arc<dyn PoolResolver>,
        verdicts: Arc<dyn VerdictStore>,
        settings: EvaluatorSettings,
    ) -> Self {
        Self {
            series,
            pools,
            verdicts,
            settings,
        }
    }

    /// Retry transient failures with a fixed delay; permanent ones return at once.
    async fn with_retry<T, F, Fut>(&self, what: &str, symbol: &str, mut op: F) -> Result<T, AnalysisError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, AnalysisError>>,
    {
        let max_attempts = self.settings.fetch_attempts.max(1);
        let mut attempt = 1;
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_transient() && attempt < max_attempts => {
                    tracing::debug!(symbol, what, attempt, "Fetch failed, retrying: {}", e);
                    tokio::time::sleep(self.settings.retry_delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    pub async fn resolve_pool(&self, asset: &AssetSummary) -> Result<String, AnalysisError> {
        if !asset.pool_address.is_empty() {
            return Ok(asset.pool_address.clone());
        }
        let network = self.settings.network.as_str();
        self.with_retry("pool", &asset.symbol, || {
            self.pools.resolve_pool(network, &asset.address)
        })
        .await
    }

    async fn fetch_series(&self, symbol: &str, pool: &str, aggregate: u32) -> Result<Series, AnalysisError> {
        let request = SeriesRequest::new(
            self.settings.network.as_str(),
            pool,
            Timeframe::Minute,
            SeriesOptions::new(aggregate, self.settings.series_limit),
        );
        let request = &request;
        self.with_retry("series", symbol, || self.series.fetch_series(request))
            .await
    }

    /// 15m gate: trend up with the signal line turning up.
    pub async fn fifteen_minute_stage(&self, symbol: &str, pool: &str) -> Result<TimeframeVerdict, AnalysisError> {
        let series = self
            .fetch_series(symbol, pool, self.settings.fifteen_min_aggregate)
            .await?;
        let signal = MacdHistogramSignal::with_params(MacdPattern::DeaRising, self.settings.macd);
        let verdict = timeframe_verdict(symbol, VerdictTimeframe::M15, &series, &signal, TrendStatus::BuyMacd)?;
        self.verdicts.put(&verdict).await?;
        Ok(verdict)
    }

    /// 5m gate: trend up with the histogram growing.
    pub async fn five_minute_stage(&self, symbol: &str, pool: &str) -> Result<TimeframeVerdict, AnalysisError> {
        let series = self
            .fetch_series(symbol, pool, self.settings.five_min_aggregate)
            .await?;
        let signal = MacdHistogramSignal::with_params(MacdPattern::HistogramRising, self.settings.macd);
        let verdict = timeframe_verdict(symbol, VerdictTimeframe::M5, &series, &signal, TrendStatus::Up)?;
        self.verdicts.put(&verdict).await?;
        Ok(verdict)
    }

    async fn stored_verdict(&self, symbol: &str, timeframe: VerdictTimeframe) -> Result<TimeframeVerdict, AnalysisError> {
        self.verdicts.get(symbol, timeframe).await?.ok_or_else(|| {
            AnalysisError::InsufficientData(format!("no {} verdict stored for {symbol}", timeframe.as_str()))
        })
    }

    /// Score against the 1m series and whatever 15m/5m verdicts are stored.
    pub async fn assess_pool(&self, symbol: &str, pool: &str) -> Result<Assessment, AnalysisError> {
        let series = self
            .fetch_series(symbol, pool, self.settings.one_min_aggregate)
            .await?;
        let m15 = self.stored_verdict(symbol, VerdictTimeframe::M15).await?;
        let m5 = self.stored_verdict(symbol, VerdictTimeframe::M5).await?;

        assess(&series.closes(), &m15, &m5, self.settings.macd)
            .ok_or_else(|| AnalysisError::InsufficientData(format!("{symbol} 1m series is empty")))
    }
}

#[async_trait]
impl CandidateScorer for MarketAssessor {
    async fn score(&self, asset: &AssetSummary) -> Result<Assessment, AnalysisError> {
        let pool = self.resolve_pool(asset).await?;
        self.assess_pool(&asset.symbol, &pool).await
    }
}

/// The per-asset pipeline run by every scan.
pub struct AssetEvaluator {
    assessor: Arc<MarketAssessor>,
    notifier: Arc<dyn Notifier>,
    channel_id: String,
    candidates: Arc<CandidateManager>,
}

impl AssetEvaluator {
    pub fn new(
        assessor: Arc<MarketAssessor>,
        notifier: Arc<dyn Notifier>,
        channel_id: impl Into<String>,
        candidates: Arc<CandidateManager>,
    ) -> Self {
        Self {
            assessor,
            notifier,
            channel_id: channel_id.into(),
            candidates,
        }
    }

    async fn send_signal(&self, kind: SignalKind, asset: &AssetSummary) {
        let text = match kind {
            SignalKind::Primary => MessageTemplate::primary_signal(&asset.symbol, &asset.address),
            SignalKind::Momentum => MessageTemplate::momentum_signal(&asset.symbol, &asset.address),
        };
        tracing::info!(symbol = %asset.symbol, kind = ?kind, "Signal");
        if let Err(e) = self.notifier.notify(&self.channel_id, &text).await {
            tracing::warn!(symbol = %asset.symbol, "Signal delivery failed: {}", e);
        }
    }
}

#[async_trait]
impl AssetPipeline for AssetEvaluator {
    async fn process(&self, mut asset: AssetSummary) -> Result<AssetOutcome, AnalysisError> {
        let symbol = asset.symbol.clone();
        let pool = self.assessor.resolve_pool(&asset).await?;
        asset.pool_address = pool.clone();

        let m15 = self.assessor.fifteen_minute_stage(&symbol, &pool).await?;
        if m15.status != TrendStatus::BuyMacd {
            tracing::debug!(symbol = %symbol, status = m15.status.to_label(), "Filtered at 15m");
            return Ok(AssetOutcome::Filtered);
        }

        let m5 = self.assessor.five_minute_stage(&symbol, &pool).await?;
        if m5.status != TrendStatus::Up {
            tracing::debug!(symbol = %symbol, status = m5.status.to_label(), "Filtered at 5m");
            return Ok(AssetOutcome::Filtered);
        }

        let assessment = self.assessor.assess_pool(&symbol, &pool).await?;
        if assessment.is_confirmed() {
            self.send_signal(SignalKind::Primary, &asset).await;
            Ok(AssetOutcome::Signal(SignalKind::Primary))
        } else if assessment.is_near_miss() {
            if self.candidates.submit(asset, Utc::now()).await {
                tracing::info!(symbol = %symbol, "Added to waiting list");
            }
            Ok(AssetOutcome::Candidate)
        } else if assessment.momentum {
            self.send_signal(SignalKind::Momentum, &asset).await;
            Ok(AssetOutcome::Signal(SignalKind::Momentum))
        } else {
            Ok(AssetOutcome::NoSignal)
        }
    }
}
