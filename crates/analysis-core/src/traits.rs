use async_trait::async_trait;
use crate::{AnalysisError, AssetSummary, Series, SeriesRequest, TimeframeVerdict, VerdictTimeframe};

/// Source of the ranked asset list scanned every cycle.
#[async_trait]
pub trait RankingSource: Send + Sync {
    async fn fetch_ranked_assets(&self) -> Result<Vec<AssetSummary>, AnalysisError>;
}

/// OHLCV provider. Implementations are expected to sit behind a coalescing cache.
#[async_trait]
pub trait SeriesSource: Send + Sync {
    async fn fetch_series(&self, request: &SeriesRequest) -> Result<Series, AnalysisError>;
}

/// Maps a token address to its most liquid pool.
#[async_trait]
pub trait PoolResolver: Send + Sync {
    async fn resolve_pool(&self, network: &str, token_address: &str) -> Result<String, AnalysisError>;
}

/// Key-value store for the latest per-timeframe verdict of each symbol.
#[async_trait]
pub trait VerdictStore: Send + Sync {
    async fn put(&self, verdict: &TimeframeVerdict) -> Result<(), AnalysisError>;

    async fn get(
        &self,
        symbol: &str,
        timeframe: VerdictTimeframe,
    ) -> Result<Option<TimeframeVerdict>, AnalysisError>;
}
