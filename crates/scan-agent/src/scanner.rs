use crate::market_scanner::BanListSource;
use crate::registry::AssetRegistry;
use analysis_core::{AnalysisError, AssetSummary, RankingSource, SignalKind};
use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

/// Where an asset's evaluation stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssetOutcome {
    /// Failed the 15m or 5m trend gate.
    Filtered,
    Signal(SignalKind),
    /// Parked in the waiting list.
    Candidate,
    NoSignal,
}

/// Per-asset evaluation run by the scan's worker pool.
#[async_trait]
pub trait AssetPipeline: Send + Sync {
    async fn process(&self, asset: AssetSummary) -> Result<AssetOutcome, AnalysisError>;
}

#[derive(Debug, Clone)]
pub struct ScanSettings {
    pub concurrency: usize,
    pub ranking_max_attempts: u32,
    pub ranking_retry_delay: Duration,
}

impl Default for ScanSettings {
    fn default() -> Self {
        Self {
            concurrency: 10,
            ranking_max_attempts: 5,
            ranking_retry_delay: Duration::from_secs(2),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScanReport {
    pub ranked: usize,
    pub banned: usize,
    pub evaluated: usize,
    pub failed: usize,
    pub filtered: usize,
    pub signals: usize,
    pub candidates: usize,
    pub duration_ms: u64,
}

pub struct Scanner {
    ranking: Arc<dyn RankingSource>,
    ban_list: Option<Arc<dyn BanListSource>>,
    registry: Arc<AssetRegistry>,
    pipeline: Arc<dyn AssetPipeline>,
    settings: ScanSettings,
    permits: Arc<Semaphore>,
}

impl Scanner {
    pub fn new(
        ranking: Arc<dyn RankingSource>,
        registry: Arc<AssetRegistry>,
        pipeline: Arc<dyn AssetPipeline>,
        settings: ScanSettings,
    ) -> Self {
        Self {
            ranking,
            ban_list: None,
            registry,
            pipeline,
            permits: Arc::new(Semaphore::new(settings.concurrency.max(1))),
            settings,
        }
    }

    pub fn with_ban_list(mut self, ban_list: Arc<dyn BanListSource>) -> Self {
        self.ban_list = Some(ban_list);
        self
    }

    /// Only rate-limit errors are retried; anything else aborts the scan.
    async fn fetch_ranking(&self) -> Result<Vec<AssetSummary>, AnalysisError> {
        let max_attempts = self.settings.ranking_max_attempts.max(1);
        let mut attempt = 1;
        loop {
            match self.ranking.fetch_ranked_assets().await {
                Ok(assets) => return Ok(assets),
                Err(e) if e.is_rate_limited() && attempt < max_attempts => {
                    tracing::warn!(attempt, max_attempts, "Ranking rate limited, retrying: {}", e);
                    tokio::time::sleep(self.settings.ranking_retry_delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn banned_symbols(&self) -> HashSet<String> {
        match &self.ban_list {
            Some(source) => source
                .banned_symbols()
                .await
                .into_iter()
                .map(|s| s.to_ascii_uppercase())
                .collect(),
            None => HashSet::new(),
        }
    }

    /// One full scan. Returns once every per-asset task has finished.
    pub async fn run_scan(&self) -> Result<ScanReport, AnalysisError> {
        let start = Instant::now();
        let assets = self.fetch_ranking().await?;
        let banned = self.banned_symbols().await;

        let mut report = ScanReport {
            ranked: assets.len(),
            ..ScanReport::default()
        };

        let mut tasks = JoinSet::new();
        for asset in assets {
            if banned.contains(&asset.symbol.to_ascii_uppercase()) {
                tracing::debug!(symbol = %asset.symbol, "Skipping banned symbol");
                report.banned += 1;
                continue;
            }

            let record = self.registry.upsert(asset);
            let permits = Arc::clone(&self.permits);
            let pipeline = Arc::clone(&self.pipeline);
            tasks.spawn(async move {
                let _permit = permits
                    .acquire_owned()
                    .await
                    .map_err(|e| AnalysisError::Unknown(format!("worker pool closed: {e}")))?;
                let _eval = record.lock_evaluation().await;
                let summary = record.summary();
                pipeline.process(summary).await.map_err(|e| {
                    tracing::warn!(symbol = %record.symbol(), "Asset evaluation failed: {}", e);
                    e
                })
            });
        }

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(Ok(outcome)) => {
                    report.evaluated += 1;
                    match outcome {
                        AssetOutcome::Filtered => report.filtered += 1,
                        AssetOutcome::Signal(_) => report.signals += 1,
                        AssetOutcome::Candidate => report.candidates += 1,
                        AssetOutcome::NoSignal => {}
                    }
                }
                Ok(Err(_)) => report.failed += 1,
                Err(e) => {
                    report.failed += 1;
                    tracing::error!("Asset task panicked: {}", e);
                }
            }
        }

        report.duration_ms = start.elapsed().as_millis() as u64;
        Ok(report)
    }
}
