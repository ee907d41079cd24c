use std::sync::Arc;
use std::time::{Duration, Instant};

use analysis_core::VerdictStore;
use anyhow::Result;
use gecko_client::{GeckoClient, GeckoConfig};
use notification_service::{
    FirstAlertPolicy, HistoryNotifier, MessageLog, Notifier, NotifierListing, TelegramConfig, TelegramNotifier,
};
use parking_lot::Mutex;
use technical_analysis::MacdParams;
use tokio::signal::unix::SignalKind;
use tokio_util::sync::CancellationToken;

mod api;
mod candidates;
mod config;
mod evaluator;
mod market_scanner;
mod metrics;
mod registry;
mod scanner;
mod scheduler;
mod state_manager;

use candidates::{CandidateManager, CandidateSettings};
use config::AgentConfig;
use evaluator::{AssetEvaluator, EvaluatorSettings, MarketAssessor};
use market_scanner::{BanListClient, RankingClient};
use metrics::ScanMetrics;
use registry::AssetRegistry;
use scanner::{ScanSettings, Scanner};
use scheduler::{run_periodic, Schedule};
use state_manager::{MemoryVerdictStore, SqliteVerdictStore};

#[tokio::main]
async fn main() -> Result<()> {
    // 1. Load .env, init tracing
    dotenvy::dotenv().ok();

    let json_logging = std::env::var("RUST_LOG_FORMAT")
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);
    if json_logging {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
            )
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
            )
            .init();
    }

    // Panic hook: log panic info before crashing
    std::panic::set_hook(Box::new(|info| {
        eprintln!("PANIC: {info}");
        tracing::error!("PANIC: {info}");
    }));

    tracing::info!("Starting on-chain scan agent");

    // 2. Load configuration
    let config = AgentConfig::from_env()?;
    tracing::info!("Configuration loaded and validated");
    tracing::info!("  Ranking: {}", config.ranking_url);
    tracing::info!("  Scan interval: {} min", config.scan_interval_minutes);
    tracing::info!("  Candidate sweep interval: {} min", config.sweep_interval_minutes);
    tracing::info!("  Candidate ceiling: {} min", config.candidate_ttl_minutes);
    tracing::info!("  Worker pool: {}", config.scan_concurrency);
    tracing::info!(
        "  Aggregates: 1m={} 5m={} 15m={}",
        config.one_min_aggregate,
        config.five_min_aggregate,
        config.fifteen_min_aggregate
    );

    // 3. Verdict store
    let verdicts: Arc<dyn VerdictStore> = match &config.database_url {
        Some(url) => {
            sqlx::any::install_default_drivers();
            let db_pool = sqlx::AnyPool::connect(url).await?;
            let store = SqliteVerdictStore::new(db_pool);
            store.init_tables().await?;
            tracing::info!("Verdict store initialized");
            Arc::new(store)
        }
        None => {
            tracing::warn!("DATABASE_URL not set, verdicts kept in memory");
            Arc::new(MemoryVerdictStore::new())
        }
    };

    // 4. Market data
    let gecko = Arc::new(GeckoClient::new(GeckoConfig {
        base_url: config.gecko_base_url.clone(),
        proxy_url: config.proxy_url.clone(),
        rate_limit: config.gecko_rate_limit,
        ..GeckoConfig::default()
    })?);

    // 5. Notifications
    let telegram = |token: &str| {
        TelegramNotifier::new(TelegramConfig {
            proxy_url: config.proxy_url.clone(),
            ..TelegramConfig::new(token)
        })
    };
    let signal_log = Arc::new(MessageLog::default());
    let waiting_log = Arc::new(MessageLog::default());

    let mut signal_history = HistoryNotifier::new(Arc::new(telegram(&config.telegram_bot_token)?), signal_log.clone());
    if let Some((token, chat_id)) = config.alert_channel() {
        signal_history =
            signal_history.with_first_alert(FirstAlertPolicy::new(Arc::new(telegram(token)?), chat_id));
        tracing::info!("First-alert channel enabled");
    }
    let signal_notifier: Arc<dyn Notifier> = Arc::new(signal_history);
    let waiting_notifier: Arc<dyn Notifier> = Arc::new(HistoryNotifier::new(
        Arc::new(telegram(&config.telegram_waiting_bot_token)?),
        waiting_log.clone(),
    ));
    let listing = Arc::new(NotifierListing::new(waiting_notifier, config.telegram_chat_id.clone()));

    // 6. Evaluation pipeline
    let assessor = Arc::new(MarketAssessor::new(
        gecko.clone(),
        gecko.clone(),
        verdicts,
        EvaluatorSettings {
            network: config.network.clone(),
            series_limit: config.series_limit,
            one_min_aggregate: config.one_min_aggregate,
            five_min_aggregate: config.five_min_aggregate,
            fifteen_min_aggregate: config.fifteen_min_aggregate,
            fetch_attempts: config.series_fetch_attempts,
            retry_delay: Duration::from_secs(config.series_retry_delay_secs),
            macd: MacdParams::default(),
        },
    ));
    let candidates = Arc::new(CandidateManager::new(
        assessor.clone(),
        signal_notifier.clone(),
        config.telegram_chat_id.clone(),
        listing,
        CandidateSettings {
            ttl: chrono::Duration::minutes(config.candidate_ttl_minutes),
            retain_confirmed: config.retain_confirmed,
            concurrency: config.scan_concurrency,
        },
    ));
    let evaluator = Arc::new(AssetEvaluator::new(
        assessor,
        signal_notifier,
        config.telegram_chat_id.clone(),
        candidates.clone(),
    ));

    // 7. Scanner
    let registry = Arc::new(AssetRegistry::new());
    let ranking = Arc::new(RankingClient::new(
        config.ranking_url.clone(),
        config.proxy_url.as_deref(),
        config.network.clone(),
        config.min_smart_money_count,
    )?);
    let mut scanner = Scanner::new(
        ranking,
        registry.clone(),
        evaluator,
        ScanSettings {
            concurrency: config.scan_concurrency,
            ranking_max_attempts: config.ranking_max_attempts,
            ranking_retry_delay: Duration::from_secs(config.ranking_retry_delay_secs),
        },
    );
    if let Some(url) = &config.ban_list_url {
        scanner = scanner.with_ban_list(Arc::new(BanListClient::new(url.clone(), config.proxy_url.as_deref())?));
        tracing::info!("Ban list enabled ({})", url);
    }
    let scanner = Arc::new(scanner);
    let metrics = ScanMetrics::new(config.metrics_log_interval_cycles);
    let skipped_ticks = metrics.skipped_ticks_counter();
    let metrics = Arc::new(Mutex::new(metrics));

    // 8. Graceful shutdown: SIGINT or SIGTERM cancels the token
    let shutdown = CancellationToken::new();
    let mut sigterm = tokio::signal::unix::signal(SignalKind::terminate())?;
    {
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => tracing::info!("Received SIGINT, shutting down gracefully..."),
                _ = sigterm.recv() => tracing::info!("Received SIGTERM, shutting down gracefully..."),
            }
            shutdown.cancel();
        });
    }

    // 9. Status API
    let api_task = {
        let state = api::AppState {
            signal_log,
            waiting_log,
            candidates: candidates.clone(),
            registry,
            metrics: metrics.clone(),
        };
        let bind_addr = config.api_bind_addr.clone();
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            if let Err(e) = api::serve(&bind_addr, state, shutdown).await {
                tracing::error!("Status API stopped: {}", e);
            }
        })
    };

    // 10. Schedulers
    let scan_task = {
        let (scanner, metrics, gecko) = (scanner.clone(), metrics.clone(), gecko.clone());
        tokio::spawn(run_periodic(
            Schedule {
                name: "scan",
                period: Duration::from_secs(config.scan_interval_minutes * 60),
                align_to_clock: true,
                run_immediately: true,
                skipped_ticks: Some(skipped_ticks.clone()),
            },
            shutdown.clone(),
            move || run_scan_cycle(scanner.clone(), metrics.clone(), gecko.clone()),
        ))
    };
    let sweep_task = {
        let (candidates, metrics) = (candidates.clone(), metrics.clone());
        tokio::spawn(run_periodic(
            Schedule {
                name: "candidate-sweep",
                period: Duration::from_secs(config.sweep_interval_minutes * 60),
                align_to_clock: true,
                run_immediately: false,
                skipped_ticks: Some(skipped_ticks.clone()),
            },
            shutdown.clone(),
            move || run_sweep(candidates.clone(), metrics.clone()),
        ))
    };

    tracing::info!("Agent is now running");

    let (scan_stats, sweep_stats) = tokio::join!(scan_task, sweep_task);
    if let Err(e) = api_task.await {
        tracing::error!("Status API task failed: {}", e);
    }

    metrics.lock().log_metrics();
    tracing::info!(
        scans = scan_stats.map(|s| s.started).unwrap_or_default(),
        sweeps = sweep_stats.map(|s| s.started).unwrap_or_default(),
        "Agent stopped"
    );
    Ok(())
}

async fn run_scan_cycle(scanner: Arc<Scanner>, metrics: Arc<Mutex<ScanMetrics>>, gecko: Arc<GeckoClient>) {
    tracing::info!("Starting scan cycle");

    match scanner.run_scan().await {
        Ok(report) => {
            tracing::info!(
                ranked = report.ranked,
                banned = report.banned,
                evaluated = report.evaluated,
                failed = report.failed,
                filtered = report.filtered,
                signals = report.signals,
                candidates = report.candidates,
                elapsed_ms = report.duration_ms,
                "Scan complete"
            );
            metrics.lock().record_scan(&report);
        }
        Err(e) => {
            tracing::error!("Scan aborted: {}", e);
            metrics.lock().record_scan_failure();
        }
    }

    let purged = gecko.series_cache().purge_expired();
    if purged > 0 {
        tracing::debug!(purged, cached = gecko.series_cache().len(), "Purged expired series");
    }

    metrics.lock().finish_cycle();
}

async fn run_sweep(candidates: Arc<CandidateManager>, metrics: Arc<Mutex<ScanMetrics>>) {
    if candidates.is_empty() {
        return;
    }
    let start = Instant::now();
    let report = candidates.sweep(chrono::Utc::now()).await;
    let elapsed_ms = start.elapsed().as_millis() as u64;

    tracing::info!(
        examined = report.examined,
        confirmed = report.confirmed,
        invalidated = report.invalidated,
        expired = report.expired,
        failed = report.failed,
        remaining = report.remaining,
        elapsed_ms,
        "Candidate sweep complete"
    );
    metrics.lock().record_sweep(&report, elapsed_ms);
}
