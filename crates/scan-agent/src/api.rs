use crate::candidates::CandidateManager;
use crate::metrics::ScanMetrics;
use crate::registry::AssetRegistry;
use axum::extract::{Query, State};
use axum::http::{header, Method};
use axum::routing::get;
use axum::{Json, Router};
use notification_service::{MessageLog, SavedMessage};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

const DEFAULT_SIGNAL_LIMIT: usize = 25;
const DEFAULT_WAITING_LIMIT: usize = 2;

#[derive(Clone)]
pub struct AppState {
    pub signal_log: Arc<MessageLog>,
    pub waiting_log: Arc<MessageLog>,
    pub candidates: Arc<CandidateManager>,
    pub registry: Arc<AssetRegistry>,
    pub metrics: Arc<Mutex<ScanMetrics>>,
}

/// Raw `limit`; anything that is not a positive integer means "default".
#[derive(Debug, Deserialize)]
struct LimitQuery {
    limit: Option<String>,
}

impl LimitQuery {
    fn or_default(&self, default: usize) -> usize {
        self.limit
            .as_deref()
            .and_then(|raw| raw.trim().parse::<usize>().ok())
            .filter(|&n| n > 0)
            .unwrap_or(default)
    }
}

#[derive(Debug, Serialize)]
struct CandidateView {
    symbol: String,
    address: String,
    pool_address: String,
    added_at: chrono::DateTime<chrono::Utc>,
    confirmed: bool,
}

pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE]);

    Router::new()
        .route("/api/latest-messages", get(latest_messages))
        .route("/api/latest-messages-waiting", get(latest_waiting_messages))
        .route("/api/candidates", get(candidates))
        .route("/api/assets", get(assets))
        .route("/health", get(health))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn latest_messages(State(state): State<AppState>, Query(q): Query<LimitQuery>) -> Json<Vec<SavedMessage>> {
    Json(state.signal_log.latest(q.or_default(DEFAULT_SIGNAL_LIMIT)))
}

async fn latest_waiting_messages(
    State(state): State<AppState>,
    Query(q): Query<LimitQuery>,
) -> Json<Vec<SavedMessage>> {
    Json(state.waiting_log.latest(q.or_default(DEFAULT_WAITING_LIMIT)))
}

async fn candidates(State(state): State<AppState>) -> Json<Vec<CandidateView>> {
    let views = state
        .candidates
        .snapshot()
        .into_iter()
        .map(|c| CandidateView {
            confirmed: c.last_pushed == crate::candidates::PushedOperation::Confirmed,
            symbol: c.symbol,
            address: c.asset.address,
            pool_address: c.asset.pool_address,
            added_at: c.added_at,
        })
        .collect();
    Json(views)
}

#[derive(Debug, Serialize)]
struct AssetView {
    symbol: String,
    address: String,
    price: f64,
    smart_degen_count: i64,
    updated_at: chrono::DateTime<chrono::Utc>,
}

async fn assets(State(state): State<AppState>) -> Json<Vec<AssetView>> {
    let views = state
        .registry
        .symbols()
        .into_iter()
        .filter_map(|symbol| state.registry.get(&symbol))
        .map(|record| {
            let summary = record.summary();
            AssetView {
                symbol: record.symbol().to_string(),
                address: summary.address,
                price: summary.price,
                smart_degen_count: summary.smart_degen_count,
                updated_at: record.updated_at(),
            }
        })
        .collect();
    Json(views)
}

async fn health(State(state): State<AppState>) -> Json<serde_json::Value> {
    let metrics = state.metrics.lock().to_json();
    Json(serde_json::json!({
        "status": "ok",
        "tracked_assets": state.registry.len(),
        "waiting_candidates": state.candidates.len(),
        "metrics": metrics,
    }))
}

/// Serve the status API until `shutdown` fires.
pub async fn serve(bind_addr: &str, state: AppState, shutdown: CancellationToken) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind(bind_addr).await?;
    tracing::info!("Status API listening on {}", listener.local_addr()?);
    axum::serve(listener, router(state))
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await?;
    Ok(())
}
