use analysis_core::{AnalysisError, AssetSummary, RankingSource};
use async_trait::async_trait;
use rand::seq::SliceRandom;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, ACCEPT_LANGUAGE, USER_AGENT};
use reqwest::Client;
use serde::Deserialize;
use std::collections::HashSet;
use std::time::Duration;

const USER_AGENTS: &[&str] = &[
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.4 Safari/605.1.15",
    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/123.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:125.0) Gecko/20100101 Firefox/125.0",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36 Edg/124.0.0.0",
];

fn random_user_agent() -> &'static str {
    USER_AGENTS
        .choose(&mut rand::thread_rng())
        .copied()
        .unwrap_or(USER_AGENTS[0])
}

fn build_client(proxy_url: Option<&str>, timeout: Duration) -> Result<Client, AnalysisError> {
    let mut builder = Client::builder().timeout(timeout);
    if let Some(proxy) = proxy_url.filter(|p| !p.is_empty()) {
        let proxy = reqwest::Proxy::all(proxy)
            .map_err(|e| AnalysisError::InvalidData(format!("bad proxy url: {e}")))?;
        builder = builder.proxy(proxy);
    }
    builder.build().map_err(|e| AnalysisError::ApiError(e.to_string()))
}

fn map_send_error(e: reqwest::Error) -> AnalysisError {
    if e.is_timeout() {
        AnalysisError::Timeout(e.to_string())
    } else {
        AnalysisError::ApiError(e.to_string())
    }
}

#[derive(Debug, Deserialize)]
struct RankingResponse {
    code: i64,
    #[serde(default)]
    msg: String,
    data: Option<RankingData>,
}

#[derive(Debug, Deserialize)]
struct RankingData {
    #[serde(default)]
    rank: Vec<AssetSummary>,
}

/// Keep rows with enough smart-money interest, pin them to `network` and
/// drop duplicates (first occurrence wins).
pub fn filter_ranked(rows: Vec<AssetSummary>, network: &str, min_smart_money: i64) -> Vec<AssetSummary> {
    let mut seen = HashSet::new();
    rows.into_iter()
        .filter(|row| row.smart_degen_count >= min_smart_money || row.renowned_count >= min_smart_money)
        .filter(|row| !row.symbol.is_empty() && !row.address.is_empty())
        .map(|mut row| {
            row.chain = network.to_string();
            row
        })
        .filter(|row| seen.insert(row.dedupe_key()))
        .collect()
}

/// Smart-money ranking feed.
pub struct RankingClient {
    client: Client,
    url: String,
    network: String,
    min_smart_money: i64,
}

impl RankingClient {
    pub fn new(
        url: impl Into<String>,
        proxy_url: Option<&str>,
        network: impl Into<String>,
        min_smart_money: i64,
    ) -> Result<Self, AnalysisError> {
        Ok(Self {
            client: build_client(proxy_url, Duration::from_secs(10))?,
            url: url.into(),
            network: network.into(),
            min_smart_money,
        })
    }

    fn headers() -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(USER_AGENT, HeaderValue::from_static(random_user_agent()));
        headers.insert(ACCEPT, HeaderValue::from_static("application/json, text/plain, */*"));
        headers.insert(ACCEPT_LANGUAGE, HeaderValue::from_static("en-US,en;q=0.9"));
        headers
    }
}

#[async_trait]
impl RankingSource for RankingClient {
    async fn fetch_ranked_assets(&self) -> Result<Vec<AssetSummary>, AnalysisError> {
        let response = self
            .client
            .get(&self.url)
            .headers(Self::headers())
            .send()
            .await
            .map_err(map_send_error)?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AnalysisError::from_status(status.as_u16(), body));
        }

        let parsed: RankingResponse = response
            .json()
            .await
            .map_err(|e| AnalysisError::InvalidData(format!("ranking response: {e}")))?;
        if parsed.code != 0 {
            return Err(AnalysisError::ApiError(format!(
                "ranking returned code {}: {}",
                parsed.code, parsed.msg
            )));
        }

        let rows = parsed.data.map(|d| d.rank).unwrap_or_default();
        let total = rows.len();
        let kept = filter_ranked(rows, &self.network, self.min_smart_money);
        tracing::debug!(total, kept = kept.len(), "Fetched ranking");
        Ok(kept)
    }
}

/// Symbols never to evaluate.
#[async_trait]
pub trait BanListSource: Send + Sync {
    /// Never fails; an unreachable source yields an empty list.
    async fn banned_symbols(&self) -> Vec<String>;
}

pub struct BanListClient {
    client: Client,
    url: String,
    max_attempts: u32,
    base_delay: Duration,
}

impl BanListClient {
    pub fn new(url: impl Into<String>, proxy_url: Option<&str>) -> Result<Self, AnalysisError> {
        Ok(Self {
            client: build_client(proxy_url, Duration::from_secs(10))?,
            url: url.into(),
            max_attempts: 3,
            base_delay: Duration::from_secs(1),
        })
    }

    async fn fetch_once(&self) -> Result<Vec<String>, AnalysisError> {
        let response = self
            .client
            .get(&self.url)
            .header(USER_AGENT, random_user_agent())
            .header(ACCEPT, "application/json")
            .send()
            .await
            .map_err(map_send_error)?;

        let status = response.status();
        if !status.is_success() {
            return Err(AnalysisError::from_status(status.as_u16(), ""));
        }
        response
            .json()
            .await
            .map_err(|e| AnalysisError::InvalidData(format!("ban list: {e}")))
    }
}

#[async_trait]
impl BanListSource for BanListClient {
    async fn banned_symbols(&self) -> Vec<String> {
        let mut delay = self.base_delay;
        for attempt in 1..=self.max_attempts {
            match self.fetch_once().await {
                Ok(symbols) => return symbols,
                Err(e) if attempt < self.max_attempts => {
                    tracing::warn!(attempt, "Ban list fetch failed, retrying in {:?}: {}", delay, e);
                    tokio::time::sleep(delay).await;
                    delay *= 2;
                }
                Err(e) => {
                    tracing::error!(attempts = self.max_attempts, "Ban list unavailable, scanning without it: {}", e);
                }
            }
        }
        Vec::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{http::StatusCode, response::IntoResponse, routing::get, Json, Router};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn row(symbol: &str, address: &str, smart: i64, renowned: i64) -> AssetSummary {
        AssetSummary {
            symbol: symbol.to_string(),
            address: address.to_string(),
            chain: "sol".to_string(),
            smart_degen_count: smart,
            renowned_count: renowned,
            ..AssetSummary::default()
        }
    }

    #[test]
    fn test_filter_keeps_smart_money_and_dedupes() {
        let rows = vec![
            row("FOO", "A1", 5, 0),
            row("BAR", "B2", 0, 4),
            row("LOW", "C3", 3, 3),
            row("FOO", "A1", 9, 9),
            row("", "D4", 9, 9),
        ];
        let kept = filter_ranked(rows, "solana", 4);

        let symbols: Vec<_> = kept.iter().map(|r| r.symbol.as_str()).collect();
        assert_eq!(symbols, vec!["FOO", "BAR"]);
        assert!(kept.iter().all(|r| r.chain == "solana"));
        assert_eq!(kept[0].smart_degen_count, 5);
    }

    async fn serve(router: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        format!("http://{addr}")
    }

    #[tokio::test]
    async fn test_ranking_parses_and_filters() {
        let router = Router::new().route(
            "/rank",
            get(|| async {
                Json(serde_json::json!({
                    "code": 0,
                    "msg": "success",
                    "data": {"rank": [
                        {"id": 1, "chain": "sol", "address": "So1", "symbol": "FOO",
                         "price": 0.01, "smart_degen_count": 6, "renowned_count": 0},
                        {"id": 2, "chain": "sol", "address": "So2", "symbol": "DUD",
                         "smart_degen_count": 1, "renowned_count": 1}
                    ]}
                }))
            }),
        );
        let base = serve(router).await;
        let client = RankingClient::new(format!("{base}/rank"), None, "solana", 4).unwrap();

        let assets = client.fetch_ranked_assets().await.unwrap();
        assert_eq!(assets.len(), 1);
        assert_eq!(assets[0].symbol, "FOO");
        assert_eq!(assets[0].chain, "solana");
    }

    #[tokio::test]
    async fn test_ranking_error_classification() {
        let router = Router::new()
            .route("/blocked", get(|| async { StatusCode::FORBIDDEN }))
            .route("/missing", get(|| async { StatusCode::NOT_FOUND }))
            .route(
                "/bad-code",
                get(|| async { Json(serde_json::json!({"code": 1, "msg": "denied"})) }),
            );
        let base = serve(router).await;

        let blocked = RankingClient::new(format!("{base}/blocked"), None, "solana", 4).unwrap();
        assert!(blocked.fetch_ranked_assets().await.unwrap_err().is_rate_limited());

        let missing = RankingClient::new(format!("{base}/missing"), None, "solana", 4).unwrap();
        let err = missing.fetch_ranked_assets().await.unwrap_err();
        assert!(!err.is_rate_limited() && !err.is_transient());

        let bad = RankingClient::new(format!("{base}/bad-code"), None, "solana", 4).unwrap();
        assert!(matches!(
            bad.fetch_ranked_assets().await.unwrap_err(),
            AnalysisError::ApiError(_)
        ));
    }

    #[tokio::test]
    async fn test_ban_list_retries_then_succeeds() {
        let hits = Arc::new(AtomicUsize::new(0));
        let h = hits.clone();
        let router = Router::new().route(
            "/ban",
            get(move || {
                let h = h.clone();
                async move {
                    if h.fetch_add(1, Ordering::SeqCst) == 0 {
                        StatusCode::SERVICE_UNAVAILABLE.into_response()
                    } else {
                        Json(vec!["SCAM", "RUG"]).into_response()
                    }
                }
            }),
        );
        let base = serve(router).await;
        let mut client = BanListClient::new(format!("{base}/ban"), None).unwrap();
        client.base_delay = Duration::from_millis(5);

        assert_eq!(client.banned_symbols().await, vec!["SCAM", "RUG"]);
        assert_eq!(hits.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_ban_list_failure_is_empty() {
        let hits = Arc::new(AtomicUsize::new(0));
        let h = hits.clone();
        let router = Router::new().route(
            "/ban",
            get(move || {
                let h = h.clone();
                async move {
                    h.fetch_add(1, Ordering::SeqCst);
                    StatusCode::INTERNAL_SERVER_ERROR
                }
            }),
        );
        let base = serve(router).await;
        let mut client = BanListClient::new(format!("{base}/ban"), None).unwrap();
        client.base_delay = Duration::from_millis(5);

        assert!(client.banned_symbols().await.is_empty());
        assert_eq!(hits.load(Ordering::SeqCst), 3);
    }
}
