pub mod cache;
mod models;

pub use cache::CoalescingCache;

use analysis_core::{AnalysisError, PoolResolver, Series, SeriesRequest, SeriesSource};
use async_trait::async_trait;
use models::{OhlcvResponse, PoolsResponse};
use reqwest::Client;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;

pub const DEFAULT_BASE_URL: &str = "https://api.geckoterminal.com/api/v2";

/// Sliding-window rate limiter: at most `max_requests` per `window` duration.
#[derive(Clone)]
struct RateLimiter {
    timestamps: Arc<Mutex<VecDeque<Instant>>>,
    max_requests: usize,
    window: Duration,
}

impl RateLimiter {
    fn new(max_requests: usize, window: Duration) -> Self {
        Self {
            timestamps: Arc::new(Mutex::new(VecDeque::new())),
            max_requests: max_requests.max(1),
            window,
        }
    }

    async fn acquire(&self) {
        loop {
            let mut ts = self.timestamps.lock().await;
            let now = Instant::now();

            // Remove timestamps outside the window
            while let Some(&front) = ts.front() {
                if now.duration_since(front) >= self.window {
                    ts.pop_front();
                } else {
                    break;
                }
            }

            let oldest = match ts.front() {
                Some(&oldest) if ts.len() >= self.max_requests => oldest,
                _ => {
                    ts.push_back(now);
                    return;
                }
            };

            // Need to wait until the oldest request falls out of the window
            let sleep_dur = (oldest + self.window).duration_since(now) + Duration::from_millis(50);
            drop(ts);
            tracing::debug!("Rate limiter: waiting {:.1}s for GeckoTerminal slot", sleep_dur.as_secs_f64());
            tokio::time::sleep(sleep_dur).await;
        }
    }
}

#[derive(Debug, Clone)]
pub struct GeckoConfig {
    pub base_url: String,
    pub proxy_url: Option<String>,
    pub request_timeout: Duration,
    /// Requests allowed per minute.
    pub rate_limit: usize,
    /// Attempts on HTTP 429 before giving up with `RateLimited`.
    pub max_429_attempts: u32,
    pub retry_wait: Duration,
    pub pool_ttl: Duration,
}

impl Default for GeckoConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            proxy_url: None,
            request_timeout: Duration::from_secs(10),
            rate_limit: 30,
            max_429_attempts: 3,
            retry_wait: Duration::from_secs(2),
            pool_ttl: Duration::from_secs(24 * 3600),
        }
    }
}

/// GeckoTerminal client. OHLCV and pool lookups go through coalescing caches,
/// so concurrent asset tasks asking for the same series share one request.
#[derive(Clone)]
pub struct GeckoClient {
    config: GeckoConfig,
    client: Client,
    rate_limiter: RateLimiter,
    series_cache: Arc<CoalescingCache<Series>>,
    pool_cache: Arc<CoalescingCache<String>>,
}

impl GeckoClient {
    pub fn new(config: GeckoConfig) -> Result<Self, AnalysisError> {
        let mut builder = Client::builder().timeout(config.request_timeout);
        if let Some(proxy) = config.proxy_url.as_deref().filter(|p| !p.is_empty()) {
            let proxy = reqwest::Proxy::all(proxy)
                .map_err(|e| AnalysisError::InvalidData(format!("bad proxy url: {e}")))?;
            builder = builder.proxy(proxy);
        }
        let client = builder
            .build()
            .map_err(|e| AnalysisError::ApiError(e.to_string()))?;

        Ok(Self {
            rate_limiter: RateLimiter::new(config.rate_limit, Duration::from_secs(60)),
            config,
            client,
            series_cache: Arc::new(CoalescingCache::new()),
            pool_cache: Arc::new(CoalescingCache::new()),
        })
    }

    pub fn series_cache(&self) -> &CoalescingCache<Series> {
        &self.series_cache
    }

    /// Send a request with rate limiting and automatic 429 retry.
    async fn send_request(&self, builder: reqwest::RequestBuilder) -> Result<reqwest::Response, AnalysisError> {
        let request = builder.build().map_err(|e| AnalysisError::ApiError(e.to_string()))?;
        let attempts = self.config.max_429_attempts.max(1);

        for attempt in 1..=attempts {
            self.rate_limiter.acquire().await;
            let req_clone = request.try_clone()
                .ok_or_else(|| AnalysisError::ApiError("Cannot clone request".to_string()))?;
            let response = self.client.execute(req_clone).await.map_err(map_reqwest_error)?;

            if response.status().as_u16() != 429 {
                return Ok(response);
            }

            if attempt < attempts {
                tracing::warn!(
                    "GeckoTerminal 429 rate limited, waiting {}s before retry {}/{}",
                    self.config.retry_wait.as_secs_f64(),
                    attempt,
                    attempts
                );
                tokio::time::sleep(self.config.retry_wait).await;
            }
        }

        Err(AnalysisError::RateLimited { status: 429 })
    }

    async fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        url: &str,
        query: &[(&str, String)],
    ) -> Result<T, AnalysisError> {
        let response = self
            .send_request(
                self.client
                    .get(url)
                    .header("Accept", "application/json")
                    .query(query),
            )
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AnalysisError::from_status(status.as_u16(), body));
        }

        response
            .json()
            .await
            .map_err(|e| AnalysisError::InvalidData(e.to_string()))
    }

    /// Uncached OHLCV request.
    pub async fn get_ohlcv(&self, request: &SeriesRequest) -> Result<Series, AnalysisError> {
        let url = format!(
            "{}/networks/{}/pools/{}/ohlcv/{}",
            self.config.base_url,
            request.network,
            request.pool_address,
            request.timeframe.as_str()
        );

        let started = Instant::now();
        let response: OhlcvResponse = self.get_json(&url, &request.options.query_pairs()).await?;
        let meta = response.meta.clone();
        let bars = response.into_bars();

        tracing::debug!(
            pool = %request.pool_address,
            timeframe = request.timeframe.as_str(),
            aggregate = request.options.aggregate,
            bars = bars.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Fetched OHLCV"
        );

        Ok(Series { bars, meta })
    }

    /// Uncached pool lookup: the token's pool with the highest 24h volume.
    pub async fn get_top_pool(&self, network: &str, token_address: &str) -> Result<String, AnalysisError> {
        let url = format!(
            "{}/networks/{}/tokens/{}/pools",
            self.config.base_url, network, token_address
        );
        let query = [
            ("page", "1".to_string()),
            ("sort", "h24_volume_usd_desc".to_string()),
        ];
        let response: PoolsResponse = self.get_json(&url, &query).await?;
        response.top_pool_address()
    }
}

fn map_reqwest_error(e: reqwest::Error) -> AnalysisError {
    if e.is_timeout() {
        AnalysisError::Timeout(e.to_string())
    } else {
        AnalysisError::ApiError(e.to_string())
    }
}

#[async_trait]
impl SeriesSource for GeckoClient {
    async fn fetch_series(&self, request: &SeriesRequest) -> Result<Series, AnalysisError> {
        self.series_cache
            .fetch(&request.fingerprint(), request.timeframe.cache_ttl(), || self.get_ohlcv(request))
            .await
    }
}

#[async_trait]
impl PoolResolver for GeckoClient {
    async fn resolve_pool(&self, network: &str, token_address: &str) -> Result<String, AnalysisError> {
        let key = format!("{network}|{token_address}");
        self.pool_cache
            .fetch(&key, self.config.pool_ttl, || self.get_top_pool(network, token_address))
            .await
    }
}
