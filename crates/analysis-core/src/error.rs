use thiserror::Error;

#[derive(Error, Debug, Clone)]
pub enum AnalysisError {
    #[error("Insufficient data: {0}")]
    InsufficientData(String),

    #[error("Invalid data: {0}")]
    InvalidData(String),

    #[error("Rate limited by upstream (status {status})")]
    RateLimited { status: u16 },

    #[error("Upstream returned status {status}: {body}")]
    Upstream { status: u16, body: String },

    #[error("Request timed out: {0}")]
    Timeout(String),

    #[error("API error: {0}")]
    ApiError(String),

    /// A follower was released but the leader left nothing in the cache.
    #[error("Lost race for {0}: leader finished without a cached value")]
    LostRace(String),

    #[error("Cache error: {0}")]
    CacheError(String),

    #[error("Database error: {0}")]
    DatabaseError(String),

    #[error("Unknown error: {0}")]
    Unknown(String),
}

impl AnalysisError {
    pub fn is_rate_limited(&self) -> bool {
        matches!(self, AnalysisError::RateLimited { .. })
    }

    /// Errors worth another attempt: timeouts, rate limits, 5xx and lost races.
    pub fn is_transient(&self) -> bool {
        match self {
            AnalysisError::RateLimited { .. }
            | AnalysisError::Timeout(_)
            | AnalysisError::LostRace(_) => true,
            AnalysisError::Upstream { status, .. } => *status >= 500,
            _ => false,
        }
    }

    /// Classify an HTTP status from an upstream call.
    pub fn from_status(status: u16, body: impl Into<String>) -> Self {
        match status {
            429 | 403 => AnalysisError::RateLimited { status },
            _ => AnalysisError::Upstream {
                status,
                body: body.into(),
            },
        }
    }
}
