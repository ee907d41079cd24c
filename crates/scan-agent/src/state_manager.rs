use analysis_core::{AnalysisError, TimeframeVerdict, VerdictStore, VerdictTimeframe};
use async_trait::async_trait;
use dashmap::DashMap;

fn db_error(e: sqlx::Error) -> AnalysisError {
    AnalysisError::DatabaseError(e.to_string())
}

/// Latest per-timeframe verdicts, persisted as JSON rows keyed by
/// `(symbol, timeframe)`.
pub struct SqliteVerdictStore {
    pub(crate) db_pool: sqlx::AnyPool,
}

impl SqliteVerdictStore {
    pub fn new(db_pool: sqlx::AnyPool) -> Self {
        Self { db_pool }
    }

    pub async fn init_tables(&self) -> Result<(), AnalysisError> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS symbol_verdicts (
                symbol TEXT NOT NULL,
                timeframe TEXT NOT NULL,
                payload TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                PRIMARY KEY (symbol, timeframe)
            )",
        )
        .execute(&self.db_pool)
        .await
        .map_err(db_error)?;
        Ok(())
    }

    #[allow(dead_code)]
    pub async fn count(&self) -> Result<i64, AnalysisError> {
        let row: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM symbol_verdicts")
            .fetch_one(&self.db_pool)
            .await
            .map_err(db_error)?;
        Ok(row.0)
    }
}

#[async_trait]
impl VerdictStore for SqliteVerdictStore {
    async fn put(&self, verdict: &TimeframeVerdict) -> Result<(), AnalysisError> {
        let payload = serde_json::to_string(verdict).map_err(|e| AnalysisError::InvalidData(e.to_string()))?;
        sqlx::query(
            "INSERT INTO symbol_verdicts (symbol, timeframe, payload, updated_at)
             VALUES ($1, $2, $3, $4)
             ON CONFLICT(symbol, timeframe) DO UPDATE SET
                payload = excluded.payload,
                updated_at = excluded.updated_at",
        )
        .bind(&verdict.symbol)
        .bind(verdict.timeframe.as_str())
        .bind(&payload)
        .bind(verdict.updated_at.to_rfc3339())
        .execute(&self.db_pool)
        .await
        .map_err(db_error)?;
        Ok(())
    }

    async fn get(
        &self,
        symbol: &str,
        timeframe: VerdictTimeframe,
    ) -> Result<Option<TimeframeVerdict>, AnalysisError> {
        let row: Option<(String,)> =
            sqlx::query_as("SELECT payload FROM symbol_verdicts WHERE symbol = $1 AND timeframe = $2")
                .bind(symbol)
                .bind(timeframe.as_str())
                .fetch_optional(&self.db_pool)
                .await
                .map_err(db_error)?;

        row.map(|(payload,)| {
            serde_json::from_str(&payload)
                .map_err(|e| AnalysisError::InvalidData(format!("stored verdict for {symbol}: {e}")))
        })
        .transpose()
    }
}

/// Process-local verdict store, used when no database is configured.
#[derive(Default)]
pub struct MemoryVerdictStore {
    verdicts: DashMap<(String, VerdictTimeframe), TimeframeVerdict>,
}

impl MemoryVerdictStore {
    pub fn new() -> Self {
        Self::default()
    }

    #[allow(dead_code)]
    pub fn len(&self) -> usize {
        self.verdicts.len()
    }

    #[allow(dead_code)]
    pub fn is_empty(&self) -> bool {
        self.verdicts.is_empty()
    }
}

#[async_trait]
impl VerdictStore for MemoryVerdictStore {
    async fn put(&self, verdict: &TimeframeVerdict) -> Result<(), AnalysisError> {
        self.verdicts
            .insert((verdict.symbol.clone(), verdict.timeframe), verdict.clone());
        Ok(())
    }

    async fn get(
        &self,
        symbol: &str,
        timeframe: VerdictTimeframe,
    ) -> Result<Option<TimeframeVerdict>, AnalysisError> {
        Ok(self
            .verdicts
            .get(&(symbol.to_string(), timeframe))
            .map(|v| v.value().clone()))
    }
}
