use analysis_core::{AnalysisError, Bar, SeriesMeta};
use chrono::{DateTime, Utc};
use serde::Deserialize;

#[derive(Debug, Deserialize)]
pub(crate) struct OhlcvResponse {
    pub data: OhlcvData,
    #[serde(default)]
    pub meta: SeriesMeta,
}

#[derive(Debug, Deserialize)]
pub(crate) struct OhlcvData {
    pub attributes: OhlcvAttributes,
}

#[derive(Debug, Deserialize)]
pub(crate) struct OhlcvAttributes {
    #[serde(default)]
    pub ohlcv_list: Vec<Vec<f64>>,
}

impl OhlcvResponse {
    /// Bars oldest first. The API returns newest first; short rows are skipped.
    pub fn into_bars(self) -> Vec<Bar> {
        let mut bars: Vec<Bar> = self
            .data
            .attributes
            .ohlcv_list
            .into_iter()
            .filter(|row| row.len() >= 6)
            .filter_map(|row| {
                let timestamp = DateTime::<Utc>::from_timestamp(row[0] as i64, 0)?;
                Some(Bar {
                    timestamp,
                    open: row[1],
                    high: row[2],
                    low: row[3],
                    close: row[4],
                    volume: row[5],
                })
            })
            .collect();
        bars.sort_by_key(|b| b.timestamp);
        bars
    }
}

#[derive(Debug, Deserialize)]
pub(crate) struct PoolsResponse {
    #[serde(default)]
    pub data: Vec<PoolData>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct PoolData {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub attributes: PoolAttributes,
}

#[derive(Debug, Default, Deserialize)]
pub(crate) struct PoolAttributes {
    #[serde(default)]
    pub address: String,
}

impl PoolsResponse {
    /// Address of the first (highest 24h volume) pool.
    pub fn top_pool_address(&self) -> Result<String, AnalysisError> {
        let pool = self
            .data
            .first()
            .ok_or_else(|| AnalysisError::InvalidData("no pools returned".to_string()))?;

        if !pool.attributes.address.is_empty() {
            return Ok(pool.attributes.address.clone());
        }

        // ids look like "solana_<address>"
        match pool.id.split_once('_') {
            Some((_, address)) if !address.is_empty() => Ok(address.to_string()),
            _ => Err(AnalysisError::InvalidData(format!(
                "pool '{}' has no address",
                pool.id
            ))),
        }
    }
}
