use analysis_core::AssetSummary;
use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::Arc;

struct AssetAttributes {
    summary: AssetSummary,
    updated_at: DateTime<Utc>,
}

/// One tracked asset. The evaluation lock serialises pipeline runs for the
/// same symbol; the attribute lock is only ever held for a copy or a swap.
pub struct AssetRecord {
    symbol: String,
    attributes: RwLock<AssetAttributes>,
    eval_lock: tokio::sync::Mutex<()>,
}

impl AssetRecord {
    fn new(summary: AssetSummary) -> Self {
        Self {
            symbol: summary.symbol.clone(),
            attributes: RwLock::new(AssetAttributes {
                summary,
                updated_at: Utc::now(),
            }),
            eval_lock: tokio::sync::Mutex::new(()),
        }
    }

    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    pub fn summary(&self) -> AssetSummary {
        self.attributes.read().summary.clone()
    }

    pub fn updated_at(&self) -> DateTime<Utc> {
        self.attributes.read().updated_at
    }

    fn replace(&self, summary: AssetSummary) {
        let mut attrs = self.attributes.write();
        attrs.summary = summary;
        attrs.updated_at = Utc::now();
    }

    pub async fn lock_evaluation(&self) -> tokio::sync::MutexGuard<'_, ()> {
        self.eval_lock.lock().await
    }
}

/// Symbol-keyed set of every asset seen by a scan. Records live for the
/// whole process; a later scan replaces the attributes wholesale.
#[derive(Default)]
pub struct AssetRegistry {
    records: Mutex<HashMap<String, Arc<AssetRecord>>>,
}

impl AssetRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn upsert(&self, summary: AssetSummary) -> Arc<AssetRecord> {
        let mut records = self.records.lock();
        match records.get(&summary.symbol) {
            Some(record) => {
                let record = Arc::clone(record);
                record.replace(summary);
                record
            }
            None => {
                let record = Arc::new(AssetRecord::new(summary));
                records.insert(record.symbol.clone(), Arc::clone(&record));
                record
            }
        }
    }

    pub fn get(&self, symbol: &str) -> Option<Arc<AssetRecord>> {
        self.records.lock().get(symbol).cloned()
    }

    pub fn len(&self) -> usize {
        self.records.lock().len()
    }

    #[allow(dead_code)]
    pub fn is_empty(&self) -> bool {
        self.records.lock().is_empty()
    }

    pub fn symbols(&self) -> Vec<String> {
        let mut symbols: Vec<String> = self.records.lock().keys().cloned().collect();
        symbols.sort();
        symbols
    }
}
