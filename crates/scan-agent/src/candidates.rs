use analysis_core::{AnalysisError, Assessment, AssetSummary};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use notification_service::{ListingChannel, MessageTemplate, Notifier, WaitingEntry};
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

/// Re-scores a waiting candidate on every sweep.
#[async_trait]
pub trait CandidateScorer: Send + Sync {
    async fn score(&self, asset: &AssetSummary) -> Result<Assessment, AnalysisError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum PushedOperation {
    None,
    Confirmed,
}

#[derive(Debug, Clone, Serialize)]
pub struct CandidateRecord {
    pub symbol: String,
    pub asset: AssetSummary,
    pub added_at: DateTime<Utc>,
    pub last_pushed: PushedOperation,
    pub last_invalid_notified: bool,
}

impl CandidateRecord {
    fn waiting_entry(&self) -> WaitingEntry {
        WaitingEntry {
            symbol: self.symbol.clone(),
            address: self.asset.address.clone(),
            added_at: self.added_at,
            confirmed: self.last_pushed == PushedOperation::Confirmed,
        }
    }
}

#[derive(Debug, Clone)]
pub struct CandidateSettings {
    /// Dwell ceiling; older candidates are dropped without re-scoring.
    pub ttl: Duration,
    /// Keep watching a candidate after its confirmation went out.
    pub retain_confirmed: bool,
    pub concurrency: usize,
}

impl Default for CandidateSettings {
    fn default() -> Self {
        Self {
            ttl: Duration::hours(2),
            retain_confirmed: true,
            concurrency: 10,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub examined: usize,
    pub expired: usize,
    pub confirmed: usize,
    pub invalidated: usize,
    pub failed: usize,
    pub remaining: usize,
}

enum Outgoing {
    Confirmed { symbol: String, address: String, waited_minutes: i64 },
    Invalidated { symbol: String, address: String },
}

/// Owns the waiting list: near-miss assets parked until the 1m timeframe
/// confirms, the higher-timeframe trend breaks, or they age out.
pub struct CandidateManager {
    records: Mutex<HashMap<String, CandidateRecord>>,
    scorer: Arc<dyn CandidateScorer>,
    notifier: Arc<dyn Notifier>,
    channel_id: String,
    listing: Arc<dyn ListingChannel>,
    settings: CandidateSettings,
}

impl CandidateManager {
    pub fn new(
        scorer: Arc<dyn CandidateScorer>,
        notifier: Arc<dyn Notifier>,
        channel_id: impl Into<String>,
        listing: Arc<dyn ListingChannel>,
        settings: CandidateSettings,
    ) -> Self {
        Self {
            records: Mutex::new(HashMap::new()),
            scorer,
            notifier,
            channel_id: channel_id.into(),
            listing,
            settings,
        }
    }

    pub fn len(&self) -> usize {
        self.records.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.lock().is_empty()
    }

    #[allow(dead_code)]
    pub fn get(&self, symbol: &str) -> Option<CandidateRecord> {
        self.records.lock().get(symbol).cloned()
    }

    /// Waiting set, oldest first.
    pub fn snapshot(&self) -> Vec<CandidateRecord> {
        let mut records: Vec<_> = self.records.lock().values().cloned().collect();
        records.sort_by(|a, b| a.added_at.cmp(&b.added_at).then_with(|| a.symbol.cmp(&b.symbol)));
        records
    }

    fn waiting_entries(&self) -> Vec<WaitingEntry> {
        self.snapshot().iter().map(CandidateRecord::waiting_entry).collect()
    }

    async fn broadcast(&self) {
        let entries = self.waiting_entries();
        if let Err(e) = self.listing.publish(&entries).await {
            tracing::warn!(candidates = entries.len(), "Waiting list broadcast failed: {}", e);
        }
    }

    /// Park a near-miss asset. Returns false if it is already waiting.
    pub async fn submit(&self, asset: AssetSummary, now: DateTime<Utc>) -> bool {
        {
            let mut records = self.records.lock();
            if records.contains_key(&asset.symbol) {
                return false;
            }
            records.insert(
                asset.symbol.clone(),
                CandidateRecord {
                    symbol: asset.symbol.clone(),
                    asset,
                    added_at: now,
                    last_pushed: PushedOperation::None,
                    last_invalid_notified: false,
                },
            );
        }
        self.broadcast().await;
        true
    }

    /// Drop `symbol` only if it is still the candidate added at `added_at`.
    fn remove_if_same(records: &mut HashMap<String, CandidateRecord>, symbol: &str, added_at: DateTime<Utc>) -> bool {
        if records.get(symbol).is_some_and(|r| r.added_at == added_at) {
            records.remove(symbol);
            true
        } else {
            false
        }
    }

    pub async fn sweep(&self, now: DateTime<Utc>) -> SweepReport {
        let snapshot = self.snapshot();
        let mut report = SweepReport {
            examined: snapshot.len(),
            ..SweepReport::default()
        };
        let mut changed = false;

        let (expired, live): (Vec<_>, Vec<_>) = snapshot
            .into_iter()
            .partition(|c| now - c.added_at >= self.settings.ttl);

        if !expired.is_empty() {
            let mut records = self.records.lock();
            for candidate in &expired {
                if Self::remove_if_same(&mut records, &candidate.symbol, candidate.added_at) {
                    tracing::info!(symbol = %candidate.symbol, "Candidate expired");
                    report.expired += 1;
                    changed = true;
                }
            }
        }

        let permits = Arc::new(Semaphore::new(self.settings.concurrency.max(1)));
        let mut tasks = JoinSet::new();
        for candidate in live {
            let scorer = Arc::clone(&self.scorer);
            let permits = Arc::clone(&permits);
            tasks.spawn(async move {
                let _permit = permits.acquire_owned().await;
                let result = scorer.score(&candidate.asset).await;
                (candidate, result)
            });
        }

        let mut outgoing = Vec::new();
        while let Some(joined) = tasks.join_next().await {
            let (candidate, assessment) = match joined {
                Ok((candidate, Ok(assessment))) => (candidate, assessment),
                Ok((candidate, Err(e))) => {
                    report.failed += 1;
                    tracing::warn!(symbol = %candidate.symbol, "Candidate scoring failed, skipping this sweep: {}", e);
                    continue;
                }
                Err(e) => {
                    report.failed += 1;
                    tracing::error!("Candidate scoring task panicked: {}", e);
                    continue;
                }
            };

            let mut records = self.records.lock();
            let Some(record) = records
                .get_mut(&candidate.symbol)
                .filter(|r| r.added_at == candidate.added_at)
            else {
                continue;
            };

            if assessment.trend_broken {
                if record.last_pushed == PushedOperation::Confirmed && !record.last_invalid_notified {
                    record.last_invalid_notified = true;
                    outgoing.push(Outgoing::Invalidated {
                        symbol: record.symbol.clone(),
                        address: record.asset.address.clone(),
                    });
                    report.invalidated += 1;
                }
                tracing::info!(symbol = %record.symbol, "Candidate trend broken, removing");
                records.remove(&candidate.symbol);
                changed = true;
            } else if assessment.is_confirmed() && record.last_pushed != PushedOperation::Confirmed {
                record.last_pushed = PushedOperation::Confirmed;
                record.last_invalid_notified = false;
                outgoing.push(Outgoing::Confirmed {
                    symbol: record.symbol.clone(),
                    address: record.asset.address.clone(),
                    waited_minutes: (now - record.added_at).num_minutes(),
                });
                report.confirmed += 1;
                changed = true;
                tracing::info!(symbol = %record.symbol, price = assessment.price, "Candidate confirmed");
                if !self.settings.retain_confirmed {
                    records.remove(&candidate.symbol);
                }
            }
        }

        for message in outgoing {
            let (symbol, text) = match message {
                Outgoing::Confirmed { symbol, address, waited_minutes } => {
                    let text = MessageTemplate::confirmed(&symbol, &address, waited_minutes);
                    (symbol, text)
                }
                Outgoing::Invalidated { symbol, address } => {
                    let text = MessageTemplate::invalidated(&symbol, &address);
                    (symbol, text)
                }
            };
            if let Err(e) = self.notifier.notify(&self.channel_id, &text).await {
                tracing::warn!(symbol = %symbol, "Candidate notification failed: {}", e);
            }
        }

        if changed {
            self.broadcast().await;
        }

        report.remaining = self.len();
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use notification_service::NotificationError;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct RecordingNotifier {
        sent: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl Notifier for RecordingNotifier {
        async fn notify(&self, _channel_id: &str, text: &str) -> Result<(), NotificationError> {
            self.sent.lock().push(text.to_string());
            Ok(())
        }

        fn name(&self) -> &str {
            "recording"
        }
    }

    #[derive(Default)]
    struct RecordingListing {
        published: Mutex<Vec<Vec<WaitingEntry>>>,
    }

    #[async_trait]
    impl ListingChannel for RecordingListing {
        async fn publish(&self, snapshot: &[WaitingEntry]) -> Result<(), NotificationError> {
            self.published.lock().push(snapshot.to_vec());
            Ok(())
        }
    }

    enum Step {
        Score(Assessment),
        Fail,
        Panic,
    }

    #[derive(Default)]
    struct ScriptedScorer {
        steps: Mutex<HashMap<String, VecDeque<Step>>>,
        calls: AtomicUsize,
    }

    impl ScriptedScorer {
        fn script(&self, symbol: &str, steps: Vec<Step>) {
            self.steps.lock().insert(symbol.to_string(), steps.into());
        }
    }

    #[async_trait]
    impl CandidateScorer for ScriptedScorer {
        async fn score(&self, asset: &AssetSummary) -> Result<Assessment, AnalysisError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let step = self.steps.lock().get_mut(&asset.symbol).and_then(|s| s.pop_front());
            match step {
                Some(Step::Score(a)) => Ok(a),
                Some(Step::Fail) => Err(AnalysisError::Timeout("1m series".into())),
                Some(Step::Panic) => panic!("scorer panicked for {}", asset.symbol),
                None => Ok(waiting()),
            }
        }
    }

    fn waiting() -> Assessment {
        Assessment {
            price: 1.0,
            trend_aligned: true,
            micro_confirmed: false,
            trend_broken: false,
            momentum: false,
        }
    }

    fn confirmed() -> Assessment {
        Assessment {
            micro_confirmed: true,
            ..waiting()
        }
    }

    fn broken() -> Assessment {
        Assessment {
            trend_aligned: false,
            trend_broken: true,
            ..waiting()
        }
    }

    fn asset(symbol: &str) -> AssetSummary {
        AssetSummary {
            symbol: symbol.to_string(),
            address: format!("{symbol}-addr"),
            chain: "solana".to_string(),
            ..AssetSummary::default()
        }
    }

    struct Harness {
        manager: CandidateManager,
        scorer: Arc<ScriptedScorer>,
        notifier: Arc<RecordingNotifier>,
        listing: Arc<RecordingListing>,
    }

    fn harness(settings: CandidateSettings) -> Harness {
        let scorer = Arc::new(ScriptedScorer::default());
        let notifier = Arc::new(RecordingNotifier::default());
        let listing = Arc::new(RecordingListing::default());
        let manager = CandidateManager::new(scorer.clone(), notifier.clone(), "signals", listing.clone(), settings);
        Harness {
            manager,
            scorer,
            notifier,
            listing,
        }
    }

    fn count(sent: &[String], marker: &str) -> usize {
        sent.iter().filter(|m| m.contains(marker)).count()
    }

    #[tokio::test]
    async fn test_submit_inserts_once_and_broadcasts() {
        let h = harness(CandidateSettings::default());
        let now = Utc::now();

        assert!(h.manager.submit(asset("FOO"), now).await);
        assert!(!h.manager.submit(asset("FOO"), now + Duration::minutes(5)).await);

        assert_eq!(h.manager.len(), 1);
        assert_eq!(h.manager.get("FOO").unwrap().added_at, now);
        let published = h.listing.published.lock();
        assert_eq!(published.len(), 1);
        assert_eq!(published[0][0].symbol, "FOO");
    }

    #[tokio::test]
    async fn test_foo_lifecycle() {
        let h = harness(CandidateSettings::default());
        let t0 = Utc::now();
        h.scorer.script("FOO", vec![Step::Score(confirmed()), Step::Score(broken())]);

        // Tick 1: near miss lands in the waiting list.
        h.manager.submit(asset("FOO"), t0).await;
        assert_eq!(h.listing.published.lock().len(), 1);

        // Tick 2: confirmation goes out once.
        let report = h.manager.sweep(t0 + Duration::minutes(1)).await;
        assert_eq!(report.confirmed, 1);
        assert_eq!(h.manager.get("FOO").unwrap().last_pushed, PushedOperation::Confirmed);
        assert_eq!(count(&h.notifier.sent.lock(), "confirmed"), 1);
        let broadcasts_before = h.listing.published.lock().len();

        // Tick 3: trend breaks, invalidated notice, removed, one broadcast.
        let report = h.manager.sweep(t0 + Duration::minutes(2)).await;
        assert_eq!(report.invalidated, 1);
        assert!(h.manager.get("FOO").is_none());
        assert_eq!(count(&h.notifier.sent.lock(), "invalidated"), 1);
        let published = h.listing.published.lock();
        assert_eq!(published.len(), broadcasts_before + 1);
        assert!(published.last().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_flapping_condition_notifies_once() {
        let h = harness(CandidateSettings::default());
        let t0 = Utc::now();
        h.scorer.script(
            "FOO",
            vec![
                Step::Score(confirmed()),
                Step::Score(waiting()),
                Step::Score(confirmed()),
                Step::Score(waiting()),
            ],
        );
        h.manager.submit(asset("FOO"), t0).await;

        for i in 1..=4 {
            h.manager.sweep(t0 + Duration::minutes(i)).await;
        }

        let sent = h.notifier.sent.lock();
        assert_eq!(count(&sent, "confirmed"), 1);
        assert_eq!(count(&sent, "invalidated"), 0);
        assert!(h.manager.get("FOO").is_some());
    }

    #[tokio::test]
    async fn test_confirm_then_break_orders_notices() {
        let h = harness(CandidateSettings::default());
        let t0 = Utc::now();
        h.scorer.script(
            "FOO",
            vec![
                Step::Score(confirmed()),
                Step::Score(broken()),
                Step::Score(confirmed()),
                Step::Score(broken()),
            ],
        );
        h.manager.submit(asset("FOO"), t0).await;

        for i in 1..=4 {
            h.manager.sweep(t0 + Duration::minutes(i)).await;
        }

        let sent = h.notifier.sent.lock();
        assert_eq!(sent.len(), 2);
        assert!(sent[0].contains("confirmed"));
        assert!(sent[1].contains("invalidated"));
    }

    #[tokio::test]
    async fn test_break_without_confirmation_is_silent() {
        let h = harness(CandidateSettings::default());
        let t0 = Utc::now();
        h.scorer.script("FOO", vec![Step::Score(broken())]);
        h.manager.submit(asset("FOO"), t0).await;

        let report = h.manager.sweep(t0 + Duration::minutes(1)).await;
        assert_eq!(report.invalidated, 0);
        assert!(h.manager.is_empty());
        assert!(h.notifier.sent.lock().is_empty());
        assert_eq!(h.listing.published.lock().len(), 2);
    }

    #[tokio::test]
    async fn test_expired_candidates_are_not_scored() {
        let h = harness(CandidateSettings::default());
        let t0 = Utc::now();
        h.manager.submit(asset("FOO"), t0).await;

        let report = h.manager.sweep(t0 + Duration::hours(2)).await;

        assert_eq!(report.expired, 1);
        assert!(h.manager.is_empty());
        assert_eq!(h.scorer.calls.load(Ordering::SeqCst), 0);
        assert_eq!(h.listing.published.lock().len(), 2);
    }

    #[tokio::test]
    async fn test_quiet_sweep_does_not_broadcast() {
        let h = harness(CandidateSettings::default());
        let t0 = Utc::now();
        h.manager.submit(asset("FOO"), t0).await;

        let report = h.manager.sweep(t0 + Duration::minutes(1)).await;
        assert_eq!(report.remaining, 1);
        assert_eq!(h.listing.published.lock().len(), 1);
    }

    #[tokio::test]
    async fn test_released_after_confirm_when_not_retained() {
        let h = harness(CandidateSettings {
            retain_confirmed: false,
            ..CandidateSettings::default()
        });
        let t0 = Utc::now();
        h.scorer.script("FOO", vec![Step::Score(confirmed())]);
        h.manager.submit(asset("FOO"), t0).await;

        h.manager.sweep(t0 + Duration::minutes(1)).await;
        assert!(h.manager.is_empty());
        assert_eq!(count(&h.notifier.sent.lock(), "confirmed"), 1);
        assert!(h.listing.published.lock().last().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_scoring_failures_skip_only_that_candidate() {
        let h = harness(CandidateSettings::default());
        let t0 = Utc::now();
        h.scorer.script("ERR", vec![Step::Fail]);
        h.scorer.script("BOOM", vec![Step::Panic]);
        h.scorer.script("OK", vec![Step::Score(confirmed())]);
        for s in ["ERR", "BOOM", "OK"] {
            h.manager.submit(asset(s), t0).await;
        }

        let report = h.manager.sweep(t0 + Duration::minutes(1)).await;

        assert_eq!(report.failed, 2);
        assert_eq!(report.confirmed, 1);
        assert_eq!(h.manager.len(), 3);
        assert_eq!(h.manager.get("ERR").unwrap().last_pushed, PushedOperation::None);
        assert_eq!(h.manager.get("BOOM").unwrap().last_pushed, PushedOperation::None);
        assert_eq!(h.notifier.sent.lock().len(), 1);
    }

    #[tokio::test]
    async fn test_snapshot_sorted_by_added_at() {
        let h = harness(CandidateSettings::default());
        let t0 = Utc::now();
        h.manager.submit(asset("LATE"), t0 + Duration::minutes(3)).await;
        h.manager.submit(asset("EARLY"), t0).await;

        let symbols: Vec<_> = h.manager.snapshot().into_iter().map(|c| c.symbol).collect();
        assert_eq!(symbols, vec!["EARLY", "LATE"]);
    }
}
