use crate::candidates::SweepReport;
use crate::scanner::ScanReport;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

const DURATION_WINDOW: usize = 20;

/// Structured telemetry for the scan agent.
/// Aggregate counters plus a rolling window of scan durations.
pub struct ScanMetrics {
    pub cycles_run: u64,
    pub scans_failed: u64,
    pub assets_ranked: u64,
    pub assets_banned: u64,
    pub assets_evaluated: u64,
    pub assets_failed: u64,
    pub assets_filtered: u64,
    pub signals_sent: u64,
    pub candidates_submitted: u64,

    pub sweeps_run: u64,
    pub candidates_confirmed: u64,
    pub candidates_invalidated: u64,
    pub candidates_expired: u64,
    pub candidate_scoring_failures: u64,
    pub waiting: usize,

    pub last_scan_duration_ms: u64,
    pub last_sweep_duration_ms: u64,

    recent_scan_ms: VecDeque<u64>,
    skipped_ticks: Arc<AtomicU64>,
    log_interval_cycles: u64,
}

impl ScanMetrics {
    pub fn new(log_interval_cycles: u64) -> Self {
        Self {
            cycles_run: 0,
            scans_failed: 0,
            assets_ranked: 0,
            assets_banned: 0,
            assets_evaluated: 0,
            assets_failed: 0,
            assets_filtered: 0,
            signals_sent: 0,
            candidates_submitted: 0,
            sweeps_run: 0,
            candidates_confirmed: 0,
            candidates_invalidated: 0,
            candidates_expired: 0,
            candidate_scoring_failures: 0,
            waiting: 0,
            last_scan_duration_ms: 0,
            last_sweep_duration_ms: 0,
            recent_scan_ms: VecDeque::with_capacity(DURATION_WINDOW),
            skipped_ticks: Arc::new(AtomicU64::new(0)),
            log_interval_cycles,
        }
    }

    pub fn record_scan(&mut self, report: &ScanReport) {
        self.assets_ranked += report.ranked as u64;
        self.assets_banned += report.banned as u64;
        self.assets_evaluated += report.evaluated as u64;
        self.assets_failed += report.failed as u64;
        self.assets_filtered += report.filtered as u64;
        self.signals_sent += report.signals as u64;
        self.candidates_submitted += report.candidates as u64;

        self.last_scan_duration_ms = report.duration_ms;
        self.recent_scan_ms.push_back(report.duration_ms);
        if self.recent_scan_ms.len() > DURATION_WINDOW {
            self.recent_scan_ms.pop_front();
        }
    }

    /// Counter handed to the schedulers; ticks dropped while a run was busy.
    pub fn skipped_ticks_counter(&self) -> Arc<AtomicU64> {
        Arc::clone(&self.skipped_ticks)
    }

    pub fn skipped_ticks(&self) -> u64 {
        self.skipped_ticks.load(Ordering::Relaxed)
    }

    pub fn record_scan_failure(&mut self) {
        self.scans_failed += 1;
    }

    pub fn record_sweep(&mut self, report: &SweepReport, duration_ms: u64) {
        self.sweeps_run += 1;
        self.candidates_confirmed += report.confirmed as u64;
        self.candidates_invalidated += report.invalidated as u64;
        self.candidates_expired += report.expired as u64;
        self.candidate_scoring_failures += report.failed as u64;
        self.waiting = report.remaining;
        self.last_sweep_duration_ms = duration_ms;
    }

    /// Close out a scan cycle, successful or not.
    pub fn finish_cycle(&mut self) {
        self.cycles_run += 1;

        // Emit structured metrics periodically
        if self.log_interval_cycles > 0 && self.cycles_run.is_multiple_of(self.log_interval_cycles) {
            self.log_metrics();
        }
    }

    /// Rolling average scan duration over the last 20 scans.
    pub fn recent_avg_scan_ms(&self) -> u64 {
        if self.recent_scan_ms.is_empty() {
            return 0;
        }
        self.recent_scan_ms.iter().sum::<u64>() / self.recent_scan_ms.len() as u64
    }

    pub fn log_metrics(&self) {
        tracing::info!(
            cycles = self.cycles_run,
            scans_failed = self.scans_failed,
            assets_ranked = self.assets_ranked,
            assets_evaluated = self.assets_evaluated,
            assets_failed = self.assets_failed,
            assets_filtered = self.assets_filtered,
            signals_sent = self.signals_sent,
            candidates_submitted = self.candidates_submitted,
            sweeps = self.sweeps_run,
            confirmed = self.candidates_confirmed,
            invalidated = self.candidates_invalidated,
            expired = self.candidates_expired,
            waiting = self.waiting,
            skipped_ticks = self.skipped_ticks(),
            last_scan_ms = self.last_scan_duration_ms,
            avg_scan_ms = self.recent_avg_scan_ms(),
            last_sweep_ms = self.last_sweep_duration_ms,
            "Scan metrics summary"
        );
    }

    pub fn to_json(&self) -> serde_json::Value {
        serde_json::json!({
            "cycles_run": self.cycles_run,
            "scans_failed": self.scans_failed,
            "assets_ranked": self.assets_ranked,
            "assets_evaluated": self.assets_evaluated,
            "assets_failed": self.assets_failed,
            "signals_sent": self.signals_sent,
            "candidates_submitted": self.candidates_submitted,
            "sweeps_run": self.sweeps_run,
            "candidates_confirmed": self.candidates_confirmed,
            "candidates_invalidated": self.candidates_invalidated,
            "candidates_expired": self.candidates_expired,
            "skipped_ticks": self.skipped_ticks(),
            "last_scan_duration_ms": self.last_scan_duration_ms,
            "avg_scan_duration_ms": self.recent_avg_scan_ms(),
        })
    }
}
