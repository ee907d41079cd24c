use chrono::{DateTime, Utc};
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{self, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

/// How a periodic job is driven.
#[derive(Debug, Clone)]
pub struct Schedule {
    pub name: &'static str,
    pub period: Duration,
    /// Line ticks up with wall-clock multiples of `period` (a 5 minute job
    /// fires on :00, :05, ...).
    pub align_to_clock: bool,
    pub run_immediately: bool,
    /// Shared counter bumped on every skipped tick.
    pub skipped_ticks: Option<Arc<AtomicU64>>,
}

/// Time from `now` to the next epoch multiple of `period`.
pub fn delay_until_next_boundary(now: DateTime<Utc>, period: Duration) -> Duration {
    let period_ms = period.as_millis() as i64;
    if period_ms <= 0 {
        return Duration::ZERO;
    }
    let now_ms = now.timestamp_millis();
    let next = (now_ms.div_euclid(period_ms) + 1) * period_ms;
    Duration::from_millis((next - now_ms) as u64)
}

/// Lets at most one run of a job be in flight.
#[derive(Debug, Clone, Default)]
pub struct OverlapGuard {
    running: Arc<AtomicBool>,
}

/// Held for the duration of a run; clears the flag on drop, including unwinds.
pub struct RunPermit {
    running: Arc<AtomicBool>,
}

impl Drop for RunPermit {
    fn drop(&mut self) {
        self.running.store(false, Ordering::Release);
    }
}

impl OverlapGuard {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn try_begin(&self) -> Option<RunPermit> {
        self.running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| RunPermit {
                running: Arc::clone(&self.running),
            })
    }

    #[allow(dead_code)]
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SchedulerStats {
    pub started: u64,
    pub skipped: u64,
}

/// Drive `job` on `schedule` until `shutdown` fires, then wait for the
/// in-flight run. A tick that lands while a run is still going is dropped.
pub async fn run_periodic<F, Fut>(schedule: Schedule, shutdown: CancellationToken, job: F) -> SchedulerStats
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    let guard = OverlapGuard::new();
    let mut stats = SchedulerStats::default();
    let mut in_flight: Option<tokio::task::JoinHandle<()>> = None;

    let start = |stats: &mut SchedulerStats, in_flight: &mut Option<tokio::task::JoinHandle<()>>| {
        match guard.try_begin() {
            Some(permit) => {
                stats.started += 1;
                let fut = job();
                *in_flight = Some(tokio::spawn(async move {
                    let _permit = permit;
                    fut.await;
                }));
            }
            None => {
                stats.skipped += 1;
                if let Some(counter) = &schedule.skipped_ticks {
                    counter.fetch_add(1, Ordering::Relaxed);
                }
                tracing::warn!(task = schedule.name, "Previous run still in progress, skipping tick");
            }
        }
    };

    if schedule.run_immediately {
        start(&mut stats, &mut in_flight);
    }

    let first_delay = if schedule.align_to_clock {
        delay_until_next_boundary(Utc::now(), schedule.period)
    } else {
        schedule.period
    };
    tracing::info!(
        task = schedule.name,
        period_secs = schedule.period.as_secs(),
        first_tick_in_ms = first_delay.as_millis() as u64,
        "Scheduler started"
    );

    let mut interval = time::interval_at(Instant::now() + first_delay, schedule.period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = interval.tick() => start(&mut stats, &mut in_flight),
        }
    }

    if let Some(handle) = in_flight {
        if !handle.is_finished() {
            tracing::info!(task = schedule.name, "Waiting for in-flight run to finish");
        }
        if let Err(e) = handle.await {
            tracing::error!(task = schedule.name, "Run panicked: {}", e);
        }
    }

    tracing::info!(
        task = schedule.name,
        started = stats.started,
        skipped = stats.skipped,
        "Scheduler stopped"
    );
    stats
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn test_boundary_alignment() {
        let five = Duration::from_secs(300);
        let at = |h, m, s| Utc.with_ymd_and_hms(2024, 5, 1, h, m, s).unwrap();

        assert_eq!(delay_until_next_boundary(at(10, 2, 0), five), Duration::from_secs(180));
        assert_eq!(delay_until_next_boundary(at(10, 4, 59), five), Duration::from_secs(1));
        // Exactly on a boundary waits a full period.
        assert_eq!(delay_until_next_boundary(at(10, 5, 0), five), five);
        assert_eq!(
            delay_until_next_boundary(at(10, 5, 30), Duration::from_secs(60)),
            Duration::from_secs(30)
        );
    }

    #[test]
    fn test_overlap_guard_single_holder() {
        let guard = OverlapGuard::new();
        let permit = guard.try_begin().unwrap();
        assert!(guard.is_running());
        assert!(guard.try_begin().is_none());
        drop(permit);
        assert!(!guard.is_running());
        assert!(guard.try_begin().is_some());
    }

    #[tokio::test]
    async fn test_overlap_guard_released_on_panic() {
        let guard = OverlapGuard::new();
        let permit = guard.try_begin().unwrap();
        let result = tokio::spawn(async move {
            let _permit = permit;
            panic!("job blew up");
        })
        .await;
        assert!(result.is_err());
        assert!(!guard.is_running());
    }

    #[tokio::test(start_paused = true)]
    async fn test_ticks_during_a_run_are_skipped() {
        let active = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let finished = Arc::new(AtomicUsize::new(0));
        let skipped = Arc::new(AtomicU64::new(0));
        let shutdown = CancellationToken::new();

        let schedule = Schedule {
            name: "test",
            period: Duration::from_secs(10),
            align_to_clock: false,
            run_immediately: true,
            skipped_ticks: Some(skipped.clone()),
        };
        let (a, p, f) = (active.clone(), peak.clone(), finished.clone());
        let handle = tokio::spawn(run_periodic(schedule, shutdown.clone(), move || {
            let (a, p, f) = (a.clone(), p.clone(), f.clone());
            async move {
                let now = a.fetch_add(1, Ordering::SeqCst) + 1;
                p.fetch_max(now, Ordering::SeqCst);
                time::sleep(Duration::from_secs(25)).await;
                a.fetch_sub(1, Ordering::SeqCst);
                f.fetch_add(1, Ordering::SeqCst);
            }
        }));

        // Runs start at 0, 30, 60; ticks at 10, 20, 40, 50 land mid-run.
        time::sleep(Duration::from_secs(65)).await;
        shutdown.cancel();
        let stats = handle.await.unwrap();

        assert_eq!(stats, SchedulerStats { started: 3, skipped: 4 });
        assert_eq!(skipped.load(Ordering::SeqCst), 4);
        assert_eq!(peak.load(Ordering::SeqCst), 1);
        // Shutdown waited for the run started at 60.
        assert_eq!(finished.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_before_first_tick() {
        let runs = Arc::new(AtomicUsize::new(0));
        let shutdown = CancellationToken::new();
        let schedule = Schedule {
            name: "idle",
            period: Duration::from_secs(60),
            align_to_clock: false,
            run_immediately: false,
            skipped_ticks: None,
        };
        let r = runs.clone();
        let handle = tokio::spawn(run_periodic(schedule, shutdown.clone(), move || {
            let r = r.clone();
            async move {
                r.fetch_add(1, Ordering::SeqCst);
            }
        }));

        time::sleep(Duration::from_secs(30)).await;
        shutdown.cancel();
        let stats = handle.await.unwrap();
        assert_eq!(stats.started, 0);
        assert_eq!(runs.load(Ordering::SeqCst), 0);
    }
}
