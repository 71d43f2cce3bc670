//! Engine instrumentation counters.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

#[derive(Debug, Default)]
pub struct EngineMetrics {
    pub ticks: AtomicU64,
    pub live_pulls: AtomicU64,
    pub live_pull_errors: AtomicU64,
    pub live_records: AtomicU64,
    pub backfill_tasks: AtomicU64,
    pub backfill_records: AtomicU64,
    pub backfill_retries: AtomicU64,
    pub backfill_exhausted: AtomicU64,
    pub teardowns: AtomicU64,
    pub teardown_errors: AtomicU64,
}

impl EngineMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn incr(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add(counter: &AtomicU64, n: u64) {
        counter.fetch_add(n, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            ticks: self.ticks.load(Ordering::Relaxed),
            live_pulls: self.live_pulls.load(Ordering::Relaxed),
            live_pull_errors: self.live_pull_errors.load(Ordering::Relaxed),
            live_records: self.live_records.load(Ordering::Relaxed),
            backfill_tasks: self.backfill_tasks.load(Ordering::Relaxed),
            backfill_records: self.backfill_records.load(Ordering::Relaxed),
            backfill_retries: self.backfill_retries.load(Ordering::Relaxed),
            backfill_exhausted: self.backfill_exhausted.load(Ordering::Relaxed),
            teardowns: self.teardowns.load(Ordering::Relaxed),
            teardown_errors: self.teardown_errors.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time view of the counters, cheap to log or serve.
#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    pub ticks: u64,
    pub live_pulls: u64,
    pub live_pull_errors: u64,
    pub live_records: u64,
    pub backfill_tasks: u64,
    pub backfill_records: u64,
    pub backfill_retries: u64,
    pub backfill_exhausted: u64,
    pub teardowns: u64,
    pub teardown_errors: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_accumulate() {
        let m = EngineMetrics::new();
        EngineMetrics::incr(&m.ticks);
        EngineMetrics::incr(&m.ticks);
        EngineMetrics::add(&m.live_records, 10);
        let snap = m.snapshot();
        assert_eq!(snap.ticks, 2);
        assert_eq!(snap.live_records, 10);
        assert_eq!(snap.backfill_tasks, 0);
    }
}
