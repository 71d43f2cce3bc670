//! Per-stream demand watermarks.
//!
//! Two tables express the union of all outstanding caller demands:
//! `since` holds the earliest timestamp any caller wants covered (updates
//! only ever move it earlier), `until` the latest time a stream must stay
//! active (updates only ever move it later). The engine drains both.

use std::collections::HashMap;

use parking_lot::Mutex;
use std::time::Duration;

use crate::models::StreamKey;

/// One demand marker: a timestamp boundary plus the minimum interval
/// between refresh attempts against it.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TimeMarker {
    pub marker_ms: i64,
    pub min_interval: Duration,
}

/// How conflicting registrations for one key are merged.
#[derive(Debug, Clone, Copy)]
enum Reduction {
    /// Keep the earlier marker (backfill depth only ever grows).
    Min,
    /// Keep the later marker (stream lifetime only ever extends).
    Max,
}

#[derive(Debug)]
pub struct WatermarkTable {
    entries: Mutex<HashMap<StreamKey, TimeMarker>>,
    reduction: Reduction,
}

impl WatermarkTable {
    /// Table for "since" demands: min-reduction.
    pub fn since() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            reduction: Reduction::Min,
        }
    }

    /// Table for "until" demands: max-reduction.
    pub fn until() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            reduction: Reduction::Max,
        }
    }

    /// Register demand for `key`. A registration that is less demanding than
    /// the existing entry leaves it entirely untouched. Returns the effective
    /// marker.
    pub fn register(&self, key: &StreamKey, marker_ms: i64, min_interval: Duration) -> TimeMarker {
        let mut entries = self.entries.lock();
        let entry = entries
            .entry(key.clone())
            .and_modify(|m| {
                let wins = match self.reduction {
                    Reduction::Min => marker_ms < m.marker_ms,
                    Reduction::Max => marker_ms > m.marker_ms,
                };
                if wins {
                    m.marker_ms = marker_ms;
                    m.min_interval = min_interval;
                }
            })
            .or_insert(TimeMarker {
                marker_ms,
                min_interval,
            });
        *entry
    }

    pub fn get(&self, key: &StreamKey) -> Option<TimeMarker> {
        self.entries.lock().get(key).copied()
    }

    pub fn remove(&self, key: &StreamKey) -> Option<TimeMarker> {
        self.entries.lock().remove(key)
    }

    pub fn contains(&self, key: &StreamKey) -> bool {
        self.entries.lock().contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    /// Snapshot of all entries, for iteration without holding the lock.
    pub fn snapshot(&self) -> Vec<(StreamKey, TimeMarker)> {
        self.entries
            .lock()
            .iter()
            .map(|(k, m)| (k.clone(), *m))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::MarketKind;

    fn key() -> StreamKey {
        StreamKey::trades("BTC/USDT", MarketKind::Future)
    }

    const MINUTE: Duration = Duration::from_secs(60);

    #[test]
    fn since_only_moves_earlier() {
        let table = WatermarkTable::since();
        table.register(&key(), 1000, MINUTE);
        // less demanding registration does not overwrite
        table.register(&key(), 2000, MINUTE);
        assert_eq!(table.get(&key()).unwrap().marker_ms, 1000);
        // more demanding one does
        table.register(&key(), 500, MINUTE);
        assert_eq!(table.get(&key()).unwrap().marker_ms, 500);
    }

    #[test]
    fn until_only_moves_later() {
        let table = WatermarkTable::until();
        table.register(&key(), 1000, MINUTE);
        table.register(&key(), 500, MINUTE);
        assert_eq!(table.get(&key()).unwrap().marker_ms, 1000);
        table.register(&key(), 2000, MINUTE);
        assert_eq!(table.get(&key()).unwrap().marker_ms, 2000);
    }

    #[test]
    fn losing_registration_leaves_entry_untouched() {
        let table = WatermarkTable::since();
        table.register(&key(), 1000, MINUTE);
        table.register(&key(), 2000, Duration::from_secs(1));
        let m = table.get(&key()).unwrap();
        assert_eq!(m.marker_ms, 1000);
        assert_eq!(m.min_interval, MINUTE);
        // a winning registration carries its own interval in
        let m = table.register(&key(), 500, Duration::from_secs(5));
        assert_eq!(m.marker_ms, 500);
        assert_eq!(m.min_interval, Duration::from_secs(5));
    }

    #[test]
    fn remove_and_snapshot() {
        let table = WatermarkTable::since();
        table.register(&key(), 1000, MINUTE);
        assert!(table.contains(&key()));
        assert_eq!(table.snapshot().len(), 1);
        assert!(table.remove(&key()).is_some());
        assert!(table.is_empty());
    }
}
