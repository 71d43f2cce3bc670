//! Bounded, time-ordered buffer for one stream.
//!
//! The `Recorder` owns the record store and the retention window. Lifecycle
//! state and the backfill cooldown stamp live on the shared `RecorderHandle`
//! as atomics, so the engine can test liveness and gate backfill without
//! taking the data lock. All buffer mutations for one key are serialized by
//! the handle's async mutex; distinct keys have no ordering relationship.

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;

use crate::data::record::Record;
use crate::data::store::{store_for, RecordStore};
use crate::error::CacheError;
use crate::models::{StateCell, StreamKey, StreamState};

pub struct Recorder {
    key: StreamKey,
    store: Box<dyn RecordStore>,
    retention_ms: i64,
}

impl Recorder {
    pub fn new(key: StreamKey, retention: Duration) -> Result<Self, CacheError> {
        let store = store_for(key.kind)?;
        Ok(Self {
            key,
            store,
            retention_ms: retention.as_millis() as i64,
        })
    }

    pub fn key(&self) -> &StreamKey {
        &self.key
    }

    pub fn len(&self) -> usize {
        self.store.len()
    }

    pub fn is_empty(&self) -> bool {
        self.store.is_empty()
    }

    /// Timestamp of the oldest buffered record, `None` when empty.
    pub fn first_time(&self) -> Option<i64> {
        self.store.first_ts()
    }

    /// Timestamp of the newest buffered record, `None` when empty.
    pub fn last_time(&self) -> Option<i64> {
        self.store.last_ts()
    }

    pub fn retention(&self) -> Duration {
        Duration::from_millis(self.retention_ms.max(0) as u64)
    }

    pub fn set_retention(&mut self, retention: Duration) {
        self.retention_ms = retention.as_millis() as i64;
    }

    /// Append a batch assumed newer than everything buffered. When `at` is
    /// given, every record is stamped with it first. Monotonicity is the
    /// caller's precondition and is not verified here.
    pub fn append(&mut self, mut records: Vec<Record>, at: Option<i64>) -> Result<usize, CacheError> {
        if records.is_empty() {
            return Ok(0);
        }
        if let Some(ts) = at {
            for r in &mut records {
                r.set_timestamp(ts);
            }
        }
        let n = records.len();
        self.store.push_back(records)?;
        Ok(n)
    }

    /// Insert a batch assumed older than everything buffered, oldest-first.
    pub fn prepend(&mut self, mut records: Vec<Record>, at: Option<i64>) -> Result<usize, CacheError> {
        if records.is_empty() {
            return Ok(0);
        }
        if let Some(ts) = at {
            for r in &mut records {
                r.set_timestamp(ts);
            }
        }
        let n = records.len();
        self.store.push_front(records)?;
        Ok(n)
    }

    /// Drop entries older than `last_time - retention`, or older than the
    /// explicit cutoff when one is supplied. No-op on an empty buffer.
    pub fn prune_expired(&mut self, cutoff: Option<i64>) -> usize {
        let Some(last) = self.last_time() else {
            return 0;
        };
        let cutoff = cutoff.unwrap_or(last - self.retention_ms);
        self.store.drop_before(cutoff)
    }

    /// Read-only range access, both bounds inclusive and optional.
    pub fn slice(&self, start: Option<i64>, end: Option<i64>) -> Vec<Record> {
        self.store.slice(start, end)
    }

    /// All records stamped exactly `ts_ms`.
    pub fn at(&self, ts_ms: i64) -> Vec<Record> {
        self.store.slice(Some(ts_ms), Some(ts_ms))
    }

    /// Ids of trade records at the exact boundary timestamp, for overlap
    /// dedup of batches that straddle the buffer edge.
    pub fn boundary_ids(&self, ts_ms: i64) -> Vec<String> {
        self.at(ts_ms)
            .iter()
            .filter_map(|r| r.boundary_id().map(str::to_owned))
            .collect()
    }
}

impl std::fmt::Debug for Recorder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Recorder")
            .field("key", &self.key)
            .field("len", &self.len())
            .field("first_time", &self.first_time())
            .field("last_time", &self.last_time())
            .finish()
    }
}

/// Shared per-key handle: lifecycle state outside the lock, buffer inside.
#[derive(Debug)]
pub struct RecorderHandle {
    state: StateCell,
    /// Last backfill attempt for this key, epoch ms. 0 = never.
    last_backfill_ms: AtomicI64,
    inner: Mutex<Recorder>,
}

impl RecorderHandle {
    pub fn new(recorder: Recorder) -> Arc<Self> {
        Arc::new(Self {
            state: StateCell::default(),
            last_backfill_ms: AtomicI64::new(0),
            inner: Mutex::new(recorder),
        })
    }

    pub fn state(&self) -> StreamState {
        self.state.get()
    }

    pub fn set_state(&self, state: StreamState) {
        self.state.set(state);
    }

    pub fn is_stopped(&self) -> bool {
        self.state.is_stopped()
    }

    pub fn last_backfill_ms(&self) -> i64 {
        self.last_backfill_ms.load(Ordering::Acquire)
    }

    pub fn mark_backfill_attempt(&self, now_ms: i64) {
        self.last_backfill_ms.store(now_ms, Ordering::Release);
    }

    pub async fn lock(&self) -> tokio::sync::MutexGuard<'_, Recorder> {
        self.inner.lock().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::record::{Candle, Trade};
    use crate::models::{MarketKind, Side};

    fn candle(ts: i64) -> Record {
        Record::Candle(Candle {
            timestamp: ts,
            open: 1.0,
            high: 1.0,
            low: 1.0,
            close: 1.0,
            volume: 1.0,
        })
    }

    fn trade(ts: i64, id: &str) -> Record {
        Record::Trade(Trade {
            timestamp: ts,
            id: id.into(),
            price: 1.0,
            amount: 1.0,
            side: Side::Sell,
        })
    }

    fn ohlcv_recorder() -> Recorder {
        Recorder::new(
            StreamKey::ohlcv("BTC/USDT", "1m", MarketKind::Future),
            Duration::from_secs(3600),
        )
        .unwrap()
    }

    #[test]
    fn append_then_prepend_tracks_bounds() {
        let mut rec = ohlcv_recorder();
        rec.append(vec![candle(100), candle(200)], None).unwrap();
        assert_eq!(rec.len(), 2);
        assert_eq!(rec.first_time(), Some(100));
        assert_eq!(rec.last_time(), Some(200));

        rec.prepend(vec![candle(50)], None).unwrap();
        assert_eq!(rec.len(), 3);
        assert_eq!(rec.first_time(), Some(50));
    }

    #[test]
    fn explicit_timestamp_stamps_batch() {
        let mut rec = ohlcv_recorder();
        rec.append(vec![candle(0), candle(0)], Some(500)).unwrap();
        assert_eq!(rec.first_time(), Some(500));
        assert_eq!(rec.last_time(), Some(500));
    }

    #[test]
    fn prepend_wrong_schema_leaves_buffer_unchanged() {
        let mut rec = ohlcv_recorder();
        rec.append(vec![candle(100)], None).unwrap();
        let err = rec.prepend(vec![trade(50, "x")], None).unwrap_err();
        assert!(matches!(err, CacheError::SchemaMismatch { .. }));
        assert_eq!(rec.len(), 1);
        assert_eq!(rec.first_time(), Some(100));
    }

    #[test]
    fn prune_respects_retention_window() {
        let mut rec = Recorder::new(
            StreamKey::ohlcv("BTC/USDT", "1m", MarketKind::Future),
            Duration::from_millis(100),
        )
        .unwrap();
        rec.append(vec![candle(100), candle(150), candle(300)], None)
            .unwrap();
        // cutoff = 300 - 100 = 200, drops 100 and 150
        assert_eq!(rec.prune_expired(None), 2);
        assert_eq!(rec.first_time(), Some(300));
        // idempotent with no intervening append
        assert_eq!(rec.prune_expired(None), 0);
        assert_eq!(rec.len(), 1);
    }

    #[test]
    fn prune_with_explicit_cutoff() {
        let mut rec = ohlcv_recorder();
        rec.append(vec![candle(100), candle(200), candle(300)], None)
            .unwrap();
        assert_eq!(rec.prune_expired(Some(250)), 2);
        assert_eq!(rec.len(), 1);
    }

    #[test]
    fn prune_empty_buffer_is_noop() {
        let mut rec = ohlcv_recorder();
        assert_eq!(rec.prune_expired(None), 0);
    }

    #[test]
    fn slice_and_point_queries() {
        let mut rec = ohlcv_recorder();
        rec.append(vec![candle(100), candle(200), candle(300)], None)
            .unwrap();
        assert_eq!(rec.slice(Some(150), None).len(), 2);
        assert_eq!(rec.slice(Some(100), Some(200)).len(), 2);
        assert_eq!(rec.at(200).len(), 1);
        assert_eq!(rec.at(250).len(), 0);
    }

    #[test]
    fn boundary_ids_only_for_trades() {
        let mut rec = Recorder::new(
            StreamKey::trades("BTC/USDT", MarketKind::Future),
            Duration::from_secs(600),
        )
        .unwrap();
        rec.append(vec![trade(100, "a"), trade(100, "b"), trade(200, "c")], None)
            .unwrap();
        let mut ids = rec.boundary_ids(100);
        ids.sort();
        assert_eq!(ids, vec!["a".to_string(), "b".to_string()]);
    }
}
