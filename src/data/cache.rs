//! Keyed collection of recorders with lazy creation.
//!
//! The cache exclusively owns every recorder it creates; callers and the
//! engine only ever hold `Arc<RecorderHandle>` references. The structural
//! map is guarded by a parking_lot RwLock (short critical sections, never
//! held across await), while per-key buffer mutations serialize on the
//! handle's async mutex.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::debug;

use crate::config::CacheConfig;
use crate::data::convert::{self, trim_append_overlap, trim_prepend_overlap};
use crate::data::record::{RawBatch, Record};
use crate::data::recorder::{Recorder, RecorderHandle};
use crate::error::CacheError;
use crate::models::{DataKind, StreamKey, StreamState};

pub struct Cache {
    streams: RwLock<HashMap<StreamKey, Arc<RecorderHandle>>>,
    config: CacheConfig,
}

impl Cache {
    pub fn new(config: CacheConfig) -> Self {
        Self {
            streams: RwLock::new(HashMap::new()),
            config,
        }
    }

    /// Recorder handle for `key`, created lazily on first access. Concurrent
    /// callers racing on an unseen key observe one instance: creation is
    /// double-checked under the write lock.
    pub fn get_or_create(&self, key: &StreamKey) -> Result<Arc<RecorderHandle>, CacheError> {
        if let Some(handle) = self.streams.read().get(key) {
            return Ok(Arc::clone(handle));
        }
        let mut streams = self.streams.write();
        if let Some(handle) = streams.get(key) {
            return Ok(Arc::clone(handle));
        }
        let recorder = Recorder::new(key.clone(), self.config.default_retention)?;
        let handle = RecorderHandle::new(recorder);
        debug!(stream = %key, "created recorder");
        streams.insert(key.clone(), Arc::clone(&handle));
        Ok(handle)
    }

    pub fn get(&self, key: &StreamKey) -> Option<Arc<RecorderHandle>> {
        self.streams.read().get(key).map(Arc::clone)
    }

    pub fn len(&self) -> usize {
        self.streams.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.streams.read().is_empty()
    }

    pub fn keys(&self) -> Vec<StreamKey> {
        self.streams.read().keys().cloned().collect()
    }

    /// Streams still eligible for live pulls (RUNNING or PAUSED).
    pub fn live_streams(&self) -> Vec<(StreamKey, Arc<RecorderHandle>)> {
        self.streams
            .read()
            .iter()
            .filter(|(_, h)| h.state() != StreamState::Stopped)
            .map(|(k, h)| (k.clone(), Arc::clone(h)))
            .collect()
    }

    /// Normalize a raw batch for `kind` without touching any recorder.
    pub fn convert(
        &self,
        raw: RawBatch,
        kind: DataKind,
        stamp: Option<i64>,
    ) -> Result<Vec<Record>, CacheError> {
        convert::convert(raw, kind, stamp)
    }

    /// Covered interval of a converted batch.
    pub fn time_range(records: &[Record]) -> Option<(i64, i64)> {
        convert::time_range(records)
    }

    /// Convert then append under `key`, creating the recorder if absent.
    /// Records overlapping the buffer tail are dropped before delegation.
    /// Returns how many records were actually appended.
    pub async fn append(
        &self,
        key: &StreamKey,
        raw: RawBatch,
        stamp: Option<i64>,
    ) -> Result<usize, CacheError> {
        let records = self.convert(raw, key.kind, stamp)?;
        let handle = self.get_or_create(key)?;
        let mut rec = handle.lock().await;
        let last = rec.last_time();
        let tail_ids = match last {
            Some(ts) => rec.boundary_ids(ts),
            None => Vec::new(),
        };
        let records = trim_append_overlap(records, last, &tail_ids);
        rec.append(records, None)
    }

    /// Convert then prepend under `key`, symmetric to `append`.
    pub async fn prepend(
        &self,
        key: &StreamKey,
        raw: RawBatch,
        stamp: Option<i64>,
    ) -> Result<usize, CacheError> {
        let records = self.convert(raw, key.kind, stamp)?;
        let handle = self.get_or_create(key)?;
        let mut rec = handle.lock().await;
        let first = rec.first_time();
        let head_ids = match first {
            Some(ts) => rec.boundary_ids(ts),
            None => Vec::new(),
        };
        let records = trim_prepend_overlap(records, first, &head_ids);
        rec.prepend(records, None)
    }

    /// Prune entries of `key` older than the retention window (or than the
    /// explicit cutoff). Returns how many were removed; 0 for unknown keys.
    pub async fn prune_expired(&self, key: &StreamKey, cutoff: Option<i64>) -> usize {
        let Some(handle) = self.get(key) else {
            return 0;
        };
        let removed = handle.lock().await.prune_expired(cutoff);
        removed
    }

    /// Replace the retention window of an existing stream. Returns false if
    /// the key has never been seen.
    pub async fn set_retention(&self, key: &StreamKey, retention: std::time::Duration) -> bool {
        let Some(handle) = self.get(key) else {
            return false;
        };
        handle.lock().await.set_retention(retention);
        true
    }
}

impl std::fmt::Debug for Cache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Cache").field("streams", &self.len()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::record::{Candle, Trade};
    use crate::models::{MarketKind, Side};
    use serde_json::json;

    fn cache() -> Cache {
        Cache::new(CacheConfig::default())
    }

    fn candle_batch(ts: &[i64]) -> RawBatch {
        RawBatch::Typed(
            ts.iter()
                .map(|&t| {
                    Record::Candle(Candle {
                        timestamp: t,
                        open: 1.0,
                        high: 1.0,
                        low: 1.0,
                        close: 1.0,
                        volume: 1.0,
                    })
                })
                .collect(),
        )
    }

    #[tokio::test]
    async fn get_or_create_returns_same_instance() {
        let cache = cache();
        let key = StreamKey::ohlcv("BTC/USDT", "1m", MarketKind::Future);
        let a = cache.get_or_create(&key).unwrap();
        let b = cache.get_or_create(&key).unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(cache.len(), 1);
    }

    #[tokio::test]
    async fn orderbook_keys_fail_creation() {
        let cache = cache();
        let key = StreamKey::new("BTC/USDT", "", MarketKind::Future, DataKind::Orderbook);
        assert!(matches!(
            cache.get_or_create(&key),
            Err(CacheError::UnsupportedKind(DataKind::Orderbook))
        ));
    }

    #[tokio::test]
    async fn append_then_prepend_through_cache() {
        let cache = cache();
        let key = StreamKey::ohlcv("BTC/USDT", "1m", MarketKind::Future);
        assert_eq!(cache.append(&key, candle_batch(&[100, 200]), None).await.unwrap(), 2);
        assert_eq!(cache.prepend(&key, candle_batch(&[50]), None).await.unwrap(), 1);

        let handle = cache.get(&key).unwrap();
        let rec = handle.lock().await;
        assert_eq!(rec.len(), 3);
        assert_eq!(rec.first_time(), Some(50));
        assert_eq!(rec.last_time(), Some(200));
    }

    #[tokio::test]
    async fn append_drops_tail_overlap() {
        let cache = cache();
        let key = StreamKey::ohlcv("BTC/USDT", "1m", MarketKind::Future);
        cache.append(&key, candle_batch(&[100, 200]), None).await.unwrap();
        // 150 and 200 overlap the buffered tail, only 300 lands
        let appended = cache
            .append(&key, candle_batch(&[150, 200, 300]), None)
            .await
            .unwrap();
        assert_eq!(appended, 1);
        let handle = cache.get(&key).unwrap();
        assert_eq!(handle.lock().await.last_time(), Some(300));
    }

    #[tokio::test]
    async fn trade_rows_deduped_by_id_at_boundary() {
        let cache = cache();
        let key = StreamKey::trades("BTC/USDT", MarketKind::Future);
        let t = |ts: i64, id: &str| {
            Record::Trade(Trade {
                timestamp: ts,
                id: id.into(),
                price: 1.0,
                amount: 1.0,
                side: Side::Buy,
            })
        };
        cache
            .append(&key, RawBatch::Typed(vec![t(100, "a"), t(100, "b")]), None)
            .await
            .unwrap();
        // "b" is already buffered at the boundary, "c" shares the millisecond
        // but is new
        let appended = cache
            .append(&key, RawBatch::Typed(vec![t(100, "b"), t(100, "c")]), None)
            .await
            .unwrap();
        assert_eq!(appended, 1);
        assert_eq!(cache.get(&key).unwrap().lock().await.len(), 3);
    }

    #[tokio::test]
    async fn raw_rows_converted_on_append() {
        let cache = cache();
        let key = StreamKey::ohlcv("ETH/USDT", "1m", MarketKind::Spot);
        let rows: Vec<Vec<serde_json::Value>> = vec![vec![
            json!(1_700_000_000_000_i64),
            json!(1.0),
            json!(2.0),
            json!(0.5),
            json!(1.5),
            json!(9.0),
        ]];
        assert_eq!(cache.append(&key, rows.into(), None).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn prune_through_cache_drops_old_entries() {
        let cache = cache();
        let key = StreamKey::ohlcv("BTC/USDT", "1m", MarketKind::Future);
        cache
            .append(&key, candle_batch(&[100, 200, 300]), None)
            .await
            .unwrap();
        assert_eq!(cache.prune_expired(&key, Some(250)).await, 2);
        assert_eq!(cache.get(&key).unwrap().lock().await.len(), 1);
    }

    #[tokio::test]
    async fn prune_unknown_key_is_noop() {
        let cache = cache();
        let key = StreamKey::trades("XRP/USDT", MarketKind::Spot);
        assert_eq!(cache.prune_expired(&key, None).await, 0);
        assert!(!cache.set_retention(&key, std::time::Duration::from_secs(1)).await);
    }

    #[tokio::test]
    async fn time_range_helper() {
        let records = match candle_batch(&[10, 20, 30]) {
            RawBatch::Typed(r) => r,
            _ => unreachable!(),
        };
        assert_eq!(Cache::time_range(&records), Some((10, 30)));
    }
}
