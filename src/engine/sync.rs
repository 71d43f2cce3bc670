//! Per-tick synchronization engine.
//!
//! One tick, in order:
//!   1. Expiry sweep — tear down streams whose `until` watermark has passed.
//!   2. Live pull — fetch the newest slice for every active stream,
//!      concurrently across keys.
//!   3. Backfill — for every stream whose buffered history does not yet
//!      reach its `since` watermark, run one bounded-retry chunked fetch
//!      task; all tasks run in parallel and the tick waits for all of them.
//!
//! Upstream failures are contained inside the tick: logged, counted, retried
//! on a later tick. Only schema/config misuse surfaces to callers, and only
//! from the synchronous entry points.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::future::join_all;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

use crate::config::SyncConfig;
use crate::data::cache::Cache;
use crate::data::convert::{time_range, trim_append_overlap};
use crate::data::record::{RawBatch, Record};
use crate::data::recorder::RecorderHandle;
use crate::engine::connector::ExchangeConnector;
use crate::engine::metrics::{EngineMetrics, MetricsSnapshot};
use crate::engine::watermark::WatermarkTable;
use crate::error::CacheError;
use crate::models::{DataKind, StreamKey, StreamState};
use crate::util::{clamp_ts, dt_now_ms, timeframe_to_ms};

/// What one tick did, mostly for tests and the run loop's error backoff.
#[derive(Debug, Default, Clone, Copy)]
pub struct TickReport {
    pub live_records: usize,
    pub live_errors: usize,
    pub backfill_tasks: usize,
    pub backfill_records: usize,
    pub teardowns: usize,
    pub teardown_errors: usize,
}

impl TickReport {
    pub fn had_errors(&self) -> bool {
        self.live_errors > 0 || self.teardown_errors > 0
    }
}

pub struct SyncEngine {
    cache: Arc<Cache>,
    connector: Arc<dyn ExchangeConnector>,
    since: WatermarkTable,
    until: WatermarkTable,
    config: SyncConfig,
    metrics: Arc<EngineMetrics>,
    shutdown: AtomicBool,
}

impl SyncEngine {
    pub fn new(
        cache: Arc<Cache>,
        connector: Arc<dyn ExchangeConnector>,
        config: SyncConfig,
    ) -> Self {
        Self {
            cache,
            connector,
            since: WatermarkTable::since(),
            until: WatermarkTable::until(),
            config,
            metrics: Arc::new(EngineMetrics::new()),
            shutdown: AtomicBool::new(false),
        }
    }

    pub fn cache(&self) -> &Arc<Cache> {
        &self.cache
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    /// True while a `since` demand for `key` is still being worked on.
    pub fn backfill_pending(&self, key: &StreamKey) -> bool {
        self.since.contains(key)
    }

    // ------------------------------------------------------------------
    // Caller-facing surface
    // ------------------------------------------------------------------

    /// Currently buffered records of `key` from `since_ms` onward. Never
    /// blocks on upstream: if the buffered depth does not reach `since_ms`,
    /// a backfill watermark is registered and the engine fills the gap on
    /// subsequent ticks; callers observe eventual completeness on retry.
    pub async fn read(
        &self,
        key: &StreamKey,
        since_ms: i64,
        limit: Option<usize>,
    ) -> Result<Vec<Record>, CacheError> {
        let handle = self.cache.get_or_create(key)?;
        let (mut records, first) = {
            let rec = handle.lock().await;
            (rec.slice(Some(since_ms), None), rec.first_time())
        };
        let covered = first.map_or(false, |f| f <= since_ms);
        if !covered && !handle.is_stopped() {
            let marker = self
                .since
                .register(key, since_ms, self.min_interval_for(key));
            debug!(stream = %key, since_ms = marker.marker_ms, "registered backfill demand");
        }
        if let Some(limit) = limit {
            records.truncate(limit);
        }
        Ok(records)
    }

    /// Keep `key` active through `until_ms`, refreshing at most every
    /// `refresh`. Re-registers a stopped stream.
    pub fn request_until(
        &self,
        key: &StreamKey,
        until_ms: i64,
        refresh: Duration,
    ) -> Result<(), CacheError> {
        let handle = self.cache.get_or_create(key)?;
        if handle.is_stopped() {
            info!(stream = %key, "re-registering stopped stream");
            handle.set_state(StreamState::Running);
        }
        self.until.register(key, until_ms, refresh);
        Ok(())
    }

    /// Pause live pulls conceptually; a PAUSED stream is still polled (the
    /// state is an external signal, not an engine decision) and can be
    /// resumed without re-registration.
    pub fn pause(&self, key: &StreamKey) -> bool {
        match self.cache.get(key) {
            Some(h) if h.state() == StreamState::Running => {
                h.set_state(StreamState::Paused);
                true
            }
            _ => false,
        }
    }

    pub fn resume(&self, key: &StreamKey) -> bool {
        match self.cache.get(key) {
            Some(h) if h.state() == StreamState::Paused => {
                h.set_state(StreamState::Running);
                true
            }
            _ => false,
        }
    }

    /// Ask the run loop to exit after the current tick.
    pub fn shutdown(&self) {
        self.shutdown.store(true, Ordering::Release);
    }

    // ------------------------------------------------------------------
    // Tick
    // ------------------------------------------------------------------

    /// Advance the engine one step. Intended to be driven in a loop by
    /// `run` or by a host process.
    pub async fn tick(&self) -> TickReport {
        EngineMetrics::incr(&self.metrics.ticks);
        let mut report = TickReport::default();
        self.sweep_expired(&mut report).await;
        self.pull_live(&mut report).await;
        self.backfill(&mut report).await;
        report
    }

    /// Tick forever. Errors inside a tick are already contained; a tick
    /// that saw any gets an extra backoff before the next one.
    pub async fn run(&self) {
        info!("sync engine loop started");
        while !self.shutdown.load(Ordering::Acquire) {
            let report = self.tick().await;
            if report.had_errors() {
                sleep(self.config.error_backoff).await;
            }
            sleep(self.config.tick_interval).await;
        }
        info!("sync engine loop stopped");
    }

    /// Step 1: stop streams whose `until` watermark has elapsed. Teardown is
    /// best-effort at the protocol layer; a failure is logged and the entry
    /// is removed regardless.
    async fn sweep_expired(&self, report: &mut TickReport) {
        let now = dt_now_ms();
        for (key, marker) in self.until.snapshot() {
            if marker.marker_ms >= now {
                continue;
            }
            match self.connector.teardown_stream(&key).await {
                Ok(()) => {
                    EngineMetrics::incr(&self.metrics.teardowns);
                    report.teardowns += 1;
                    info!(stream = %key, "stream expired, torn down");
                }
                Err(e) => {
                    EngineMetrics::incr(&self.metrics.teardown_errors);
                    report.teardown_errors += 1;
                    warn!(stream = %key, error = %e, "stream teardown failed");
                }
            }
            self.until.remove(&key);
            if let Some(handle) = self.cache.get(&key) {
                handle.set_state(StreamState::Stopped);
            }
        }
    }

    /// Step 2: pull the newest slice for every RUNNING/PAUSED stream,
    /// concurrently across keys. A per-key failure is logged and skipped;
    /// the next tick retries it.
    async fn pull_live(&self, report: &mut TickReport) {
        let streams = self.cache.live_streams();
        let pulls = streams.into_iter().map(|(key, _handle)| async move {
            EngineMetrics::incr(&self.metrics.live_pulls);
            match self.connector.pull_latest(&key).await {
                Ok(raw) if raw.is_empty() => Ok(0),
                Ok(raw) => match self.cache.append(&key, raw, None).await {
                    Ok(n) => {
                        EngineMetrics::add(&self.metrics.live_records, n as u64);
                        Ok(n)
                    }
                    Err(e) => {
                        error!(stream = %key, error = %e, "live data rejected by cache");
                        Err(())
                    }
                },
                Err(e) => {
                    EngineMetrics::incr(&self.metrics.live_pull_errors);
                    warn!(stream = %key, error = %e, "live pull failed");
                    Err(())
                }
            }
        });
        for result in join_all(pulls).await {
            match result {
                Ok(n) => report.live_records += n,
                Err(()) => report.live_errors += 1,
            }
        }
    }

    /// Step 3: one concurrent backfill task per key whose buffered history
    /// does not yet reach its `since` watermark and whose cooldown has
    /// elapsed. After the batch, satisfied keys leave the table.
    async fn backfill(&self, report: &mut TickReport) {
        let now = dt_now_ms();
        let mut tasks = Vec::new();
        for (key, marker) in self.since.snapshot() {
            let Some(handle) = self.cache.get(&key) else {
                continue;
            };
            if handle.is_stopped() {
                continue;
            }
            let Some(first) = handle.lock().await.first_time() else {
                // Nothing buffered yet to anchor a backward fetch to; the
                // live pull has to land the first records.
                continue;
            };
            if first <= marker.marker_ms {
                continue;
            }
            let elapsed = now - handle.last_backfill_ms();
            if elapsed < marker.min_interval.as_millis() as i64 {
                continue;
            }
            handle.mark_backfill_attempt(now);
            tasks.push(self.backfill_stream(key, marker.marker_ms, handle, first));
        }
        report.backfill_tasks = tasks.len();
        for n in join_all(tasks).await {
            report.backfill_records += n;
        }

        for (key, marker) in self.since.snapshot() {
            let Some(handle) = self.cache.get(&key) else {
                continue;
            };
            let satisfied = handle
                .lock()
                .await
                .first_time()
                .map_or(false, |f| f <= marker.marker_ms);
            if satisfied {
                self.since.remove(&key);
                debug!(stream = %key, "backfill satisfied");
            }
        }
    }

    /// Chunked, bounded-retry backward fetch for one stream. Fetches march
    /// forward from `cursor` toward `target` (the buffer head at task
    /// start); everything accumulated is prepended in one call, oldest
    /// first, even when the retry budget runs out early — the next tick
    /// resumes from wherever this one left off.
    async fn backfill_stream(
        &self,
        key: StreamKey,
        since_ms: i64,
        handle: Arc<RecorderHandle>,
        target: i64,
    ) -> usize {
        EngineMetrics::incr(&self.metrics.backfill_tasks);
        let span = self.batch_span_ms(&key);
        let mut cursor = since_ms.max(target - span);
        if key.kind == DataKind::Ohlcv {
            if let Some(tf) = timeframe_to_ms(&key.timeframe) {
                cursor = clamp_ts(cursor, tf).max(since_ms);
            }
        }

        let mut acc: Vec<Record> = Vec::new();
        let mut retries = 0u32;
        while cursor < target && retries < self.config.max_retries {
            if handle.is_stopped() {
                debug!(stream = %key, "stream stopped, abandoning backfill");
                break;
            }
            match self.connector.fetch_historical(&key, cursor).await {
                Ok(raw) if raw.is_empty() => {
                    retries += 1;
                    EngineMetrics::incr(&self.metrics.backfill_retries);
                    sleep(self.config.backoff_unit * retries).await;
                }
                Ok(raw) => {
                    let records = match self.cache.convert(raw, key.kind, None) {
                        Ok(r) => r,
                        Err(e) => {
                            error!(stream = %key, error = %e, "historical data rejected by converter");
                            break;
                        }
                    };
                    let Some((_, newest)) = time_range(&records) else {
                        continue;
                    };
                    if newest <= cursor {
                        // Venue replayed data we already hold; treat as empty.
                        retries += 1;
                        EngineMetrics::incr(&self.metrics.backfill_retries);
                        sleep(self.config.backoff_unit * retries).await;
                        continue;
                    }
                    let fresh = if acc.is_empty() {
                        records
                    } else {
                        // Chunks overlap at the cursor millisecond; trades
                        // sharing it are deduped by id, not dropped wholesale.
                        let seam_ids: Vec<String> = acc
                            .iter()
                            .rev()
                            .take_while(|r| r.timestamp() == cursor)
                            .filter_map(|r| r.boundary_id().map(str::to_owned))
                            .collect();
                        trim_append_overlap(records, Some(cursor), &seam_ids)
                    };
                    acc.extend(fresh);
                    cursor = newest;
                    retries = 0;
                }
                Err(e) => {
                    warn!(stream = %key, error = %e, "historical fetch failed");
                    retries += 1;
                    EngineMetrics::incr(&self.metrics.backfill_retries);
                    sleep(self.config.backoff_unit).await;
                }
            }
        }
        if retries >= self.config.max_retries {
            EngineMetrics::incr(&self.metrics.backfill_exhausted);
            debug!(stream = %key, cursor, target, "backfill retry budget exhausted");
        }

        if acc.is_empty() {
            return 0;
        }
        match self.cache.prepend(&key, RawBatch::Typed(acc), None).await {
            Ok(n) => {
                EngineMetrics::add(&self.metrics.backfill_records, n as u64);
                debug!(stream = %key, records = n, "backfill batch prepended");
                n
            }
            Err(e) => {
                error!(stream = %key, error = %e, "backfill prepend failed");
                0
            }
        }
    }

    // ------------------------------------------------------------------
    // Granularity
    // ------------------------------------------------------------------

    /// Natural granularity of a stream, for batch spans and read cooldowns.
    fn granularity_ms(&self, key: &StreamKey) -> i64 {
        match key.kind {
            DataKind::Ohlcv => timeframe_to_ms(&key.timeframe)
                .unwrap_or(self.config.trade_base_interval.as_millis() as i64),
            DataKind::FundingRate => self.config.funding_base_interval.as_millis() as i64,
            _ => self.config.trade_base_interval.as_millis() as i64,
        }
    }

    /// How far back one backfill task reaches per tick.
    fn batch_span_ms(&self, key: &StreamKey) -> i64 {
        self.granularity_ms(key) * self.config.batch_ratio as i64
    }

    fn min_interval_for(&self, key: &StreamKey) -> Duration {
        match key.kind {
            DataKind::Ohlcv => timeframe_to_ms(&key.timeframe)
                .map(|ms| Duration::from_millis(ms as u64))
                .unwrap_or(self.config.default_min_interval),
            _ => self.config.default_min_interval,
        }
    }
}

impl std::fmt::Debug for SyncEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncEngine")
            .field("streams", &self.cache.len())
            .field("since", &self.since.len())
            .field("until", &self.until.len())
            .finish()
    }
}
