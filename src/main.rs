//! Demo runner: drives the sync engine against a simulated exchange.
//!
//! Generates a synthetic trade stream, requests a backfill window behind
//! the live edge, and logs coverage as the engine reconciles both ends.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use tokio::time::sleep;
use tracing::info;

use pulsefeed::data::record::Trade;
use pulsefeed::util::dt_now_ms;
use pulsefeed::{
    Cache, CacheConfig, ExchangeConnector, FetchError, MarketKind, RawBatch, Record, Side,
    StreamKey, SyncConfig, SyncEngine, TeardownError,
};

/// Deterministic fake venue: one synthetic trade per 250ms of wall time.
struct SimulatedExchange {
    seq: AtomicU64,
}

impl SimulatedExchange {
    fn new() -> Self {
        Self {
            seq: AtomicU64::new(0),
        }
    }

    fn trade_at(&self, ts_ms: i64) -> Record {
        let seq = self.seq.fetch_add(1, Ordering::Relaxed);
        Record::Trade(Trade {
            timestamp: ts_ms,
            id: format!("sim-{}-{}", ts_ms, seq),
            price: 100.0 + (ts_ms % 1000) as f64 / 100.0,
            amount: 0.1,
            side: if ts_ms % 2 == 0 { Side::Buy } else { Side::Sell },
        })
    }
}

#[async_trait]
impl ExchangeConnector for SimulatedExchange {
    async fn fetch_historical(
        &self,
        _key: &StreamKey,
        since_ms: i64,
    ) -> Result<RawBatch, FetchError> {
        // 20 trades per fetch, 250ms apart, ascending from `since_ms`
        let batch: Vec<Record> = (0..20).map(|i| self.trade_at(since_ms + i * 250)).collect();
        Ok(RawBatch::Typed(batch))
    }

    async fn pull_latest(&self, _key: &StreamKey) -> Result<RawBatch, FetchError> {
        let now = dt_now_ms();
        Ok(RawBatch::Typed(vec![self.trade_at(now)]))
    }

    async fn teardown_stream(&self, _key: &StreamKey) -> Result<(), TeardownError> {
        Ok(())
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "pulsefeed=debug,info".into()),
        )
        .init();

    let cache = Arc::new(Cache::new(CacheConfig::from_env()));
    let mut sync_config = SyncConfig::from_env();
    sync_config.tick_interval = Duration::from_millis(500);
    sync_config.default_min_interval = Duration::from_millis(500);
    let engine = Arc::new(SyncEngine::new(
        cache,
        Arc::new(SimulatedExchange::new()),
        sync_config,
    ));

    let key = StreamKey::trades("BTC/USDT", MarketKind::Future);
    let now = dt_now_ms();
    // keep the stream alive for 30s and ask for 60s of history
    engine.request_until(&key, now + 30_000, Duration::from_secs(1))?;
    engine.read(&key, now - 60_000, None).await?;

    let loop_engine = Arc::clone(&engine);
    let runner = tokio::spawn(async move { loop_engine.run().await });

    for _ in 0..20 {
        sleep(Duration::from_secs(1)).await;
        let records = engine.read(&key, now - 60_000, None).await?;
        let coverage = records
            .first()
            .map(|r| (dt_now_ms() - r.timestamp()) / 1000)
            .unwrap_or(0);
        info!(
            buffered = records.len(),
            coverage_secs = coverage,
            backfill_pending = engine.backfill_pending(&key),
            "read progress"
        );
    }

    info!(metrics = ?engine.metrics(), "shutting down");
    engine.shutdown();
    runner.await?;
    Ok(())
}
