//! Tuning knobs for the cache and the sync engine.
//!
//! Defaults match the original deployment; every field can be overridden
//! through `PULSEFEED_*` environment variables via `from_env`.

use std::time::Duration;

/// Cache-side settings.
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Retention window applied to newly created recorders.
    pub default_retention: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            default_retention: Duration::from_secs(60 * 60),
        }
    }
}

impl CacheConfig {
    pub fn from_env() -> Self {
        let mut cfg = Self::default();
        if let Ok(v) = std::env::var("PULSEFEED_RETENTION_SECS") {
            if let Ok(secs) = v.parse() {
                cfg.default_retention = Duration::from_secs(secs);
            }
        }
        cfg
    }
}

/// Engine-side settings. The retry policy (attempts, backoff unit, batch
/// ratio) is explicit here and independent of the sleep primitive used to
/// implement it.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Delay between engine ticks in the run loop.
    pub tick_interval: Duration,
    /// Extra delay after a tick that errored.
    pub error_backoff: Duration,
    /// Retry budget per backfill task per tick.
    pub max_retries: u32,
    /// One backoff "time unit": an empty fetch result sleeps
    /// `retries * backoff_unit`, a fetch error sleeps one unit.
    pub backoff_unit: Duration,
    /// Backfill batch span = stream granularity * this ratio.
    pub batch_ratio: u32,
    /// Granularity assumed for trade and ticker streams (no timeframe).
    pub trade_base_interval: Duration,
    /// Granularity assumed for funding-rate streams.
    pub funding_base_interval: Duration,
    /// Backfill cooldown registered for reads on streams without a
    /// timeframe of their own.
    pub default_min_interval: Duration,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            tick_interval: Duration::from_secs(1),
            error_backoff: Duration::from_secs(1),
            max_retries: 5,
            backoff_unit: Duration::from_secs(1),
            batch_ratio: 10,
            trade_base_interval: Duration::from_secs(60),
            funding_base_interval: Duration::from_secs(60 * 60),
            default_min_interval: Duration::from_secs(60),
        }
    }
}

impl SyncConfig {
    pub fn from_env() -> Self {
        let mut cfg = Self::default();
        if let Ok(v) = std::env::var("PULSEFEED_TICK_INTERVAL_MS") {
            if let Ok(ms) = v.parse() {
                cfg.tick_interval = Duration::from_millis(ms);
            }
        }
        if let Ok(v) = std::env::var("PULSEFEED_MAX_RETRIES") {
            if let Ok(n) = v.parse() {
                cfg.max_retries = n;
            }
        }
        if let Ok(v) = std::env::var("PULSEFEED_BACKOFF_UNIT_MS") {
            if let Ok(ms) = v.parse() {
                cfg.backoff_unit = Duration::from_millis(ms);
            }
        }
        if let Ok(v) = std::env::var("PULSEFEED_BATCH_RATIO") {
            if let Ok(n) = v.parse::<u32>() {
                if n > 0 {
                    cfg.batch_ratio = n;
                }
            }
        }
        cfg
    }
}
