//! pulsefeed — bounded, time-windowed market-data caching with live/backfill
//! reconciliation.
//!
//! Ingests time-ordered market data (trades, candles, tickers, funding
//! rates) from an exchange connector, keeps one ordered deduplicated buffer
//! per (symbol, timeframe, market, data-kind) stream, and continuously
//! reconciles each buffer against two demands: the live edge (append newest
//! data as it arrives) and the historical tail (backfill down to the
//! earliest timestamp any caller asked for).

pub mod config;
pub mod data;
pub mod engine;
pub mod error;
pub mod models;
pub mod util;

pub use config::{CacheConfig, SyncConfig};
pub use data::{Cache, RawBatch, Record, Recorder, RecorderHandle};
pub use engine::{ExchangeConnector, SyncEngine, TickReport};
pub use error::{CacheError, FetchError, TeardownError};
pub use models::{DataKind, MarketKind, Side, StreamKey, StreamState};
