//! Upstream connector interface.
//!
//! The engine consumes an exchange only through this trait; the concrete
//! venue client (REST/websocket plumbing, rate limits, auth) lives outside
//! this crate. Implementations must return an empty batch, not an error,
//! when there is genuinely no new data, and reserve `FetchError` for
//! transport/protocol failures so the engine's retry policy can apply.

use async_trait::async_trait;

use crate::data::record::RawBatch;
use crate::error::{FetchError, TeardownError};
use crate::models::StreamKey;

#[async_trait]
pub trait ExchangeConnector: Send + Sync {
    /// Historical records for `key` starting at `since_ms`, oldest-first.
    async fn fetch_historical(&self, key: &StreamKey, since_ms: i64)
        -> Result<RawBatch, FetchError>;

    /// Newest available slice of data for `key`.
    async fn pull_latest(&self, key: &StreamKey) -> Result<RawBatch, FetchError>;

    /// Release upstream resources for `key`. Best-effort; the engine never
    /// retries a failed teardown.
    async fn teardown_stream(&self, key: &StreamKey) -> Result<(), TeardownError>;
}
