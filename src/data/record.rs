//! Canonical per-data-kind record shapes.
//!
//! All records carry a UTC epoch-millisecond timestamp as their first field.
//! Raw upstream payloads arrive either already typed or as positional JSON
//! rows (`RawBatch`); the converter in this module's sibling normalizes both
//! into `Vec<Record>`.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::models::{DataKind, Side};

/// A single public trade print.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trade {
    pub timestamp: i64,
    /// Exchange trade id, used for boundary dedup.
    pub id: String,
    pub price: f64,
    pub amount: f64,
    pub side: Side,
}

/// One candle of a fixed timeframe.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    pub timestamp: i64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

/// Top-of-book ticker snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Ticker {
    pub timestamp: i64,
    pub bid: f64,
    pub ask: f64,
    pub last: f64,
}

/// Periodic funding-rate sample for perpetual streams.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FundingRate {
    pub timestamp: i64,
    pub rate: f64,
}

/// One time-stamped record of any stream kind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Record {
    Trade(Trade),
    Candle(Candle),
    Ticker(Ticker),
    FundingRate(FundingRate),
}

impl Record {
    pub fn timestamp(&self) -> i64 {
        match self {
            Self::Trade(t) => t.timestamp,
            Self::Candle(c) => c.timestamp,
            Self::Ticker(t) => t.timestamp,
            Self::FundingRate(r) => r.timestamp,
        }
    }

    pub fn set_timestamp(&mut self, ts_ms: i64) {
        match self {
            Self::Trade(t) => t.timestamp = ts_ms,
            Self::Candle(c) => c.timestamp = ts_ms,
            Self::Ticker(t) => t.timestamp = ts_ms,
            Self::FundingRate(r) => r.timestamp = ts_ms,
        }
    }

    pub fn kind(&self) -> DataKind {
        match self {
            Self::Trade(_) => DataKind::Trades,
            Self::Candle(_) => DataKind::Ohlcv,
            Self::Ticker(_) => DataKind::Ticker,
            Self::FundingRate(_) => DataKind::FundingRate,
        }
    }

    /// Dedup identity at a buffer boundary: timestamp plus the trade id for
    /// trade prints (several trades can legitimately share one millisecond).
    pub fn boundary_id(&self) -> Option<&str> {
        match self {
            Self::Trade(t) => Some(&t.id),
            _ => None,
        }
    }
}

/// Heterogeneous raw input as it comes back from a connector: either
/// already-typed records or positional JSON rows in the canonical column
/// order for the stream's data kind.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RawBatch {
    Typed(Vec<Record>),
    Rows(Vec<Vec<Value>>),
}

impl RawBatch {
    pub fn is_empty(&self) -> bool {
        match self {
            Self::Typed(v) => v.is_empty(),
            Self::Rows(v) => v.is_empty(),
        }
    }

    pub fn len(&self) -> usize {
        match self {
            Self::Typed(v) => v.len(),
            Self::Rows(v) => v.len(),
        }
    }

    pub fn empty() -> Self {
        Self::Typed(Vec::new())
    }
}

impl From<Vec<Record>> for RawBatch {
    fn from(records: Vec<Record>) -> Self {
        Self::Typed(records)
    }
}

impl From<Vec<Vec<Value>>> for RawBatch {
    fn from(rows: Vec<Vec<Value>>) -> Self {
        Self::Rows(rows)
    }
}
