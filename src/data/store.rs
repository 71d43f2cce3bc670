//! Record storage behind the recorder.
//!
//! Two variants behind one trait, picked per data kind by `store_for`:
//! `RowStore` keeps typed records in a plain vector; `ColumnStore` keeps the
//! high-volume kinds (trades, candles) as struct-of-arrays so slicing and
//! pruning touch only the timestamp column.
//!
//! Both variants rely on the recorder-level invariant that the buffer is
//! non-decreasing by timestamp; range lookups binary-search the timestamps.

use crate::error::CacheError;
use crate::models::{DataKind, Side};
use crate::data::record::{Candle, Record, Trade};

pub trait RecordStore: Send + std::fmt::Debug {
    fn kind(&self) -> DataKind;
    fn len(&self) -> usize;
    fn first_ts(&self) -> Option<i64>;
    fn last_ts(&self) -> Option<i64>;
    /// Append records at the tail. Records must already match this store's
    /// schema; the batch is assumed newer than everything buffered.
    fn push_back(&mut self, records: Vec<Record>) -> Result<(), CacheError>;
    /// Insert records at the head. Symmetric to `push_back`.
    fn push_front(&mut self, records: Vec<Record>) -> Result<(), CacheError>;
    /// Drop all entries with timestamp strictly below `cutoff_ms`.
    /// Returns how many were removed.
    fn drop_before(&mut self, cutoff_ms: i64) -> usize;
    /// Contiguous sub-sequence with `start <= timestamp <= end`
    /// (either bound optional).
    fn slice(&self, start: Option<i64>, end: Option<i64>) -> Vec<Record>;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn check_schema(expected: DataKind, records: &[Record]) -> Result<(), CacheError> {
    if let Some(bad) = records.iter().find(|r| r.kind() != expected) {
        return Err(CacheError::SchemaMismatch {
            expected,
            got: bad.kind(),
        });
    }
    Ok(())
}

/// Half-open index range covering `start <= ts <= end` in a sorted
/// timestamp sequence.
fn bounds(ts: &[i64], start: Option<i64>, end: Option<i64>) -> (usize, usize) {
    let lo = match start {
        Some(s) => ts.partition_point(|&t| t < s),
        None => 0,
    };
    let hi = match end {
        Some(e) => ts.partition_point(|&t| t <= e),
        None => ts.len(),
    };
    (lo, hi.max(lo))
}

/// Plain vector of typed records. Used for the low-volume kinds.
#[derive(Debug)]
pub struct RowStore {
    kind: DataKind,
    rows: Vec<Record>,
}

impl RowStore {
    pub fn new(kind: DataKind) -> Self {
        Self {
            kind,
            rows: Vec::new(),
        }
    }

    fn timestamps(&self) -> Vec<i64> {
        self.rows.iter().map(|r| r.timestamp()).collect()
    }
}

impl RecordStore for RowStore {
    fn kind(&self) -> DataKind {
        self.kind
    }

    fn len(&self) -> usize {
        self.rows.len()
    }

    fn first_ts(&self) -> Option<i64> {
        self.rows.first().map(|r| r.timestamp())
    }

    fn last_ts(&self) -> Option<i64> {
        self.rows.last().map(|r| r.timestamp())
    }

    fn push_back(&mut self, records: Vec<Record>) -> Result<(), CacheError> {
        check_schema(self.kind, &records)?;
        self.rows.extend(records);
        Ok(())
    }

    fn push_front(&mut self, records: Vec<Record>) -> Result<(), CacheError> {
        check_schema(self.kind, &records)?;
        self.rows.splice(0..0, records);
        Ok(())
    }

    fn drop_before(&mut self, cutoff_ms: i64) -> usize {
        let idx = self.rows.partition_point(|r| r.timestamp() < cutoff_ms);
        self.rows.drain(..idx).count()
    }

    fn slice(&self, start: Option<i64>, end: Option<i64>) -> Vec<Record> {
        let ts = self.timestamps();
        let (lo, hi) = bounds(&ts, start, end);
        self.rows[lo..hi].to_vec()
    }
}

/// Struct-of-arrays storage for trades and candles.
#[derive(Debug)]
pub enum ColumnStore {
    Trades {
        ts: Vec<i64>,
        id: Vec<String>,
        price: Vec<f64>,
        amount: Vec<f64>,
        side: Vec<Side>,
    },
    Candles {
        ts: Vec<i64>,
        open: Vec<f64>,
        high: Vec<f64>,
        low: Vec<f64>,
        close: Vec<f64>,
        volume: Vec<f64>,
    },
}

impl ColumnStore {
    pub fn trades() -> Self {
        Self::Trades {
            ts: Vec::new(),
            id: Vec::new(),
            price: Vec::new(),
            amount: Vec::new(),
            side: Vec::new(),
        }
    }

    pub fn candles() -> Self {
        Self::Candles {
            ts: Vec::new(),
            open: Vec::new(),
            high: Vec::new(),
            low: Vec::new(),
            close: Vec::new(),
            volume: Vec::new(),
        }
    }

    fn ts_col(&self) -> &Vec<i64> {
        match self {
            Self::Trades { ts, .. } => ts,
            Self::Candles { ts, .. } => ts,
        }
    }

    fn insert(&mut self, at: usize, records: Vec<Record>) -> Result<(), CacheError> {
        check_schema(self.kind(), &records)?;
        match self {
            Self::Trades {
                ts,
                id,
                price,
                amount,
                side,
            } => {
                let n = records.len();
                let mut new_ts = Vec::with_capacity(n);
                let mut new_id = Vec::with_capacity(n);
                let mut new_price = Vec::with_capacity(n);
                let mut new_amount = Vec::with_capacity(n);
                let mut new_side = Vec::with_capacity(n);
                for r in records {
                    if let Record::Trade(t) = r {
                        new_ts.push(t.timestamp);
                        new_id.push(t.id);
                        new_price.push(t.price);
                        new_amount.push(t.amount);
                        new_side.push(t.side);
                    }
                }
                ts.splice(at..at, new_ts);
                id.splice(at..at, new_id);
                price.splice(at..at, new_price);
                amount.splice(at..at, new_amount);
                side.splice(at..at, new_side);
            }
            Self::Candles {
                ts,
                open,
                high,
                low,
                close,
                volume,
            } => {
                let n = records.len();
                let mut new_ts = Vec::with_capacity(n);
                let mut new_open = Vec::with_capacity(n);
                let mut new_high = Vec::with_capacity(n);
                let mut new_low = Vec::with_capacity(n);
                let mut new_close = Vec::with_capacity(n);
                let mut new_volume = Vec::with_capacity(n);
                for r in records {
                    if let Record::Candle(c) = r {
                        new_ts.push(c.timestamp);
                        new_open.push(c.open);
                        new_high.push(c.high);
                        new_low.push(c.low);
                        new_close.push(c.close);
                        new_volume.push(c.volume);
                    }
                }
                ts.splice(at..at, new_ts);
                open.splice(at..at, new_open);
                high.splice(at..at, new_high);
                low.splice(at..at, new_low);
                close.splice(at..at, new_close);
                volume.splice(at..at, new_volume);
            }
        }
        Ok(())
    }

    fn drain_range(&mut self, lo: usize, hi: usize) {
        match self {
            Self::Trades {
                ts,
                id,
                price,
                amount,
                side,
            } => {
                ts.drain(lo..hi);
                id.drain(lo..hi);
                price.drain(lo..hi);
                amount.drain(lo..hi);
                side.drain(lo..hi);
            }
            Self::Candles {
                ts,
                open,
                high,
                low,
                close,
                volume,
            } => {
                ts.drain(lo..hi);
                open.drain(lo..hi);
                high.drain(lo..hi);
                low.drain(lo..hi);
                close.drain(lo..hi);
                volume.drain(lo..hi);
            }
        }
    }

    fn materialize(&self, lo: usize, hi: usize) -> Vec<Record> {
        match self {
            Self::Trades {
                ts,
                id,
                price,
                amount,
                side,
            } => (lo..hi)
                .map(|i| {
                    Record::Trade(Trade {
                        timestamp: ts[i],
                        id: id[i].clone(),
                        price: price[i],
                        amount: amount[i],
                        side: side[i],
                    })
                })
                .collect(),
            Self::Candles {
                ts,
                open,
                high,
                low,
                close,
                volume,
            } => (lo..hi)
                .map(|i| {
                    Record::Candle(Candle {
                        timestamp: ts[i],
                        open: open[i],
                        high: high[i],
                        low: low[i],
                        close: close[i],
                        volume: volume[i],
                    })
                })
                .collect(),
        }
    }
}

impl RecordStore for ColumnStore {
    fn kind(&self) -> DataKind {
        match self {
            Self::Trades { .. } => DataKind::Trades,
            Self::Candles { .. } => DataKind::Ohlcv,
        }
    }

    fn len(&self) -> usize {
        self.ts_col().len()
    }

    fn first_ts(&self) -> Option<i64> {
        self.ts_col().first().copied()
    }

    fn last_ts(&self) -> Option<i64> {
        self.ts_col().last().copied()
    }

    fn push_back(&mut self, records: Vec<Record>) -> Result<(), CacheError> {
        let at = self.len();
        self.insert(at, records)
    }

    fn push_front(&mut self, records: Vec<Record>) -> Result<(), CacheError> {
        self.insert(0, records)
    }

    fn drop_before(&mut self, cutoff_ms: i64) -> usize {
        let idx = self.ts_col().partition_point(|&t| t < cutoff_ms);
        self.drain_range(0, idx);
        idx
    }

    fn slice(&self, start: Option<i64>, end: Option<i64>) -> Vec<Record> {
        let (lo, hi) = bounds(self.ts_col(), start, end);
        self.materialize(lo, hi)
    }
}

/// Per-data-kind store factory. Trades and candles get columnar storage,
/// ticker and funding-rate streams a row vector. Orderbook streams have no
/// canonical record schema in this layer.
pub fn store_for(kind: DataKind) -> Result<Box<dyn RecordStore>, CacheError> {
    match kind {
        DataKind::Trades => Ok(Box::new(ColumnStore::trades())),
        DataKind::Ohlcv => Ok(Box::new(ColumnStore::candles())),
        DataKind::Ticker | DataKind::FundingRate => Ok(Box::new(RowStore::new(kind))),
        DataKind::Orderbook => Err(CacheError::UnsupportedKind(kind)),
    }
}
