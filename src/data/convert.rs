//! Conversion of heterogeneous raw batches into canonical records.
//!
//! Connectors hand back either already-typed records or positional JSON
//! rows in the canonical column order for the stream's kind:
//!
//!   trades        [timestamp, id, price, amount, side]
//!   ohlcv         [timestamp, open, high, low, close, volume]
//!   ticker        [timestamp, bid, ask, last]
//!   funding_rate  [timestamp, rate]
//!
//! Timestamps of unknown unit are normalized to milliseconds on the way in.
//! This module also owns overlap trimming at the buffer boundary, where
//! live-pulled and backfilled batches can double up records.

use serde_json::Value;

use crate::data::record::{Candle, FundingRate, RawBatch, Record, Ticker, Trade};
use crate::error::CacheError;
use crate::models::{DataKind, Side};
use crate::util::normalize_ts_ms;

/// Normalize a raw batch into typed records for `kind`. `stamp` overrides
/// (or supplies, for rows missing one) the timestamp of every record.
pub fn convert(raw: RawBatch, kind: DataKind, stamp: Option<i64>) -> Result<Vec<Record>, CacheError> {
    if matches!(kind, DataKind::Orderbook) {
        return Err(CacheError::UnsupportedKind(kind));
    }
    match raw {
        RawBatch::Typed(mut records) => {
            if let Some(bad) = records.iter().find(|r| r.kind() != kind) {
                return Err(CacheError::SchemaMismatch {
                    expected: kind,
                    got: bad.kind(),
                });
            }
            if let Some(ts) = stamp {
                for r in &mut records {
                    r.set_timestamp(ts);
                }
            }
            Ok(records)
        }
        RawBatch::Rows(rows) => rows
            .into_iter()
            .map(|row| convert_row(&row, kind, stamp))
            .collect(),
    }
}

fn convert_row(row: &[Value], kind: DataKind, stamp: Option<i64>) -> Result<Record, CacheError> {
    let timestamp = row_timestamp(row, kind, stamp)?;
    match kind {
        DataKind::Trades => Ok(Record::Trade(Trade {
            timestamp,
            id: cell_string(row, 1, kind)?,
            price: cell_f64(row, 2, kind)?,
            amount: cell_f64(row, 3, kind)?,
            side: Side::from_str_lossy(&cell_string(row, 4, kind)?),
        })),
        DataKind::Ohlcv => Ok(Record::Candle(Candle {
            timestamp,
            open: cell_f64(row, 1, kind)?,
            high: cell_f64(row, 2, kind)?,
            low: cell_f64(row, 3, kind)?,
            close: cell_f64(row, 4, kind)?,
            volume: cell_f64(row, 5, kind)?,
        })),
        DataKind::Ticker => Ok(Record::Ticker(Ticker {
            timestamp,
            bid: cell_f64(row, 1, kind)?,
            ask: cell_f64(row, 2, kind)?,
            last: cell_f64(row, 3, kind)?,
        })),
        DataKind::FundingRate => Ok(Record::FundingRate(FundingRate {
            timestamp,
            rate: cell_f64(row, 1, kind)?,
        })),
        DataKind::Orderbook => Err(CacheError::UnsupportedKind(kind)),
    }
}

fn row_timestamp(row: &[Value], kind: DataKind, stamp: Option<i64>) -> Result<i64, CacheError> {
    match row.first() {
        Some(v) if !v.is_null() => {
            let ts = v.as_f64().ok_or_else(|| CacheError::MalformedRow {
                kind,
                detail: format!("non-numeric timestamp cell: {}", v),
            })?;
            Ok(normalize_ts_ms(ts))
        }
        // Row carries no timestamp of its own; the explicit stamp must fill in.
        _ => stamp.ok_or(CacheError::MissingTimestamp),
    }
}

fn cell_f64(row: &[Value], idx: usize, kind: DataKind) -> Result<f64, CacheError> {
    row.get(idx)
        .and_then(Value::as_f64)
        .ok_or_else(|| CacheError::MalformedRow {
            kind,
            detail: format!("missing or non-numeric cell {}", idx),
        })
}

fn cell_string(row: &[Value], idx: usize, kind: DataKind) -> Result<String, CacheError> {
    match row.get(idx) {
        Some(Value::String(s)) => Ok(s.clone()),
        Some(Value::Number(n)) => Ok(n.to_string()),
        _ => Err(CacheError::MalformedRow {
            kind,
            detail: format!("missing or non-string cell {}", idx),
        }),
    }
}

/// Extract the covered interval of a converted batch. The engine uses this
/// to decide where backfill should resume; batches are oldest-first.
pub fn time_range(records: &[Record]) -> Option<(i64, i64)> {
    let first = records.first()?.timestamp();
    let last = records.last()?.timestamp();
    Some((first, last))
}

/// Trim the overlap of an append batch against the buffer tail: records
/// older than the tail are dropped, records at the exact tail timestamp are
/// dropped unless they are trades with an unseen id.
pub fn trim_append_overlap(
    records: Vec<Record>,
    last_time: Option<i64>,
    tail_ids: &[String],
) -> Vec<Record> {
    let Some(last) = last_time else {
        return records;
    };
    records
        .into_iter()
        .filter(|r| keep_at_boundary(r, r.timestamp() > last, last, tail_ids))
        .collect()
}

/// Symmetric trim for a prepend batch against the buffer head.
pub fn trim_prepend_overlap(
    records: Vec<Record>,
    first_time: Option<i64>,
    head_ids: &[String],
) -> Vec<Record> {
    let Some(first) = first_time else {
        return records;
    };
    records
        .into_iter()
        .filter(|r| keep_at_boundary(r, r.timestamp() < first, first, head_ids))
        .collect()
}

fn keep_at_boundary(record: &Record, strictly_inside: bool, boundary: i64, seen_ids: &[String]) -> bool {
    if strictly_inside {
        return true;
    }
    if record.timestamp() != boundary {
        // On the wrong side of the boundary entirely: overlap, drop.
        return false;
    }
    match record.boundary_id() {
        Some(id) => !seen_ids.iter().any(|s| s == id),
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn converts_trade_rows() {
        let rows = vec![
            vec![json!(1_700_000_000_000_i64), json!("t1"), json!(100.5), json!(0.25), json!("buy")],
            vec![json!(1_700_000_000.5), json!(42), json!(100.6), json!(0.5), json!("sell")],
        ];
        let records = convert(RawBatch::Rows(rows), DataKind::Trades, None).unwrap();
        assert_eq!(records.len(), 2);
        let Record::Trade(t) = &records[0] else { panic!() };
        assert_eq!(t.timestamp, 1_700_000_000_000);
        assert_eq!(t.id, "t1");
        assert_eq!(t.side, Side::Buy);
        // second-resolution float timestamp normalized to ms, numeric id coerced
        let Record::Trade(t) = &records[1] else { panic!() };
        assert_eq!(t.timestamp, 1_700_000_000_500);
        assert_eq!(t.id, "42");
        assert_eq!(t.side, Side::Sell);
    }

    #[test]
    fn converts_candle_rows() {
        let rows = vec![vec![
            json!(1_700_000_000_000_i64),
            json!(1.0),
            json!(2.0),
            json!(0.5),
            json!(1.5),
            json!(100.0),
        ]];
        let records = convert(RawBatch::Rows(rows), DataKind::Ohlcv, None).unwrap();
        let Record::Candle(c) = &records[0] else { panic!() };
        assert_eq!(c.high, 2.0);
        assert_eq!(c.volume, 100.0);
    }

    #[test]
    fn missing_timestamp_needs_stamp() {
        let rows = vec![vec![json!(null), json!(0.0001)]];
        let err = convert(RawBatch::Rows(rows.clone()), DataKind::FundingRate, None).unwrap_err();
        assert!(matches!(err, CacheError::MissingTimestamp));

        let records = convert(RawBatch::Rows(rows), DataKind::FundingRate, Some(123)).unwrap();
        assert_eq!(records[0].timestamp(), 123);
    }

    #[test]
    fn typed_batch_schema_checked() {
        let trade = Record::Trade(Trade {
            timestamp: 1,
            id: "x".into(),
            price: 1.0,
            amount: 1.0,
            side: Side::Buy,
        });
        let err = convert(RawBatch::Typed(vec![trade]), DataKind::Ohlcv, None).unwrap_err();
        assert!(matches!(err, CacheError::SchemaMismatch { .. }));
    }

    #[test]
    fn orderbook_is_unsupported() {
        let err = convert(RawBatch::empty(), DataKind::Orderbook, None).unwrap_err();
        assert!(matches!(err, CacheError::UnsupportedKind(DataKind::Orderbook)));
    }

    #[test]
    fn malformed_row_is_typed_error() {
        let rows = vec![vec![json!(1_700_000_000_000_i64), json!("not-a-price")]];
        let err = convert(RawBatch::Rows(rows), DataKind::FundingRate, None).unwrap_err();
        assert!(matches!(err, CacheError::MalformedRow { .. }));
    }

    fn trade(ts: i64, id: &str) -> Record {
        Record::Trade(Trade {
            timestamp: ts,
            id: id.into(),
            price: 1.0,
            amount: 1.0,
            side: Side::Buy,
        })
    }

    #[test]
    fn append_overlap_trimmed_by_id_at_boundary() {
        let batch = vec![trade(90, "old"), trade(100, "seen"), trade(100, "new"), trade(110, "next")];
        let kept = trim_append_overlap(batch, Some(100), &["seen".to_string()]);
        let ids: Vec<_> = kept.iter().map(|r| r.boundary_id().unwrap().to_string()).collect();
        assert_eq!(ids, vec!["new", "next"]);
    }

    #[test]
    fn prepend_overlap_trimmed() {
        let batch = vec![trade(50, "a"), trade(100, "dup"), trade(150, "inside")];
        let kept = trim_prepend_overlap(batch, Some(100), &["dup".to_string()]);
        let ids: Vec<_> = kept.iter().map(|r| r.boundary_id().unwrap().to_string()).collect();
        assert_eq!(ids, vec!["a"]);
    }

    #[test]
    fn empty_buffer_keeps_everything() {
        let batch = vec![trade(1, "a")];
        assert_eq!(trim_append_overlap(batch.clone(), None, &[]).len(), 1);
        assert_eq!(trim_prepend_overlap(batch, None, &[]).len(), 1);
    }

    #[test]
    fn time_range_of_batch() {
        let batch = vec![trade(10, "a"), trade(20, "b"), trade(30, "c")];
        assert_eq!(time_range(&batch), Some((10, 30)));
        assert_eq!(time_range(&[]), None);
    }
}
