//! Epoch-millisecond helpers.
//!
//! Every buffer timestamp in this crate is UTC epoch milliseconds (i64).
//! Upstream payloads arrive in whatever unit the venue favours, so ingest
//! goes through `normalize_ts_ms` which detects the unit by magnitude.

use chrono::{DateTime, TimeZone, Utc};

/// Current wall-clock time as epoch milliseconds.
pub fn dt_now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

/// Convert epoch milliseconds back to a UTC datetime.
pub fn ms_to_datetime(ts_ms: i64) -> DateTime<Utc> {
    Utc.timestamp_millis_opt(ts_ms).single().unwrap_or_default()
}

/// Normalize a timestamp of unknown unit to milliseconds.
///
/// Magnitude thresholds:
///   < 1e10  seconds      (current epoch ~1.7e9)
///   < 1e14  milliseconds (~1.7e12)
///   < 1e17  microseconds (~1.7e15)
///   else    nanoseconds  (~1.7e18)
pub fn normalize_ts_ms(ts: f64) -> i64 {
    if ts < 1e10 {
        (ts * 1000.0) as i64
    } else if ts < 1e14 {
        ts as i64
    } else if ts < 1e17 {
        (ts / 1_000.0) as i64
    } else {
        (ts / 1_000_000.0) as i64
    }
}

/// Parse a timeframe shorthand ("30s", "1m", "4h", "1d", "1w") into
/// milliseconds. Returns `None` for anything it cannot parse.
pub fn timeframe_to_ms(timeframe: &str) -> Option<i64> {
    let tf = timeframe.trim();
    let unit = tf.chars().last()?;
    let num = &tf[..tf.len() - unit.len_utf8()];
    let n: i64 = num.parse().ok()?;
    if n <= 0 {
        return None;
    }
    let unit_ms = match unit {
        's' => 1_000,
        'm' => 60_000,
        'h' => 3_600_000,
        'd' => 86_400_000,
        'w' => 604_800_000,
        _ => return None,
    };
    Some(n * unit_ms)
}

/// Floor a timestamp to a multiple of `interval_ms`. Used to align backfill
/// cursors to candle boundaries. Zero or negative intervals pass through.
pub fn clamp_ts(ts_ms: i64, interval_ms: i64) -> i64 {
    if interval_ms <= 0 {
        return ts_ms;
    }
    ts_ms - ts_ms.rem_euclid(interval_ms)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_detects_units() {
        // 2023-11-14T22:13:20Z in four units
        assert_eq!(normalize_ts_ms(1_700_000_000.0), 1_700_000_000_000);
        assert_eq!(normalize_ts_ms(1_700_000_000_000.0), 1_700_000_000_000);
        assert_eq!(normalize_ts_ms(1_700_000_000_000_000.0), 1_700_000_000_000);
        assert_eq!(
            normalize_ts_ms(1_700_000_000_000_000_000.0),
            1_700_000_000_000
        );
    }

    #[test]
    fn timeframe_parsing() {
        assert_eq!(timeframe_to_ms("30s"), Some(30_000));
        assert_eq!(timeframe_to_ms("1m"), Some(60_000));
        assert_eq!(timeframe_to_ms("5m"), Some(300_000));
        assert_eq!(timeframe_to_ms("4h"), Some(14_400_000));
        assert_eq!(timeframe_to_ms("1d"), Some(86_400_000));
        assert_eq!(timeframe_to_ms("1w"), Some(604_800_000));
        assert_eq!(timeframe_to_ms(""), None);
        assert_eq!(timeframe_to_ms("xyz"), None);
        assert_eq!(timeframe_to_ms("0m"), None);
        assert_eq!(timeframe_to_ms("m"), None);
    }

    #[test]
    fn timeframe_with_multibyte_unit_is_rejected() {
        assert_eq!(timeframe_to_ms("1µ"), None);
        assert_eq!(timeframe_to_ms("µ"), None);
        assert_eq!(timeframe_to_ms("5分"), None);
    }

    #[test]
    fn clamp_floors_to_interval() {
        assert_eq!(clamp_ts(1_700_000_123_456, 60_000), 1_700_000_100_000);
        assert_eq!(clamp_ts(1_700_000_100_000, 60_000), 1_700_000_100_000);
        assert_eq!(clamp_ts(12_345, 0), 12_345);
    }

    #[test]
    fn ms_datetime_roundtrip() {
        let now = dt_now_ms();
        assert_eq!(ms_to_datetime(now).timestamp_millis(), now);
    }
}
