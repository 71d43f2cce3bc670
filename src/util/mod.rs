pub mod time;

pub use time::{clamp_ts, dt_now_ms, ms_to_datetime, normalize_ts_ms, timeframe_to_ms};
