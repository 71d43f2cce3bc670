pub mod cache;
pub mod convert;
pub mod record;
pub mod recorder;
pub mod store;

pub use cache::Cache;
pub use record::{Candle, FundingRate, RawBatch, Record, Ticker, Trade};
pub use recorder::{Recorder, RecorderHandle};
