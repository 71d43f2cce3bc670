//! Stream identity and lifecycle types shared by the cache and the sync engine.

use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};

use serde::{Deserialize, Serialize};

/// Venue segment a stream belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MarketKind {
    Spot,
    Margin,
    Swap,
    Future,
    Option,
}

impl MarketKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Spot => "spot",
            Self::Margin => "margin",
            Self::Swap => "swap",
            Self::Future => "future",
            Self::Option => "option",
        }
    }
}

/// What kind of records a stream carries. Fixes the record schema.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataKind {
    Trades,
    Ohlcv,
    Ticker,
    Orderbook,
    FundingRate,
}

impl DataKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Trades => "trades",
            Self::Ohlcv => "ohlcv",
            Self::Ticker => "ticker",
            Self::Orderbook => "orderbook",
            Self::FundingRate => "funding_rate",
        }
    }
}

/// Taker side of a trade print.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Buy,
    Sell,
}

impl Side {
    pub fn from_str_lossy(s: &str) -> Self {
        match s.to_ascii_lowercase().as_str() {
            "sell" => Self::Sell,
            _ => Self::Buy,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Buy => "buy",
            Self::Sell => "sell",
        }
    }
}

/// Identity of one logical market-data stream.
///
/// Structural equality, hashable, never mutated after construction.
/// `timeframe` is empty for streams that have no candle granularity
/// (trades, ticker, funding rate).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StreamKey {
    pub symbol: String,
    pub timeframe: String,
    pub market: MarketKind,
    pub kind: DataKind,
}

impl StreamKey {
    pub fn new(
        symbol: impl Into<String>,
        timeframe: impl Into<String>,
        market: MarketKind,
        kind: DataKind,
    ) -> Self {
        Self {
            symbol: symbol.into(),
            timeframe: timeframe.into(),
            market,
            kind,
        }
    }

    pub fn trades(symbol: impl Into<String>, market: MarketKind) -> Self {
        Self::new(symbol, "", market, DataKind::Trades)
    }

    pub fn ohlcv(
        symbol: impl Into<String>,
        timeframe: impl Into<String>,
        market: MarketKind,
    ) -> Self {
        Self::new(symbol, timeframe, market, DataKind::Ohlcv)
    }

    pub fn ticker(symbol: impl Into<String>, market: MarketKind) -> Self {
        Self::new(symbol, "", market, DataKind::Ticker)
    }

    pub fn funding_rate(symbol: impl Into<String>, market: MarketKind) -> Self {
        Self::new(symbol, "", market, DataKind::FundingRate)
    }
}

impl fmt::Display for StreamKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.timeframe.is_empty() {
            write!(
                f,
                "{}:{}:{}",
                self.symbol,
                self.market.as_str(),
                self.kind.as_str()
            )
        } else {
            write!(
                f,
                "{}:{}:{}:{}",
                self.symbol,
                self.market.as_str(),
                self.kind.as_str(),
                self.timeframe
            )
        }
    }
}

/// Lifecycle of a stream's recorder.
///
/// RUNNING and PAUSED both stay eligible for live pulls; STOPPED is terminal
/// until the stream is re-registered through a fresh `request_until`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum StreamState {
    Running = 0,
    Paused = 1,
    Stopped = 2,
}

impl StreamState {
    fn from_u8(v: u8) -> Self {
        match v {
            1 => Self::Paused,
            2 => Self::Stopped,
            _ => Self::Running,
        }
    }
}

/// Lock-free state cell so the engine can check liveness without taking
/// the recorder's data lock.
#[derive(Debug)]
pub struct StateCell(AtomicU8);

impl StateCell {
    pub fn new(state: StreamState) -> Self {
        Self(AtomicU8::new(state as u8))
    }

    pub fn get(&self) -> StreamState {
        StreamState::from_u8(self.0.load(Ordering::Acquire))
    }

    pub fn set(&self, state: StreamState) {
        self.0.store(state as u8, Ordering::Release);
    }

    pub fn is_stopped(&self) -> bool {
        self.get() == StreamState::Stopped
    }
}

impl Default for StateCell {
    fn default() -> Self {
        Self::new(StreamState::Running)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stream_key_equality_is_structural() {
        let a = StreamKey::ohlcv("BTC/USDT", "1m", MarketKind::Future);
        let b = StreamKey::new("BTC/USDT", "1m", MarketKind::Future, DataKind::Ohlcv);
        assert_eq!(a, b);
        assert_ne!(a, StreamKey::ohlcv("BTC/USDT", "5m", MarketKind::Future));
    }

    #[test]
    fn state_cell_transitions() {
        let cell = StateCell::default();
        assert_eq!(cell.get(), StreamState::Running);
        cell.set(StreamState::Paused);
        assert_eq!(cell.get(), StreamState::Paused);
        cell.set(StreamState::Stopped);
        assert!(cell.is_stopped());
    }

    #[test]
    fn display_includes_timeframe_only_when_set() {
        let k = StreamKey::trades("ETH/USDT", MarketKind::Spot);
        assert_eq!(k.to_string(), "ETH/USDT:spot:trades");
        let k = StreamKey::ohlcv("ETH/USDT", "1h", MarketKind::Spot);
        assert_eq!(k.to_string(), "ETH/USDT:spot:ohlcv:1h");
    }
}
