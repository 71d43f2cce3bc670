//! Error taxonomy for the cache and sync engine.
//!
//! `CacheError` variants are programming/config errors and propagate
//! synchronously to callers of append/prepend/convert. `FetchError` and
//! `TeardownError` are contained inside an engine tick and only ever logged.

use std::fmt;

use crate::models::DataKind;

/// Errors raised by the cache/recorder layer.
#[derive(Debug, Clone)]
pub enum CacheError {
    /// Incoming records do not match the buffer's record schema.
    SchemaMismatch {
        expected: DataKind,
        got: DataKind,
    },
    /// A record carried no timestamp and no explicit one was supplied.
    MissingTimestamp,
    /// A raw row could not be decoded into the target schema.
    MalformedRow {
        kind: DataKind,
        detail: String,
    },
    /// The data kind has no canonical record schema.
    UnsupportedKind(DataKind),
}

impl fmt::Display for CacheError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SchemaMismatch { expected, got } => {
                write!(
                    f,
                    "schema mismatch: buffer holds {} records, got {}",
                    expected.as_str(),
                    got.as_str()
                )
            }
            Self::MissingTimestamp => {
                write!(f, "record has no timestamp and no explicit one was supplied")
            }
            Self::MalformedRow { kind, detail } => {
                write!(f, "malformed {} row: {}", kind.as_str(), detail)
            }
            Self::UnsupportedKind(kind) => {
                write!(f, "unsupported data kind: {}", kind.as_str())
            }
        }
    }
}

impl std::error::Error for CacheError {}

/// Transient upstream failure during a live pull or historical fetch.
///
/// Transport and protocol failures are distinguished so the engine's retry
/// logic can be tuned per class later; both are retryable today.
#[derive(Debug, Clone)]
pub enum FetchError {
    /// Network-level failure (timeout, connection reset, DNS).
    Transport(String),
    /// The venue answered but the payload was unusable.
    Protocol(String),
}

impl fmt::Display for FetchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Transport(msg) => write!(f, "transport error: {}", msg),
            Self::Protocol(msg) => write!(f, "protocol error: {}", msg),
        }
    }
}

impl std::error::Error for FetchError {}

/// Failure tearing down an upstream stream. Non-fatal, logged only.
#[derive(Debug, Clone)]
pub struct TeardownError(pub String);

impl fmt::Display for TeardownError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "teardown failed: {}", self.0)
    }
}

impl std::error::Error for TeardownError {}
