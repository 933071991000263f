//! Symbol-scope error types
//!
//! A `ScanError` aborts the current symbol's evaluation for one cycle only.
//! Startup and I/O paths use `anyhow` instead.

use thiserror::Error;

use crate::trading_core::Timeframe;

/// Failure reported by a market data feed
#[derive(Debug, Error)]
pub enum FeedError {
    #[error("feed unavailable for {symbol} {timeframe}: {reason}")]
    Unavailable {
        symbol: String,
        timeframe: Timeframe,
        reason: String,
    },
    #[error("malformed candle data for {symbol} {timeframe}: {reason}")]
    Malformed {
        symbol: String,
        timeframe: Timeframe,
        reason: String,
    },
}

/// Failure scoped to one symbol for one cycle
#[derive(Debug, Error)]
pub enum ScanError {
    #[error("feed unavailable: {0}")]
    FeedUnavailable(String),
    #[error("invalid candles for {symbol} {timeframe}: {reason}")]
    InvalidCandles {
        symbol: String,
        timeframe: Timeframe,
        reason: String,
    },
}

impl ScanError {
    /// Transient errors are retried next cycle; the rest are invariant violations
    pub fn is_transient(&self) -> bool {
        matches!(self, ScanError::FeedUnavailable(_))
    }
}

impl From<FeedError> for ScanError {
    fn from(err: FeedError) -> Self {
        match err {
            FeedError::Unavailable { .. } => ScanError::FeedUnavailable(err.to_string()),
            FeedError::Malformed {
                symbol,
                timeframe,
                reason,
            } => ScanError::InvalidCandles {
                symbol,
                timeframe,
                reason,
            },
        }
    }
}
