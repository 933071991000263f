//! Market data and time collaborators
//!
//! The scan core only sees these traits. Concrete sources:
//! - `CsvFeed`: per-symbol/timeframe CSV files
//! - `MemoryFeed`: in-memory series for tests and replays
//! - `SystemClock` / `FixedClock`

pub mod clock;
pub mod csv_feed;
pub mod memory;

use chrono::{DateTime, Utc};

use crate::error::FeedError;
use crate::trading_core::{Candle, Timeframe};

pub use clock::{FixedClock, SystemClock};
pub use csv_feed::CsvFeed;
pub use memory::MemoryFeed;

/// Source of OHLC candles
pub trait MarketDataFeed {
    /// Latest `count` candles, oldest first. The newest may still be forming.
    fn get_candles(&self, symbol: &str, timeframe: Timeframe, count: usize) -> Result<Vec<Candle>, FeedError>;
}

/// Broker-aligned clock
pub trait TimeSource {
    fn now(&self) -> DateTime<Utc>;
}
