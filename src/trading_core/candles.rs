//! Candle types and the per-(symbol, timeframe) candle store

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::debug;

use super::timeframe::Timeframe;
use crate::error::ScanError;
use crate::feed::MarketDataFeed;

/// Price direction shared by gaps, candles, bias and trade plans
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Bullish,
    Bearish,
}

impl Direction {
    pub fn opposite(&self) -> Direction {
        match self {
            Direction::Bullish => Direction::Bearish,
            Direction::Bearish => Direction::Bullish,
        }
    }

    /// +1 for bullish, -1 for bearish
    pub fn sign(&self) -> f64 {
        match self {
            Direction::Bullish => 1.0,
            Direction::Bearish => -1.0,
        }
    }
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Direction::Bullish => write!(f, "bullish"),
            Direction::Bearish => write!(f, "bearish"),
        }
    }
}

/// OHLC candle. A candle's open time is its identifier within a series.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    pub timeframe: Timeframe,
    pub open_time: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    #[serde(default)]
    pub closed: bool,
}

impl Candle {
    pub fn new(
        timeframe: Timeframe,
        open_time: DateTime<Utc>,
        open: f64,
        high: f64,
        low: f64,
        close: f64,
    ) -> Self {
        Self {
            timeframe,
            open_time,
            open,
            high,
            low,
            close,
            closed: false,
        }
    }

    pub fn body(&self) -> f64 {
        (self.close - self.open).abs()
    }

    pub fn range(&self) -> f64 {
        self.high - self.low
    }

    pub fn upper_wick(&self) -> f64 {
        self.high - self.open.max(self.close)
    }

    pub fn lower_wick(&self) -> f64 {
        self.open.min(self.close) - self.low
    }

    pub fn is_bullish(&self) -> bool {
        self.close > self.open
    }

    pub fn is_bearish(&self) -> bool {
        self.close < self.open
    }

    /// Direction of the body, `None` for a doji
    pub fn direction(&self) -> Option<Direction> {
        if self.is_bullish() {
            Some(Direction::Bullish)
        } else if self.is_bearish() {
            Some(Direction::Bearish)
        } else {
            None
        }
    }

    /// Whether the candle's range touches `[bottom, top]`
    pub fn intersects(&self, bottom: f64, top: f64) -> bool {
        self.low <= top && self.high >= bottom
    }

    fn check_shape(&self) -> Result<(), String> {
        let prices = [self.open, self.high, self.low, self.close];
        if prices.iter().any(|p| !p.is_finite()) {
            return Err(format!("non-finite price at {}", self.open_time));
        }
        if self.high < self.open.max(self.close) || self.low > self.open.min(self.close) {
            return Err(format!("high/low do not bracket open/close at {}", self.open_time));
        }
        Ok(())
    }
}

/// Cached candle series per (symbol, timeframe)
#[derive(Debug, Default)]
pub struct CandleStore {
    series: HashMap<(String, Timeframe), Vec<Candle>>,
}

impl CandleStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fetch the latest `count` candles, validate them and mark which have closed.
    ///
    /// Candles already cached as closed keep their cached values.
    pub fn refresh(
        &mut self,
        feed: &dyn MarketDataFeed,
        symbol: &str,
        timeframe: Timeframe,
        count: usize,
        now: DateTime<Utc>,
    ) -> Result<&[Candle], ScanError> {
        let fetched = feed.get_candles(symbol, timeframe, count)?;
        let key = (symbol.to_string(), timeframe);
        let previous = self.series.get(&key).map(|v| v.as_slice()).unwrap_or(&[]);

        let normalized = normalize(symbol, timeframe, fetched, previous, now)?;
        debug!(
            "{} {}: {} candles ({} closed)",
            symbol,
            timeframe,
            normalized.len(),
            normalized.iter().filter(|c| c.closed).count()
        );

        let entry = self.series.entry(key).or_default();
        *entry = normalized;
        Ok(entry.as_slice())
    }

    pub fn series(&self, symbol: &str, timeframe: Timeframe) -> &[Candle] {
        self.series
            .get(&(symbol.to_string(), timeframe))
            .map(|v| v.as_slice())
            .unwrap_or(&[])
    }

    /// Closed candles only, oldest first
    pub fn closed(&self, symbol: &str, timeframe: Timeframe) -> &[Candle] {
        closed_prefix(self.series(symbol, timeframe))
    }

    /// Latest traded price (close of the newest candle, forming or not)
    pub fn last_price(&self, symbol: &str, timeframe: Timeframe) -> Option<f64> {
        self.series(symbol, timeframe).last().map(|c| c.close)
    }

    pub fn clear(&mut self) {
        self.series.clear();
    }
}

/// Leading run of closed candles in an ordered series
pub fn closed_prefix(candles: &[Candle]) -> &[Candle] {
    let end = candles.iter().position(|c| !c.closed).unwrap_or(candles.len());
    &candles[..end]
}

fn normalize(
    symbol: &str,
    timeframe: Timeframe,
    fetched: Vec<Candle>,
    previous: &[Candle],
    now: DateTime<Utc>,
) -> Result<Vec<Candle>, ScanError> {
    let invalid = |reason: String| ScanError::InvalidCandles {
        symbol: symbol.to_string(),
        timeframe,
        reason,
    };

    let mut out = Vec::with_capacity(fetched.len());
    let mut last_open: Option<DateTime<Utc>> = None;

    for mut candle in fetched {
        if let Some(prev) = last_open {
            if candle.open_time <= prev {
                return Err(invalid(format!(
                    "candles out of order: {} follows {}",
                    candle.open_time, prev
                )));
            }
        }
        candle.check_shape().map_err(invalid)?;
        last_open = Some(candle.open_time);

        candle.timeframe = timeframe;
        candle.closed = timeframe.is_closed(candle.open_time, now);

        // A closed candle is immutable once seen
        if candle.closed {
            if let Ok(idx) = previous.binary_search_by_key(&candle.open_time, |c| c.open_time) {
                if previous[idx].closed {
                    candle = previous[idx].clone();
                }
            }
        }
        out.push(candle);
    }

    Ok(out)
}
