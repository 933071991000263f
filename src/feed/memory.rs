use std::cell::RefCell;
use std::collections::{HashMap, HashSet};

use super::MarketDataFeed;
use crate::error::FeedError;
use crate::trading_core::{Candle, Timeframe};

/// In-memory series keyed by (symbol, timeframe)
#[derive(Debug, Default)]
pub struct MemoryFeed {
    series: RefCell<HashMap<(String, Timeframe), Vec<Candle>>>,
    offline: RefCell<HashSet<String>>,
    requests: RefCell<Vec<(String, Timeframe)>>,
}

impl MemoryFeed {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace a series; candles are expected oldest first
    pub fn set(&self, symbol: &str, timeframe: Timeframe, candles: Vec<Candle>) {
        self.series
            .borrow_mut()
            .insert((symbol.to_string(), timeframe), candles);
    }

    pub fn push(&self, symbol: &str, timeframe: Timeframe, candle: Candle) {
        self.series
            .borrow_mut()
            .entry((symbol.to_string(), timeframe))
            .or_default()
            .push(candle);
    }

    /// Make every request for `symbol` fail as unavailable
    pub fn set_offline(&self, symbol: &str, offline: bool) {
        let mut set = self.offline.borrow_mut();
        if offline {
            set.insert(symbol.to_string());
        } else {
            set.remove(symbol);
        }
    }

    /// Every (symbol, timeframe) requested so far, in request order
    pub fn requests(&self) -> Vec<(String, Timeframe)> {
        self.requests.borrow().clone()
    }
}

impl MarketDataFeed for MemoryFeed {
    fn get_candles(&self, symbol: &str, timeframe: Timeframe, count: usize) -> Result<Vec<Candle>, FeedError> {
        self.requests.borrow_mut().push((symbol.to_string(), timeframe));
        if self.offline.borrow().contains(symbol) {
            return Err(FeedError::Unavailable {
                symbol: symbol.to_string(),
                timeframe,
                reason: "connection lost".to_string(),
            });
        }

        let series = self.series.borrow();
        let candles = series
            .get(&(symbol.to_string(), timeframe))
            .map(|v| v.as_slice())
            .unwrap_or(&[]);
        let skip = candles.len().saturating_sub(count);
        Ok(candles[skip..].to_vec())
    }
}
