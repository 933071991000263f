//! CSV candle files: `<dir>/<SYMBOL>_<TF>.csv`
//!
//! Columns `time,open,high,low,close`. `time` is RFC 3339, unix seconds, or
//! `YYYY-MM-DD HH:MM[:SS]` read as UTC.

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use super::MarketDataFeed;
use crate::error::FeedError;
use crate::trading_core::{Candle, Timeframe};

#[derive(Debug, Deserialize)]
struct CsvRow {
    time: String,
    open: f64,
    high: f64,
    low: f64,
    close: f64,
}

/// File-backed feed, re-read on every request so an external writer can append
#[derive(Debug, Clone)]
pub struct CsvFeed {
    dir: PathBuf,
}

impl CsvFeed {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn path_for(&self, symbol: &str, timeframe: Timeframe) -> PathBuf {
        self.dir.join(format!("{}_{}.csv", symbol, timeframe.code()))
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

impl MarketDataFeed for CsvFeed {
    fn get_candles(&self, symbol: &str, timeframe: Timeframe, count: usize) -> Result<Vec<Candle>, FeedError> {
        let path = self.path_for(symbol, timeframe);
        let unavailable = |reason: String| FeedError::Unavailable {
            symbol: symbol.to_string(),
            timeframe,
            reason,
        };
        let malformed = |reason: String| FeedError::Malformed {
            symbol: symbol.to_string(),
            timeframe,
            reason,
        };

        let mut reader = csv::Reader::from_path(&path)
            .map_err(|e| unavailable(format!("{}: {}", path.display(), e)))?;

        let mut candles = Vec::new();
        for (line, result) in reader.deserialize::<CsvRow>().enumerate() {
            let row = result.map_err(|e| malformed(format!("row {}: {}", line + 1, e)))?;
            let open_time = parse_time(&row.time)
                .ok_or_else(|| malformed(format!("row {}: bad time {:?}", line + 1, row.time)))?;
            candles.push(Candle::new(timeframe, open_time, row.open, row.high, row.low, row.close));
        }

        let skip = candles.len().saturating_sub(count);
        Ok(candles.split_off(skip))
    }
}

fn parse_time(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(t) = DateTime::parse_from_rfc3339(raw) {
        return Some(t.with_timezone(&Utc));
    }
    if let Ok(secs) = raw.parse::<i64>() {
        return DateTime::from_timestamp(secs, 0);
    }
    ["%Y-%m-%d %H:%M:%S", "%Y-%m-%d %H:%M", "%Y.%m.%d %H:%M"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(raw, fmt).ok())
        .map(|naive| naive.and_utc())
}
