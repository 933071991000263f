//! Timeframe hierarchy
//!
//! Timeframes are ordered highest to lowest. The scanner walks the top-level
//! scan levels (MN1 → H1) and consults lower timeframes only as 2CR fallback
//! targets.

use chrono::{DateTime, Datelike, Duration, TimeZone, Timelike, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Chart timeframe, declared highest to lowest so the derived ordering
/// sorts higher timeframes first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Timeframe {
    #[serde(rename = "MN1")]
    Monthly,
    #[serde(rename = "W1")]
    Weekly,
    #[serde(rename = "D1")]
    Daily,
    H4,
    H1,
    M15,
    M5,
    M1,
}

impl Timeframe {
    /// Every timeframe, highest first
    pub const ALL: [Timeframe; 8] = [
        Timeframe::Monthly,
        Timeframe::Weekly,
        Timeframe::Daily,
        Timeframe::H4,
        Timeframe::H1,
        Timeframe::M15,
        Timeframe::M5,
        Timeframe::M1,
    ];

    /// Timeframes iterated at the top level of a scan
    pub const SCAN_LEVELS: [Timeframe; 5] = [
        Timeframe::Monthly,
        Timeframe::Weekly,
        Timeframe::Daily,
        Timeframe::H4,
        Timeframe::H1,
    ];

    pub fn code(&self) -> &'static str {
        match self {
            Timeframe::Monthly => "MN1",
            Timeframe::Weekly => "W1",
            Timeframe::Daily => "D1",
            Timeframe::H4 => "H4",
            Timeframe::H1 => "H1",
            Timeframe::M15 => "M15",
            Timeframe::M5 => "M5",
            Timeframe::M1 => "M1",
        }
    }

    /// Open time of the candle following one that opened at `open_time`
    pub fn next_open(&self, open_time: DateTime<Utc>) -> DateTime<Utc> {
        let midnight = |t: DateTime<Utc>| {
            Utc.with_ymd_and_hms(t.year(), t.month(), t.day(), 0, 0, 0)
                .single()
                .unwrap_or(t)
        };

        match self {
            Timeframe::Monthly => {
                let (year, month) = if open_time.month() == 12 {
                    (open_time.year() + 1, 1)
                } else {
                    (open_time.year(), open_time.month() + 1)
                };
                Utc.with_ymd_and_hms(year, month, 1, 0, 0, 0)
                    .single()
                    .unwrap_or(open_time + Duration::days(31))
            }
            Timeframe::Weekly => {
                let days_to_monday = 7 - open_time.weekday().num_days_from_monday() as i64;
                midnight(open_time + Duration::days(days_to_monday))
            }
            Timeframe::Daily => midnight(open_time + Duration::days(1)),
            Timeframe::H4 | Timeframe::H1 | Timeframe::M15 | Timeframe::M5 | Timeframe::M1 => {
                let block = self.block_minutes();
                let minute_of_day = (open_time.hour() * 60 + open_time.minute()) as i64;
                let next_block = (minute_of_day / block + 1) * block;
                midnight(open_time) + Duration::minutes(next_block)
            }
        }
    }

    /// Whether a candle that opened at `open_time` has closed by `now`
    pub fn is_closed(&self, open_time: DateTime<Utc>, now: DateTime<Utc>) -> bool {
        now >= self.next_open(open_time)
    }

    fn block_minutes(&self) -> i64 {
        match self {
            Timeframe::H4 => 240,
            Timeframe::H1 => 60,
            Timeframe::M15 => 15,
            Timeframe::M5 => 5,
            Timeframe::M1 => 1,
            // Calendar-aligned timeframes never reach here
            Timeframe::Monthly | Timeframe::Weekly | Timeframe::Daily => 1440,
        }
    }

    /// All timeframes strictly below this one, highest first
    pub fn lower(&self) -> &'static [Timeframe] {
        let idx = Self::ALL.iter().position(|tf| tf == self).unwrap_or(Self::ALL.len() - 1);
        &Self::ALL[idx + 1..]
    }
}

impl std::fmt::Display for Timeframe {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.code())
    }
}

impl FromStr for Timeframe {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .iter()
            .copied()
            .find(|tf| tf.code().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| anyhow::anyhow!("Unknown timeframe: {}", s))
    }
}

/// Ordered scan levels plus the lower-timeframe lookup used for 2CR fallback
#[derive(Debug, Clone)]
pub struct TimeframeHierarchy {
    levels: Vec<Timeframe>,
    fallback_depth: usize,
}

impl TimeframeHierarchy {
    pub fn new(fallback_depth: usize) -> Self {
        Self {
            levels: Timeframe::SCAN_LEVELS.to_vec(),
            fallback_depth,
        }
    }

    /// Top-level scan order, highest first
    pub fn levels(&self) -> &[Timeframe] {
        &self.levels
    }

    /// Lower timeframes tried as 2CR fallback for an anchor on `tf`
    pub fn fallback_candidates(&self, tf: Timeframe) -> &'static [Timeframe] {
        let lower = tf.lower();
        &lower[..self.fallback_depth.min(lower.len())]
    }

    pub fn fallback_depth(&self) -> usize {
        self.fallback_depth
    }
}
