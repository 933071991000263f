//! Fair Value Gap detection and lifecycle tracking
//!
//! A three-candle gap where the first candle's extreme does not overlap the
//! third candle's extreme:
//! - Bullish: c1.high < c3.low, gap = [c1.high, c3.low]
//! - Bearish: c1.low > c3.high, gap = [c3.high, c1.low]
//!
//! Status only moves forward: Active → Mitigated → Invalidated
//! (or Active → Invalidated when the gap ages out of the lookback window).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;
use uuid::Uuid;

use super::candles::{Candle, Direction};
use super::timeframe::Timeframe;

/// Invalidated gaps kept around for inspection
const MAX_INVALIDATED_HISTORY: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FvgStatus {
    /// Not yet traded back into
    Active,
    /// Price has traded into the gap at least once
    Mitigated,
    /// Aged out of the lookback window
    Invalidated,
}

/// Detected Fair Value Gap
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Fvg {
    pub id: Uuid,
    pub direction: Direction,
    pub top: f64,
    pub bottom: f64,
    pub timeframe: Timeframe,
    /// Open times of the three formation candles
    pub candle_times: [DateTime<Utc>; 3],
    /// Open time of the third formation candle
    pub created_at: DateTime<Utc>,
    pub status: FvgStatus,
    pub mitigated_at: Option<DateTime<Utc>>,
    /// Formed inside an already-mitigated gap of the same direction
    pub reentry: bool,
}

impl Fvg {
    pub fn size(&self) -> f64 {
        self.top - self.bottom
    }

    pub fn is_live(&self) -> bool {
        self.status != FvgStatus::Invalidated
    }

    /// Whether `[bottom, top]` lies within this gap
    pub fn contains_range(&self, bottom: f64, top: f64) -> bool {
        bottom >= self.bottom && top <= self.top
    }

    /// Stable price-level identity used in dedup keys
    pub fn level_identity(&self) -> String {
        format!("{:.5}-{:.5}", self.bottom, self.top)
    }
}

/// Check a candle triple for a gap of at least `min_size`.
/// Returns (direction, bottom, top).
pub fn detect_gap(c1: &Candle, _c2: &Candle, c3: &Candle, min_size: f64) -> Option<(Direction, f64, f64)> {
    if c1.high < c3.low {
        let (bottom, top) = (c1.high, c3.low);
        return (top - bottom >= min_size).then_some((Direction::Bullish, bottom, top));
    }
    if c1.low > c3.high {
        let (bottom, top) = (c3.high, c1.low);
        return (top - bottom >= min_size).then_some((Direction::Bearish, bottom, top));
    }
    None
}

/// Changes produced by one tracker update
#[derive(Debug, Clone, Default)]
pub struct FvgUpdate {
    pub created: Vec<Uuid>,
    pub mitigated: Vec<Uuid>,
    pub invalidated: Vec<Uuid>,
}

impl FvgUpdate {
    pub fn is_empty(&self) -> bool {
        self.created.is_empty() && self.mitigated.is_empty() && self.invalidated.is_empty()
    }
}

/// Gap set for one (symbol, timeframe), carried across cycles
#[derive(Debug, Clone)]
pub struct FvgTracker {
    timeframe: Timeframe,
    fvgs: Vec<Fvg>,
    last_processed: Option<DateTime<Utc>>,
}

impl FvgTracker {
    pub fn new(timeframe: Timeframe) -> Self {
        Self {
            timeframe,
            fvgs: Vec::new(),
            last_processed: None,
        }
    }

    /// Process closed candles not seen before, oldest first.
    ///
    /// `closed` is the current lookback window. Each new candle is checked for
    /// mitigation against existing gaps before being used as the third candle of
    /// a new gap, so a gap is never mitigated by its own formation candles.
    pub fn update(&mut self, closed: &[Candle], min_size: f64) -> FvgUpdate {
        let mut update = FvgUpdate::default();

        let start = match self.last_processed {
            Some(last) => closed
                .iter()
                .position(|c| c.open_time > last)
                .unwrap_or(closed.len()),
            None => 0,
        };

        for i in start..closed.len() {
            let candle = &closed[i];

            for fvg in self.fvgs.iter_mut() {
                if fvg.status == FvgStatus::Active
                    && fvg.created_at < candle.open_time
                    && candle.intersects(fvg.bottom, fvg.top)
                {
                    fvg.status = FvgStatus::Mitigated;
                    fvg.mitigated_at = Some(candle.open_time);
                    update.mitigated.push(fvg.id);
                    debug!(
                        "{} {} FVG {} mitigated at {}",
                        self.timeframe,
                        fvg.direction,
                        fvg.level_identity(),
                        candle.open_time
                    );
                }
            }

            if i < 2 {
                continue;
            }
            let (c1, c2) = (&closed[i - 2], &closed[i - 1]);
            if let Some((direction, bottom, top)) = detect_gap(c1, c2, candle, min_size) {
                let reentry = self.fvgs.iter().any(|f| {
                    f.status == FvgStatus::Mitigated
                        && f.direction == direction
                        && f.contains_range(bottom, top)
                });
                let fvg = Fvg {
                    id: Uuid::new_v4(),
                    direction,
                    top,
                    bottom,
                    timeframe: self.timeframe,
                    candle_times: [c1.open_time, c2.open_time, candle.open_time],
                    created_at: candle.open_time,
                    status: FvgStatus::Active,
                    mitigated_at: None,
                    reentry,
                };
                debug!(
                    "{} {} FVG {} formed at {}{}",
                    self.timeframe,
                    direction,
                    fvg.level_identity(),
                    candle.open_time,
                    if reentry { " (reentry)" } else { "" }
                );
                update.created.push(fvg.id);
                self.fvgs.push(fvg);
            }
        }

        if let Some(last) = closed.last() {
            self.last_processed = Some(last.open_time);
        }

        if let Some(window_start) = closed.first().map(|c| c.open_time) {
            for fvg in self.fvgs.iter_mut() {
                if fvg.is_live() && fvg.created_at < window_start {
                    fvg.status = FvgStatus::Invalidated;
                    update.invalidated.push(fvg.id);
                }
            }
        }
        self.prune_history();

        update
    }

    fn prune_history(&mut self) {
        let invalidated = self
            .fvgs
            .iter()
            .filter(|f| f.status == FvgStatus::Invalidated)
            .count();
        let mut excess = invalidated.saturating_sub(MAX_INVALIDATED_HISTORY);
        if excess == 0 {
            return;
        }
        // Gaps are stored in formation order, so the first invalidated are the oldest
        self.fvgs.retain(|f| {
            if excess > 0 && f.status == FvgStatus::Invalidated {
                excess -= 1;
                false
            } else {
                true
            }
        });
    }

    pub fn timeframe(&self) -> Timeframe {
        self.timeframe
    }

    pub fn fvgs(&self) -> &[Fvg] {
        &self.fvgs
    }

    pub fn get(&self, id: &Uuid) -> Option<&Fvg> {
        self.fvgs.iter().find(|f| f.id == *id)
    }

    /// Active and mitigated gaps, oldest first
    pub fn live(&self) -> impl Iterator<Item = &Fvg> {
        self.fvgs.iter().filter(|f| f.is_live())
    }

    /// Mitigated gaps ordered for 2CR: reentry gaps first, then newest first
    pub fn mitigated_by_priority(&self) -> Vec<&Fvg> {
        let mut mitigated: Vec<&Fvg> = self
            .fvgs
            .iter()
            .filter(|f| f.status == FvgStatus::Mitigated)
            .collect();
        mitigated.sort_by(|a, b| b.reentry.cmp(&a.reentry).then(b.created_at.cmp(&a.created_at)));
        mitigated
    }
}
