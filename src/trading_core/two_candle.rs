//! Two-Candle Rejection (2CR) Detection
//!
//! State machine scoped to one mitigated FVG:
//!
//! ```text
//! Awaiting → Rejected(first-candle | second-candle sweep) → Confirmed
//!                    ↓ (no follow-through within expiry, or adverse close)
//!                 Awaiting
//! ```
//!
//! Detection is staged: the FVG's own timeframe first, then the lower
//! timeframes of the hierarchy, stopping at the first level that matches.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;
use uuid::Uuid;

use super::candles::{Candle, Direction};
use super::fvg::Fvg;
use super::timeframe::Timeframe;
use crate::error::ScanError;

/// Second-candle sweep needs a rejection wick of at least this share of its body
const SWEEP_WICK_RATIO: f64 = 0.5;
/// Follow-through wick/body ratio above which the setup is flagged ugly
const UGLY_WICK_RATIO: f64 = 1.5;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TwoCrConfig {
    /// Rejection wick must exceed this multiple of the body (default: 0.7)
    pub rejection_wick_ratio: f64,
    /// Most recent post-mitigation candles examined (default: 30)
    pub scan_window: usize,
    /// Candles after the second candle allowed for follow-through (default: 3)
    pub setup_expiry: usize,
}

impl Default for TwoCrConfig {
    fn default() -> Self {
        Self {
            rejection_wick_ratio: 0.7,
            scan_window: 30,
            setup_expiry: 3,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectionKind {
    /// One candle wicks into the gap and closes back out
    FirstCandle,
    /// A candle sweeps the previous candle's extreme and closes back
    SecondCandleSweep,
}

impl std::fmt::Display for RejectionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RejectionKind::FirstCandle => write!(f, "first-candle rejection"),
            RejectionKind::SecondCandleSweep => write!(f, "second-candle sweep"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FollowThrough {
    Expected,
    Confirmed,
}

impl std::fmt::Display for FollowThrough {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FollowThrough::Expected => write!(f, "expected"),
            FollowThrough::Confirmed => write!(f, "confirmed"),
        }
    }
}

/// Rejection pattern found at a mitigated FVG
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TwoCrSetup {
    pub fvg_id: Uuid,
    pub direction: Direction,
    pub anchor_timeframe: Timeframe,
    pub detection_timeframe: Timeframe,
    pub kind: RejectionKind,
    pub first: Candle,
    pub second: Candle,
    pub follow_through: FollowThrough,
    pub follow_through_candle: Option<Candle>,
    /// Follow-through with a long adverse wick that fails to clear the second candle
    pub ugly: bool,
}

impl TwoCrSetup {
    pub fn is_confirmed(&self) -> bool {
        self.follow_through == FollowThrough::Confirmed
    }

    pub fn is_fallback(&self) -> bool {
        self.detection_timeframe != self.anchor_timeframe
    }

    /// Candle that carried the rejection
    pub fn rejection_candle(&self) -> &Candle {
        match self.kind {
            RejectionKind::FirstCandle => &self.first,
            RejectionKind::SecondCandleSweep => &self.second,
        }
    }

    /// Adverse extreme of the two rejection candles
    pub fn adverse_extreme(&self) -> f64 {
        match self.direction {
            Direction::Bullish => self.first.low.min(self.second.low),
            Direction::Bearish => self.first.high.max(self.second.high),
        }
    }

    pub fn candle_times(&self) -> Vec<DateTime<Utc>> {
        let mut times = vec![self.first.open_time, self.second.open_time];
        if let Some(ft) = &self.follow_through_candle {
            times.push(ft.open_time);
        }
        times
    }
}

/// Outcome of staged detection for one FVG
#[derive(Debug, Clone)]
pub enum TwoCrOutcome {
    MatchedSame(TwoCrSetup),
    MatchedFallback(TwoCrSetup),
    NoMatch,
}

impl TwoCrOutcome {
    pub fn setup(&self) -> Option<&TwoCrSetup> {
        match self {
            TwoCrOutcome::MatchedSame(s) | TwoCrOutcome::MatchedFallback(s) => Some(s),
            TwoCrOutcome::NoMatch => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct TwoCrDetection {
    pub outcome: TwoCrOutcome,
    /// Timeframes tried, in order
    pub attempts: Vec<Timeframe>,
}

/// Run detection on the FVG's own timeframe, then on each fallback timeframe.
///
/// `closed_candles` supplies the closed candles of a timeframe. A level with a
/// pending (expected) or confirmed setup ends the search.
pub fn detect_staged<F>(
    fvg: &Fvg,
    fallbacks: &[Timeframe],
    config: &TwoCrConfig,
    mut closed_candles: F,
) -> Result<TwoCrDetection, ScanError>
where
    F: FnMut(Timeframe) -> Result<Vec<Candle>, ScanError>,
{
    let mut attempts = Vec::with_capacity(1 + fallbacks.len());

    let same = closed_candles(fvg.timeframe)?;
    attempts.push(fvg.timeframe);
    if let Some(setup) = detect(fvg, fvg.timeframe, &same, config) {
        return Ok(TwoCrDetection {
            outcome: TwoCrOutcome::MatchedSame(setup),
            attempts,
        });
    }

    for &tf in fallbacks {
        let candles = closed_candles(tf)?;
        attempts.push(tf);
        if let Some(setup) = detect(fvg, tf, &candles, config) {
            return Ok(TwoCrDetection {
                outcome: TwoCrOutcome::MatchedFallback(setup),
                attempts,
            });
        }
    }

    Ok(TwoCrDetection {
        outcome: TwoCrOutcome::NoMatch,
        attempts,
    })
}

/// Run the rejection state machine over one timeframe's closed candles.
///
/// Returns the first confirmed setup, or the setup still awaiting
/// follow-through when the candles run out, or `None`.
pub fn detect(fvg: &Fvg, timeframe: Timeframe, closed: &[Candle], config: &TwoCrConfig) -> Option<TwoCrSetup> {
    let mitigated_at = fvg.mitigated_at?;
    let start = closed.partition_point(|c| c.open_time < mitigated_at);
    let post = &closed[start..];
    let candles = &post[post.len().saturating_sub(config.scan_window)..];

    let direction = fvg.direction;
    let mut i = 0;
    while i + 1 < candles.len() {
        let (first, second) = (&candles[i], &candles[i + 1]);

        let kind = if is_first_candle_rejection(first, fvg, config) && !closes_adverse(second, fvg) {
            RejectionKind::FirstCandle
        } else if is_sweep_rejection(first, second, fvg) {
            RejectionKind::SecondCandleSweep
        } else {
            i += 1;
            continue;
        };

        debug!(
            "{} 2CR {} at {} on {}",
            direction, kind, second.open_time, timeframe
        );

        let window_end = i + 2 + config.setup_expiry;
        let mut invalidated = false;
        for candle in candles.iter().take(window_end).skip(i + 2) {
            if is_follow_through(candle, second, direction) {
                return Some(TwoCrSetup {
                    fvg_id: fvg.id,
                    direction,
                    anchor_timeframe: fvg.timeframe,
                    detection_timeframe: timeframe,
                    kind,
                    first: first.clone(),
                    second: second.clone(),
                    follow_through: FollowThrough::Confirmed,
                    follow_through_candle: Some(candle.clone()),
                    ugly: is_ugly(candle, second, direction),
                });
            }
            if closes_adverse(candle, fvg) {
                invalidated = true;
                break;
            }
        }

        if !invalidated && window_end > candles.len() {
            return Some(TwoCrSetup {
                fvg_id: fvg.id,
                direction,
                anchor_timeframe: fvg.timeframe,
                detection_timeframe: timeframe,
                kind,
                first: first.clone(),
                second: second.clone(),
                follow_through: FollowThrough::Expected,
                follow_through_candle: None,
                ugly: false,
            });
        }

        debug!("{} 2CR at {} invalidated", direction, second.open_time);
        i += 1;
    }

    None
}

fn is_first_candle_rejection(candle: &Candle, fvg: &Fvg, config: &TwoCrConfig) -> bool {
    let body = candle.body();
    match fvg.direction {
        Direction::Bullish => {
            candle.is_bullish()
                && candle.low <= fvg.top
                && candle.close >= fvg.top
                && candle.lower_wick() > body * config.rejection_wick_ratio
        }
        Direction::Bearish => {
            candle.is_bearish()
                && candle.high >= fvg.bottom
                && candle.close <= fvg.bottom
                && candle.upper_wick() > body * config.rejection_wick_ratio
        }
    }
}

fn is_sweep_rejection(first: &Candle, second: &Candle, fvg: &Fvg) -> bool {
    let body = second.body();
    match fvg.direction {
        Direction::Bullish => {
            second.low < first.low
                && second.low <= fvg.top
                && second.is_bullish()
                && second.close >= fvg.bottom
                && second.lower_wick() > body * SWEEP_WICK_RATIO
        }
        Direction::Bearish => {
            second.high > first.high
                && second.high >= fvg.bottom
                && second.is_bearish()
                && second.close <= fvg.top
                && second.upper_wick() > body * SWEEP_WICK_RATIO
        }
    }
}

/// Close in the trade direction with expansion past the second candle's extreme
fn is_follow_through(candle: &Candle, second: &Candle, direction: Direction) -> bool {
    match direction {
        Direction::Bullish => candle.is_bullish() && candle.high > second.high,
        Direction::Bearish => candle.is_bearish() && candle.low < second.low,
    }
}

/// Close through the far side of the gap
fn closes_adverse(candle: &Candle, fvg: &Fvg) -> bool {
    match fvg.direction {
        Direction::Bullish => candle.close < fvg.bottom,
        Direction::Bearish => candle.close > fvg.top,
    }
}

fn is_ugly(follow: &Candle, second: &Candle, direction: Direction) -> bool {
    let body = follow.body();
    match direction {
        Direction::Bullish => follow.lower_wick() > body * UGLY_WICK_RATIO && follow.close < second.high,
        Direction::Bearish => follow.upper_wick() > body * UGLY_WICK_RATIO && follow.close > second.low,
    }
}
