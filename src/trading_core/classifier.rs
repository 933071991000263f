//! Candle Classification
//!
//! Labels candles by how they react at a level:
//! - Disrespect: large body, small wicks (trend continuation through a level)
//! - Respect: long wicks, small body (rejection at a level)
//!
//! Pure functions; the same pair always yields the same classification.

use serde::{Deserialize, Serialize};

use super::candles::{Candle, Direction};

/// Thresholds for respect/disrespect classification
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ClassifierConfig {
    /// Body/range above this is a disrespect candle (default: 0.7)
    pub disrespect_body_ratio: f64,
    /// Wick share (1 - body/range) above this is a respect candle (default: 0.7)
    pub respect_wick_ratio: f64,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            disrespect_body_ratio: 0.7,
            respect_wick_ratio: 0.7,
        }
    }
}

/// Which side a respect candle rejected
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RespectSide {
    /// Long upper wick: price refused to stay high
    Resistance,
    /// Long lower wick: price refused to stay low
    Support,
    Both,
}

/// Exactly one label per candle
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum CandleClass {
    Disrespect { direction: Direction, strength: f64 },
    Respect { side: RespectSide, strength: f64 },
    Unclassified,
}

impl CandleClass {
    pub fn is_disrespect(&self) -> bool {
        matches!(self, CandleClass::Disrespect { .. })
    }

    pub fn is_respect(&self) -> bool {
        matches!(self, CandleClass::Respect { .. })
    }
}

/// Two-candle behavior pattern
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum CandlePattern {
    /// Respect followed by disrespect
    Breakout { direction: Direction },
    /// Disrespect followed by a respect candle rejecting against it
    PotentialReversal { direction: Direction },
    /// Two disrespect candles in the same direction
    StrongTrend { direction: Direction },
    /// Two respect candles
    Consolidation,
}

/// Classification of the newer candle of a consecutive pair
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PairClassification {
    pub previous: CandleClass,
    pub current: CandleClass,
    pub pattern: Option<CandlePattern>,
}

/// Classify one candle from its body/wick proportions
pub fn classify_candle(candle: &Candle, config: &ClassifierConfig) -> CandleClass {
    let range = candle.range();
    if range <= 0.0 {
        return CandleClass::Unclassified;
    }

    let body_ratio = candle.body() / range;
    let wick_ratio = 1.0 - body_ratio;

    if body_ratio > config.disrespect_body_ratio {
        match candle.direction() {
            Some(direction) => CandleClass::Disrespect {
                direction,
                strength: body_ratio,
            },
            None => CandleClass::Unclassified,
        }
    } else if wick_ratio > config.respect_wick_ratio {
        let upper = candle.upper_wick();
        let lower = candle.lower_wick();
        let side = if upper > lower * 2.0 {
            RespectSide::Resistance
        } else if lower > upper * 2.0 {
            RespectSide::Support
        } else {
            RespectSide::Both
        };
        CandleClass::Respect {
            side,
            strength: wick_ratio,
        }
    } else {
        CandleClass::Unclassified
    }
}

/// Classify the newer of two consecutive closed candles and detect the pair pattern
pub fn classify_pair(previous: &Candle, current: &Candle, config: &ClassifierConfig) -> PairClassification {
    let prev_class = classify_candle(previous, config);
    let curr_class = classify_candle(current, config);

    PairClassification {
        previous: prev_class,
        current: curr_class,
        pattern: detect_pattern(&prev_class, &curr_class),
    }
}

fn detect_pattern(previous: &CandleClass, current: &CandleClass) -> Option<CandlePattern> {
    match (previous, current) {
        (CandleClass::Respect { .. }, CandleClass::Disrespect { direction, .. }) => {
            Some(CandlePattern::Breakout { direction: *direction })
        }
        (CandleClass::Disrespect { direction, .. }, CandleClass::Respect { side, .. }) => {
            let rejected = matches!(
                (direction, side),
                (Direction::Bullish, RespectSide::Resistance) | (Direction::Bearish, RespectSide::Support)
            );
            rejected.then(|| CandlePattern::PotentialReversal {
                direction: direction.opposite(),
            })
        }
        (CandleClass::Disrespect { direction: a, .. }, CandleClass::Disrespect { direction: b, .. })
            if a == b =>
        {
            Some(CandlePattern::StrongTrend { direction: *a })
        }
        (CandleClass::Respect { .. }, CandleClass::Respect { .. }) => Some(CandlePattern::Consolidation),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::trading_core::Timeframe;
    use chrono::Utc;

    fn candle(o: f64, h: f64, l: f64, c: f64) -> Candle {
        Candle::new(Timeframe::H1, Utc::now(), o, h, l, c)
    }

    #[test]
    fn test_disrespect_candle() {
        let config = ClassifierConfig::default();
        let class = classify_candle(&candle(1.0, 1.92, 0.98, 1.9), &config);
        match class {
            CandleClass::Disrespect { direction, strength } => {
                assert_eq!(direction, Direction::Bullish);
                assert!(strength > 0.9);
            }
            other => panic!("expected disrespect, got {:?}", other),
        }
    }

    #[test]
    fn test_respect_candle_sides() {
        let config = ClassifierConfig::default();
        // Long lower wick
        let class = classify_candle(&candle(1.9, 2.0, 1.0, 1.95), &config);
        assert!(matches!(class, CandleClass::Respect { side: RespectSide::Support, .. }));
        // Long upper wick
        let class = classify_candle(&candle(1.1, 2.0, 1.0, 1.05), &config);
        assert!(matches!(class, CandleClass::Respect { side: RespectSide::Resistance, .. }));
        // Spinning top
        let class = classify_candle(&candle(1.5, 2.0, 1.0, 1.55), &config);
        assert!(matches!(class, CandleClass::Respect { side: RespectSide::Both, .. }));
    }

    #[test]
    fn test_unclassified_and_flat() {
        let config = ClassifierConfig::default();
        assert_eq!(classify_candle(&candle(1.0, 1.8, 0.9, 1.5), &config), CandleClass::Unclassified);
        assert_eq!(classify_candle(&candle(1.0, 1.0, 1.0, 1.0), &config), CandleClass::Unclassified);
    }

    #[test]
    fn test_classification_is_total() {
        let config = ClassifierConfig::default();
        let samples = [
            candle(1.0, 2.0, 0.5, 1.9),
            candle(1.9, 2.0, 1.0, 1.95),
            candle(1.0, 1.8, 0.9, 1.5),
            candle(1.0, 1.0, 1.0, 1.0),
            candle(1.5, 1.5, 1.0, 1.0),
        ];
        for prev in &samples {
            for curr in &samples {
                let a = classify_pair(prev, curr, &config);
                let b = classify_pair(prev, curr, &config);
                assert_eq!(a, b);
                let labels = [a.current.is_disrespect(), a.current.is_respect(), a.current == CandleClass::Unclassified];
                assert_eq!(labels.iter().filter(|x| **x).count(), 1);
            }
        }
    }

    #[test]
    fn test_pair_patterns() {
        let config = ClassifierConfig::default();
        let bull_body = candle(1.0, 1.92, 0.98, 1.9);
        let bear_body = candle(1.9, 1.92, 0.98, 1.0);
        let upper_reject = candle(1.1, 2.0, 1.0, 1.05);

        let pair = classify_pair(&bull_body, &bull_body, &config);
        assert_eq!(pair.pattern, Some(CandlePattern::StrongTrend { direction: Direction::Bullish }));

        let pair = classify_pair(&bull_body, &upper_reject, &config);
        assert_eq!(
            pair.pattern,
            Some(CandlePattern::PotentialReversal { direction: Direction::Bearish })
        );

        let pair = classify_pair(&upper_reject, &bear_body, &config);
        assert_eq!(pair.pattern, Some(CandlePattern::Breakout { direction: Direction::Bearish }));

        let pair = classify_pair(&upper_reject, &upper_reject, &config);
        assert_eq!(pair.pattern, Some(CandlePattern::Consolidation));
    }
}
