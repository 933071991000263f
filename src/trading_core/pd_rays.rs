//! PD Ray Aggregation and Directional Bias
//!
//! Premium/discount rays are the key levels of one timeframe:
//! - FVG zones (active and mitigated)
//! - Swing highs/lows (strict local extrema)
//! - Prior candle high/low
//!
//! The bias is rebuilt from scratch every cycle by scoring the two most recent
//! classified candles against the top-ranked rays.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::candles::{Candle, Direction};
use super::classifier::{classify_pair, CandleClass, ClassifierConfig, RespectSide};
use super::fvg::{Fvg, FvgTracker};
use super::timeframe::Timeframe;

/// Ray strength by source
pub const REENTRY_FVG_STRENGTH: u8 = 4;
pub const FVG_STRENGTH: u8 = 3;
pub const SWING_STRENGTH: u8 = 2;
pub const PRIOR_CANDLE_STRENGTH: u8 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PdRayKind {
    Fvg,
    SwingHigh,
    SwingLow,
    PriorHigh,
    PriorLow,
}

impl std::fmt::Display for PdRayKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PdRayKind::Fvg => write!(f, "FVG"),
            PdRayKind::SwingHigh => write!(f, "swing high"),
            PdRayKind::SwingLow => write!(f, "swing low"),
            PdRayKind::PriorHigh => write!(f, "prior high"),
            PdRayKind::PriorLow => write!(f, "prior low"),
        }
    }
}

/// Key price level
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PdRay {
    /// Representative price (zone midpoint for FVG rays)
    pub price: f64,
    pub kind: PdRayKind,
    pub timeframe: Timeframe,
    pub strength: u8,
    pub formed_at: DateTime<Utc>,
    /// (bottom, top) for FVG rays
    pub zone: Option<(f64, f64)>,
    pub fvg_id: Option<Uuid>,
}

impl PdRay {
    fn from_fvg(fvg: &Fvg) -> Self {
        Self {
            price: (fvg.bottom + fvg.top) / 2.0,
            kind: PdRayKind::Fvg,
            timeframe: fvg.timeframe,
            strength: if fvg.reentry {
                REENTRY_FVG_STRENGTH
            } else {
                FVG_STRENGTH
            },
            formed_at: fvg.created_at,
            zone: Some((fvg.bottom, fvg.top)),
            fvg_id: Some(fvg.id),
        }
    }

    fn point(kind: PdRayKind, price: f64, strength: u8, candle: &Candle) -> Self {
        Self {
            price,
            kind,
            timeframe: candle.timeframe,
            strength,
            formed_at: candle.open_time,
            zone: None,
            fvg_id: None,
        }
    }

    /// First price reached when approaching the ray while moving in `direction`
    pub fn level_for(&self, direction: Direction) -> f64 {
        match (self.zone, direction) {
            (Some((bottom, _)), Direction::Bullish) => bottom,
            (Some((_, top)), Direction::Bearish) => top,
            (None, _) => self.price,
        }
    }
}

/// Parameters for ray collection and bias scoring
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PdRayConfig {
    /// Candles on each side a swing extreme must beat (default: 2)
    pub swing_window: usize,
    /// Top-ranked rays scored by the bias (default: 5)
    pub top_rays: usize,
    /// Confidence (percent) below which the bias is neutral (default: 30)
    pub bias_floor: f64,
}

impl Default for PdRayConfig {
    fn default() -> Self {
        Self {
            swing_window: 2,
            top_rays: 5,
            bias_floor: 30.0,
        }
    }
}

/// Ranked rays of one timeframe
#[derive(Debug, Clone)]
pub struct PdRaySet {
    timeframe: Timeframe,
    rays: Vec<PdRay>,
}

impl PdRaySet {
    /// Collect and rank rays from live FVGs and the closed candle window.
    ///
    /// Ranking: strength desc, then recency desc, then distance to `price` asc.
    pub fn build(tracker: &FvgTracker, closed: &[Candle], config: &PdRayConfig, price: f64) -> Self {
        let mut rays: Vec<PdRay> = tracker.live().map(PdRay::from_fvg).collect();

        let w = config.swing_window.max(1);
        if closed.len() > 2 * w {
            for i in w..closed.len() - w {
                let c = &closed[i];
                let neighbours = closed[i - w..=i + w]
                    .iter()
                    .enumerate()
                    .filter(|(j, _)| *j != w);
                let mut is_high = true;
                let mut is_low = true;
                for (_, n) in neighbours {
                    is_high &= c.high > n.high;
                    is_low &= c.low < n.low;
                }
                if is_high {
                    rays.push(PdRay::point(PdRayKind::SwingHigh, c.high, SWING_STRENGTH, c));
                }
                if is_low {
                    rays.push(PdRay::point(PdRayKind::SwingLow, c.low, SWING_STRENGTH, c));
                }
            }
        }

        if let Some(prior) = closed.last() {
            rays.push(PdRay::point(PdRayKind::PriorHigh, prior.high, PRIOR_CANDLE_STRENGTH, prior));
            rays.push(PdRay::point(PdRayKind::PriorLow, prior.low, PRIOR_CANDLE_STRENGTH, prior));
        }

        rays.sort_by(|a, b| {
            b.strength
                .cmp(&a.strength)
                .then(b.formed_at.cmp(&a.formed_at))
                .then((a.price - price).abs().total_cmp(&(b.price - price).abs()))
        });

        Self {
            timeframe: tracker.timeframe(),
            rays,
        }
    }

    pub fn timeframe(&self) -> Timeframe {
        self.timeframe
    }

    pub fn rays(&self) -> &[PdRay] {
        &self.rays
    }

    pub fn top(&self, n: usize) -> &[PdRay] {
        &self.rays[..n.min(self.rays.len())]
    }

    pub fn is_empty(&self) -> bool {
        self.rays.is_empty()
    }

    /// Nearest ray strictly beyond `price` in `direction`, optionally within `max_distance`
    pub fn nearest_beyond(&self, price: f64, direction: Direction, max_distance: Option<f64>) -> Option<&PdRay> {
        self.rays
            .iter()
            .filter_map(|ray| {
                let distance = (ray.level_for(direction) - price) * direction.sign();
                (distance > 0.0).then_some((ray, distance))
            })
            .filter(|(_, distance)| max_distance.map_or(true, |max| *distance <= max))
            .min_by(|a, b| a.1.total_cmp(&b.1))
            .map(|(ray, _)| ray)
    }

    /// Nearest level above `price`
    pub fn nearest_resistance(&self, price: f64) -> Option<&PdRay> {
        self.nearest_beyond(price, Direction::Bullish, None)
    }

    /// Nearest level below `price`
    pub fn nearest_support(&self, price: f64) -> Option<&PdRay> {
        self.nearest_beyond(price, Direction::Bearish, None)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BiasDirection {
    Bullish,
    Bearish,
    Neutral,
}

impl BiasDirection {
    pub fn as_direction(&self) -> Option<Direction> {
        match self {
            BiasDirection::Bullish => Some(Direction::Bullish),
            BiasDirection::Bearish => Some(Direction::Bearish),
            BiasDirection::Neutral => None,
        }
    }
}

impl std::fmt::Display for BiasDirection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BiasDirection::Bullish => write!(f, "bullish"),
            BiasDirection::Bearish => write!(f, "bearish"),
            BiasDirection::Neutral => write!(f, "neutral"),
        }
    }
}

/// Directional bias of one timeframe for one cycle
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DirectionalBias {
    pub symbol: String,
    pub timeframe: Timeframe,
    pub direction: BiasDirection,
    /// 0-100
    pub confidence: f64,
    pub bullish_weight: f64,
    pub bearish_weight: f64,
    pub respect_count: u32,
    pub disrespect_count: u32,
    pub reasons: Vec<String>,
}

impl DirectionalBias {
    pub fn neutral(symbol: &str, timeframe: Timeframe) -> Self {
        Self {
            symbol: symbol.to_string(),
            timeframe,
            direction: BiasDirection::Neutral,
            confidence: 0.0,
            bullish_weight: 0.0,
            bearish_weight: 0.0,
            respect_count: 0,
            disrespect_count: 0,
            reasons: Vec::new(),
        }
    }

    pub fn is_actionable(&self) -> bool {
        self.direction != BiasDirection::Neutral
    }
}

/// Score the two most recent closed candle pairs against the top-ranked rays.
///
/// A disrespect candle whose body crosses a ray adds the ray's strength in the
/// candle's direction. A respect candle that wicks into a ray without its body
/// crossing adds the ray's strength against the side it touched. Only rays
/// formed before the scored candle count.
pub fn compute_bias(
    symbol: &str,
    timeframe: Timeframe,
    closed: &[Candle],
    rays: &PdRaySet,
    classifier: &ClassifierConfig,
    config: &PdRayConfig,
) -> DirectionalBias {
    let mut bias = DirectionalBias::neutral(symbol, timeframe);
    if closed.len() < 3 {
        return bias;
    }

    let top = rays.top(config.top_rays);
    let n = closed.len();
    for pair in [(&closed[n - 3], &closed[n - 2]), (&closed[n - 2], &closed[n - 1])] {
        let (prev, candle) = pair;
        let classification = classify_pair(prev, candle, classifier);

        for ray in top {
            if ray.formed_at >= candle.open_time {
                continue;
            }
            let level = ray.price;
            let weight = ray.strength as f64;
            let body_low = candle.open.min(candle.close);
            let body_high = candle.open.max(candle.close);

            match classification.current {
                CandleClass::Disrespect { direction, .. } => {
                    if body_low < level && level < body_high {
                        match direction {
                            Direction::Bullish => bias.bullish_weight += weight,
                            Direction::Bearish => bias.bearish_weight += weight,
                        }
                        bias.disrespect_count += 1;
                        bias.reasons.push(format!(
                            "{} disrespect through {} {:.5}",
                            direction, ray.kind, level
                        ));
                    }
                }
                CandleClass::Respect { side, .. } => {
                    let touched = candle.low <= level && level <= candle.high;
                    let body_clear = level >= body_high || level <= body_low;
                    if !touched || !body_clear {
                        continue;
                    }
                    let level_above = level >= body_high;
                    let side_matches = match side {
                        RespectSide::Resistance => level_above,
                        RespectSide::Support => !level_above,
                        RespectSide::Both => true,
                    };
                    if !side_matches {
                        continue;
                    }
                    if level_above {
                        bias.bearish_weight += weight;
                    } else {
                        bias.bullish_weight += weight;
                    }
                    bias.respect_count += 1;
                    bias.reasons.push(format!(
                        "respect {} {} {:.5}",
                        if level_above { "below" } else { "above" },
                        ray.kind,
                        level
                    ));
                }
                CandleClass::Unclassified => {}
            }
        }
    }

    let total = bias.bullish_weight + bias.bearish_weight;
    if total <= 0.0 {
        return bias;
    }
    let net = bias.bullish_weight - bias.bearish_weight;
    bias.confidence = net.abs() / total * 100.0;
    bias.direction = if bias.confidence < config.bias_floor || net == 0.0 {
        BiasDirection::Neutral
    } else if net > 0.0 {
        BiasDirection::Bullish
    } else {
        BiasDirection::Bearish
    };

    bias
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn h1(i: i64, o: f64, h: f64, l: f64, c: f64) -> Candle {
        let t = Utc.with_ymd_and_hms(2024, 6, 3, 0, 0, 0).unwrap() + Duration::hours(i);
        let mut candle = Candle::new(Timeframe::H1, t, o, h, l, c);
        candle.closed = true;
        candle
    }

    /// Swing high at index 2 (1.1300), swing low at index 5 (1.1100)
    fn swing_series() -> Vec<Candle> {
        vec![
            h1(0, 1.1200, 1.1220, 1.1180, 1.1210),
            h1(1, 1.1210, 1.1250, 1.1200, 1.1240),
            h1(2, 1.1240, 1.1300, 1.1230, 1.1260),
            h1(3, 1.1260, 1.1270, 1.1190, 1.1200),
            h1(4, 1.1200, 1.1210, 1.1140, 1.1150),
            h1(5, 1.1150, 1.1160, 1.1100, 1.1130),
            h1(6, 1.1130, 1.1170, 1.1120, 1.1160),
            h1(7, 1.1160, 1.1190, 1.1150, 1.1180),
        ]
    }

    #[test]
    fn test_swings_and_prior_levels() {
        let candles = swing_series();
        let tracker = FvgTracker::new(Timeframe::H1);
        let set = PdRaySet::build(&tracker, &candles, &PdRayConfig::default(), 1.1180);

        let highs: Vec<_> = set.rays().iter().filter(|r| r.kind == PdRayKind::SwingHigh).collect();
        let lows: Vec<_> = set.rays().iter().filter(|r| r.kind == PdRayKind::SwingLow).collect();
        assert_eq!(highs.len(), 1);
        assert!((highs[0].price - 1.1300).abs() < 1e-9);
        assert_eq!(lows.len(), 1);
        assert!((lows[0].price - 1.1100).abs() < 1e-9);

        // Swings outrank prior-candle levels
        assert_eq!(set.rays()[0].strength, SWING_STRENGTH);
        assert_eq!(set.rays().last().map(|r| r.strength), Some(PRIOR_CANDLE_STRENGTH));
    }

    #[test]
    fn test_fvg_rays_rank_first() {
        let mut candles = vec![
            h1(0, 1.1150, 1.1200, 1.1140, 1.1190),
            h1(1, 1.1190, 1.1260, 1.1185, 1.1255),
            h1(2, 1.1255, 1.1290, 1.1230, 1.1280),
        ];
        candles.push(h1(3, 1.1280, 1.1300, 1.1255, 1.1290));
        let mut tracker = FvgTracker::new(Timeframe::H1);
        tracker.update(&candles, 0.0010);

        let set = PdRaySet::build(&tracker, &candles, &PdRayConfig::default(), 1.1290);
        let first = &set.rays()[0];
        assert_eq!(first.kind, PdRayKind::Fvg);
        assert_eq!(first.zone, Some((1.1200, 1.1230)));
        assert!((first.level_for(Direction::Bullish) - 1.1200).abs() < 1e-9);
        assert!((first.level_for(Direction::Bearish) - 1.1230).abs() < 1e-9);
    }

    #[test]
    fn test_nearest_beyond() {
        let candles = swing_series();
        let tracker = FvgTracker::new(Timeframe::H1);
        let set = PdRaySet::build(&tracker, &candles, &PdRayConfig::default(), 1.1180);

        let above = set.nearest_resistance(1.1200).unwrap();
        assert!((above.price - 1.1300).abs() < 1e-9);
        let below = set.nearest_support(1.1140).unwrap();
        assert!((below.price - 1.1100).abs() < 1e-9);

        assert!(set.nearest_beyond(1.1200, Direction::Bullish, Some(0.0050)).is_none());
        assert!(set.nearest_beyond(1.1200, Direction::Bullish, Some(0.0101)).is_some());
    }

    #[test]
    fn test_bias_from_disrespect() {
        // Two strong bullish bodies closing through the prior highs
        let mut candles = swing_series();
        candles.push(h1(8, 1.1180, 1.1262, 1.1178, 1.1260));
        candles.push(h1(9, 1.1260, 1.1322, 1.1258, 1.1320));

        let tracker = FvgTracker::new(Timeframe::H1);
        let set = PdRaySet::build(&tracker, &candles[..8], &PdRayConfig::default(), 1.1180);
        let bias = compute_bias(
            "EURUSD",
            Timeframe::H1,
            &candles,
            &set,
            &ClassifierConfig::default(),
            &PdRayConfig::default(),
        );

        assert_eq!(bias.direction, BiasDirection::Bullish);
        assert!(bias.disrespect_count >= 2);
        assert!((bias.confidence - 100.0).abs() < 1e-9);
        assert!(bias.is_actionable());
    }

    #[test]
    fn test_bias_neutral_without_events() {
        let candles = swing_series();
        let tracker = FvgTracker::new(Timeframe::H1);
        let set = PdRaySet::build(&tracker, &[], &PdRayConfig::default(), 1.1180);
        assert!(set.is_empty());

        let bias = compute_bias(
            "EURUSD",
            Timeframe::H1,
            &candles,
            &set,
            &ClassifierConfig::default(),
            &PdRayConfig::default(),
        );
        assert_eq!(bias.direction, BiasDirection::Neutral);
        assert_eq!(bias.confidence, 0.0);
    }

    #[test]
    fn test_bias_is_recomputed_not_accumulated() {
        let mut candles = swing_series();
        candles.push(h1(8, 1.1180, 1.1262, 1.1178, 1.1260));
        candles.push(h1(9, 1.1260, 1.1322, 1.1258, 1.1320));
        let tracker = FvgTracker::new(Timeframe::H1);
        let set = PdRaySet::build(&tracker, &candles[..8], &PdRayConfig::default(), 1.1180);

        let a = compute_bias("EURUSD", Timeframe::H1, &candles, &set, &ClassifierConfig::default(), &PdRayConfig::default());
        let b = compute_bias("EURUSD", Timeframe::H1, &candles, &set, &ClassifierConfig::default(), &PdRayConfig::default());
        assert_eq!(a.bullish_weight, b.bullish_weight);
        assert_eq!(a.bearish_weight, b.bearish_weight);
        assert_eq!(a.reasons, b.reasons);
    }

    fn bias_for(candles: &[Candle], set: &PdRaySet, config: &PdRayConfig) -> DirectionalBias {
        compute_bias("EURUSD", Timeframe::H1, candles, set, &ClassifierConfig::default(), config)
    }

    #[test]
    fn test_candle_ignores_its_own_extremes() {
        // Hammer with no level anywhere near it; its own low is the prior-low ray
        let candles = vec![
            h1(0, 1.180, 1.185, 1.175, 1.182),
            h1(1, 1.182, 1.188, 1.178, 1.185),
            h1(2, 1.190, 1.200, 1.100, 1.195),
        ];
        let tracker = FvgTracker::new(Timeframe::H1);
        let set = PdRaySet::build(&tracker, &candles, &PdRayConfig::default(), 1.195);
        assert!(set.rays().iter().any(|r| r.kind == PdRayKind::PriorLow));

        let bias = bias_for(&candles, &set, &PdRayConfig::default());
        assert_eq!(bias.direction, BiasDirection::Neutral);
        assert_eq!(bias.respect_count, 0);
        assert!(bias.reasons.is_empty());
    }

    #[test]
    fn test_respect_at_swing_low() {
        let mut candles = swing_series();
        let tracker = FvgTracker::new(Timeframe::H1);
        let set = PdRaySet::build(&tracker, &candles, &PdRayConfig::default(), 1.1180);

        // Unclassified, then a hammer wicking into the 1.1100 swing low
        candles.push(h1(8, 1.1180, 1.1182, 1.1165, 1.1170));
        candles.push(h1(9, 1.1128, 1.1135, 1.1095, 1.1132));

        let bias = bias_for(&candles, &set, &PdRayConfig::default());
        assert_eq!(bias.direction, BiasDirection::Bullish);
        assert_eq!(bias.respect_count, 1);
        assert_eq!(bias.bullish_weight, SWING_STRENGTH as f64);
        assert!((bias.confidence - 100.0).abs() < 1e-9);
    }

    #[test]
    fn test_confidence_floor() {
        let mut candles = swing_series();
        let tracker = FvgTracker::new(Timeframe::H1);
        let set = PdRaySet::build(&tracker, &candles, &PdRayConfig::default(), 1.1180);

        // Bearish body through the 1.1190 prior high, then a hammer at the swing low
        candles.push(h1(8, 1.1195, 1.1197, 1.1154, 1.1155));
        candles.push(h1(9, 1.1128, 1.1135, 1.1095, 1.1132));

        let bias = bias_for(&candles, &set, &PdRayConfig::default());
        assert_eq!(bias.bearish_weight, PRIOR_CANDLE_STRENGTH as f64);
        assert_eq!(bias.bullish_weight, SWING_STRENGTH as f64);
        assert!((bias.confidence - 100.0 / 3.0).abs() < 1e-6);
        assert_eq!(bias.direction, BiasDirection::Bullish);

        let strict = PdRayConfig {
            bias_floor: 40.0,
            ..PdRayConfig::default()
        };
        let bias = bias_for(&candles, &set, &strict);
        assert_eq!(bias.direction, BiasDirection::Neutral);
        assert!(!bias.is_actionable());
        assert!((bias.confidence - 100.0 / 3.0).abs() < 1e-6);
    }

    #[test]
    fn test_two_sided_respect_scores_level_above() {
        let mut candles = swing_series();
        let tracker = FvgTracker::new(Timeframe::H1);
        let set = PdRaySet::build(&tracker, &candles, &PdRayConfig::default(), 1.1180);

        // Equal wicks around a small body, upper wick reaching the 1.1190 prior high
        candles.push(h1(8, 1.1180, 1.1182, 1.1165, 1.1170));
        candles.push(h1(9, 1.1178, 1.1195, 1.1165, 1.1182));

        let bias = bias_for(&candles, &set, &PdRayConfig::default());
        assert_eq!(bias.direction, BiasDirection::Bearish);
        assert_eq!(bias.respect_count, 1);
        assert_eq!(bias.bearish_weight, PRIOR_CANDLE_STRENGTH as f64);
    }
}
