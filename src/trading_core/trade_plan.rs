//! Trade plan construction from a 2CR setup
//!
//! - Entry: rejection candle close (limit), or enter now when price has
//!   already traded back through it
//! - Stop: beyond the rejection candles' adverse extreme plus a buffer
//! - Target: nearest PD Ray beyond entry in the trade direction
//! - Breakeven: entry + half the initial risk

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::candles::Direction;
use super::pd_rays::{BiasDirection, DirectionalBias, PdRayKind, PdRaySet};
use super::two_candle::TwoCrSetup;

pub const BREAKEVEN_RULE: &str = "Move stop to breakeven once a new FVG forms in the direction of the trade";

/// Plan parameters in price units
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TradePlanConfig {
    pub stop_buffer: f64,
    pub min_risk_reward: f64,
    /// Furthest a target may sit from entry
    pub max_target_distance: Option<f64>,
}

impl Default for TradePlanConfig {
    fn default() -> Self {
        Self {
            stop_buffer: 0.0005,
            min_risk_reward: 1.5,
            max_target_distance: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EntryInstruction {
    Limit { price: f64 },
    EnterNow { price: f64 },
}

impl EntryInstruction {
    pub fn price(&self) -> f64 {
        match self {
            EntryInstruction::Limit { price } | EntryInstruction::EnterNow { price } => *price,
        }
    }
}

impl std::fmt::Display for EntryInstruction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EntryInstruction::Limit { price } => write!(f, "limit {:.5}", price),
            EntryInstruction::EnterNow { price } => write!(f, "enter now ({:.5})", price),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradePlan {
    pub direction: Direction,
    pub entry: EntryInstruction,
    pub stop_loss: f64,
    pub target: f64,
    pub target_kind: PdRayKind,
    pub risk_reward: f64,
    pub breakeven_price: f64,
    pub breakeven_rule: String,
}

impl TradePlan {
    pub fn risk(&self) -> f64 {
        (self.entry.price() - self.stop_loss).abs()
    }

    /// Whether a candle range reached the stop or the target
    pub fn is_resolved(&self, high: f64, low: f64) -> bool {
        match self.direction {
            Direction::Bullish => low <= self.stop_loss || high >= self.target,
            Direction::Bearish => high >= self.stop_loss || low <= self.target,
        }
    }
}

/// Why a plan was withheld
#[derive(Debug, Clone, PartialEq, Error)]
pub enum PlanRejection {
    #[error("no PD Ray target beyond entry")]
    NoTarget,
    #[error("bias {bias} opposes {setup} setup")]
    BiasConflict { bias: BiasDirection, setup: Direction },
    #[error("stop leaves no risk")]
    ZeroRisk,
    #[error("risk-reward {risk_reward:.2} below minimum {minimum:.2}")]
    BelowMinimum { risk_reward: f64, minimum: f64 },
}

/// Build a plan for `setup`, or explain why none is emitted
pub fn build_plan(
    setup: &TwoCrSetup,
    bias: &DirectionalBias,
    rays: &PdRaySet,
    current_price: f64,
    config: &TradePlanConfig,
) -> Result<TradePlan, PlanRejection> {
    let direction = setup.direction;
    if let Some(bias_dir) = bias.direction.as_direction() {
        if bias_dir != direction {
            return Err(PlanRejection::BiasConflict {
                bias: bias.direction,
                setup: direction,
            });
        }
    }

    let sign = direction.sign();
    let rejection_close = setup.rejection_candle().close;
    let entry = if (current_price - rejection_close) * sign <= 0.0 {
        EntryInstruction::EnterNow { price: current_price }
    } else {
        EntryInstruction::Limit {
            price: rejection_close,
        }
    };
    let entry_price = entry.price();

    let stop_loss = setup.adverse_extreme() - config.stop_buffer * sign;
    let risk = (entry_price - stop_loss) * sign;
    if risk <= f64::EPSILON {
        return Err(PlanRejection::ZeroRisk);
    }

    let target_ray = rays
        .nearest_beyond(entry_price, direction, config.max_target_distance)
        .ok_or(PlanRejection::NoTarget)?;
    let target = target_ray.level_for(direction);

    let risk_reward = (target - entry_price).abs() / risk;
    if risk_reward < config.min_risk_reward {
        return Err(PlanRejection::BelowMinimum {
            risk_reward,
            minimum: config.min_risk_reward,
        });
    }

    Ok(TradePlan {
        direction,
        entry,
        stop_loss,
        target,
        target_kind: target_ray.kind,
        risk_reward,
        breakeven_price: entry_price + risk / 2.0 * sign,
        breakeven_rule: BREAKEVEN_RULE.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::trading_core::candles::Candle;
    use crate::trading_core::fvg::FvgTracker;
    use crate::trading_core::pd_rays::PdRayConfig;
    use crate::trading_core::two_candle::{FollowThrough, RejectionKind};
    use crate::trading_core::Timeframe;
    use chrono::{DateTime, Duration, TimeZone, Utc};
    use uuid::Uuid;

    fn t(i: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 3, 0, 0, 0).unwrap() + Duration::hours(4 * i)
    }

    fn h4(i: i64, o: f64, h: f64, l: f64, c: f64) -> Candle {
        let mut candle = Candle::new(Timeframe::H4, t(i), o, h, l, c);
        candle.closed = true;
        candle
    }

    fn scenario_setup() -> TwoCrSetup {
        TwoCrSetup {
            fvg_id: Uuid::new_v4(),
            direction: Direction::Bullish,
            anchor_timeframe: Timeframe::H4,
            detection_timeframe: Timeframe::H4,
            kind: RejectionKind::SecondCandleSweep,
            first: h4(3, 1.1260, 1.1262, 1.1215, 1.1222),
            second: h4(4, 1.1222, 1.1232, 1.1200, 1.1230),
            follow_through: FollowThrough::Confirmed,
            follow_through_candle: Some(h4(5, 1.1230, 1.1270, 1.1228, 1.1265)),
            ugly: false,
        }
    }

    /// Window with a swing high at 1.1300 and nothing else above 1.1230
    fn scenario_rays() -> PdRaySet {
        let candles = vec![
            h4(0, 1.1240, 1.1260, 1.1235, 1.1255),
            h4(1, 1.1255, 1.1280, 1.1250, 1.1275),
            h4(2, 1.1275, 1.1300, 1.1270, 1.1280),
            h4(3, 1.1280, 1.1285, 1.1220, 1.1225),
            h4(4, 1.1225, 1.1228, 1.1190, 1.1200),
            h4(5, 1.1200, 1.1212, 1.1185, 1.1210),
        ];
        let tracker = FvgTracker::new(Timeframe::H4);
        PdRaySet::build(&tracker, &candles, &PdRayConfig::default(), 1.1210)
    }

    fn neutral() -> DirectionalBias {
        DirectionalBias::neutral("EURUSD", Timeframe::H4)
    }

    #[test]
    fn test_scenario_plan() {
        let plan = build_plan(
            &scenario_setup(),
            &neutral(),
            &scenario_rays(),
            1.1265,
            &TradePlanConfig::default(),
        )
        .unwrap();

        assert_eq!(plan.direction, Direction::Bullish);
        assert_eq!(plan.entry, EntryInstruction::Limit { price: 1.1230 });
        assert!((plan.stop_loss - 1.1195).abs() < 1e-9);
        assert!((plan.target - 1.1300).abs() < 1e-9);
        assert_eq!(plan.target_kind, PdRayKind::SwingHigh);
        assert!((plan.risk_reward - 2.0).abs() < 1e-6);
        assert!((plan.breakeven_price - 1.12475).abs() < 1e-9);
        assert_eq!(plan.breakeven_rule, BREAKEVEN_RULE);
    }

    #[test]
    fn test_enter_now_when_price_back_at_entry() {
        let plan = build_plan(
            &scenario_setup(),
            &neutral(),
            &scenario_rays(),
            1.1225,
            &TradePlanConfig::default(),
        )
        .unwrap();
        assert_eq!(plan.entry, EntryInstruction::EnterNow { price: 1.1225 });
    }

    #[test]
    fn test_bias_conflict() {
        let mut bias = neutral();
        bias.direction = BiasDirection::Bearish;
        let err = build_plan(
            &scenario_setup(),
            &bias,
            &scenario_rays(),
            1.1265,
            &TradePlanConfig::default(),
        )
        .unwrap_err();
        assert!(matches!(err, PlanRejection::BiasConflict { .. }));
    }

    #[test]
    fn test_below_minimum_and_no_target() {
        let config = TradePlanConfig {
            min_risk_reward: 2.5,
            ..TradePlanConfig::default()
        };
        let err = build_plan(&scenario_setup(), &neutral(), &scenario_rays(), 1.1265, &config).unwrap_err();
        assert!(matches!(err, PlanRejection::BelowMinimum { .. }));

        let config = TradePlanConfig {
            max_target_distance: Some(0.0050),
            ..TradePlanConfig::default()
        };
        let err = build_plan(&scenario_setup(), &neutral(), &scenario_rays(), 1.1265, &config).unwrap_err();
        assert_eq!(err, PlanRejection::NoTarget);
    }

    #[test]
    fn test_zero_risk() {
        // Price already below the stop
        let err = build_plan(
            &scenario_setup(),
            &neutral(),
            &scenario_rays(),
            1.1190,
            &TradePlanConfig::default(),
        )
        .unwrap_err();
        assert_eq!(err, PlanRejection::ZeroRisk);
    }

    #[test]
    fn test_plan_resolution() {
        let plan = build_plan(
            &scenario_setup(),
            &neutral(),
            &scenario_rays(),
            1.1265,
            &TradePlanConfig::default(),
        )
        .unwrap();
        assert!(!plan.is_resolved(1.1280, 1.1210));
        assert!(plan.is_resolved(1.1305, 1.1250));
        assert!(plan.is_resolved(1.1240, 1.1190));
    }
}
