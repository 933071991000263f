//! Alert requests: dedup keys and notifier payloads

use chrono::{DateTime, DurationRound, TimeDelta, Utc};
use serde::{Deserialize, Serialize};

use super::candles::Direction;
use super::fvg::Fvg;
use super::pd_rays::{BiasDirection, DirectionalBias};
use super::timeframe::Timeframe;
use super::trade_plan::TradePlan;
use super::two_candle::{FollowThrough, RejectionKind, TwoCrSetup};

/// Alert pattern kind, part of the dedup key
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertKind {
    /// 2CR confirmed on the FVG's own timeframe
    TwoCrSame,
    /// 2CR confirmed on a lower timeframe
    TwoCrFallback,
    /// Actionable bias at a mitigated FVG, no confirmed 2CR yet
    Watch,
    /// New FVG in the direction of an open plan
    Breakeven,
}

impl AlertKind {
    pub fn code(&self) -> &'static str {
        match self {
            AlertKind::TwoCrSame => "2cr_same_tf",
            AlertKind::TwoCrFallback => "2cr_ltf",
            AlertKind::Watch => "watch",
            AlertKind::Breakeven => "breakeven",
        }
    }
}

impl std::fmt::Display for AlertKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.code())
    }
}

/// Identity of one alertable setup
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DedupKey {
    pub symbol: String,
    pub timeframe: Timeframe,
    pub kind: AlertKind,
    /// Price-level identity, e.g. "1.12000-1.12300"
    pub level: String,
    /// Setup time truncated to the minute
    pub minute: DateTime<Utc>,
}

impl DedupKey {
    pub fn new(symbol: &str, timeframe: Timeframe, kind: AlertKind, level: String, at: DateTime<Utc>) -> Self {
        let minute = at.duration_trunc(TimeDelta::minutes(1)).unwrap_or(at);
        Self {
            symbol: symbol.to_string(),
            timeframe,
            kind,
            level,
            minute,
        }
    }

    /// Flat string form used as the cache key
    pub fn as_string(&self) -> String {
        format!(
            "{}|{}|{}|{}|{}",
            self.symbol,
            self.timeframe,
            self.kind,
            self.level,
            self.minute.format("%Y%m%d%H%M")
        )
    }
}

impl std::fmt::Display for DedupKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_string())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BiasSummary {
    pub direction: BiasDirection,
    pub confidence: f64,
}

impl From<&DirectionalBias> for BiasSummary {
    fn from(bias: &DirectionalBias) -> Self {
        Self {
            direction: bias.direction,
            confidence: bias.confidence,
        }
    }
}

/// Everything the notifier needs to render one alert
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertPayload {
    pub symbol: String,
    pub kind: AlertKind,
    pub direction: Direction,
    pub anchor_timeframe: Timeframe,
    /// Timeframe the 2CR was found on, or the timeframes to watch
    pub detection_timeframes: Vec<Timeframe>,
    pub zone_bottom: f64,
    pub zone_top: f64,
    pub size: f64,
    pub size_pips: f64,
    pub reentry: bool,
    pub rejection: Option<RejectionKind>,
    pub follow_through: Option<FollowThrough>,
    pub ugly: bool,
    pub candle_times: Vec<DateTime<Utc>>,
    pub current_price: Option<f64>,
    pub bias: Option<BiasSummary>,
    pub plan: Option<TradePlan>,
    pub emitted_at: DateTime<Utc>,
}

impl AlertPayload {
    fn for_fvg(symbol: &str, kind: AlertKind, fvg: &Fvg, pip_size: f64, now: DateTime<Utc>) -> Self {
        Self {
            symbol: symbol.to_string(),
            kind,
            direction: fvg.direction,
            anchor_timeframe: fvg.timeframe,
            detection_timeframes: Vec::new(),
            zone_bottom: fvg.bottom,
            zone_top: fvg.top,
            size: fvg.size(),
            size_pips: if pip_size > 0.0 { fvg.size() / pip_size } else { 0.0 },
            reentry: fvg.reentry,
            rejection: None,
            follow_through: None,
            ugly: false,
            candle_times: fvg.candle_times.to_vec(),
            current_price: None,
            bias: None,
            plan: None,
            emitted_at: now,
        }
    }

    /// Plain-text message for the notifier
    pub fn render_message(&self) -> String {
        let mut lines = Vec::new();
        let reentry = if self.reentry { " reentry" } else { "" };
        let detection = self
            .detection_timeframes
            .iter()
            .map(|tf| tf.code())
            .collect::<Vec<_>>()
            .join(", ");

        match self.kind {
            AlertKind::TwoCrSame | AlertKind::TwoCrFallback => {
                let scope = if self.kind == AlertKind::TwoCrSame {
                    "SAME TF"
                } else {
                    "LTF"
                };
                lines.push(format!("{} 2CR Setup: {} {}", scope, self.symbol, self.direction));
                lines.push(format!("HTF: {} {}{} FVG (mitigated)", self.anchor_timeframe, self.direction, reentry));
                if let Some(rejection) = self.rejection {
                    lines.push(format!("2CR: {} on {}", rejection, detection));
                }
            }
            AlertKind::Watch => {
                lines.push(format!("Potential 2CR Setup: {} {}", self.symbol, self.direction));
                lines.push(format!("HTF: {} {}{} FVG (mitigated)", self.anchor_timeframe, self.direction, reentry));
                lines.push(format!("Watch for 2CR on: {}", detection));
            }
            AlertKind::Breakeven => {
                lines.push(format!("Breakeven: {} {} on {}", self.symbol, self.direction, self.anchor_timeframe));
                lines.push("New FVG formed in trade direction, move stop to breakeven".to_string());
            }
        }

        lines.push(format!("FVG Range: {:.5} - {:.5}", self.zone_bottom, self.zone_top));
        lines.push(format!("FVG Size: {:.1} pips", self.size_pips));

        let times = self
            .candle_times
            .iter()
            .map(|t| t.format("%Y-%m-%d %H:%M").to_string())
            .collect::<Vec<_>>()
            .join(", ");
        lines.push(format!("Candles: {}", times));

        if let Some(ft) = self.follow_through {
            lines.push(format!("Follow-through: {}", ft));
        }
        if self.ugly {
            lines.push("Warning: ugly 2CR (consolidation likely)".to_string());
        }
        if let Some(bias) = &self.bias {
            lines.push(format!("Bias: {} ({:.0}%)", bias.direction, bias.confidence));
        }
        if let Some(plan) = &self.plan {
            lines.push(format!("Entry: {}", plan.entry));
            lines.push(format!("Stop: {:.5}", plan.stop_loss));
            lines.push(format!("Target: {:.5} ({})", plan.target, plan.target_kind));
            lines.push(format!("R:R {:.2}", plan.risk_reward));
            lines.push(format!("Breakeven at {:.5}: {}", plan.breakeven_price, plan.breakeven_rule));
        }
        if let Some(price) = self.current_price {
            lines.push(format!("Current Price: {:.5}", price));
        }

        lines.join("\n")
    }
}

/// Key plus payload handed to the dispatcher
#[derive(Debug, Clone)]
pub struct AlertRequest {
    pub key: DedupKey,
    pub payload: AlertPayload,
}

impl AlertRequest {
    /// Confirmed 2CR with a trade plan, keyed by the second candle's time
    #[allow(clippy::too_many_arguments)]
    pub fn two_candle(
        symbol: &str,
        fvg: &Fvg,
        setup: &TwoCrSetup,
        plan: TradePlan,
        bias: &DirectionalBias,
        pip_size: f64,
        current_price: f64,
        now: DateTime<Utc>,
    ) -> Self {
        let kind = if setup.is_fallback() {
            AlertKind::TwoCrFallback
        } else {
            AlertKind::TwoCrSame
        };
        let mut payload = AlertPayload::for_fvg(symbol, kind, fvg, pip_size, now);
        payload.detection_timeframes = vec![setup.detection_timeframe];
        payload.rejection = Some(setup.kind);
        payload.follow_through = Some(setup.follow_through);
        payload.ugly = setup.ugly;
        payload.candle_times = setup.candle_times();
        payload.current_price = Some(current_price);
        payload.bias = Some(BiasSummary::from(bias));
        payload.plan = Some(plan);

        Self {
            key: DedupKey::new(
                symbol,
                setup.detection_timeframe,
                kind,
                fvg.level_identity(),
                setup.second.open_time,
            ),
            payload,
        }
    }

    /// Bias-aligned mitigated FVG awaiting a 2CR, keyed by the FVG's formation time
    pub fn watch(
        symbol: &str,
        fvg: &Fvg,
        watch_timeframes: &[Timeframe],
        bias: &DirectionalBias,
        pip_size: f64,
        current_price: f64,
        now: DateTime<Utc>,
    ) -> Self {
        let mut payload = AlertPayload::for_fvg(symbol, AlertKind::Watch, fvg, pip_size, now);
        payload.detection_timeframes = watch_timeframes.to_vec();
        payload.current_price = Some(current_price);
        payload.bias = Some(BiasSummary::from(bias));

        Self {
            key: DedupKey::new(symbol, fvg.timeframe, AlertKind::Watch, fvg.level_identity(), fvg.created_at),
            payload,
        }
    }

    /// New FVG formed in the direction of an open plan
    pub fn breakeven(symbol: &str, new_fvg: &Fvg, plan: &TradePlan, pip_size: f64, now: DateTime<Utc>) -> Self {
        let mut payload = AlertPayload::for_fvg(symbol, AlertKind::Breakeven, new_fvg, pip_size, now);
        payload.plan = Some(plan.clone());

        Self {
            key: DedupKey::new(
                symbol,
                new_fvg.timeframe,
                AlertKind::Breakeven,
                new_fvg.level_identity(),
                new_fvg.created_at,
            ),
            payload,
        }
    }
}
