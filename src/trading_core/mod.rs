//! Trading Core - FVG / 2CR detection shared by the scanner binary and tests
//!
//! This module contains the detection components:
//! - Timeframe hierarchy and candle windows
//! - Candle classification (respect / disrespect)
//! - Fair Value Gap tracking and mitigation
//! - PD Rays and directional bias
//! - Two Candle Rejection detection with lower timeframe fallback
//! - Trade plan construction
//! - Alert payloads and the daily dedup cache
//! - Scan orchestration

pub mod timeframe;
pub mod candles;
pub mod classifier;
pub mod fvg;
pub mod pd_rays;
pub mod two_candle;
pub mod trade_plan;
pub mod alerts;
pub mod alert_cache;
pub mod scanner;

// Re-export commonly used types
pub use timeframe::{Timeframe, TimeframeHierarchy};
pub use candles::{Candle, CandleStore, Direction};
pub use classifier::{CandleClass, ClassifierConfig, RespectSide};
pub use fvg::{Fvg, FvgStatus, FvgTracker};
pub use pd_rays::{BiasDirection, DirectionalBias, PdRay, PdRayConfig, PdRayKind, PdRaySet};
pub use two_candle::{TwoCrConfig, TwoCrOutcome, TwoCrSetup};
pub use trade_plan::{EntryInstruction, PlanRejection, TradePlan, TradePlanConfig};
pub use alerts::{AlertKind, AlertPayload, AlertRequest, DedupKey};
pub use alert_cache::{Admission, AlertCache};
pub use scanner::{CycleReport, Scanner};
