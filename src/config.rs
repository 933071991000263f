//! Scanner configuration
//!
//! Loaded once from JSON at startup, validated, then treated as immutable.

use anyhow::{bail, Context, Result};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};

use crate::trading_core::alert_cache::DEFAULT_MAX_BYTES;
use crate::trading_core::{ClassifierConfig, PdRayConfig, Timeframe, TradePlanConfig, TwoCrConfig};

/// Pattern detection parameters, in pips where a price distance is involved
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectionConfig {
    /// Minimum FVG size in pips
    pub min_fvg_pips: f64,
    /// Body/range above this is a disrespect candle
    pub disrespect_body_ratio: f64,
    /// Wick share above this is a respect candle
    pub respect_wick_ratio: f64,
    /// Candles each side of a swing extreme
    pub swing_window: usize,
    /// Bias confidence (percent) below which the bias is neutral
    pub bias_floor: f64,
    /// Top-ranked PD Rays scored by the bias
    pub top_rays: usize,
    /// 2CR rejection wick must exceed this multiple of the body
    pub rejection_wick_ratio: f64,
    /// Post-mitigation candles examined for a 2CR
    pub scan_window: usize,
    /// Candles allowed for 2CR follow-through
    pub setup_expiry: usize,
    /// Stop buffer beyond the rejection extreme in pips
    pub stop_buffer_pips: f64,
    /// Plans below this risk-reward are suppressed
    pub min_risk_reward: f64,
    /// Furthest target from entry in pips (unbounded when absent)
    pub max_target_pips: Option<f64>,
}

impl Default for DetectionConfig {
    fn default() -> Self {
        let classifier = ClassifierConfig::default();
        let rays = PdRayConfig::default();
        let two_candle = TwoCrConfig::default();
        Self {
            min_fvg_pips: 10.0,
            disrespect_body_ratio: classifier.disrespect_body_ratio,
            respect_wick_ratio: classifier.respect_wick_ratio,
            swing_window: rays.swing_window,
            bias_floor: rays.bias_floor,
            top_rays: rays.top_rays,
            rejection_wick_ratio: two_candle.rejection_wick_ratio,
            scan_window: two_candle.scan_window,
            setup_expiry: two_candle.setup_expiry,
            stop_buffer_pips: 5.0,
            min_risk_reward: 1.5,
            max_target_pips: None,
        }
    }
}

impl DetectionConfig {
    pub fn to_classifier_config(&self) -> ClassifierConfig {
        ClassifierConfig {
            disrespect_body_ratio: self.disrespect_body_ratio,
            respect_wick_ratio: self.respect_wick_ratio,
        }
    }

    pub fn to_pd_ray_config(&self) -> PdRayConfig {
        PdRayConfig {
            swing_window: self.swing_window,
            top_rays: self.top_rays,
            bias_floor: self.bias_floor,
        }
    }

    pub fn to_two_candle_config(&self) -> TwoCrConfig {
        TwoCrConfig {
            rejection_wick_ratio: self.rejection_wick_ratio,
            scan_window: self.scan_window,
            setup_expiry: self.setup_expiry,
        }
    }

    /// Plan parameters converted to price units
    pub fn to_trade_plan_config(&self, pip_size: f64) -> TradePlanConfig {
        TradePlanConfig {
            stop_buffer: self.stop_buffer_pips * pip_size,
            min_risk_reward: self.min_risk_reward,
            max_target_distance: self.max_target_pips.map(|p| p * pip_size),
        }
    }

    pub fn min_fvg_size(&self, pip_size: f64) -> f64 {
        self.min_fvg_pips * pip_size
    }

    fn validate(&self, scope: &str) -> Result<()> {
        let ratio_ok = |r: f64| r > 0.0 && r < 1.0;
        if !ratio_ok(self.disrespect_body_ratio) || !ratio_ok(self.respect_wick_ratio) {
            bail!("{}: classifier ratios must be between 0 and 1", scope);
        }
        if self.min_fvg_pips < 0.0 || self.stop_buffer_pips < 0.0 {
            bail!("{}: pip distances must not be negative", scope);
        }
        if self.swing_window == 0 || self.top_rays == 0 {
            bail!("{}: swing_window and top_rays must be at least 1", scope);
        }
        if !(0.0..=100.0).contains(&self.bias_floor) {
            bail!("{}: bias_floor must be a percentage", scope);
        }
        if self.rejection_wick_ratio <= 0.0 {
            bail!("{}: rejection_wick_ratio must be positive", scope);
        }
        if self.scan_window < 2 || self.setup_expiry == 0 {
            bail!("{}: scan_window must be at least 2 and setup_expiry at least 1", scope);
        }
        if self.min_risk_reward <= 0.0 {
            bail!("{}: min_risk_reward must be positive", scope);
        }
        if matches!(self.max_target_pips, Some(p) if p <= 0.0) {
            bail!("{}: max_target_pips must be positive", scope);
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SymbolConfig {
    pub name: String,
    /// Price of one pip (default: 0.0001)
    #[serde(default = "default_pip_size")]
    pub pip_size: f64,
    /// Overrides the global detection parameters
    #[serde(default)]
    pub detection: Option<DetectionConfig>,
}

fn default_pip_size() -> f64 {
    0.0001
}

impl SymbolConfig {
    pub fn new(name: &str, pip_size: f64) -> Self {
        Self {
            name: name.to_string(),
            pip_size,
            detection: None,
        }
    }
}

/// Candle lookback per timeframe
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeframeConfig {
    pub default_lookback: usize,
    pub lookback: BTreeMap<Timeframe, usize>,
}

impl Default for TimeframeConfig {
    fn default() -> Self {
        Self {
            default_lookback: 100,
            lookback: BTreeMap::new(),
        }
    }
}

impl TimeframeConfig {
    pub fn lookback(&self, timeframe: Timeframe) -> usize {
        self.lookback
            .get(&timeframe)
            .copied()
            .unwrap_or(self.default_lookback)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AlertConfig {
    /// Emit watch alerts for bias-aligned mitigated FVGs without a 2CR
    pub send_watch_alerts: bool,
    /// Emit breakeven alerts for open plans
    pub send_breakeven_alerts: bool,
    /// Identical messages within this window are dropped by the notifier
    pub rate_limit_secs: u64,
}

impl Default for AlertConfig {
    fn default() -> Self {
        Self {
            send_watch_alerts: true,
            send_breakeven_alerts: true,
            rate_limit_secs: 60,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub dir: PathBuf,
    pub max_bytes: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("cache"),
            max_bytes: DEFAULT_MAX_BYTES,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScannerConfig {
    /// Scanned in this order
    pub symbols: Vec<SymbolConfig>,
    /// Appended to every symbol name when querying the feed (e.g. ".r")
    pub symbol_suffix: String,
    pub timeframes: TimeframeConfig,
    pub detection: DetectionConfig,
    /// Lower timeframes tried for 2CR fallback
    pub fallback_depth: usize,
    pub cycle_interval_secs: u64,
    /// Broker clock offset from UTC, used when no timezone is set
    pub broker_offset_minutes: i64,
    /// Broker timezone name (e.g. "Europe/Athens")
    pub broker_timezone: Option<String>,
    pub alerts: AlertConfig,
    pub cache: CacheConfig,
}

impl Default for ScannerConfig {
    fn default() -> Self {
        Self {
            symbols: vec![
                SymbolConfig::new("EURUSD", 0.0001),
                SymbolConfig::new("GBPUSD", 0.0001),
                SymbolConfig::new("USDJPY", 0.01),
            ],
            symbol_suffix: String::new(),
            timeframes: TimeframeConfig::default(),
            detection: DetectionConfig::default(),
            fallback_depth: 2,
            cycle_interval_secs: 300,
            broker_offset_minutes: 0,
            broker_timezone: None,
            alerts: AlertConfig::default(),
            cache: CacheConfig::default(),
        }
    }
}

impl ScannerConfig {
    /// Load and validate a JSON config file
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config {}", path.display()))?;
        let config: ScannerConfig = serde_json::from_str(&raw)
            .with_context(|| format!("Failed to parse config {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.symbols.is_empty() {
            bail!("No symbols configured");
        }
        let mut seen = HashSet::new();
        for symbol in &self.symbols {
            if symbol.name.trim().is_empty() {
                bail!("Symbol name must not be empty");
            }
            if !seen.insert(symbol.name.as_str()) {
                bail!("Duplicate symbol {}", symbol.name);
            }
            if !(symbol.pip_size > 0.0) {
                bail!("{}: pip_size must be positive", symbol.name);
            }
            if let Some(detection) = &symbol.detection {
                detection.validate(&symbol.name)?;
            }
        }
        self.detection.validate("detection")?;

        if self.timeframes.default_lookback < 3 || self.timeframes.lookback.values().any(|l| *l < 3) {
            bail!("Timeframe lookback must be at least 3 candles");
        }
        if self.fallback_depth >= Timeframe::ALL.len() {
            bail!("fallback_depth must be below {}", Timeframe::ALL.len());
        }
        if self.cycle_interval_secs == 0 {
            bail!("cycle_interval_secs must be positive");
        }
        if self.cache.max_bytes == 0 {
            bail!("cache.max_bytes must be positive");
        }
        self.timezone()?;
        Ok(())
    }

    pub fn timezone(&self) -> Result<Option<Tz>> {
        match &self.broker_timezone {
            Some(name) => {
                let tz = name
                    .parse::<Tz>()
                    .map_err(|e| anyhow::anyhow!("Unknown broker timezone {}: {}", name, e))?;
                Ok(Some(tz))
            }
            None => Ok(None),
        }
    }

    /// Feed-facing symbol name with the configured suffix
    pub fn feed_symbol(&self, symbol: &SymbolConfig) -> String {
        format!("{}{}", symbol.name, self.symbol_suffix)
    }

    /// Detection parameters for a symbol, honouring its override
    pub fn detection_for<'a>(&'a self, symbol: &'a SymbolConfig) -> &'a DetectionConfig {
        symbol.detection.as_ref().unwrap_or(&self.detection)
    }
}
