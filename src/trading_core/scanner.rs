//! Scan Controller
//!
//! One cycle walks every configured symbol, and for each symbol the scan levels
//! MN1 → W1 → D1 → H4 → H1:
//! 1. Refresh candles and update the FVG tracker
//! 2. Rebuild PD Rays and the directional bias
//! 3. Try 2CR on mitigated FVGs (reentry first), same timeframe then fallback
//! 4. Stop at the first actionable result (confirmed 2CR plan or watch signal)
//!
//! A symbol's failure is logged and recorded; the sweep continues.

use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::alerts::AlertRequest;
use super::candles::{closed_prefix, Candle, CandleStore};
use super::fvg::{Fvg, FvgTracker};
use super::pd_rays::{compute_bias, PdRaySet};
use super::timeframe::{Timeframe, TimeframeHierarchy};
use super::trade_plan::{build_plan, TradePlan};
use super::two_candle::{detect_staged, TwoCrOutcome};
use crate::config::{ScannerConfig, SymbolConfig};
use crate::error::ScanError;
use crate::feed::{MarketDataFeed, TimeSource};

/// Emitted plan followed for breakeven and resolution
#[derive(Debug, Clone)]
struct OpenPlan {
    fvg_id: Uuid,
    timeframe: Timeframe,
    plan: TradePlan,
    opened_at: DateTime<Utc>,
    /// FVGs already tracked on `timeframe` when the plan was emitted
    known_fvgs: HashSet<Uuid>,
    breakeven_sent: bool,
}

/// Cross-cycle state of one symbol
#[derive(Debug, Default)]
struct SymbolState {
    trackers: HashMap<Timeframe, FvgTracker>,
    /// FVGs whose 2CR has been alerted; terminal
    alerted: HashSet<Uuid>,
    /// FVGs a watch alert was emitted for
    watched: HashSet<Uuid>,
    open_plans: Vec<OpenPlan>,
}

impl SymbolState {
    fn knows(&self, id: &Uuid) -> bool {
        self.trackers.values().any(|t| t.get(id).is_some())
    }

    /// Forget ids whose FVG has left every tracker
    fn prune(&mut self) {
        let known: HashSet<Uuid> = self
            .trackers
            .values()
            .flat_map(|t| t.fvgs().iter().map(|f| f.id))
            .collect();
        self.alerted.retain(|id| known.contains(id));
        self.watched.retain(|id| known.contains(id));
    }
}

#[derive(Debug)]
pub struct SymbolFailure {
    pub symbol: String,
    pub error: ScanError,
}

/// Result of one sweep over all symbols
#[derive(Debug, Default)]
pub struct CycleReport {
    pub alerts: Vec<AlertRequest>,
    pub failures: Vec<SymbolFailure>,
    pub symbols_scanned: usize,
    /// Shutdown was requested before every symbol was scanned
    pub interrupted: bool,
}

pub struct Scanner {
    config: ScannerConfig,
    hierarchy: TimeframeHierarchy,
    store: CandleStore,
    states: HashMap<String, SymbolState>,
}

impl Scanner {
    pub fn new(config: ScannerConfig) -> Self {
        let hierarchy = TimeframeHierarchy::new(config.fallback_depth);
        Self {
            config,
            hierarchy,
            store: CandleStore::new(),
            states: HashMap::new(),
        }
    }

    pub fn config(&self) -> &ScannerConfig {
        &self.config
    }

    /// Sweep every symbol once, in configured order
    pub fn run_cycle(
        &mut self,
        feed: &dyn MarketDataFeed,
        clock: &dyn TimeSource,
        shutdown: &AtomicBool,
    ) -> CycleReport {
        let mut report = CycleReport::default();
        let symbols = self.config.symbols.clone();

        for symbol in &symbols {
            if shutdown.load(Ordering::SeqCst) {
                info!("Shutdown requested, stopping sweep before {}", symbol.name);
                report.interrupted = true;
                break;
            }

            let now = clock.now();
            match self.scan_symbol(feed, symbol, now) {
                Ok(alerts) => report.alerts.extend(alerts),
                Err(error) => {
                    if error.is_transient() {
                        warn!("Skipping {} this cycle: {}", symbol.name, error);
                    } else {
                        warn!("Dropping {} cycle result: {}", symbol.name, error);
                    }
                    report.failures.push(SymbolFailure {
                        symbol: symbol.name.clone(),
                        error,
                    });
                }
            }
            report.symbols_scanned += 1;
        }

        report
    }

    /// Evaluate one symbol; breakeven notices are marked sent only when the
    /// whole evaluation succeeds
    fn scan_symbol(
        &mut self,
        feed: &dyn MarketDataFeed,
        symbol: &SymbolConfig,
        now: DateTime<Utc>,
    ) -> Result<Vec<AlertRequest>, ScanError> {
        let mut breakevens = Vec::new();
        let alerts = self.evaluate_symbol(feed, symbol, now, &mut breakevens)?;

        if let Some(state) = self.states.get_mut(&symbol.name) {
            for open in state.open_plans.iter_mut().filter(|p| breakevens.contains(&p.fvg_id)) {
                open.breakeven_sent = true;
            }
        }
        Ok(alerts)
    }

    fn evaluate_symbol(
        &mut self,
        feed: &dyn MarketDataFeed,
        symbol: &SymbolConfig,
        now: DateTime<Utc>,
        breakevens: &mut Vec<Uuid>,
    ) -> Result<Vec<AlertRequest>, ScanError> {
        let Scanner {
            config,
            hierarchy,
            store,
            states,
        } = self;

        let feed_symbol = config.feed_symbol(symbol);
        let detection = config.detection_for(symbol);
        let min_size = detection.min_fvg_size(symbol.pip_size);
        let classifier = detection.to_classifier_config();
        let ray_config = detection.to_pd_ray_config();
        let two_candle_config = detection.to_two_candle_config();
        let plan_config = detection.to_trade_plan_config(symbol.pip_size);

        let state = states.entry(symbol.name.clone()).or_default();
        let mut alerts = Vec::new();
        let mut fetched: HashMap<Timeframe, Vec<Candle>> = HashMap::new();

        for &tf in hierarchy.levels() {
            let series = store.refresh(feed, &feed_symbol, tf, config.timeframes.lookback(tf), now)?;
            let Some(price) = series.last().map(|c| c.close) else {
                debug!("{} {}: no candles", symbol.name, tf);
                continue;
            };
            let closed = closed_prefix(series).to_vec();
            fetched.insert(tf, closed.clone());
            if closed.len() < 3 {
                debug!("{} {}: {} closed candles, skipping", symbol.name, tf, closed.len());
                continue;
            }

            let tracker = state.trackers.entry(tf).or_insert_with(|| FvgTracker::new(tf));
            let update = tracker.update(&closed, min_size);
            if !update.is_empty() {
                debug!(
                    "{} {}: {} new, {} mitigated, {} invalidated FVGs",
                    symbol.name,
                    tf,
                    update.created.len(),
                    update.mitigated.len(),
                    update.invalidated.len()
                );
            }

            // Breakeven on open plans, then drop plans whose stop or target traded
            let pending = state
                .open_plans
                .iter()
                .filter(|p| p.timeframe == tf && !p.breakeven_sent && config.alerts.send_breakeven_alerts);
            for open in pending {
                let new_fvg = tracker
                    .fvgs()
                    .iter()
                    .filter(|f| f.direction == open.plan.direction && !open.known_fvgs.contains(&f.id))
                    .min_by_key(|f| f.created_at);
                if let Some(fvg) = new_fvg {
                    info!(
                        "{} {}: new {} FVG {}, breakeven at {:.5}",
                        symbol.name,
                        tf,
                        fvg.direction,
                        fvg.level_identity(),
                        open.plan.breakeven_price
                    );
                    alerts.push(AlertRequest::breakeven(&symbol.name, fvg, &open.plan, symbol.pip_size, now));
                    breakevens.push(open.fvg_id);
                }
            }
            state.open_plans.retain(|open| {
                let resolved = open.timeframe == tf
                    && closed
                        .iter()
                        .filter(|c| c.open_time >= open.opened_at)
                        .any(|c| open.plan.is_resolved(c.high, c.low));
                if resolved {
                    debug!("{} plan from FVG {} resolved", symbol.name, open.fvg_id);
                }
                !resolved
            });

            let rays = PdRaySet::build(tracker, &closed, &ray_config, price);
            let bias = compute_bias(&symbol.name, tf, &closed, &rays, &classifier, &ray_config);
            debug!(
                "{} {}: bias {} ({:.0}%), {} rays",
                symbol.name,
                tf,
                bias.direction,
                bias.confidence,
                rays.rays().len()
            );

            let candidates: Vec<Fvg> = tracker
                .mitigated_by_priority()
                .into_iter()
                .filter(|f| !state.alerted.contains(&f.id))
                .cloned()
                .collect();

            let fallbacks = hierarchy.fallback_candidates(tf);
            let mut pending_watch: Option<&Fvg> = None;

            for fvg in &candidates {
                let staged = detect_staged(fvg, fallbacks, &two_candle_config, |ltf| {
                    if let Some(candles) = fetched.get(&ltf) {
                        return Ok(candles.clone());
                    }
                    let series = store.refresh(feed, &feed_symbol, ltf, config.timeframes.lookback(ltf), now)?;
                    let closed = closed_prefix(series).to_vec();
                    fetched.insert(ltf, closed.clone());
                    Ok(closed)
                })?;
                debug!(
                    "{} {} FVG {}: 2CR tried on {:?}",
                    symbol.name,
                    tf,
                    fvg.level_identity(),
                    staged.attempts
                );

                let setup = match &staged.outcome {
                    TwoCrOutcome::MatchedSame(s) | TwoCrOutcome::MatchedFallback(s) if s.is_confirmed() => s,
                    _ => {
                        let aligned = bias.direction.as_direction() == Some(fvg.direction);
                        if pending_watch.is_none() && aligned && !state.watched.contains(&fvg.id) {
                            pending_watch = Some(fvg);
                        }
                        continue;
                    }
                };

                match build_plan(setup, &bias, &rays, price, &plan_config) {
                    Ok(plan) => {
                        info!(
                            "{} {} {} 2CR on {}: entry {}, stop {:.5}, target {:.5}, R:R {:.2}",
                            symbol.name,
                            tf,
                            setup.direction,
                            setup.detection_timeframe,
                            plan.entry,
                            plan.stop_loss,
                            plan.target,
                            plan.risk_reward
                        );
                        let known_fvgs: HashSet<Uuid> = tracker.fvgs().iter().map(|f| f.id).collect();
                        state.alerted.insert(fvg.id);
                        state.open_plans.push(OpenPlan {
                            fvg_id: fvg.id,
                            timeframe: tf,
                            plan: plan.clone(),
                            opened_at: now,
                            known_fvgs,
                            breakeven_sent: false,
                        });
                        alerts.push(AlertRequest::two_candle(
                            &symbol.name,
                            fvg,
                            setup,
                            plan,
                            &bias,
                            symbol.pip_size,
                            price,
                            now,
                        ));
                        state.prune();
                        return Ok(alerts);
                    }
                    Err(reason) => {
                        debug!("{} {} plan withheld: {}", symbol.name, tf, reason);
                    }
                }
            }

            if let Some(fvg) = pending_watch {
                if config.alerts.send_watch_alerts && bias.is_actionable() {
                    let mut watch_tfs = vec![tf];
                    watch_tfs.extend_from_slice(fallbacks);
                    info!(
                        "{} {}: {} bias {:.0}% at mitigated FVG {}, watching {:?}",
                        symbol.name,
                        tf,
                        bias.direction,
                        bias.confidence,
                        fvg.level_identity(),
                        watch_tfs
                    );
                    state.watched.insert(fvg.id);
                    alerts.push(AlertRequest::watch(
                        &symbol.name,
                        fvg,
                        &watch_tfs,
                        &bias,
                        symbol.pip_size,
                        price,
                        now,
                    ));
                    state.prune();
                    return Ok(alerts);
                }
            }
        }

        state.prune();
        Ok(alerts)
    }

    /// Whether any 2CR alert has been emitted for `fvg_id` on `symbol`
    pub fn is_alerted(&self, symbol: &str, fvg_id: &Uuid) -> bool {
        self.states
            .get(symbol)
            .is_some_and(|s| s.alerted.contains(fvg_id) && s.knows(fvg_id))
    }

    /// Open plans still followed for `symbol`
    pub fn open_plans(&self, symbol: &str) -> Vec<TradePlan> {
        self.states
            .get(symbol)
            .map(|s| s.open_plans.iter().map(|p| p.plan.clone()).collect())
            .unwrap_or_default()
    }

    /// Live FVGs tracked for a symbol and timeframe
    pub fn fvgs(&self, symbol: &str, timeframe: Timeframe) -> Vec<Fvg> {
        self.states
            .get(symbol)
            .and_then(|s| s.trackers.get(&timeframe))
            .map(|t| t.live().cloned().collect())
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feed::{FixedClock, MemoryFeed};
    use crate::trading_core::alerts::AlertKind;
    use crate::trading_core::fvg::FvgStatus;
    use crate::trading_core::trade_plan::EntryInstruction;
    use chrono::{Duration, TimeZone};

    fn base() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 3, 0, 0, 0).unwrap()
    }

    fn h4(i: i64, o: f64, h: f64, l: f64, c: f64) -> Candle {
        Candle::new(Timeframe::H4, base() + Duration::hours(4 * i), o, h, l, c)
    }

    /// Swing high 1.1300, bullish gap [1.1200, 1.1230] at candle 8, mitigation at 9,
    /// sweep rejection at 10, follow-through at 11, candle 12 forming
    fn scenario() -> Vec<Candle> {
        vec![
            h4(0, 1.1250, 1.1270, 1.1240, 1.1260),
            h4(1, 1.1260, 1.1285, 1.1255, 1.1280),
            h4(2, 1.1280, 1.1300, 1.1270, 1.1275),
            h4(3, 1.1275, 1.1280, 1.1240, 1.1245),
            h4(4, 1.1245, 1.1272, 1.1200, 1.1205),
            h4(5, 1.1205, 1.1242, 1.1185, 1.1190),
            h4(6, 1.1190, 1.1200, 1.1150, 1.1160),
            h4(7, 1.1160, 1.1260, 1.1155, 1.1255),
            h4(8, 1.1255, 1.1300, 1.1230, 1.1280),
            h4(9, 1.1280, 1.1282, 1.1215, 1.1222),
            h4(10, 1.1222, 1.1232, 1.1200, 1.1230),
            h4(11, 1.1230, 1.1305, 1.1228, 1.1300),
            h4(12, 1.1300, 1.1302, 1.1285, 1.1290),
        ]
    }

    fn config(symbols: &[&str]) -> ScannerConfig {
        ScannerConfig {
            symbols: symbols.iter().map(|s| SymbolConfig::new(s, 0.0001)).collect(),
            ..ScannerConfig::default()
        }
    }

    /// Forming candle 12 opened at 2024-06-05 00:00
    fn clock() -> FixedClock {
        FixedClock::new(Utc.with_ymd_and_hms(2024, 6, 5, 1, 0, 0).unwrap())
    }

    #[test]
    fn test_scenario_confirmed_same_timeframe() {
        let feed = MemoryFeed::new();
        feed.set("EURUSD", Timeframe::H4, scenario());
        let mut scanner = Scanner::new(config(&["EURUSD"]));
        let shutdown = AtomicBool::new(false);

        let report = scanner.run_cycle(&feed, &clock(), &shutdown);
        assert!(report.failures.is_empty());
        assert_eq!(report.alerts.len(), 1);

        let alert = &report.alerts[0];
        assert_eq!(alert.key.kind, AlertKind::TwoCrSame);
        assert_eq!(alert.key.timeframe, Timeframe::H4);
        assert_eq!(alert.key.level, "1.12000-1.12300");

        let plan = alert.payload.plan.as_ref().unwrap();
        assert_eq!(plan.entry, EntryInstruction::Limit { price: 1.1230 });
        assert!((plan.stop_loss - 1.1195).abs() < 1e-9);
        assert!((plan.target - 1.1300).abs() < 1e-9);
        assert!((plan.risk_reward - 2.0).abs() < 1e-6);

        let fvgs = scanner.fvgs("EURUSD", Timeframe::H4);
        assert_eq!(fvgs.len(), 1);
        assert_eq!(fvgs[0].status, FvgStatus::Mitigated);
        assert!(scanner.is_alerted("EURUSD", &fvgs[0].id));
    }

    #[test]
    fn test_alerted_setup_is_terminal() {
        let feed = MemoryFeed::new();
        feed.set("EURUSD", Timeframe::H4, scenario());
        let mut scanner = Scanner::new(config(&["EURUSD"]));
        let shutdown = AtomicBool::new(false);

        assert_eq!(scanner.run_cycle(&feed, &clock(), &shutdown).alerts.len(), 1);
        assert!(scanner.run_cycle(&feed, &clock(), &shutdown).alerts.is_empty());
        assert_eq!(scanner.open_plans("EURUSD").len(), 1);
    }

    #[test]
    fn test_feed_failure_is_isolated() {
        let feed = MemoryFeed::new();
        feed.set("EURUSD", Timeframe::H4, scenario());
        feed.set("AUDUSD", Timeframe::H4, scenario());
        feed.set_offline("GBPUSD", true);
        let mut scanner = Scanner::new(config(&["GBPUSD", "EURUSD", "AUDUSD"]));
        let shutdown = AtomicBool::new(false);

        let report = scanner.run_cycle(&feed, &clock(), &shutdown);
        assert_eq!(report.symbols_scanned, 3);
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].symbol, "GBPUSD");
        assert!(report.failures[0].error.is_transient());
        assert_eq!(report.alerts.len(), 2);
    }

    #[test]
    fn test_invalid_candles_drop_symbol_result() {
        let feed = MemoryFeed::new();
        let mut bad = scenario();
        bad.swap(3, 4);
        feed.set("EURUSD", Timeframe::H4, bad);
        let mut scanner = Scanner::new(config(&["EURUSD"]));

        let report = scanner.run_cycle(&feed, &clock(), &AtomicBool::new(false));
        assert!(report.alerts.is_empty());
        assert_eq!(report.failures.len(), 1);
        assert!(!report.failures[0].error.is_transient());
    }

    #[test]
    fn test_shutdown_stops_between_symbols() {
        let feed = MemoryFeed::new();
        let mut scanner = Scanner::new(config(&["EURUSD", "GBPUSD"]));
        let report = scanner.run_cycle(&feed, &clock(), &AtomicBool::new(true));
        assert!(report.interrupted);
        assert_eq!(report.symbols_scanned, 0);
    }

    #[test]
    fn test_watch_without_follow_through() {
        let feed = MemoryFeed::new();
        feed.set("EURUSD", Timeframe::H4, scenario()[..11].to_vec());
        let mut scanner = Scanner::new(config(&["EURUSD"]));
        // Candle 10 (2024-06-04 16:00) closed
        let clock = FixedClock::new(Utc.with_ymd_and_hms(2024, 6, 4, 20, 0, 0).unwrap());

        let report = scanner.run_cycle(&feed, &clock, &AtomicBool::new(false));
        assert_eq!(report.alerts.len(), 1);
        let alert = &report.alerts[0];
        assert_eq!(alert.key.kind, AlertKind::Watch);
        assert_eq!(
            alert.payload.detection_timeframes,
            vec![Timeframe::H4, Timeframe::H1, Timeframe::M15]
        );

        // Watch is sent once per FVG
        let report = scanner.run_cycle(&feed, &clock, &AtomicBool::new(false));
        assert!(report.alerts.is_empty());
    }

    #[test]
    fn test_watch_alerts_can_be_disabled() {
        let feed = MemoryFeed::new();
        feed.set("EURUSD", Timeframe::H4, scenario()[..11].to_vec());
        let mut cfg = config(&["EURUSD"]);
        cfg.alerts.send_watch_alerts = false;
        let mut scanner = Scanner::new(cfg);
        let clock = FixedClock::new(Utc.with_ymd_and_hms(2024, 6, 4, 20, 0, 0).unwrap());

        let report = scanner.run_cycle(&feed, &clock, &AtomicBool::new(false));
        assert!(report.alerts.is_empty());
    }

    #[test]
    fn test_breakeven_after_new_fvg() {
        let feed = MemoryFeed::new();
        feed.set("EURUSD", Timeframe::H4, scenario());
        let mut scanner = Scanner::new(config(&["EURUSD"]));
        let shutdown = AtomicBool::new(false);
        let clock = clock();
        assert_eq!(scanner.run_cycle(&feed, &clock, &shutdown).alerts.len(), 1);

        // Candle 12 closes leaving a bullish gap [1.1232, 1.1260] above candle 10
        let mut candles = scenario();
        candles[12] = h4(12, 1.1290, 1.1291, 1.1260, 1.1262);
        candles.push(h4(13, 1.1262, 1.1270, 1.1255, 1.1265));
        feed.set("EURUSD", Timeframe::H4, candles);
        clock.set(Utc.with_ymd_and_hms(2024, 6, 5, 4, 30, 0).unwrap());

        let report = scanner.run_cycle(&feed, &clock, &shutdown);
        assert_eq!(report.alerts.len(), 1);
        assert_eq!(report.alerts[0].key.kind, AlertKind::Breakeven);
        let plan = report.alerts[0].payload.plan.as_ref().unwrap();
        assert!((plan.breakeven_price - 1.12475).abs() < 1e-9);

        // Sent once
        clock.advance(Duration::hours(4));
        assert!(scanner.run_cycle(&feed, &clock, &shutdown).alerts.is_empty());
    }
    fn h1(day: u32, hour: u32, o: f64, h: f64, l: f64, c: f64) -> Candle {
        let open = Utc.with_ymd_and_hms(2024, 6, day, hour, 0, 0).unwrap();
        Candle::new(Timeframe::H1, open, o, h, l, c)
    }

    #[test]
    fn test_breakeven_survives_failed_cycle() {
        let feed = MemoryFeed::new();
        feed.set("EURUSD", Timeframe::H4, scenario());
        let mut scanner = Scanner::new(config(&["EURUSD"]));
        let shutdown = AtomicBool::new(false);
        let clock = clock();
        assert_eq!(scanner.run_cycle(&feed, &clock, &shutdown).alerts.len(), 1);

        // New bullish gap [1.1232, 1.1260] on H4, but the H1 series is out of order
        let mut candles = scenario();
        candles[12] = h4(12, 1.1290, 1.1291, 1.1260, 1.1262);
        candles.push(h4(13, 1.1262, 1.1270, 1.1255, 1.1265));
        feed.set("EURUSD", Timeframe::H4, candles);
        feed.set(
            "EURUSD",
            Timeframe::H1,
            vec![
                h1(5, 2, 1.1262, 1.1266, 1.1258, 1.1263),
                h1(5, 1, 1.1262, 1.1266, 1.1258, 1.1263),
                h1(5, 3, 1.1262, 1.1266, 1.1258, 1.1263),
            ],
        );
        clock.set(Utc.with_ymd_and_hms(2024, 6, 5, 4, 30, 0).unwrap());

        let report = scanner.run_cycle(&feed, &clock, &shutdown);
        assert!(report.alerts.is_empty());
        assert_eq!(report.failures.len(), 1);
        assert!(!report.failures[0].error.is_transient());

        // Once the feed recovers the breakeven notice still goes out, once
        feed.set(
            "EURUSD",
            Timeframe::H1,
            (0..4).map(|hour| h1(5, hour, 1.1262, 1.1266, 1.1258, 1.1263)).collect(),
        );
        let report = scanner.run_cycle(&feed, &clock, &shutdown);
        assert!(report.failures.is_empty());
        assert_eq!(report.alerts.len(), 1);
        assert_eq!(report.alerts[0].key.kind, AlertKind::Breakeven);

        assert!(scanner.run_cycle(&feed, &clock, &shutdown).alerts.is_empty());
    }

    #[test]
    fn test_breakeven_alerts_can_be_disabled() {
        let feed = MemoryFeed::new();
        feed.set("EURUSD", Timeframe::H4, scenario());
        let mut cfg = config(&["EURUSD"]);
        cfg.alerts.send_breakeven_alerts = false;
        let mut scanner = Scanner::new(cfg);
        let shutdown = AtomicBool::new(false);
        let clock = clock();
        assert_eq!(scanner.run_cycle(&feed, &clock, &shutdown).alerts.len(), 1);

        let mut candles = scenario();
        candles[12] = h4(12, 1.1290, 1.1291, 1.1260, 1.1262);
        candles.push(h4(13, 1.1262, 1.1270, 1.1255, 1.1265));
        feed.set("EURUSD", Timeframe::H4, candles);
        clock.set(Utc.with_ymd_and_hms(2024, 6, 5, 4, 30, 0).unwrap());

        assert!(scanner.run_cycle(&feed, &clock, &shutdown).alerts.is_empty());
    }

    #[test]
    fn test_fallback_to_lower_timeframe() {
        let feed = MemoryFeed::new();
        // H4 has only the mitigating candle closed after the gap; candle 10 is forming
        let mut candles = scenario()[..10].to_vec();
        candles.push(h4(10, 1.1222, 1.1270, 1.1200, 1.1265));
        feed.set("EURUSD", Timeframe::H4, candles);
        feed.set(
            "EURUSD",
            Timeframe::H1,
            vec![
                h1(4, 12, 1.1280, 1.1282, 1.1240, 1.1245),
                h1(4, 13, 1.1245, 1.1250, 1.1225, 1.1228),
                h1(4, 14, 1.1228, 1.1236, 1.1215, 1.1234),
                h1(4, 15, 1.1234, 1.1262, 1.1232, 1.1260),
                h1(4, 16, 1.1260, 1.1270, 1.1255, 1.1265),
            ],
        );
        let mut scanner = Scanner::new(config(&["EURUSD"]));
        let clock = FixedClock::new(Utc.with_ymd_and_hms(2024, 6, 4, 17, 30, 0).unwrap());

        let report = scanner.run_cycle(&feed, &clock, &AtomicBool::new(false));
        assert!(report.failures.is_empty());
        assert_eq!(report.alerts.len(), 1);

        let alert = &report.alerts[0];
        assert_eq!(alert.key.kind, AlertKind::TwoCrFallback);
        assert_eq!(alert.key.timeframe, Timeframe::H1);
        assert_eq!(alert.key.level, "1.12000-1.12300");
        assert_eq!(alert.payload.anchor_timeframe, Timeframe::H4);
        assert_eq!(alert.payload.detection_timeframes, vec![Timeframe::H1]);

        let plan = alert.payload.plan.as_ref().unwrap();
        assert_eq!(plan.entry, EntryInstruction::Limit { price: 1.1234 });
        assert!((plan.stop_loss - 1.1210).abs() < 1e-9);
        assert!((plan.target - 1.1282).abs() < 1e-9);
        assert!((plan.risk_reward - 2.0).abs() < 1e-6);

        // H4 was tried before H1, and the search stopped at the first match
        let requested: Vec<Timeframe> = feed.requests().into_iter().map(|(_, tf)| tf).collect();
        assert_eq!(
            requested,
            vec![Timeframe::Monthly, Timeframe::Weekly, Timeframe::Daily, Timeframe::H4, Timeframe::H1]
        );
    }
}
