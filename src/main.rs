use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{info, warn};

use fvg_scanner::config::ScannerConfig;
use fvg_scanner::feed::{CsvFeed, SystemClock, TimeSource};
use fvg_scanner::notify::{AlertDispatcher, LogNotifier, Notifier, TelegramNotifier};
use fvg_scanner::trading_core::{AlertCache, Scanner};
use fvg_scanner::Shutdown;

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Scanner configuration (JSON); defaults are used when the file is missing
    #[arg(short, long, env = "FVG_CONFIG", default_value = "fvg-scanner.json")]
    config: PathBuf,

    /// Directory holding <SYMBOL>_<TF>.csv candle files
    #[arg(short, long, env = "FVG_DATA_DIR", default_value = "data")]
    data_dir: PathBuf,

    /// Run a single scan cycle and exit
    #[arg(long)]
    once: bool,

    /// Log alerts instead of sending them
    #[arg(long)]
    dry_run: bool,

    /// Telegram bot token
    #[arg(long, env = "TELEGRAM_BOT_TOKEN")]
    telegram_token: Option<String>,

    /// Telegram chat id
    #[arg(long, env = "TELEGRAM_CHAT_ID")]
    telegram_chat_id: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("fvg_scanner=info".parse().context("Invalid log directive")?),
        )
        .init();

    let args = Args::parse();

    let config = if args.config.exists() {
        ScannerConfig::load(&args.config)?
    } else {
        warn!("Config {} not found, using defaults", args.config.display());
        let config = ScannerConfig::default();
        config.validate()?;
        config
    };

    let clock = match config.timezone()? {
        Some(tz) => SystemClock::with_timezone(tz),
        None => SystemClock::new(config.broker_offset_minutes),
    };

    info!("Starting FVG scanner");
    info!(
        "Symbols: {}",
        config.symbols.iter().map(|s| s.name.as_str()).collect::<Vec<_>>().join(", ")
    );
    info!("Data dir: {}", args.data_dir.display());
    info!("Cycle interval: {}s", config.cycle_interval_secs);

    let notifier: Box<dyn Notifier> = match (&args.telegram_token, &args.telegram_chat_id) {
        (Some(token), Some(chat_id)) => Box::new(TelegramNotifier::new(
            token.clone(),
            chat_id.clone(),
            config.alerts.rate_limit_secs,
        )?),
        _ => {
            info!("Telegram credentials not set, alerts go to the log");
            Box::new(LogNotifier)
        }
    };
    info!("Notifier: {}", notifier.name());

    let cache = AlertCache::open(&config.cache.dir, config.cache.max_bytes, clock.now())?;
    let mut dispatcher = AlertDispatcher::new(cache, notifier).with_dry_run(args.dry_run);

    let feed = CsvFeed::new(&args.data_dir);
    let interval = Duration::from_secs(config.cycle_interval_secs);
    let mut scanner = Scanner::new(config);
    let shutdown = Shutdown::new();
    shutdown.listen_for_ctrl_c();

    loop {
        let report = scanner.run_cycle(&feed, &clock, shutdown.flag());
        let dispatched = dispatcher.dispatch(&report.alerts, clock.now()).await;
        info!(
            "Cycle done: {} symbols, {} alerts ({} sent, {} duplicate, {} failed), {} symbol errors",
            report.symbols_scanned,
            report.alerts.len(),
            dispatched.sent,
            dispatched.duplicates,
            dispatched.failed,
            report.failures.len()
        );

        if args.once || shutdown.is_triggered() {
            break;
        }

        tokio::select! {
            _ = tokio::time::sleep(interval) => {}
            _ = shutdown.wait() => break,
        }
    }

    dispatcher.shutdown()?;
    info!("FVG scanner stopped");
    Ok(())
}
