// Library crate - FVG detection core, market data feeds and alert delivery

pub mod config;
pub mod error;
pub mod feed;
pub mod notify;
pub mod shutdown;
pub mod trading_core;

// Re-export commonly used types
pub use config::ScannerConfig;
pub use error::{FeedError, ScanError};
pub use shutdown::Shutdown;
pub use trading_core::{AlertRequest, Scanner};
