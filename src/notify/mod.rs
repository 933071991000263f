//! Alert delivery
//!
//! The scanner produces `AlertRequest`s; the dispatcher admits them through the
//! dedup cache and hands accepted payloads to a `Notifier`.

pub mod dispatcher;
pub mod telegram;

use anyhow::Result;
use async_trait::async_trait;
use tracing::info;

use crate::trading_core::AlertPayload;

pub use dispatcher::{AlertDispatcher, DispatchReport};
pub use telegram::TelegramNotifier;

/// Delivery channel for accepted alerts. Failures are reported, never retried here.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send(&self, payload: &AlertPayload) -> Result<()>;

    fn name(&self) -> &'static str;
}

#[async_trait]
impl Notifier for Box<dyn Notifier> {
    async fn send(&self, payload: &AlertPayload) -> Result<()> {
        (**self).send(payload).await
    }

    fn name(&self) -> &'static str {
        (**self).name()
    }
}

/// Writes alerts to the log only
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn send(&self, payload: &AlertPayload) -> Result<()> {
        info!("ALERT {} {}\n{}", payload.symbol, payload.kind, payload.render_message());
        Ok(())
    }

    fn name(&self) -> &'static str {
        "log"
    }
}
