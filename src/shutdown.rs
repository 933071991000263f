use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{info, warn};

/// Shared stop request.
///
/// The scanner polls the flag between symbols; the cycle loop awaits
/// [`Shutdown::wait`] between cycles. Clones share the same state.
#[derive(Debug, Clone, Default)]
pub struct Shutdown {
    flag: Arc<AtomicBool>,
    notify: Arc<Notify>,
}

impl Shutdown {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn trigger(&self) {
        self.flag.store(true, Ordering::SeqCst);
        self.notify.notify_waiters();
    }

    pub fn is_triggered(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    /// Flag handed to `Scanner::run_cycle`
    pub fn flag(&self) -> &AtomicBool {
        &self.flag
    }

    /// Resolve once a stop has been requested, including before this call
    pub async fn wait(&self) {
        let notified = self.notify.notified();
        tokio::pin!(notified);
        notified.as_mut().enable();
        if self.is_triggered() {
            return;
        }
        notified.await;
    }

    /// Trigger on ctrl-c from a background task, so a signal during a sweep
    /// stops it before the next symbol
    pub fn listen_for_ctrl_c(&self) -> JoinHandle<()> {
        let shutdown = self.clone();
        tokio::spawn(async move {
            match tokio::signal::ctrl_c().await {
                Ok(()) => info!("Shutdown requested"),
                Err(e) => warn!("Failed to listen for shutdown signal: {}", e),
            }
            shutdown.trigger();
        })
    }
}
