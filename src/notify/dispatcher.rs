use anyhow::Result;
use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use super::Notifier;
use crate::trading_core::{Admission, AlertCache, AlertRequest};

/// Counts for one batch of alerts
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DispatchReport {
    pub sent: usize,
    pub duplicates: usize,
    pub failed: usize,
}

/// Gate between the scanner and a notifier.
///
/// Every alert is admitted through the dedup cache first; only accepted alerts
/// reach the notifier. A failed delivery is recorded on the cache record and
/// never re-admitted.
pub struct AlertDispatcher<N: Notifier> {
    cache: AlertCache,
    notifier: N,
    dry_run: bool,
}

impl<N: Notifier> AlertDispatcher<N> {
    pub fn new(cache: AlertCache, notifier: N) -> Self {
        Self {
            cache,
            notifier,
            dry_run: false,
        }
    }

    /// Log accepted alerts instead of sending them
    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    pub async fn dispatch(&mut self, alerts: &[AlertRequest], now: DateTime<Utc>) -> DispatchReport {
        let mut report = DispatchReport::default();

        for alert in alerts {
            if self.cache.admit(&alert.key, &alert.payload, now) == Admission::Duplicate {
                debug!("Suppressed duplicate alert {}", alert.key);
                report.duplicates += 1;
                continue;
            }

            if self.dry_run {
                info!("[dry-run] {}\n{}", alert.key, alert.payload.render_message());
                report.sent += 1;
                continue;
            }

            match self.notifier.send(&alert.payload).await {
                Ok(()) => {
                    info!("Alert {} delivered via {}", alert.key, self.notifier.name());
                    report.sent += 1;
                }
                Err(e) => {
                    warn!("Alert {} not delivered via {}: {:#}", alert.key, self.notifier.name(), e);
                    self.cache.mark_undelivered(&alert.key);
                    report.failed += 1;
                }
            }
        }

        if let Err(e) = self.cache.flush() {
            warn!("Failed to persist alert cache: {:#}", e);
        }
        report
    }

    /// Persist then empty the cache
    pub fn shutdown(&mut self) -> Result<()> {
        self.cache.flush()?;
        self.cache.clear();
        info!("Alert cache flushed and cleared");
        Ok(())
    }

    pub fn cache(&self) -> &AlertCache {
        &self.cache
    }

    pub fn notifier(&self) -> &N {
        &self.notifier
    }
}
