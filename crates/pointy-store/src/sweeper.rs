use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use pointy_core::StoreError;
use pointy_telemetry::SWEEPER_PURGED_TOTAL;

use crate::locks::SqliteLockManager;
use crate::sessions::SqliteSessionStore;
use crate::watchers::SqliteInterestRegistry;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub sessions: usize,
    pub locks: usize,
    pub watchers: usize,
}

impl SweepReport {
    pub fn total(&self) -> usize {
        self.sessions + self.locks + self.watchers
    }
}

/// Physically removes rows that reads already ignore.
pub struct Sweeper {
    sessions: Arc<SqliteSessionStore>,
    locks: Arc<SqliteLockManager>,
    watchers: Arc<SqliteInterestRegistry>,
}

impl Sweeper {
    pub fn new(
        sessions: Arc<SqliteSessionStore>,
        locks: Arc<SqliteLockManager>,
        watchers: Arc<SqliteInterestRegistry>,
    ) -> Self {
        Self {
            sessions,
            locks,
            watchers,
        }
    }

    pub fn sweep_once(&self) -> Result<SweepReport, StoreError> {
        let report = SweepReport {
            sessions: self.sessions.purge_expired()?,
            locks: self.locks.purge_expired()?,
            watchers: self.watchers.purge_expired()?,
        };
        metrics::counter!(SWEEPER_PURGED_TOTAL, "table" => "sessions")
            .increment(report.sessions as u64);
        metrics::counter!(SWEEPER_PURGED_TOTAL, "table" => "locks").increment(report.locks as u64);
        metrics::counter!(SWEEPER_PURGED_TOTAL, "table" => "watchers")
            .increment(report.watchers as u64);
        Ok(report)
    }
}

/// Run [`Sweeper::sweep_once`] every `interval` until `cancel` fires.
pub fn start_sweeper(
    sweeper: Sweeper,
    interval: Duration,
    cancel: CancellationToken,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            tokio::select! {
                () = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }
            match sweeper.sweep_once() {
                Ok(report) if report.total() > 0 => {
                    info!(
                        sessions = report.sessions,
                        locks = report.locks,
                        watchers = report.watchers,
                        "expired rows purged"
                    );
                }
                Ok(_) => {}
                Err(e) => warn!(error = %e, "expiry sweep failed"),
            }
        }
    })
}
