use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, instrument, warn};

use pointy_core::clock::{self, Clock};
use pointy_core::retry::{Attempt, RetryError, RetryPolicy};
use pointy_core::{token, LockError, LockHandle, LockKey, LockManager, StoreError};
use pointy_telemetry::{LOCK_ACQUIRE_TOTAL, LOCK_CONTENDED_TOTAL, LOCK_WAIT_SECONDS};

use crate::database::Database;
use crate::row_helpers::{to_millis, SqlResultExt};

/// Leased mutex backed by a conditional upsert on the lock table.
///
/// A row is taken over only when it does not exist or its lease has passed,
/// so at most one holder has a live lease per key. Holders that crash simply
/// let their lease run out.
pub struct SqliteLockManager {
    db: Database,
    clock: Arc<dyn Clock>,
    policy: RetryPolicy,
    lock_expiration: Duration,
}

impl SqliteLockManager {
    pub fn new(
        db: Database,
        clock: Arc<dyn Clock>,
        policy: RetryPolicy,
        lock_expiration: Duration,
    ) -> Self {
        Self {
            db,
            clock,
            policy,
            lock_expiration,
        }
    }

    /// Delete locks whose lease has passed. Returns the number removed.
    pub fn purge_expired(&self) -> Result<usize, StoreError> {
        let now = to_millis(self.clock.now());
        self.db.with_conn(|conn| {
            let sql = format!(
                "DELETE FROM {} WHERE lease_expires_at <= ?1",
                self.db.tables().locks()
            );
            conn.execute(&sql, [now]).db()
        })
    }
}

#[async_trait]
impl LockManager for SqliteLockManager {
    #[instrument(skip(self), fields(lock_key = %key))]
    async fn try_acquire(&self, key: &LockKey) -> Result<Option<LockHandle>, StoreError> {
        let now = self.clock.now();
        let handle = LockHandle {
            key: key.clone(),
            holder_token: token::generate(),
            lease_expires_at: clock::after(now, self.lock_expiration),
        };

        let changed = self.db.with_conn(|conn| {
            let table = self.db.tables().locks();
            let sql = format!(
                "INSERT INTO {table} (lock_key, holder_token, lease_expires_at)
                 VALUES (?1, ?2, ?3)
                 ON CONFLICT(lock_key) DO UPDATE SET
                     holder_token = excluded.holder_token,
                     lease_expires_at = excluded.lease_expires_at
                 WHERE {table}.lease_expires_at <= ?4"
            );
            conn.execute(
                &sql,
                rusqlite::params![
                    handle.key.as_str(),
                    handle.holder_token,
                    to_millis(handle.lease_expires_at),
                    to_millis(now),
                ],
            )
            .db()
        })?;

        if changed == 1 {
            Ok(Some(handle))
        } else {
            Ok(None)
        }
    }

    async fn acquire(&self, key: &LockKey) -> Result<LockHandle, LockError> {
        let started = tokio::time::Instant::now();
        let result = self
            .policy
            .run(|| async {
                match self.try_acquire(key).await {
                    Ok(Some(handle)) => Ok(Attempt::Ready(handle)),
                    Ok(None) => {
                        metrics::counter!(LOCK_CONTENDED_TOTAL).increment(1);
                        Ok(Attempt::Retry)
                    }
                    Err(e) => Err(e),
                }
            })
            .await;
        metrics::histogram!(LOCK_WAIT_SECONDS).record(started.elapsed().as_secs_f64());

        match result {
            Ok(handle) => {
                metrics::counter!(LOCK_ACQUIRE_TOTAL, "outcome" => "acquired").increment(1);
                Ok(handle)
            }
            Err(RetryError::Exhausted { attempts, elapsed }) => {
                metrics::counter!(LOCK_ACQUIRE_TOTAL, "outcome" => "timeout").increment(1);
                warn!(lock_key = %key, attempts, waited_ms = elapsed.as_millis() as u64, "lock wait timed out");
                Err(LockError::Timeout {
                    key: key.to_string(),
                    attempts,
                    waited: elapsed,
                })
            }
            Err(RetryError::Failed(e)) => {
                metrics::counter!(LOCK_ACQUIRE_TOTAL, "outcome" => "error").increment(1);
                Err(LockError::Store(e))
            }
        }
    }

    #[instrument(skip(self, handle), fields(lock_key = %handle.key))]
    async fn release(&self, handle: &LockHandle) -> Result<(), StoreError> {
        let removed = self.db.with_conn(|conn| {
            let sql = format!(
                "DELETE FROM {} WHERE lock_key = ?1 AND holder_token = ?2",
                self.db.tables().locks()
            );
            conn.execute(&sql, rusqlite::params![handle.key.as_str(), handle.holder_token])
                .db()
        })?;
        if removed == 0 {
            debug!("lease already rotated, nothing to release");
        }
        Ok(())
    }
}
