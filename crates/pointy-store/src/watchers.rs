use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, instrument};

use pointy_core::clock::{self, Clock};
use pointy_core::{ConnectionId, InterestRegistry, SessionId, StoreError};

use crate::database::Database;
use crate::row_helpers::{self, to_millis, SqlResultExt};

/// Watcher records keyed by (session, connection), each with its own expiry.
pub struct SqliteInterestRegistry {
    db: Database,
    clock: Arc<dyn Clock>,
    session_timeout: Duration,
}

impl SqliteInterestRegistry {
    pub fn new(db: Database, clock: Arc<dyn Clock>, session_timeout: Duration) -> Self {
        Self {
            db,
            clock,
            session_timeout,
        }
    }

    /// Delete expired watcher records. Returns the number removed.
    pub fn purge_expired(&self) -> Result<usize, StoreError> {
        let now = to_millis(self.clock.now());
        self.db.with_conn(|conn| {
            let sql = format!(
                "DELETE FROM {} WHERE expires_at <= ?1",
                self.db.tables().watchers()
            );
            conn.execute(&sql, [now]).db()
        })
    }
}

#[async_trait]
impl InterestRegistry for SqliteInterestRegistry {
    #[instrument(skip(self), fields(session_id = %session_id, connection_id = %connection_id))]
    async fn record_interest(
        &self,
        session_id: &SessionId,
        connection_id: &ConnectionId,
    ) -> Result<(), StoreError> {
        let now = self.clock.now();
        let expires = to_millis(clock::after(now, self.session_timeout));
        self.db.with_conn(|conn| {
            // Refreshing keeps the original registration time.
            let sql = format!(
                "INSERT INTO {} (session_id, connection_id, expires_at, registered_at)
                 VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT(session_id, connection_id) DO UPDATE SET
                     expires_at = excluded.expires_at",
                self.db.tables().watchers()
            );
            conn.execute(
                &sql,
                rusqlite::params![
                    session_id.as_str(),
                    connection_id.as_str(),
                    expires,
                    to_millis(now)
                ],
            )
            .db()
        })?;
        debug!("interest recorded");
        Ok(())
    }

    #[instrument(skip(self), fields(session_id = %session_id))]
    async fn list_active_watchers(
        &self,
        session_id: &SessionId,
    ) -> Result<Vec<ConnectionId>, StoreError> {
        let now = to_millis(self.clock.now());
        let table = self.db.tables().watchers();
        self.db.with_conn(|conn| {
            let sql = format!(
                "SELECT connection_id FROM {table}
                 WHERE session_id = ?1 AND expires_at > ?2
                 ORDER BY registered_at, connection_id"
            );
            let mut stmt = conn.prepare(&sql).db()?;
            let mut rows = stmt
                .query(rusqlite::params![session_id.as_str(), now])
                .db()?;
            let mut watchers = Vec::new();
            while let Some(row) = rows.next().db()? {
                let id: String = row_helpers::get(row, 0, table, "connection_id")?;
                watchers.push(ConnectionId::from_raw(id));
            }
            Ok(watchers)
        })
    }

    #[instrument(skip(self), fields(session_id = %session_id, connection_id = %connection_id))]
    async fn remove_watcher(
        &self,
        session_id: &SessionId,
        connection_id: &ConnectionId,
    ) -> Result<(), StoreError> {
        self.db.with_conn(|conn| {
            let sql = format!(
                "DELETE FROM {} WHERE session_id = ?1 AND connection_id = ?2",
                self.db.tables().watchers()
            );
            conn.execute(
                &sql,
                rusqlite::params![session_id.as_str(), connection_id.as_str()],
            )
            .db()
        })?;
        Ok(())
    }

    #[instrument(skip(self), fields(connection_id = %connection_id))]
    async fn forget_connection(&self, connection_id: &ConnectionId) -> Result<usize, StoreError> {
        self.db.with_conn(|conn| {
            let sql = format!(
                "DELETE FROM {} WHERE connection_id = ?1",
                self.db.tables().watchers()
            );
            conn.execute(&sql, [connection_id.as_str()]).db()
        })
    }
}
