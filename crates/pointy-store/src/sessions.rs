use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, instrument, warn};

use pointy_core::clock::{self, Clock};
use pointy_core::{Notifier, Session, SessionId, SessionStore, StoreError};
use pointy_telemetry::{SESSIONS_CREATED_TOTAL, SESSION_SAVES_TOTAL};

use crate::database::Database;
use crate::row_helpers::{self, to_millis, SqlResultExt};

/// Session records stored as JSON blobs keyed by session id.
///
/// Every read ignores rows whose `expires_at` has passed, so an expired
/// session is indistinguishable from one that never existed.
pub struct SqliteSessionStore {
    db: Database,
    clock: Arc<dyn Clock>,
    notifier: Arc<dyn Notifier>,
    session_timeout: Duration,
}

impl SqliteSessionStore {
    pub fn new(
        db: Database,
        clock: Arc<dyn Clock>,
        notifier: Arc<dyn Notifier>,
        session_timeout: Duration,
    ) -> Self {
        Self {
            db,
            clock,
            notifier,
            session_timeout,
        }
    }

    /// Delete expired sessions. Returns the number removed.
    pub fn purge_expired(&self) -> Result<usize, StoreError> {
        let now = to_millis(self.clock.now());
        self.db.with_conn(|conn| {
            let sql = format!(
                "DELETE FROM {} WHERE expires_at <= ?1",
                self.db.tables().sessions()
            );
            conn.execute(&sql, [now]).db()
        })
    }

    fn stamp(&self, mut session: Session) -> (Session, i64, i64) {
        let now = self.clock.now();
        session.expires_at = clock::after(now, self.session_timeout);
        let expires = to_millis(session.expires_at);
        (session, expires, to_millis(now))
    }
}

#[async_trait]
impl SessionStore for SqliteSessionStore {
    #[instrument(skip(self, session), fields(session_id = %session.session_id))]
    async fn create(&self, session: Session) -> Result<Session, StoreError> {
        let (session, expires, now) = self.stamp(session);
        let state = serde_json::to_string(&session)?;

        let inserted = self.db.with_conn(|conn| {
            let table = self.db.tables().sessions();
            let sql = format!(
                "INSERT INTO {table} (session_id, state, expires_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT(session_id) DO UPDATE SET
                     state = excluded.state,
                     expires_at = excluded.expires_at,
                     updated_at = excluded.updated_at
                 WHERE {table}.expires_at <= ?4"
            );
            conn.execute(
                &sql,
                rusqlite::params![session.session_id.as_str(), state, expires, now],
            )
            .db()
        })?;

        if inserted == 0 {
            return Err(StoreError::Conflict(format!(
                "session {} already exists",
                session.session_id
            )));
        }
        metrics::counter!(SESSIONS_CREATED_TOTAL).increment(1);
        debug!("session created");
        Ok(session)
    }

    #[instrument(skip(self), fields(session_id = %session_id))]
    async fn load(&self, session_id: &SessionId) -> Result<Option<Session>, StoreError> {
        let now = to_millis(self.clock.now());
        let table = self.db.tables().sessions();
        let row: Option<(String, i64)> = self.db.with_conn(|conn| {
            let sql = format!(
                "SELECT state, expires_at FROM {table} WHERE session_id = ?1 AND expires_at > ?2"
            );
            let mut stmt = conn.prepare(&sql).db()?;
            let mut rows = stmt
                .query(rusqlite::params![session_id.as_str(), now])
                .db()?;
            match rows.next().db()? {
                Some(row) => Ok(Some((
                    row_helpers::get(row, 0, table, "state")?,
                    row_helpers::get(row, 1, table, "expires_at")?,
                ))),
                None => Ok(None),
            }
        })?;

        let Some((state, expires_at)) = row else {
            return Ok(None);
        };
        let mut session: Session = row_helpers::parse_json(&state, table, "state")?;
        session.expires_at = row_helpers::from_millis(expires_at, table, "expires_at")?;
        Ok(Some(session))
    }

    #[instrument(skip(self, session), fields(session_id = %session.session_id))]
    async fn save(&self, session: Session) -> Result<Session, StoreError> {
        let (session, expires, now) = self.stamp(session);
        let state = serde_json::to_string(&session)?;

        self.db.with_conn(|conn| {
            let sql = format!(
                "INSERT INTO {} (session_id, state, expires_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT(session_id) DO UPDATE SET
                     state = excluded.state,
                     expires_at = excluded.expires_at,
                     updated_at = excluded.updated_at",
                self.db.tables().sessions()
            );
            conn.execute(
                &sql,
                rusqlite::params![session.session_id.as_str(), state, expires, now],
            )
            .db()
        })?;
        metrics::counter!(SESSION_SAVES_TOTAL).increment(1);

        let report = self.notifier.broadcast(&session).await;
        if !report.is_clean() {
            warn!(
                failed = report.failed.len(),
                delivered = report.delivered,
                "broadcast finished with failed deliveries"
            );
        }
        Ok(session)
    }
}
