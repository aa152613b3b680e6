//! SQL DDL. Table names come from configuration, so statements are rendered
//! per [`Tables`] rather than kept as constants.

use pointy_core::StoreError;
use pointy_settings::{is_sql_identifier, StoreSettings};

pub const PRAGMAS: &str = r#"
PRAGMA journal_mode = WAL;
PRAGMA busy_timeout = 5000;
PRAGMA synchronous = NORMAL;
"#;

/// Names of the three tables backing sessions, locks and watchers.
///
/// Names are checked to be plain SQL identifiers on construction, which is
/// what makes interpolating them into statements safe.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Tables {
    sessions: String,
    locks: String,
    watchers: String,
}

impl Tables {
    pub fn new(
        sessions: impl Into<String>,
        locks: impl Into<String>,
        watchers: impl Into<String>,
    ) -> Result<Self, StoreError> {
        let tables = Self {
            sessions: sessions.into(),
            locks: locks.into(),
            watchers: watchers.into(),
        };
        for name in [&tables.sessions, &tables.locks, &tables.watchers] {
            if !is_sql_identifier(name) {
                return Err(StoreError::Database(format!("invalid table name: {name:?}")));
            }
        }
        Ok(tables)
    }

    pub fn from_settings(settings: &StoreSettings) -> Result<Self, StoreError> {
        Self::new(
            settings.session_table.as_str(),
            settings.lock_table.as_str(),
            settings.watcher_table.as_str(),
        )
    }

    pub fn sessions(&self) -> &str {
        &self.sessions
    }

    pub fn locks(&self) -> &str {
        &self.locks
    }

    pub fn watchers(&self) -> &str {
        &self.watchers
    }

    pub fn create_statements(&self) -> String {
        let Self {
            sessions,
            locks,
            watchers,
        } = self;
        format!(
            r#"
CREATE TABLE IF NOT EXISTS {sessions} (
    session_id TEXT PRIMARY KEY,
    state TEXT NOT NULL,
    expires_at INTEGER NOT NULL,
    updated_at INTEGER NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_{sessions}_expires ON {sessions}(expires_at);

CREATE TABLE IF NOT EXISTS {locks} (
    lock_key TEXT PRIMARY KEY,
    holder_token TEXT NOT NULL,
    lease_expires_at INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS {watchers} (
    session_id TEXT NOT NULL,
    connection_id TEXT NOT NULL,
    expires_at INTEGER NOT NULL,
    registered_at INTEGER NOT NULL,
    PRIMARY KEY (session_id, connection_id)
);

CREATE INDEX IF NOT EXISTS idx_{watchers}_connection ON {watchers}(connection_id);
CREATE INDEX IF NOT EXISTS idx_{watchers}_expires ON {watchers}(expires_at);
"#
        )
    }
}

impl Default for Tables {
    fn default() -> Self {
        Self {
            sessions: "sessions".to_string(),
            locks: "locks".to_string(),
            watchers: "watchers".to_string(),
        }
    }
}
