use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;
use rusqlite::Connection;
use tracing::info;

use pointy_core::StoreError;

use crate::row_helpers::SqlResultExt;
use crate::schema::{self, Tables};

/// Thread-safe SQLite connection wrapper shared by the lock, session and
/// watcher repositories.
pub struct Database {
    conn: Arc<Mutex<Connection>>,
    path: PathBuf,
    tables: Tables,
}

impl Database {
    /// Open or create a database at the given path.
    pub fn open(path: &Path, tables: Tables) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| StoreError::Io(format!("create dir: {e}")))?;
            }
        }

        let conn = Connection::open(path).db()?;
        Self::prepare(&conn, &tables)?;

        info!(path = %path.display(), "database opened");

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            path: path.to_owned(),
            tables,
        })
    }

    /// Open an in-memory database with the default table names.
    pub fn in_memory() -> Result<Self, StoreError> {
        Self::in_memory_with(Tables::default())
    }

    pub fn in_memory_with(tables: Tables) -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory().db()?;
        Self::prepare(&conn, &tables)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            path: PathBuf::from(":memory:"),
            tables,
        })
    }

    fn prepare(conn: &Connection, tables: &Tables) -> Result<(), StoreError> {
        conn.execute_batch(schema::PRAGMAS)
            .map_err(|e| StoreError::Database(format!("pragmas: {e}")))?;
        conn.execute_batch(&tables.create_statements())
            .map_err(|e| StoreError::Database(format!("schema: {e}")))?;
        Ok(())
    }

    /// Execute a closure with the database connection.
    pub fn with_conn<F, T>(&self, f: F) -> Result<T, StoreError>
    where
        F: FnOnce(&Connection) -> Result<T, StoreError>,
    {
        let conn = self.conn.lock();
        f(&conn)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn tables(&self) -> &Tables {
        &self.tables
    }
}

impl Clone for Database {
    fn clone(&self) -> Self {
        Self {
            conn: self.conn.clone(),
            path: self.path.clone(),
            tables: self.tables.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table_names(db: &Database) -> Vec<String> {
        db.with_conn(|conn| {
            conn.prepare("SELECT name FROM sqlite_master WHERE type='table' ORDER BY name")
                .db()?
                .query_map([], |row| row.get(0))
                .db()?
                .collect::<rusqlite::Result<Vec<String>>>()
                .db()
        })
        .unwrap()
    }

    #[test]
    fn open_in_memory() {
        let db = Database::in_memory().unwrap();
        assert_eq!(db.path(), Path::new(":memory:"));
        let tables = table_names(&db);
        for name in ["locks", "sessions", "watchers"] {
            assert!(tables.contains(&name.to_string()), "missing {name}");
        }
    }

    #[test]
    fn configured_table_names_are_created() {
        let tables = Tables::new("pp_s", "pp_l", "pp_w").unwrap();
        let db = Database::in_memory_with(tables).unwrap();
        let names = table_names(&db);
        assert!(names.contains(&"pp_s".to_string()));
        assert!(names.contains(&"pp_l".to_string()));
        assert!(names.contains(&"pp_w".to_string()));
        assert!(!names.contains(&"sessions".to_string()));
    }

    #[test]
    fn reopening_file_database_keeps_rows() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("pointy.db");
        let db = Database::open(&path, Tables::default()).unwrap();
        db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO locks (lock_key, holder_token, lease_expires_at) VALUES ('k', 't', 0)",
                [],
            )
            .db()
        })
        .unwrap();
        drop(db);

        let db = Database::open(&path, Tables::default()).unwrap();
        assert!(path.exists());
        let count: i64 = db
            .with_conn(|conn| {
                conn.query_row("SELECT COUNT(*) FROM locks", [], |row| row.get(0))
                    .db()
            })
            .unwrap();
        assert_eq!(count, 1);
    }
}
