//! SQLite-backed lock, session and watcher stores.

pub mod database;
pub mod locks;
pub mod row_helpers;
pub mod schema;
pub mod sessions;
pub mod sweeper;
pub mod watchers;

pub use database::Database;
pub use locks::SqliteLockManager;
pub use schema::Tables;
pub use sessions::SqliteSessionStore;
pub use sweeper::{start_sweeper, SweepReport, Sweeper};
pub use watchers::SqliteInterestRegistry;
