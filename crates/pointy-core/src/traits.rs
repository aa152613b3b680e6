//! Seams between the coordination layer and its backends.

use async_trait::async_trait;

use crate::errors::{LockError, PushError, StoreError};
use crate::ids::{ConnectionId, SessionId};
use crate::lock::{LockHandle, LockKey};
use crate::messages::Message;
use crate::session::Session;

/// Named, leased mutual exclusion.
#[async_trait]
pub trait LockManager: Send + Sync {
    /// Single conditional write. `None` means a live lease is held by someone else.
    async fn try_acquire(&self, key: &LockKey) -> Result<Option<LockHandle>, StoreError>;

    /// Polls `try_acquire` until it succeeds or the lock timeout elapses.
    async fn acquire(&self, key: &LockKey) -> Result<LockHandle, LockError>;

    /// Deletes the record only if it still carries this handle's token.
    async fn release(&self, handle: &LockHandle) -> Result<(), StoreError>;
}

/// Durable session records. Callers hold the session lock across load and save.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Fails with [`StoreError::Conflict`] if a live session with this id exists.
    async fn create(&self, session: Session) -> Result<Session, StoreError>;

    /// Expired sessions are reported as `None`.
    async fn load(&self, session_id: &SessionId) -> Result<Option<Session>, StoreError>;

    /// Overwrites the record, refreshes its expiry, and broadcasts the new state
    /// before returning it.
    async fn save(&self, session: Session) -> Result<Session, StoreError>;
}

/// Which connections are watching which sessions.
#[async_trait]
pub trait InterestRegistry: Send + Sync {
    async fn record_interest(
        &self,
        session_id: &SessionId,
        connection_id: &ConnectionId,
    ) -> Result<(), StoreError>;

    async fn list_active_watchers(
        &self,
        session_id: &SessionId,
    ) -> Result<Vec<ConnectionId>, StoreError>;

    async fn remove_watcher(
        &self,
        session_id: &SessionId,
        connection_id: &ConnectionId,
    ) -> Result<(), StoreError>;

    /// Drops every watcher record for a closed connection. Returns the count removed.
    async fn forget_connection(&self, connection_id: &ConnectionId) -> Result<usize, StoreError>;
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BroadcastReport {
    pub delivered: usize,
    pub pruned: Vec<ConnectionId>,
    pub failed: Vec<(ConnectionId, String)>,
}

impl BroadcastReport {
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Fans a changed session out to its watchers. Never fails.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn broadcast(&self, session: &Session) -> BroadcastReport;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushOutcome {
    Delivered,
    /// The connection no longer exists and will never accept messages again.
    Gone,
}

/// Delivers one message to one connection.
#[async_trait]
pub trait Pusher: Send + Sync {
    async fn send(
        &self,
        connection_id: &ConnectionId,
        message: &Message,
    ) -> Result<PushOutcome, PushError>;
}
