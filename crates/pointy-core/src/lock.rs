//! Lock keys, lease handles, and the scoped guard around an acquisition.

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::errors::{LockError, StoreError};
use crate::ids::SessionId;
use crate::traits::LockManager;

const SESSION_LOCK_PREFIX: &str = "session-lock:";

/// Name of a lock record. Each session maps to exactly one key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LockKey(String);

impl LockKey {
    pub fn for_session(session_id: &SessionId) -> Self {
        Self(format!("{SESSION_LOCK_PREFIX}{session_id}"))
    }

    pub fn from_raw(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for LockKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Proof of a successful acquisition. The holder token is unique per attempt,
/// so a release after the lease rotated to someone else deletes nothing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockHandle {
    pub key: LockKey,
    pub holder_token: String,
    pub lease_expires_at: DateTime<Utc>,
}

/// Held lock that releases exactly once.
///
/// Call [`LockGuard::release`] to release and observe the result. A guard that
/// is dropped while still held (early return, panic, cancelled future) spawns
/// the release onto the current tokio runtime instead.
pub struct LockGuard {
    manager: Arc<dyn LockManager>,
    handle: LockHandle,
    released: bool,
}

impl LockGuard {
    pub async fn acquire(manager: Arc<dyn LockManager>, key: LockKey) -> Result<Self, LockError> {
        let handle = manager.acquire(&key).await?;
        debug!(lock_key = %handle.key, "lock acquired");
        Ok(Self {
            manager,
            handle,
            released: false,
        })
    }

    pub async fn release(mut self) -> Result<(), StoreError> {
        self.released = true;
        let result = self.manager.release(&self.handle).await;
        match &result {
            Ok(()) => debug!(lock_key = %self.handle.key, "lock released"),
            Err(e) => warn!(lock_key = %self.handle.key, error = %e, "lock release failed"),
        }
        result
    }
}

impl fmt::Debug for LockGuard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LockGuard")
            .field("handle", &self.handle)
            .field("released", &self.released)
            .finish()
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        self.released = true;
        let manager = Arc::clone(&self.manager);
        let handle = self.handle.clone();
        match tokio::runtime::Handle::try_current() {
            Ok(rt) => {
                rt.spawn(async move {
                    if let Err(e) = manager.release(&handle).await {
                        warn!(lock_key = %handle.key, error = %e, "deferred lock release failed");
                    }
                });
            }
            Err(_) => {
                // Lease expiry reclaims the lock.
                warn!(lock_key = %handle.key, "lock guard dropped outside a runtime");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use std::collections::HashMap;

    #[derive(Default)]
    struct MemoryLocks {
        held: Mutex<HashMap<String, String>>,
        releases: Mutex<u32>,
    }

    #[async_trait]
    impl LockManager for MemoryLocks {
        async fn try_acquire(&self, key: &LockKey) -> Result<Option<LockHandle>, StoreError> {
            let mut held = self.held.lock();
            if held.contains_key(key.as_str()) {
                return Ok(None);
            }
            let token = crate::token::generate();
            held.insert(key.to_string(), token.clone());
            Ok(Some(LockHandle {
                key: key.clone(),
                holder_token: token,
                lease_expires_at: Utc::now(),
            }))
        }

        async fn acquire(&self, key: &LockKey) -> Result<LockHandle, LockError> {
            self.try_acquire(key).await?.ok_or_else(|| LockError::Timeout {
                key: key.to_string(),
                attempts: 1,
                waited: std::time::Duration::ZERO,
            })
        }

        async fn release(&self, handle: &LockHandle) -> Result<(), StoreError> {
            *self.releases.lock() += 1;
            let mut held = self.held.lock();
            if held.get(handle.key.as_str()) == Some(&handle.holder_token) {
                held.remove(handle.key.as_str());
            }
            Ok(())
        }
    }

    #[test]
    fn session_key_is_prefixed() {
        let key = LockKey::for_session(&SessionId::from_raw("S1"));
        assert_eq!(key.as_str(), "session-lock:S1");
        assert_eq!(key.to_string(), "session-lock:S1");
    }

    #[tokio::test]
    async fn explicit_release_runs_once() {
        let locks = Arc::new(MemoryLocks::default());
        let key = LockKey::from_raw("k");
        let guard = LockGuard::acquire(locks.clone(), key.clone()).await.unwrap();
        assert!(locks.held.lock().contains_key(key.as_str()));

        guard.release().await.unwrap();
        tokio::task::yield_now().await;

        assert_eq!(*locks.releases.lock(), 1);
        assert!(locks.held.lock().is_empty());
    }

    #[tokio::test]
    async fn dropped_guard_releases_in_background() {
        let locks = Arc::new(MemoryLocks::default());
        {
            let _guard = LockGuard::acquire(locks.clone(), LockKey::from_raw("k"))
                .await
                .unwrap();
        }
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
        assert_eq!(*locks.releases.lock(), 1);
        assert!(locks.held.lock().is_empty());
    }

    #[tokio::test]
    async fn second_acquire_fails_while_held() {
        let locks = Arc::new(MemoryLocks::default());
        let _first = LockGuard::acquire(locks.clone(), LockKey::from_raw("k"))
            .await
            .unwrap();
        let second = LockGuard::acquire(locks.clone(), LockKey::from_raw("k")).await;
        assert!(matches!(second, Err(LockError::Timeout { .. })));
    }
}
