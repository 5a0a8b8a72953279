//! The TTL based process lock.
//!
//! The lock is a store record with an expiry rather than a held lock object. An invocation that
//! dies without releasing it blocks the job only until the TTL elapses.
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};

use crate::store::{Store, StoreError};

#[derive(Debug, Serialize, Deserialize)]
struct LockRecord {
    held_until: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub(crate) struct ProcessLock {
    key: String,
}

impl ProcessLock {
    pub(crate) fn new(identifier: &str) -> Self {
        Self {
            key: format!("{identifier}_process_lock"),
        }
    }

    /// Try to take the lock for `ttl`, returning the time it is held until on success.
    pub(crate) async fn acquire(
        &self,
        store: &dyn Store,
        ttl: Duration,
    ) -> Result<Option<DateTime<Utc>>, StoreError> {
        let held_until = Utc::now() + TimeDelta::from_std(ttl).unwrap_or(TimeDelta::zero());
        let record = serde_json::to_value(LockRecord { held_until })?;
        Ok(store
            .insert(&self.key, record, Some(ttl))
            .await?
            .then_some(held_until))
    }

    /// Release the lock taken by the [`ProcessLock::acquire`] that returned `held_until`.
    ///
    /// Returns `false` and leaves the record alone when the lock has since expired and been taken
    /// by another invocation.
    pub(crate) async fn release(
        &self,
        store: &dyn Store,
        held_until: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let Some(value) = store.get(&self.key).await? else {
            return Ok(false);
        };
        let ours = serde_json::from_value::<LockRecord>(value)
            .is_ok_and(|record| record.held_until == held_until);
        if ours {
            store.delete(&self.key).await?;
        }
        Ok(ours)
    }

    pub(crate) async fn is_held(&self, store: &dyn Store) -> Result<bool, StoreError> {
        let Some(value) = store.get(&self.key).await? else {
            return Ok(false);
        };
        // A record we cannot read is still a lock someone wrote.
        Ok(serde_json::from_value::<LockRecord>(value)
            .map_or(true, |record| record.held_until > Utc::now()))
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::store::memory::InMemoryStore;

    #[tokio::test]
    async fn acquire_is_exclusive() {
        let store = InMemoryStore::new();
        let lock = ProcessLock::new("job");

        let held_until = lock.acquire(&store, Duration::from_secs(60)).await.unwrap();

        assert!(held_until.is_some_and(|until| until > Utc::now()));
        assert!(lock.is_held(&store).await.unwrap());
        assert!(lock
            .acquire(&store, Duration::from_secs(60))
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn release_frees_the_lock() {
        let store = InMemoryStore::new();
        let lock = ProcessLock::new("job");
        let held_until = lock
            .acquire(&store, Duration::from_secs(60))
            .await
            .unwrap()
            .unwrap();

        assert!(lock.release(&store, held_until).await.unwrap());

        assert!(!lock.is_held(&store).await.unwrap());
        assert!(lock
            .acquire(&store, Duration::from_secs(60))
            .await
            .unwrap()
            .is_some());
    }

    #[tokio::test]
    async fn expired_lock_is_not_held() {
        let store = InMemoryStore::new();
        let lock = ProcessLock::new("job");
        lock.acquire(&store, Duration::from_millis(20))
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_millis(60)).await;

        assert!(!lock.is_held(&store).await.unwrap());
        assert!(lock
            .acquire(&store, Duration::from_secs(60))
            .await
            .unwrap()
            .is_some());
    }

    #[tokio::test]
    async fn release_leaves_a_lock_taken_over_after_expiry() {
        let store = InMemoryStore::new();
        let lock = ProcessLock::new("job");
        let expired = lock
            .acquire(&store, Duration::from_millis(20))
            .await
            .unwrap()
            .unwrap();
        tokio::time::sleep(Duration::from_millis(60)).await;
        let current = lock
            .acquire(&store, Duration::from_secs(60))
            .await
            .unwrap()
            .unwrap();

        assert!(!lock.release(&store, expired).await.unwrap());
        assert!(lock.is_held(&store).await.unwrap());

        assert!(lock.release(&store, current).await.unwrap());
        assert!(!lock.is_held(&store).await.unwrap());
    }

    #[tokio::test]
    async fn release_without_a_lock_is_a_no_op() {
        let store = InMemoryStore::new();

        assert!(!ProcessLock::new("job")
            .release(&store, Utc::now())
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn locks_are_per_job() {
        let store = InMemoryStore::new();
        ProcessLock::new("job")
            .acquire(&store, Duration::from_secs(60))
            .await
            .unwrap();

        assert!(!ProcessLock::new("other").is_held(&store).await.unwrap());
    }
}
