//! The durable key-value store the batch engine persists into.
//!
//! A [`Store`] holds three kinds of record for every job:
//!
//! - batches of queued items, keyed `<identifier>_batch_<suffix>`,
//! - the job's status flag, and
//! - the process lock, written with a TTL.
//!
//! Implementations must keep each operation atomic for a single key and must return the entries
//! of [`Store::list`] in insertion order. Overwriting an existing key with [`Store::set`] keeps
//! the position it was first inserted at, which is what keeps batches FIFO while they are being
//! drained.
//!
//! [`memory::InMemoryStore`] is provided for tests and single process hosts. The `offload-sqlx`
//! crate provides a Postgres implementation.
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

pub mod memory;
#[doc(hidden)]
pub mod testing;

/// A single stored record, as returned from [`Store::list`].
#[derive(Debug, Clone, PartialEq)]
pub struct Entry {
    pub key: String,
    pub value: serde_json::Value,
}

/// A keyed persistent store.
#[async_trait]
pub trait Store: Send + Sync {
    /// Get the value stored under `key`, or [`None`] when it is absent or expired.
    async fn get(&self, key: &str) -> Result<Option<serde_json::Value>, StoreError>;

    /// Store `value` under `key`, replacing any current value.
    ///
    /// When `ttl` is given the entry is treated as absent once it has elapsed.
    async fn set(
        &self,
        key: &str,
        value: serde_json::Value,
        ttl: Option<Duration>,
    ) -> Result<(), StoreError>;

    /// Store `value` under `key` only when no unexpired entry exists.
    ///
    /// Returns `true` when the value was written. This is the primitive the process lock is
    /// built on, so it must be atomic.
    async fn insert(
        &self,
        key: &str,
        value: serde_json::Value,
        ttl: Option<Duration>,
    ) -> Result<bool, StoreError>;

    /// Remove `key`. Removing an absent key is not an error.
    async fn delete(&self, key: &str) -> Result<(), StoreError>;

    /// All unexpired entries whose key starts with `prefix`, oldest first.
    async fn list(&self, prefix: &str, limit: Option<usize>) -> Result<Vec<Entry>, StoreError>;
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Error encoding or decoding data")]
    EncodeDecode(#[from] serde_json::Error),
    #[error("Store in bad state")]
    BadState,
    #[error("Store backend failure: {0}")]
    Backend(String),
}

#[async_trait]
impl<S> Store for std::sync::Arc<S>
where
    S: Store + ?Sized,
{
    async fn get(&self, key: &str) -> Result<Option<serde_json::Value>, StoreError> {
        self.as_ref().get(key).await
    }

    async fn set(
        &self,
        key: &str,
        value: serde_json::Value,
        ttl: Option<Duration>,
    ) -> Result<(), StoreError> {
        self.as_ref().set(key, value, ttl).await
    }

    async fn insert(
        &self,
        key: &str,
        value: serde_json::Value,
        ttl: Option<Duration>,
    ) -> Result<bool, StoreError> {
        self.as_ref().insert(key, value, ttl).await
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        self.as_ref().delete(key).await
    }

    async fn list(&self, prefix: &str, limit: Option<usize>) -> Result<Vec<Entry>, StoreError> {
        self.as_ref().list(prefix, limit).await
    }
}
