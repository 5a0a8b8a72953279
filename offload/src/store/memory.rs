//! Provides an in memory implementation of [`Store`].
//!
//! It is a correct implementation of the store semantics and is suitable for tests and for hosts
//! running a single process. Nothing is persisted across restarts.
use std::{
    collections::HashMap,
    sync::{Arc, RwLock},
    time::Duration,
};

use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, Utc};

use super::{Entry, Store, StoreError};

/// An in memory implementation of [`Store`].
///
/// Clones share the same underlying entries.
#[derive(Clone, Default, Debug)]
pub struct InMemoryStore {
    entries: Arc<RwLock<Entries>>,
}

#[derive(Default, Debug)]
struct Entries {
    next_seq: u64,
    records: HashMap<String, Record>,
}

#[derive(Debug, Clone)]
struct Record {
    seq: u64,
    value: serde_json::Value,
    expires_at: Option<DateTime<Utc>>,
}

impl Record {
    fn is_live(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.map_or(true, |expires_at| expires_at > now)
    }
}

fn expiry(now: DateTime<Utc>, ttl: Option<Duration>) -> Option<DateTime<Utc>> {
    ttl.and_then(|ttl| TimeDelta::from_std(ttl).ok())
        .and_then(|ttl| now.checked_add_signed(ttl))
}

impl Entries {
    fn write(&mut self, key: &str, value: serde_json::Value, expires_at: Option<DateTime<Utc>>) {
        match self.records.get_mut(key) {
            Some(record) => {
                record.value = value;
                record.expires_at = expires_at;
            }
            None => {
                let seq = self.next_seq;
                self.next_seq += 1;
                self.records.insert(
                    key.to_owned(),
                    Record {
                        seq,
                        value,
                        expires_at,
                    },
                );
            }
        }
    }
}

impl InMemoryStore {
    /// Creates a new, empty, instance of [`InMemoryStore`].
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Store for InMemoryStore {
    async fn get(&self, key: &str) -> Result<Option<serde_json::Value>, StoreError> {
        let now = Utc::now();
        Ok(self
            .entries
            .read()
            .map_err(|_| StoreError::BadState)?
            .records
            .get(key)
            .filter(|record| record.is_live(now))
            .map(|record| record.value.clone()))
    }

    async fn set(
        &self,
        key: &str,
        value: serde_json::Value,
        ttl: Option<Duration>,
    ) -> Result<(), StoreError> {
        let now = Utc::now();
        let mut entries = self.entries.write().map_err(|_| StoreError::BadState)?;
        if entries
            .records
            .get(key)
            .is_some_and(|record| !record.is_live(now))
        {
            // An expired record is gone, rewriting it must not keep its old position.
            entries.records.remove(key);
        }
        entries.write(key, value, expiry(now, ttl));
        Ok(())
    }

    async fn insert(
        &self,
        key: &str,
        value: serde_json::Value,
        ttl: Option<Duration>,
    ) -> Result<bool, StoreError> {
        let now = Utc::now();
        let mut entries = self.entries.write().map_err(|_| StoreError::BadState)?;
        match entries.records.get(key) {
            Some(record) if record.is_live(now) => Ok(false),
            Some(_) => {
                entries.records.remove(key);
                entries.write(key, value, expiry(now, ttl));
                Ok(true)
            }
            None => {
                entries.write(key, value, expiry(now, ttl));
                Ok(true)
            }
        }
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        self.entries
            .write()
            .map_err(|_| StoreError::BadState)?
            .records
            .remove(key);
        Ok(())
    }

    async fn list(&self, prefix: &str, limit: Option<usize>) -> Result<Vec<Entry>, StoreError> {
        let now = Utc::now();
        let entries = self.entries.read().map_err(|_| StoreError::BadState)?;
        let mut matching = entries
            .records
            .iter()
            .filter(|(key, record)| key.starts_with(prefix) && record.is_live(now))
            .collect::<Vec<_>>();
        matching.sort_by_key(|(_, record)| record.seq);
        Ok(matching
            .into_iter()
            .take(limit.unwrap_or(usize::MAX))
            .map(|(key, record)| Entry {
                key: key.clone(),
                value: record.value.clone(),
            })
            .collect())
    }
}
