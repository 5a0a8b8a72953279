//! Persisted batches of queued items.
use std::collections::VecDeque;

use chrono::Utc;
use serde::{de::DeserializeOwned, Serialize};

use crate::store::Entry;

/// One persisted, ordered chunk of queued items.
#[derive(Debug, Clone, PartialEq)]
pub struct Batch<I> {
    /// The store key the batch is saved under.
    pub key: String,
    /// The queued items, front first.
    pub data: VecDeque<I>,
}

impl<I> Batch<I> {
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }
}

impl<I> Batch<I>
where
    I: Serialize,
{
    pub(crate) fn to_value(&self) -> Result<serde_json::Value, serde_json::Error> {
        serde_json::to_value(&self.data)
    }
}

impl<I> TryFrom<Entry> for Batch<I>
where
    I: DeserializeOwned,
{
    type Error = serde_json::Error;

    fn try_from(entry: Entry) -> Result<Self, Self::Error> {
        Ok(Self {
            data: serde_json::from_value(entry.value)?,
            key: entry.key,
        })
    }
}

pub(crate) fn batch_prefix(identifier: &str) -> String {
    format!("{identifier}_batch_")
}

/// Hex digits of the hashed salt every batch key carries.
const HASH_LENGTH: usize = 16;

/// Generate a fresh batch key for `identifier`.
///
/// The key is the batch prefix, a hash of a nanosecond timestamp together with a random salt so
/// that concurrent enqueue sessions never collide, and then the timestamp itself. Only the
/// timestamp is shortened to fit `max_length` characters. Returns [`None`] when the prefix and
/// hash alone do not fit.
pub(crate) fn generate_key(identifier: &str, max_length: usize) -> Option<String> {
    let prefix = batch_prefix(identifier);
    let room = max_length.checked_sub(prefix.chars().count() + HASH_LENGTH)?;
    let nanos = Utc::now().timestamp_nanos_opt().unwrap_or_default();
    let salt: u64 = rand::random();
    let hash = fxhash::hash64(&(nanos, salt));
    let mut timestamp = format!("{nanos:x}");
    timestamp.truncate(room);
    Some(format!("{prefix}{hash:016x}{timestamp}"))
}
