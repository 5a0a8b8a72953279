use std::{collections::VecDeque, sync::Arc};

use crate::{
    batch::{self, Batch},
    task::Task,
    OffloadError,
};

use super::ProcessInner;

/// An enqueue session: items are pushed in memory and persisted together as one batch.
///
/// Every session commits under its own freshly generated key, so sessions running in parallel
/// never overwrite each other's batches.
pub struct Queue<T: Task> {
    process: Arc<ProcessInner<T>>,
    pending: VecDeque<T::Item>,
}

impl<T: Task> std::fmt::Debug for Queue<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Queue")
            .field("identifier", &self.process.identifier)
            .field("pending", &self.pending.len())
            .finish()
    }
}

impl<T: Task> Queue<T> {
    pub(super) fn new(process: Arc<ProcessInner<T>>) -> Self {
        Self {
            process,
            pending: VecDeque::new(),
        }
    }

    pub fn push(mut self, item: T::Item) -> Self {
        self.pending.push_back(item);
        self
    }

    pub fn extend(mut self, items: impl IntoIterator<Item = T::Item>) -> Self {
        self.pending.extend(items);
        self
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Persist the pending items as a new batch, returning its key.
    ///
    /// Nothing is written when no items are pending, and [`None`] is returned. Fails with
    /// [`OffloadError::KeyTooLong`] when a unique key for the job cannot fit in
    /// [`crate::Config::key_max_length`] characters.
    #[doc(alias = "commit")]
    pub async fn save(self) -> Result<Option<String>, OffloadError> {
        if self.pending.is_empty() {
            return Ok(None);
        }
        let identifier = &self.process.identifier;
        let max_length = self.process.config.key_max_length();
        let Some(key) = batch::generate_key(identifier, max_length) else {
            tracing::error!(
                %identifier,
                max_length,
                "Batch keys of {identifier} do not fit in {max_length} characters"
            );
            return Err(OffloadError::KeyTooLong {
                identifier: identifier.clone(),
                max_length,
            });
        };
        let batch = Batch {
            key,
            data: self.pending,
        };
        self.process
            .store
            .set(&batch.key, batch.to_value()?, None)
            .await?;
        tracing::debug!(
            %identifier,
            batch_key = %batch.key,
            items = batch.len(),
            "Queued batch {} for {identifier}",
            batch.key
        );
        Ok(Some(batch.key))
    }

    /// [`Queue::save`] then [`crate::BackgroundProcess::dispatch`].
    pub async fn save_and_dispatch(self) -> Result<Option<String>, OffloadError> {
        let process = self.process.clone();
        let key = self.save().await?;
        process.dispatch(None).await?;
        Ok(key)
    }
}
