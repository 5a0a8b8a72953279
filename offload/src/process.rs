//! The background process: a job's queue, its control state and the operations a host calls.
use std::sync::{Arc, Weak};

use async_trait::async_trait;
use futures::FutureExt;

use crate::{
    batch::{self, Batch},
    config::Config,
    credentials::Credentials,
    dispatch::{ChainId, Handler, Trigger, TriggerRequest},
    hooks::{HookId, Hooks, Lifecycle},
    lock::ProcessLock,
    probe::MemoryProbe,
    scheduler::{Scheduler, Tick},
    status::Status,
    store::{Store, StoreError},
    task::Task,
    OffloadError,
};

pub mod builder;
pub mod queue;
pub mod runner;

use builder::ProcessBuilder;
use queue::Queue;
use runner::Invocation;

/// A durable, resumable queue of work drained by repeated worker invocations.
///
/// Cloning a `BackgroundProcess` is cheap and every clone refers to the same job.
///
/// # Example
///
/// ```
/// # use offload::prelude::*;
/// # struct SendEmails;
/// # #[async_trait::async_trait]
/// # impl Task for SendEmails {
/// #     type Item = String;
/// #     async fn execute(&self, _: Self::Item) -> TaskResult<Self::Item> { TaskResult::Done }
/// # }
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() -> Result<(), OffloadError> {
/// let process = BackgroundProcess::builder("send_emails", SendEmails).build();
/// process.register();
///
/// process
///     .queue()
///     .push("alice@example.com".to_owned())
///     .push("bob@example.com".to_owned())
///     .save_and_dispatch()
///     .await?;
/// # Ok(())
/// # }
/// ```
pub struct BackgroundProcess<T: Task> {
    inner: Arc<ProcessInner<T>>,
}

impl<T: Task> Clone for BackgroundProcess<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T: Task> std::fmt::Debug for BackgroundProcess<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackgroundProcess")
            .field("identifier", &self.inner.identifier)
            .field("config", &self.inner.config)
            .finish_non_exhaustive()
    }
}

pub(crate) struct ProcessInner<T: Task> {
    me: Weak<ProcessInner<T>>,
    identifier: String,
    task: Arc<T>,
    store: Arc<dyn Store>,
    trigger: Arc<dyn Trigger>,
    scheduler: Arc<dyn Scheduler>,
    credentials: Arc<dyn Credentials>,
    probe: Arc<dyn MemoryProbe>,
    config: Config,
    lock: ProcessLock,
    hooks: Hooks,
}

impl<T: Task> BackgroundProcess<T> {
    /// Start building a job identified by `identifier` running `task` on every queued item.
    pub fn builder(identifier: impl Into<String>, task: T) -> ProcessBuilder<T> {
        ProcessBuilder::new(identifier.into(), task)
    }

    pub fn identifier(&self) -> &str {
        &self.inner.identifier
    }

    pub fn config(&self) -> &Config {
        &self.inner.config
    }

    /// A fresh enqueue session. Items pushed to it are persisted as one batch on
    /// [`Queue::save`].
    pub fn queue(&self) -> Queue<T> {
        Queue::new(self.inner.clone())
    }

    /// Trigger a worker invocation to drain the queue.
    ///
    /// Fails with [`OffloadError::AlreadyProcessing`] without triggering anything while a worker
    /// holds the process lock. Otherwise arms the health checker and issues the trigger. The
    /// result reports whether the trigger could be issued, never the outcome of the work.
    pub async fn dispatch(&self) -> Result<(), OffloadError> {
        self.inner.dispatch(None).await
    }

    /// Ask running and future invocations to stop. Queued work is kept.
    pub async fn pause(&self) -> Result<(), OffloadError> {
        self.inner.write_status(Status::Paused).await?;
        tracing::info!(identifier = %self.inner.identifier, "Paused {}", self.inner.identifier);
        Ok(())
    }

    /// Clear the paused or cancelled flag and dispatch a worker.
    ///
    /// The resumed hooks run only when the dispatch succeeds.
    pub async fn resume(&self) -> Result<(), OffloadError> {
        let identifier = &self.inner.identifier;
        self.inner.write_status(Status::Idle).await?;
        self.inner.arm_health_check();
        self.inner.dispatch(None).await?;
        tracing::info!(%identifier, "Resumed {identifier}");
        self.inner.hooks.fire(Lifecycle::Resumed, identifier);
        Ok(())
    }

    /// Cancel the job, deleting all queued work.
    ///
    /// The deletion is carried out by the next worker invocation, which this dispatches. When a
    /// worker is already running it sees the flag at its next check point and its re-dispatch
    /// does the sweep.
    pub async fn cancel(&self) -> Result<(), OffloadError> {
        let identifier = &self.inner.identifier;
        self.inner.write_status(Status::Cancelled).await?;
        tracing::info!(%identifier, "Cancelling {identifier}");
        match self.inner.dispatch(None).await {
            Ok(()) | Err(OffloadError::AlreadyProcessing(_)) => Ok(()),
            Err(error) => Err(error),
        }
    }

    /// Delete every batch and the status flag straight away, then run the cancelled hooks.
    pub async fn delete_all(&self) -> Result<(), OffloadError> {
        self.inner.delete_all().await?;
        Ok(())
    }

    /// Whether any work is queued.
    pub async fn is_queued(&self) -> Result<bool, OffloadError> {
        Ok(self.inner.is_queued().await?)
    }

    /// Whether a worker holds the process lock.
    pub async fn is_processing(&self) -> Result<bool, OffloadError> {
        Ok(self.inner.is_processing().await?)
    }

    pub async fn is_paused(&self) -> Result<bool, OffloadError> {
        Ok(self.status().await? == Status::Paused)
    }

    pub async fn is_cancelled(&self) -> Result<bool, OffloadError> {
        Ok(self.status().await? == Status::Cancelled)
    }

    /// Whether the job is queued, processing, paused or cancelled.
    pub async fn is_active(&self) -> Result<bool, OffloadError> {
        Ok(self.is_queued().await?
            || self.is_processing().await?
            || self.status().await? != Status::Idle)
    }

    pub async fn status(&self) -> Result<Status, OffloadError> {
        Ok(self.inner.read_status().await?)
    }

    /// The persisted batches, oldest first.
    pub async fn batches(&self, limit: Option<usize>) -> Result<Vec<Batch<T::Item>>, OffloadError> {
        let prefix = batch::batch_prefix(&self.inner.identifier);
        self.inner
            .store
            .list(&prefix, limit)
            .await?
            .into_iter()
            .map(|entry| Batch::try_from(entry).map_err(OffloadError::from))
            .collect()
    }

    /// The oldest persisted batch, the one the next invocation drains.
    pub async fn batch(&self) -> Result<Option<Batch<T::Item>>, OffloadError> {
        Ok(self.batches(Some(1)).await?.pop())
    }

    /// Replace the items of the batch stored under `key`. An empty batch is deleted.
    pub async fn update_batch(
        &self,
        key: &str,
        items: impl IntoIterator<Item = T::Item>,
    ) -> Result<(), OffloadError> {
        let batch = Batch {
            key: key.to_owned(),
            data: items.into_iter().collect(),
        };
        Ok(self.inner.persist(&batch).await?)
    }

    pub async fn delete_batch(&self, key: &str) -> Result<(), OffloadError> {
        Ok(self.inner.store.delete(key).await?)
    }

    /// When the health checker runs next, if it is armed.
    pub fn next_health_check(&self) -> Option<chrono::DateTime<chrono::Utc>> {
        self.inner
            .scheduler
            .next_fire_time(&self.inner.health_check_key())
    }

    /// Run one health check: dispatch a worker when work is queued and nobody is processing it.
    ///
    /// This is what the scheduler runs on every tick, exposed for hosts that drive it from their
    /// own timer.
    pub async fn health_check(&self) -> Result<(), OffloadError> {
        self.inner.health_check().await
    }

    /// Accept a trigger on the worker side and run one invocation.
    ///
    /// The token is verified and consumed. A request carrying an unknown, reused or expired token
    /// is rejected with [`OffloadError::InvalidToken`] and nothing runs.
    pub async fn handle_request(&self, request: TriggerRequest) -> Result<Invocation, OffloadError> {
        self.inner.handle_request(request).await
    }

    /// Enroll the job with the trigger transport and arm the health checker.
    pub fn register(&self) {
        let handler: Weak<dyn Handler> = Arc::downgrade(&self.inner) as Weak<dyn Handler>;
        self.inner.trigger.enroll(&self.inner.identifier, handler);
        self.inner.arm_health_check();
        tracing::debug!(identifier = %self.inner.identifier, "Registered {}", self.inner.identifier);
    }

    /// Undo [`BackgroundProcess::register`]. Queued work is kept.
    pub fn deregister(&self) {
        self.inner.trigger.withdraw(&self.inner.identifier);
        self.inner.retire_health_check();
        tracing::debug!(identifier = %self.inner.identifier, "Deregistered {}", self.inner.identifier);
    }

    pub fn on_cancelled(&self, callback: impl Fn(&str) + Send + Sync + 'static) -> HookId {
        self.inner.hooks.register(Lifecycle::Cancelled, callback)
    }

    pub fn on_paused(&self, callback: impl Fn(&str) + Send + Sync + 'static) -> HookId {
        self.inner.hooks.register(Lifecycle::Paused, callback)
    }

    pub fn on_resumed(&self, callback: impl Fn(&str) + Send + Sync + 'static) -> HookId {
        self.inner.hooks.register(Lifecycle::Resumed, callback)
    }

    pub fn on_completed(&self, callback: impl Fn(&str) + Send + Sync + 'static) -> HookId {
        self.inner.hooks.register(Lifecycle::Completed, callback)
    }

    /// Remove a hook, returning whether it was registered.
    pub fn remove_hook(&self, id: HookId) -> bool {
        self.inner.hooks.remove(id)
    }
}

impl<T: Task> ProcessInner<T> {
    fn status_key(&self) -> String {
        format!("{}_status", self.identifier)
    }

    fn health_check_key(&self) -> String {
        format!("{}_health_check", self.identifier)
    }

    pub(crate) async fn read_status(&self) -> Result<Status, StoreError> {
        let value = self.store.get(&self.status_key()).await?;
        Ok(Status::from_stored(value.as_ref()))
    }

    pub(crate) async fn write_status(&self, status: Status) -> Result<(), StoreError> {
        match status.to_stored() {
            Some(value) => self.store.set(&self.status_key(), value, None).await,
            None => self.store.delete(&self.status_key()).await,
        }
    }

    pub(crate) async fn is_processing(&self) -> Result<bool, StoreError> {
        self.lock.is_held(&*self.store).await
    }

    pub(crate) async fn is_queued(&self) -> Result<bool, StoreError> {
        Ok(self
            .oldest_batch()
            .await?
            .is_some_and(|batch| !batch.is_empty()))
    }

    /// The oldest batch. A batch that cannot be decoded reads as no batch at all.
    pub(crate) async fn oldest_batch(&self) -> Result<Option<Batch<T::Item>>, StoreError> {
        let prefix = batch::batch_prefix(&self.identifier);
        let Some(entry) = self.store.list(&prefix, Some(1)).await?.pop() else {
            return Ok(None);
        };
        let batch_key = entry.key.clone();
        Ok(Batch::try_from(entry)
            .inspect_err(|error| {
                tracing::warn!(
                    ?error,
                    identifier = %self.identifier,
                    %batch_key,
                    "Failed to decode batch {batch_key}, treating the queue as empty",
                )
            })
            .ok())
    }

    /// Save `batch` under its key, deleting the record when it has no items left.
    pub(crate) async fn persist(&self, batch: &Batch<T::Item>) -> Result<(), StoreError> {
        if batch.is_empty() {
            self.store.delete(&batch.key).await
        } else {
            self.store.set(&batch.key, batch.to_value()?, None).await
        }
    }

    pub(crate) async fn delete_all(&self) -> Result<(), StoreError> {
        let prefix = batch::batch_prefix(&self.identifier);
        let batches = self.store.list(&prefix, None).await?;
        for entry in &batches {
            self.store.delete(&entry.key).await?;
        }
        self.write_status(Status::Idle).await?;
        tracing::info!(
            identifier = %self.identifier,
            deleted = batches.len(),
            "Deleted all queued work of {}",
            self.identifier
        );
        self.hooks.fire(Lifecycle::Cancelled, &self.identifier);
        Ok(())
    }

    pub(crate) async fn dispatch(&self, chain_id: Option<ChainId>) -> Result<(), OffloadError> {
        let identifier = &self.identifier;
        if self.is_processing().await? {
            tracing::debug!(%identifier, "Not dispatching {identifier}, already processing");
            return Err(OffloadError::AlreadyProcessing(identifier.clone()));
        }
        self.arm_health_check();

        let request = TriggerRequest {
            identifier: identifier.clone(),
            token: self.credentials.issue_token(identifier),
            identity: self.credentials.capture_identity(),
            chain_id: chain_id.unwrap_or_else(ChainId::generate),
        };
        let chain_id = request.chain_id.clone();
        self.trigger.trigger(request).await.inspect_err(|error| {
            tracing::warn!(?error, %identifier, %chain_id, "Failed to dispatch {identifier}: {error}")
        })?;
        tracing::debug!(%identifier, %chain_id, "Dispatched {identifier}");
        Ok(())
    }

    pub(crate) fn arm_health_check(&self) {
        let Some(process) = self.me.upgrade() else {
            return;
        };
        let tick: Tick = Arc::new(move || {
            let process = process.clone();
            async move {
                let _ = process.health_check().await.inspect_err(|error| {
                    tracing::warn!(
                        ?error,
                        identifier = %process.identifier,
                        "Health check of {} failed: {error}",
                        process.identifier
                    )
                });
            }
            .boxed()
        });
        self.scheduler.register(
            &self.health_check_key(),
            self.config.health_check_interval(),
            tick,
        );
    }

    pub(crate) fn retire_health_check(&self) {
        self.scheduler.deregister(&self.health_check_key());
    }

    pub(crate) async fn health_check(&self) -> Result<(), OffloadError> {
        let identifier = &self.identifier;
        if self.is_processing().await? {
            tracing::trace!(%identifier, "Health check: {identifier} is processing");
            return Ok(());
        }
        if !self.is_queued().await? {
            tracing::debug!(%identifier, "Health check: {identifier} has nothing queued, retiring");
            self.retire_health_check();
            return Ok(());
        }
        tracing::debug!(%identifier, "Health check: restarting {identifier}");
        self.dispatch(None).await
    }

    pub(crate) async fn handle_request(
        &self,
        request: TriggerRequest,
    ) -> Result<Invocation, OffloadError> {
        let identifier = &self.identifier;
        if !self.credentials.verify_token(identifier, &request.token) {
            tracing::warn!(
                %identifier,
                chain_id = %request.chain_id,
                "Rejected trigger for {identifier} with an invalid token"
            );
            return Err(OffloadError::InvalidToken(identifier.clone()));
        }
        self.credentials.restore_identity(&request.identity);
        Ok(self.run(request.chain_id).await?)
    }
}

#[async_trait]
impl<T: Task> Handler for ProcessInner<T> {
    async fn handle(&self, request: TriggerRequest) {
        let _ = self.handle_request(request).await.inspect_err(|error| {
            tracing::error!(
                ?error,
                identifier = %self.identifier,
                "Invocation of {} failed: {error}",
                self.identifier
            )
        });
    }
}
