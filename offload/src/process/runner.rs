//! One worker invocation: the guard checks, then the drain loop under the process lock.
use std::time::Instant;

use tracing::{instrument, Instrument};

use crate::{
    batch::Batch,
    config::DEFAULT_MEMORY_CEILING,
    dispatch::ChainId,
    hooks::Lifecycle,
    status::Status,
    store::StoreError,
    task::{Task, TaskFailure, TaskResult},
    OffloadError,
};

use super::ProcessInner;

/// What a worker invocation did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Invocation {
    /// A guard check stopped the invocation before the drain loop started.
    Skipped(Skip),
    /// The drain loop ran.
    Ran {
        /// Items handed to the task, including requeued and failed ones.
        processed: usize,
        stopped: StopReason,
        /// Whether this invocation emptied the queue.
        completed: bool,
    },
}

/// The guard that stopped an invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Skip {
    /// Another invocation holds the process lock.
    Locked,
    /// The job was cancelled; its queued work has been deleted.
    Cancelled,
    Paused,
    /// Nothing is queued.
    Empty,
}

/// Why the drain loop stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// The batch being drained ran out of items.
    BatchExhausted,
    TimeExceeded,
    MemoryExceeded,
    Paused,
    Cancelled,
    /// The task failed or panicked. The item it was given is still queued.
    TaskFailed,
}

impl<T: Task> ProcessInner<T> {
    #[instrument(skip_all, fields(identifier = %self.identifier, chain_id = %chain_id))]
    pub(crate) async fn run(&self, chain_id: ChainId) -> Result<Invocation, OffloadError> {
        let identifier = &self.identifier;

        if self.is_processing().await? {
            tracing::debug!(%identifier, "{identifier} is already processing");
            return Ok(Invocation::Skipped(Skip::Locked));
        }
        match self.read_status().await? {
            Status::Cancelled => {
                self.retire_health_check();
                self.delete_all().await?;
                tracing::info!(%identifier, "Cancelled {identifier}");
                return Ok(Invocation::Skipped(Skip::Cancelled));
            }
            Status::Paused => {
                self.retire_health_check();
                tracing::info!(%identifier, "{identifier} is paused");
                self.hooks.fire(Lifecycle::Paused, identifier);
                return Ok(Invocation::Skipped(Skip::Paused));
            }
            Status::Idle => {}
        }
        let Some(mut batch) = self.oldest_batch().await?.filter(|batch| !batch.is_empty()) else {
            tracing::debug!(%identifier, "Nothing queued for {identifier}");
            return Ok(Invocation::Skipped(Skip::Empty));
        };

        let Some(held_until) = self
            .lock
            .acquire(&*self.store, self.config.lock_duration())
            .await?
        else {
            tracing::debug!(%identifier, "Lost the race for the lock of {identifier}");
            return Ok(Invocation::Skipped(Skip::Locked));
        };
        tracing::debug!(%identifier, %held_until, batch_key = %batch.key, "Acquired lock for {identifier}");

        let drained = self.drain(&mut batch, Instant::now()).await;

        match self.lock.release(&*self.store, held_until).await {
            Ok(true) => {}
            Ok(false) => tracing::warn!(
                %identifier,
                %held_until,
                "The lock of {identifier} expired during the drain loop and was not released"
            ),
            Err(error) => {
                tracing::error!(?error, %identifier, "Failed to release the lock of {identifier}")
            }
        }
        let (processed, stopped) = drained.inspect_err(|error| {
            tracing::warn!(
                ?error,
                %identifier,
                batch_key = %batch.key,
                "Store failure while draining {identifier}"
            )
        })?;
        tracing::debug!(%identifier, processed, ?stopped, "Drain loop of {identifier} stopped");

        if stopped == StopReason::TaskFailed {
            self.arm_health_check();
            return Ok(Invocation::Ran {
                processed,
                stopped,
                completed: false,
            });
        }

        let completed = !self.is_queued().await?;
        if completed {
            self.complete().await?;
        } else {
            match self.dispatch(Some(chain_id)).await {
                Ok(()) => {}
                Err(OffloadError::AlreadyProcessing(_)) => {}
                Err(error) => tracing::warn!(
                    ?error,
                    %identifier,
                    "Failed to continue {identifier}, the health check will retry"
                ),
            }
        }
        Ok(Invocation::Ran {
            processed,
            stopped,
            completed,
        })
    }

    /// Run items from the front of `batch` until a stop condition is met.
    ///
    /// The item being run stays in the persisted batch until the task returns.
    async fn drain(
        &self,
        batch: &mut Batch<T::Item>,
        started: Instant,
    ) -> Result<(usize, StopReason), StoreError> {
        let identifier = &self.identifier;
        let memory_ceiling = self.memory_ceiling();
        let mut processed = 0;
        loop {
            let Some(item) = batch.data.front().cloned() else {
                return Ok((processed, StopReason::BatchExhausted));
            };
            let result = self.execute(item).await;
            processed += 1;
            match result {
                Ok(None) => {
                    batch.data.pop_front();
                }
                Ok(Some(requeued)) => {
                    if let Some(front) = batch.data.front_mut() {
                        *front = requeued;
                    }
                }
                Err(error) => {
                    tracing::error!(
                        %identifier,
                        batch_key = %batch.key,
                        ?error,
                        "Task of {identifier} failed, the item stays queued: error type: {}, message: {}",
                        error.error_type,
                        error.message
                    );
                    return Ok((processed, StopReason::TaskFailed));
                }
            }

            self.persist(batch).await?;
            if batch.is_empty() {
                tracing::debug!(%identifier, batch_key = %batch.key, "Batch {} exhausted", batch.key);
                return Ok((processed, StopReason::BatchExhausted));
            }

            let delay = self.config.item_delay();
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }

            if self
                .task
                .time_exceeded(started.elapsed(), self.config.time_limit())
            {
                return Ok((processed, StopReason::TimeExceeded));
            }
            if self.memory_exceeded(memory_ceiling) {
                return Ok((processed, StopReason::MemoryExceeded));
            }
            match self.read_status().await? {
                Status::Paused => return Ok((processed, StopReason::Paused)),
                Status::Cancelled => return Ok((processed, StopReason::Cancelled)),
                Status::Idle => {}
            }
        }
    }

    /// Run the task on `item`, returning the item to requeue, if any.
    async fn execute(&self, item: T::Item) -> Result<Option<T::Item>, TaskFailure> {
        let task = self.task.clone();
        let result = tokio::spawn(async move { task.execute(item).await }.in_current_span()).await;
        match result {
            Ok(TaskResult::Done) => Ok(None),
            Ok(TaskResult::Requeue(item)) => Ok(Some(item)),
            Ok(TaskResult::Error(error)) => Err(error.into()),
            Err(error) => Err(error.into()),
        }
    }

    /// The memory ceiling for this invocation, or [`None`] when no memory budget applies.
    fn memory_ceiling(&self) -> Option<u64> {
        self.config.memory_threshold()?;
        Some(
            self.config
                .memory_limit()
                .or_else(|| self.probe.ceiling())
                .unwrap_or(DEFAULT_MEMORY_CEILING),
        )
    }

    fn memory_exceeded(&self, ceiling: Option<u64>) -> bool {
        let Some(ceiling) = ceiling else {
            return false;
        };
        self.task
            .memory_exceeded(self.probe.usage(), ceiling, self.config.memory_threshold())
    }

    async fn complete(&self) -> Result<(), StoreError> {
        let identifier = &self.identifier;
        tracing::info!(%identifier, "Completed {identifier}");
        self.hooks.fire(Lifecycle::Completed, identifier);
        self.write_status(Status::Idle).await?;
        self.retire_health_check();
        Ok(())
    }
}
