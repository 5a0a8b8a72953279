//! Lifecycle callbacks a host can subscribe to.
use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc, RwLock,
};

/// The lifecycle events of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Lifecycle {
    /// Queued work was deleted, by a cancel sweep or [`crate::BackgroundProcess::delete_all`].
    Cancelled,
    /// An invocation found the job paused.
    Paused,
    /// The job was resumed and a worker dispatched.
    Resumed,
    /// The queue was drained.
    Completed,
}

/// Handle for removing a registered hook.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HookId(u64);

type Callback = Arc<dyn Fn(&str) + Send + Sync>;

#[derive(Default)]
pub(crate) struct Hooks {
    next_id: AtomicU64,
    registered: RwLock<Vec<(HookId, Lifecycle, Callback)>>,
}

impl std::fmt::Debug for Hooks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Hooks")
            .field("registered", &self.registered.read().map(|hooks| hooks.len()))
            .finish()
    }
}

impl Hooks {
    pub(crate) fn register(
        &self,
        event: Lifecycle,
        callback: impl Fn(&str) + Send + Sync + 'static,
    ) -> HookId {
        let id = HookId(self.next_id.fetch_add(1, Ordering::Relaxed));
        match self.registered.write() {
            Ok(mut hooks) => hooks.push((id, event, Arc::new(callback))),
            Err(error) => tracing::error!(%error, ?event, "Failed to register hook"),
        }
        id
    }

    pub(crate) fn remove(&self, id: HookId) -> bool {
        match self.registered.write() {
            Ok(mut hooks) => {
                let before = hooks.len();
                hooks.retain(|(hook_id, _, _)| *hook_id != id);
                hooks.len() != before
            }
            Err(_) => false,
        }
    }

    /// Run every callback registered for `event`.
    ///
    /// Callbacks are collected before any of them run, so a callback may register or remove
    /// hooks.
    pub(crate) fn fire(&self, event: Lifecycle, identifier: &str) {
        let callbacks = match self.registered.read() {
            Ok(hooks) => hooks
                .iter()
                .filter(|(_, hook_event, _)| *hook_event == event)
                .map(|(_, _, callback)| callback.clone())
                .collect::<Vec<_>>(),
            Err(error) => {
                tracing::error!(%error, ?event, %identifier, "Failed to read hooks");
                return;
            }
        };
        tracing::trace!(?event, %identifier, count = callbacks.len(), "Firing hooks");
        callbacks.iter().for_each(|callback| callback(identifier));
    }
}
