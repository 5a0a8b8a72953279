//! Trigger worker invocations as tasks on the current tokio runtime.
use std::{
    collections::HashMap,
    sync::{Arc, RwLock, Weak},
};

use async_trait::async_trait;
use tokio_util::task::TaskTracker;

use super::{Handler, Trigger, TriggerError, TriggerRequest};

/// A [`Trigger`] that runs invocations in the current process.
///
/// Jobs enroll when they are [registered](crate::BackgroundProcess::register). Each trigger
/// spawns the enrolled job's invocation and returns straight away. Handlers are held weakly, so a
/// job that has been dropped is no longer reachable.
///
/// Clones share their enrolled handlers and spawned invocations.
#[derive(Clone)]
pub struct InProcessTrigger {
    handlers: Arc<RwLock<HashMap<String, Weak<dyn Handler>>>>,
    tracker: TaskTracker,
}

impl Default for InProcessTrigger {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for InProcessTrigger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InProcessTrigger")
            .field("running", &self.tracker.len())
            .finish()
    }
}

impl InProcessTrigger {
    pub fn new() -> Self {
        Self {
            handlers: Default::default(),
            tracker: TaskTracker::new(),
        }
    }

    /// Wait until every spawned invocation, including the ones they re-dispatch, has finished.
    pub async fn wait_idle(&self) {
        self.tracker.close();
        self.tracker.wait().await;
        self.tracker.reopen();
    }

    fn handler(&self, identifier: &str) -> Result<Arc<dyn Handler>, TriggerError> {
        self.handlers
            .read()
            .map_err(|_| TriggerError::Transport("handler registry in bad state".to_owned()))?
            .get(identifier)
            .and_then(Weak::upgrade)
            .ok_or_else(|| TriggerError::NoHandler(identifier.to_owned()))
    }
}

#[async_trait]
impl Trigger for InProcessTrigger {
    async fn trigger(&self, request: TriggerRequest) -> Result<(), TriggerError> {
        let handler = self.handler(&request.identifier)?;
        tracing::debug!(
            identifier = %request.identifier,
            chain_id = %request.chain_id,
            "Spawning invocation for {}",
            request.identifier
        );
        self.tracker
            .spawn(async move { handler.handle(request).await });
        Ok(())
    }

    fn enroll(&self, identifier: &str, handler: Weak<dyn Handler>) {
        match self.handlers.write() {
            Ok(mut handlers) => {
                handlers.insert(identifier.to_owned(), handler);
            }
            Err(error) => tracing::error!(%error, %identifier, "Failed to enroll handler"),
        }
    }

    fn withdraw(&self, identifier: &str) {
        if let Ok(mut handlers) = self.handlers.write() {
            handlers.remove(identifier);
        }
    }
}
