use std::sync::Arc;

use crate::{
    config::Config,
    credentials::{Credentials, OneTimeTokens},
    dispatch::{in_process::InProcessTrigger, Trigger},
    hooks::Hooks,
    lock::ProcessLock,
    probe::{MemoryProbe, SystemMemory},
    scheduler::{Scheduler, TokioScheduler},
    store::{memory::InMemoryStore, Store},
    task::Task,
};

use super::{BackgroundProcess, ProcessInner};

/// Builds a [`BackgroundProcess`].
///
/// Every collaborator has a default suitable for a single process host:
///
/// | collaborator | default |
/// |---|---|
/// | [`Store`] | [`InMemoryStore`] |
/// | [`Trigger`] | [`InProcessTrigger`] |
/// | [`Scheduler`] | [`TokioScheduler`] |
/// | [`Credentials`] | [`OneTimeTokens`] |
/// | [`MemoryProbe`] | [`SystemMemory`] |
pub struct ProcessBuilder<T: Task> {
    identifier: String,
    task: T,
    store: Arc<dyn Store>,
    trigger: Arc<dyn Trigger>,
    scheduler: Arc<dyn Scheduler>,
    credentials: Arc<dyn Credentials>,
    probe: Arc<dyn MemoryProbe>,
    config: Config,
}

impl<T: Task> ProcessBuilder<T> {
    pub(crate) fn new(identifier: String, task: T) -> Self {
        Self {
            identifier,
            task,
            store: Arc::new(InMemoryStore::new()),
            trigger: Arc::new(InProcessTrigger::new()),
            scheduler: Arc::new(TokioScheduler::new()),
            credentials: Arc::new(OneTimeTokens::new()),
            probe: Arc::new(SystemMemory::new()),
            config: Config::default(),
        }
    }

    pub fn with_store(self, store: impl Store + 'static) -> Self {
        Self {
            store: Arc::new(store),
            ..self
        }
    }

    /// Share a store, for example between several jobs.
    pub fn with_shared_store(self, store: Arc<dyn Store>) -> Self {
        Self { store, ..self }
    }

    pub fn with_trigger(self, trigger: impl Trigger + 'static) -> Self {
        Self {
            trigger: Arc::new(trigger),
            ..self
        }
    }

    pub fn with_scheduler(self, scheduler: impl Scheduler + 'static) -> Self {
        Self {
            scheduler: Arc::new(scheduler),
            ..self
        }
    }

    pub fn with_credentials(self, credentials: impl Credentials + 'static) -> Self {
        Self {
            credentials: Arc::new(credentials),
            ..self
        }
    }

    pub fn with_memory_probe(self, probe: impl MemoryProbe + 'static) -> Self {
        Self {
            probe: Arc::new(probe),
            ..self
        }
    }

    pub fn with_config(self, config: Config) -> Self {
        Self { config, ..self }
    }

    pub fn build(self) -> BackgroundProcess<T> {
        let inner = Arc::new_cyclic(|me| ProcessInner {
            me: me.clone(),
            lock: ProcessLock::new(&self.identifier),
            identifier: self.identifier,
            task: Arc::new(self.task),
            store: self.store,
            trigger: self.trigger,
            scheduler: self.scheduler,
            credentials: self.credentials,
            probe: self.probe,
            config: self.config,
            hooks: Hooks::default(),
        });
        BackgroundProcess { inner }
    }
}
