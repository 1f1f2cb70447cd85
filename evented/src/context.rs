use std::{
    fmt::Debug,
    sync::{Arc, Mutex, PoisonError},
};

use rustc_hash::FxHashMap;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::{
    actor_instance::ActorConfig,
    actor_ref::PersistentRef,
    base::ActorId,
    behavior::{Command, Event, EventSourcedBehavior, PersistentState},
    config::PersistenceConfig,
    debug,
    errors::SpawnError,
    journal::{EventJournal, InMemoryJournal},
    persistence_id::PersistenceId,
    scheduler::{Scheduler, TokioScheduler},
    snapshot::{InMemorySnapshotStore, SnapshotStore},
    status::Monitor,
};

#[cfg(feature = "local_fs")]
use crate::{journal::LocalFsJournal, snapshot::LocalFsSnapshotStore};

/// Live instances by persistence id; one writer per stream.
pub(crate) type Registry = Arc<Mutex<FxHashMap<PersistenceId, ActorId>>>;

/// Entry point for spawning persistent actors over a shared set of stores.
#[derive(Clone)]
pub struct RootContext {
    journal: Arc<dyn EventJournal>,
    snapshot_store: Arc<dyn SnapshotStore>,
    scheduler: Arc<dyn Scheduler>,
    config: PersistenceConfig,
    registry: Registry,
}

// Implementations

impl RootContext {
    pub fn new(journal: Arc<dyn EventJournal>, snapshot_store: Arc<dyn SnapshotStore>) -> Self {
        Self {
            journal,
            snapshot_store,
            scheduler: Arc::new(TokioScheduler::new()),
            config: PersistenceConfig::default(),
            registry: Registry::default(),
        }
    }

    /// Ephemeral stores, gone with the process.
    pub fn in_memory() -> Self {
        Self::new(
            Arc::new(InMemoryJournal::new()),
            Arc::new(InMemorySnapshotStore::new()),
        )
    }

    /// File stores under `config.data_dir`.
    #[cfg(feature = "local_fs")]
    pub fn local_fs(config: PersistenceConfig) -> Self {
        Self::new(
            Arc::new(LocalFsJournal::from_config(&config)),
            Arc::new(LocalFsSnapshotStore::from_config(&config)),
        )
        .with_config(config)
    }

    pub fn with_config(mut self, config: PersistenceConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_scheduler(mut self, scheduler: Arc<dyn Scheduler>) -> Self {
        self.scheduler = scheduler;
        self
    }

    pub fn journal(&self) -> &Arc<dyn EventJournal> {
        &self.journal
    }

    pub fn snapshot_store(&self) -> &Arc<dyn SnapshotStore> {
        &self.snapshot_store
    }

    pub fn scheduler(&self) -> &Arc<dyn Scheduler> {
        &self.scheduler
    }

    pub fn config(&self) -> &PersistenceConfig {
        &self.config
    }

    /// Start an actor for the behavior. It recovers before reading commands,
    /// which wait in the mailbox meanwhile.
    ///
    /// Fails if an instance for the same persistence id is still running.
    /// Must be called within a tokio runtime.
    pub fn spawn<C, E, S>(
        &self,
        behavior: EventSourcedBehavior<C, E, S>,
    ) -> Result<PersistentRef<C>, SpawnError>
    where
        C: Command,
        E: Event,
        S: PersistentState,
    {
        let id = Uuid::new_v4();
        let persistence_id = behavior.persistence_id.clone();

        {
            let mut registry = self.registry.lock().unwrap_or_else(PoisonError::into_inner);

            if registry.contains_key(&persistence_id) {
                return Err(SpawnError::AlreadyRunning(persistence_id));
            }
            registry.insert(persistence_id.clone(), id);
        }

        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let (sig_tx, sig_rx) = mpsc::unbounded_channel();
        let (monitor, status_rx) = Monitor::new();

        let journal = behavior
            .journal
            .clone()
            .unwrap_or_else(|| self.journal.clone());
        let snapshot_store = behavior
            .snapshot_store
            .clone()
            .unwrap_or_else(|| self.snapshot_store.clone());

        debug!("spawning {persistence_id} as {id}");

        let config = ActorConfig {
            id,
            behavior,
            journal,
            snapshot_store,
            scheduler: self.scheduler.clone(),
            config: self.config.clone(),
            cmd_rx,
            sig_tx: sig_tx.clone(),
            sig_rx,
            monitor,
            registry: self.registry.clone(),
        };

        tokio::spawn(config.exec());

        Ok(PersistentRef {
            id,
            persistence_id,
            cmd_tx,
            sig_tx,
            status_rx,
        })
    }

    /// Whether an instance for `persistence_id` is alive, including one
    /// that is backing off before a restart.
    pub fn is_running(&self, persistence_id: &PersistenceId) -> bool {
        self.registry
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(persistence_id)
    }
}

impl Default for RootContext {
    fn default() -> Self {
        Self::in_memory()
    }
}

impl Debug for RootContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RootContext")
            .field("scheduler", &self.scheduler)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}
