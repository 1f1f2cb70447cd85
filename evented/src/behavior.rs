//! Definition of an event-sourced actor: its identity, handlers and policies.

use std::{collections::BTreeSet, fmt::Debug, sync::Arc};

use serde::{Serialize, de::DeserializeOwned};

use crate::{
    base::SequenceNr,
    handler::{CommandHandler, EventHandler},
    journal::EventJournal,
    persistence_id::PersistenceId,
    recovery::Recovery,
    retention::RetentionCriteria,
    signal::{Signal, SignalHandler},
    snapshot::SnapshotStore,
    supervision::SupervisorStrategy,
};

pub trait Command: Debug + Send + 'static {}

pub trait Event: Debug + Serialize + DeserializeOwned + Send + Sync + 'static {}

/// State must be serializable for snapshots and cloneable so every
/// incarnation can start from the same empty value.
pub trait PersistentState: Clone + Serialize + DeserializeOwned + Send + Sync + 'static {}

pub type Tagger<E> = Box<dyn Fn(&E) -> BTreeSet<String> + Send + Sync>;

/// Extra snapshot trigger, checked for every persisted event with the state
/// after that event.
pub type SnapshotPredicate<E, S> = Box<dyn Fn(&S, &E, SequenceNr) -> bool + Send + Sync>;

pub struct EventSourcedBehavior<C, E, S> {
    pub(crate) persistence_id: PersistenceId,
    pub(crate) empty_state: S,
    pub(crate) command_handler: CommandHandler<C, E, S>,
    pub(crate) event_handler: EventHandler<E, S>,
    pub(crate) signal_handler: Option<SignalHandler<S>>,
    pub(crate) tagger: Option<Tagger<E>>,
    pub(crate) should_snapshot: Option<SnapshotPredicate<E, S>>,
    pub(crate) retention: RetentionCriteria,
    pub(crate) recovery: Recovery,
    pub(crate) supervisor: SupervisorStrategy,
    pub(crate) journal: Option<Arc<dyn EventJournal>>,
    pub(crate) snapshot_store: Option<Arc<dyn SnapshotStore>>,
}

// Implementations

impl<T> Command for T where T: Debug + Send + 'static {}

impl<T> Event for T where T: Debug + Serialize + DeserializeOwned + Send + Sync + 'static {}

impl<T> PersistentState for T where
    T: Clone + Serialize + DeserializeOwned + Send + Sync + 'static
{
}

impl<C, E, S> EventSourcedBehavior<C, E, S>
where
    C: Command,
    E: Event,
    S: PersistentState,
{
    pub fn new(
        persistence_id: PersistenceId,
        empty_state: S,
        command_handler: CommandHandler<C, E, S>,
        event_handler: EventHandler<E, S>,
    ) -> Self {
        Self {
            persistence_id,
            empty_state,
            command_handler,
            event_handler,
            signal_handler: None,
            tagger: None,
            should_snapshot: None,
            retention: RetentionCriteria::default(),
            recovery: Recovery::default(),
            supervisor: SupervisorStrategy::default(),
            journal: None,
            snapshot_store: None,
        }
    }

    pub fn persistence_id(&self) -> &PersistenceId {
        &self.persistence_id
    }

    pub fn with_signal_handler<F>(mut self, f: F) -> Self
    where
        F: Fn(&S, &Signal) + Send + Sync + 'static,
    {
        self.signal_handler = Some(Box::new(f));
        self
    }

    /// Tags stored with every event, computed once while the event is written.
    pub fn with_tagger<F>(mut self, f: F) -> Self
    where
        F: Fn(&E) -> BTreeSet<String> + Send + Sync + 'static,
    {
        self.tagger = Some(Box::new(f));
        self
    }

    /// Also snapshot whenever `f` holds, in addition to the retention criteria.
    pub fn with_snapshot_when<F>(mut self, f: F) -> Self
    where
        F: Fn(&S, &E, SequenceNr) -> bool + Send + Sync + 'static,
    {
        self.should_snapshot = Some(Box::new(f));
        self
    }

    pub fn with_retention(mut self, retention: RetentionCriteria) -> Self {
        self.retention = retention;
        self
    }

    pub fn with_recovery(mut self, recovery: Recovery) -> Self {
        self.recovery = recovery;
        self
    }

    pub fn with_supervisor(mut self, supervisor: SupervisorStrategy) -> Self {
        self.supervisor = supervisor;
        self
    }

    /// Overrides the journal of the spawning context.
    pub fn with_journal(mut self, journal: Arc<dyn EventJournal>) -> Self {
        self.journal = Some(journal);
        self
    }

    /// Overrides the snapshot store of the spawning context.
    pub fn with_snapshot_store(mut self, snapshot_store: Arc<dyn SnapshotStore>) -> Self {
        self.snapshot_store = Some(snapshot_store);
        self
    }

    pub(crate) fn tags(&self, event: &E) -> BTreeSet<String> {
        self.tagger.as_ref().map(|f| f(event)).unwrap_or_default()
    }
}
