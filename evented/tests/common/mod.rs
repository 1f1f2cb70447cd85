#![allow(dead_code)]

use std::{
    sync::{
        Arc, Mutex,
        atomic::{AtomicBool, AtomicUsize, Ordering},
    },
    time::Duration,
};

use bytes::Bytes;
use evented::{
    journal::{EventJournal, EventWrite, InMemoryJournal, PersistentRepr},
    prelude::*,
    snapshot::{
        InMemorySnapshotStore, SelectedSnapshot, SnapshotMetadata, SnapshotSelectionCriteria,
        SnapshotStore,
    },
};
use futures::{
    FutureExt,
    channel::oneshot,
    future::{self, BoxFuture},
    stream::{self, BoxStream, StreamExt},
};
use serde::{Deserialize, Serialize};

/// Items kept by the list, newest first.
pub const MAX_ITEMS: usize = 5;

pub type Items = Vec<String>;

#[derive(Debug)]
pub enum Cmd {
    Add(String),
    Clear,
    Get(oneshot::Sender<Items>),
    Crash,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Evt {
    Added(String),
    Cleared,
}

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

pub fn pid(entity_id: &str) -> PersistenceId {
    PersistenceId::of("List", entity_id).unwrap()
}

pub fn list_behavior(entity_id: &str) -> EventSourcedBehavior<Cmd, Evt, Items> {
    let commands = CommandHandler::<Cmd, Evt, Items>::builder()
        .for_state(|s: &Items| !s.is_empty())
        .on_command(
            |c| matches!(c, Cmd::Clear),
            |_, _| Effect::persist(Evt::Cleared),
        )
        .for_any_state()
        .on_any_command(|_, c| match c {
            Cmd::Add(item) => Effect::persist(Evt::Added(item)),
            Cmd::Get(tx) => Effect::none().then_run(move |s: &Items| {
                let _ = tx.send(s.clone());
            }),
            Cmd::Crash => panic!("crash requested"),
            Cmd::Clear => Effect::unhandled(),
        })
        .build();

    let events = EventHandler::from_fn(|s: &Items, e: &Evt| match e {
        Evt::Added(item) => std::iter::once(item.clone())
            .chain(s.iter().cloned())
            .take(MAX_ITEMS)
            .collect(),
        Evt::Cleared => Vec::new(),
    });

    EventSourcedBehavior::new(pid(entity_id), Vec::new(), commands, events)
}

pub async fn items(list: &PersistentRef<Cmd>) -> Items {
    let (tx, rx) = oneshot::channel();
    list.tell(Cmd::Get(tx)).unwrap();
    rx.await.unwrap()
}

pub async fn add_all(list: &PersistentRef<Cmd>, items: &[&str]) {
    for item in items {
        let outcome = list.ask(Cmd::Add(item.to_string())).await.unwrap();
        assert!(outcome.is_persisted());
    }
}

pub fn decode(records: &[PersistentRepr]) -> Vec<(SequenceNr, Evt)> {
    records
        .iter()
        .map(|r| (r.sequence_nr, postcard::from_bytes(&r.payload).unwrap()))
        .collect()
}

pub fn sequence_nrs(records: &[PersistentRepr]) -> Vec<SequenceNr> {
    records.iter().map(|r| r.sequence_nr).collect()
}

/// Journal that fails on demand and records how appends overlap.
#[derive(Debug, Default)]
pub struct TestJournal {
    pub inner: InMemoryJournal,
    appends: AtomicUsize,
    fail_on_append: AtomicUsize,
    fail_reads: AtomicBool,
    fail_deletes: AtomicBool,
    append_delay: Mutex<Option<Duration>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl TestJournal {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Fail the `n`-th append call, counting from 1.
    pub fn fail_on_append(&self, n: usize) {
        self.fail_on_append.store(n, Ordering::SeqCst);
    }

    pub fn fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }

    pub fn fail_deletes(&self, fail: bool) {
        self.fail_deletes.store(fail, Ordering::SeqCst);
    }

    pub fn delay_appends(&self, delay: Duration) {
        *self.append_delay.lock().unwrap() = Some(delay);
    }

    pub fn appends(&self) -> usize {
        self.appends.load(Ordering::SeqCst)
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    pub fn records(&self, persistence_id: &PersistenceId) -> Vec<PersistentRepr> {
        self.inner.records(persistence_id)
    }
}

impl EventJournal for TestJournal {
    fn append(
        &self,
        persistence_id: PersistenceId,
        expected: SequenceNr,
        writes: Vec<EventWrite>,
    ) -> BoxFuture<'_, Result<SequenceNr, StoreError>> {
        let n = self.appends.fetch_add(1, Ordering::SeqCst) + 1;
        let delay = *self.append_delay.lock().unwrap();

        async move {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(now, Ordering::SeqCst);

            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }

            let res = if n == self.fail_on_append.load(Ordering::SeqCst) {
                Err(StoreError::Unavailable(format!("append {n} failed")))
            } else {
                self.inner.append(persistence_id, expected, writes).await
            };

            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            res
        }
        .boxed()
    }

    fn read_from(
        &self,
        persistence_id: PersistenceId,
        after: SequenceNr,
    ) -> BoxStream<'_, Result<PersistentRepr, StoreError>> {
        if self.fail_reads.load(Ordering::SeqCst) {
            return stream::once(future::ready(Err(StoreError::Unavailable(
                "reads failed".into(),
            ))))
            .boxed();
        }

        self.inner.read_from(persistence_id, after)
    }

    fn delete_up_to(
        &self,
        persistence_id: PersistenceId,
        to: SequenceNr,
    ) -> BoxFuture<'_, Result<(), StoreError>> {
        if self.fail_deletes.load(Ordering::SeqCst) {
            return future::ready(Err(StoreError::Unavailable("deletes failed".into()))).boxed();
        }

        self.inner.delete_up_to(persistence_id, to)
    }

    fn highest_sequence_nr(
        &self,
        persistence_id: PersistenceId,
    ) -> BoxFuture<'_, Result<SequenceNr, StoreError>> {
        self.inner.highest_sequence_nr(persistence_id)
    }
}

/// Snapshot store whose saves always fail.
#[derive(Debug, Default)]
pub struct BrokenSnapshotStore;

impl SnapshotStore for BrokenSnapshotStore {
    fn latest(
        &self,
        _persistence_id: PersistenceId,
        _criteria: SnapshotSelectionCriteria,
    ) -> BoxFuture<'_, Result<Option<SelectedSnapshot>, StoreError>> {
        future::ready(Ok(None)).boxed()
    }

    fn save(
        &self,
        _metadata: SnapshotMetadata,
        _state: Bytes,
    ) -> BoxFuture<'_, Result<(), StoreError>> {
        future::ready(Err(StoreError::Unavailable("disk full".into()))).boxed()
    }

    fn delete_up_to(
        &self,
        _persistence_id: PersistenceId,
        _to: SequenceNr,
    ) -> BoxFuture<'_, Result<(), StoreError>> {
        future::ready(Ok(())).boxed()
    }
}

/// Snapshot store that saves and loads normally but never deletes.
#[derive(Debug, Default)]
pub struct UndeletableSnapshotStore {
    pub inner: InMemorySnapshotStore,
}

impl SnapshotStore for UndeletableSnapshotStore {
    fn latest(
        &self,
        persistence_id: PersistenceId,
        criteria: SnapshotSelectionCriteria,
    ) -> BoxFuture<'_, Result<Option<SelectedSnapshot>, StoreError>> {
        self.inner.latest(persistence_id, criteria)
    }

    fn save(
        &self,
        metadata: SnapshotMetadata,
        state: Bytes,
    ) -> BoxFuture<'_, Result<(), StoreError>> {
        self.inner.save(metadata, state)
    }

    fn delete_up_to(
        &self,
        _persistence_id: PersistenceId,
        _to: SequenceNr,
    ) -> BoxFuture<'_, Result<(), StoreError>> {
        future::ready(Err(StoreError::Unavailable("read-only".into()))).boxed()
    }
}

/// Signal names seen by a behavior, in delivery order.
#[derive(Debug, Clone, Default)]
pub struct SignalLog(Arc<Mutex<Vec<Signal>>>);

impl SignalLog {
    pub fn handler(&self) -> impl Fn(&Items, &Signal) + Send + Sync + 'static {
        let log = self.0.clone();
        move |_: &Items, signal: &Signal| log.lock().unwrap().push(signal.clone())
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.0.lock().unwrap().iter().map(Signal::name).collect()
    }

    pub fn signals(&self) -> Vec<Signal> {
        self.0.lock().unwrap().clone()
    }
}
