use std::{
    collections::BTreeMap,
    sync::{Mutex, PoisonError},
};

use futures::{
    FutureExt, StreamExt,
    future::{self, BoxFuture},
    stream::{self, BoxStream},
};
use rustc_hash::FxHashMap;

use crate::{
    base::SequenceNr,
    errors::StoreError,
    journal::{EventJournal, EventWrite, PersistentRepr, check_expected},
    persistence_id::PersistenceId,
    trace,
};

/// Journal kept in process memory. Nothing survives the process, but it does
/// survive actor restarts, which is what tests and ephemeral actors need.
#[derive(Debug, Default)]
pub struct InMemoryJournal {
    streams: Mutex<FxHashMap<PersistenceId, Stream>>,
}

#[derive(Debug, Default)]
struct Stream {
    records: BTreeMap<SequenceNr, PersistentRepr>,
    highest: SequenceNr,
}

// Implementations

impl InMemoryJournal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stored events of one stream, ascending.
    pub fn records(&self, persistence_id: &PersistenceId) -> Vec<PersistentRepr> {
        self.streams
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(persistence_id)
            .map(|s| s.records.values().cloned().collect())
            .unwrap_or_default()
    }

    /// Events of all streams carrying `tag`, ordered by persistence id then
    /// sequence number.
    pub fn events_by_tag(&self, tag: &str) -> Vec<PersistentRepr> {
        let streams = self.streams.lock().unwrap_or_else(PoisonError::into_inner);

        let mut ids: Vec<&PersistenceId> = streams.keys().collect();
        ids.sort();

        ids.into_iter()
            .flat_map(|id| streams[id].records.values())
            .filter(|r| r.tags.contains(tag))
            .cloned()
            .collect()
    }

    fn append_sync(
        &self,
        persistence_id: PersistenceId,
        expected: SequenceNr,
        writes: Vec<EventWrite>,
    ) -> Result<SequenceNr, StoreError> {
        let mut streams = self.streams.lock().unwrap_or_else(PoisonError::into_inner);
        let stream = streams.entry(persistence_id.clone()).or_default();

        check_expected(&persistence_id, expected, stream.highest)?;

        for write in writes {
            stream.highest += 1;
            stream.records.insert(
                stream.highest,
                PersistentRepr {
                    persistence_id: persistence_id.clone(),
                    sequence_nr: stream.highest,
                    payload: write.payload,
                    tags: write.tags,
                },
            );
        }

        trace!("{persistence_id} appended up to {}", stream.highest);

        Ok(stream.highest)
    }
}

impl EventJournal for InMemoryJournal {
    fn append(
        &self,
        persistence_id: PersistenceId,
        expected: SequenceNr,
        writes: Vec<EventWrite>,
    ) -> BoxFuture<'_, Result<SequenceNr, StoreError>> {
        future::ready(self.append_sync(persistence_id, expected, writes)).boxed()
    }

    fn read_from(
        &self,
        persistence_id: PersistenceId,
        after: SequenceNr,
    ) -> BoxStream<'_, Result<PersistentRepr, StoreError>> {
        let records: Vec<PersistentRepr> = self
            .streams
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&persistence_id)
            .map(|s| {
                s.records
                    .range(after.saturating_add(1)..)
                    .map(|(_, r)| r.clone())
                    .collect()
            })
            .unwrap_or_default();

        stream::iter(records.into_iter().map(Ok::<_, StoreError>)).boxed()
    }

    fn delete_up_to(
        &self,
        persistence_id: PersistenceId,
        to: SequenceNr,
    ) -> BoxFuture<'_, Result<(), StoreError>> {
        let mut streams = self.streams.lock().unwrap_or_else(PoisonError::into_inner);

        if let Some(stream) = streams.get_mut(&persistence_id) {
            stream.records = stream.records.split_off(&to.saturating_add(1));
        }

        future::ready(Ok(())).boxed()
    }

    fn highest_sequence_nr(
        &self,
        persistence_id: PersistenceId,
    ) -> BoxFuture<'_, Result<SequenceNr, StoreError>> {
        let highest = self
            .streams
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&persistence_id)
            .map_or(0, |s| s.highest);

        future::ready(Ok(highest)).boxed()
    }
}
