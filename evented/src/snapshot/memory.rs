use std::{
    collections::BTreeMap,
    sync::{Mutex, PoisonError},
};

use bytes::Bytes;
use futures::{
    FutureExt,
    future::{self, BoxFuture},
};
use rustc_hash::FxHashMap;

use crate::{
    base::SequenceNr,
    errors::StoreError,
    persistence_id::PersistenceId,
    snapshot::{SelectedSnapshot, SnapshotMetadata, SnapshotSelectionCriteria, SnapshotStore},
};

#[derive(Debug, Default)]
pub struct InMemorySnapshotStore {
    snapshots: Mutex<FxHashMap<PersistenceId, BTreeMap<SequenceNr, Bytes>>>,
}

impl InMemorySnapshotStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sequence numbers of the stored snapshots of one stream, ascending.
    pub fn sequence_nrs(&self, persistence_id: &PersistenceId) -> Vec<SequenceNr> {
        self.snapshots
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(persistence_id)
            .map(|s| s.keys().copied().collect())
            .unwrap_or_default()
    }
}

impl SnapshotStore for InMemorySnapshotStore {
    fn latest(
        &self,
        persistence_id: PersistenceId,
        criteria: SnapshotSelectionCriteria,
    ) -> BoxFuture<'_, Result<Option<SelectedSnapshot>, StoreError>> {
        let selected = self
            .snapshots
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&persistence_id)
            .and_then(|s| {
                s.iter()
                    .rev()
                    .find(|(nr, _)| criteria.matches(**nr))
                    .map(|(nr, state)| SelectedSnapshot {
                        metadata: SnapshotMetadata {
                            persistence_id: persistence_id.clone(),
                            sequence_nr: *nr,
                        },
                        state: state.clone(),
                    })
            });

        future::ready(Ok(selected)).boxed()
    }

    fn save(
        &self,
        metadata: SnapshotMetadata,
        state: Bytes,
    ) -> BoxFuture<'_, Result<(), StoreError>> {
        self.snapshots
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(metadata.persistence_id)
            .or_default()
            .insert(metadata.sequence_nr, state);

        future::ready(Ok(())).boxed()
    }

    fn delete_up_to(
        &self,
        persistence_id: PersistenceId,
        to: SequenceNr,
    ) -> BoxFuture<'_, Result<(), StoreError>> {
        if let Some(s) = self
            .snapshots
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get_mut(&persistence_id)
        {
            s.retain(|nr, _| *nr > to);
        }

        future::ready(Ok(())).boxed()
    }
}
