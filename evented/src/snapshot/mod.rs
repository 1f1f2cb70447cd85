//! Durable checkpoints of actor state, keyed by persistence id and sequence nr.

use bytes::Bytes;
use futures::future::BoxFuture;

use crate::{base::SequenceNr, errors::StoreError, persistence_id::PersistenceId};

pub mod memory;

#[cfg(feature = "local_fs")]
pub mod local_fs;

pub use memory::InMemorySnapshotStore;

#[cfg(feature = "local_fs")]
pub use local_fs::LocalFsSnapshotStore;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SnapshotMetadata {
    pub persistence_id: PersistenceId,
    pub sequence_nr: SequenceNr,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelectedSnapshot {
    pub metadata: SnapshotMetadata,
    /// Serialized state.
    pub state: Bytes,
}

/// Which snapshots recovery may start from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SnapshotSelectionCriteria {
    pub min_sequence_nr: SequenceNr,
    pub max_sequence_nr: SequenceNr,
}

pub trait SnapshotStore: Send + Sync + 'static {
    /// Most recent snapshot of the stream that matches `criteria`.
    fn latest(
        &self,
        persistence_id: PersistenceId,
        criteria: SnapshotSelectionCriteria,
    ) -> BoxFuture<'_, Result<Option<SelectedSnapshot>, StoreError>>;

    fn save(
        &self,
        metadata: SnapshotMetadata,
        state: Bytes,
    ) -> BoxFuture<'_, Result<(), StoreError>>;

    /// Delete snapshots up to and including `to`.
    fn delete_up_to(
        &self,
        persistence_id: PersistenceId,
        to: SequenceNr,
    ) -> BoxFuture<'_, Result<(), StoreError>>;
}

impl SnapshotSelectionCriteria {
    /// Any snapshot; the newest one wins.
    pub fn latest() -> Self {
        Self {
            min_sequence_nr: 0,
            max_sequence_nr: SequenceNr::MAX,
        }
    }

    /// Never start from a snapshot; replay every event.
    pub fn none() -> Self {
        Self {
            min_sequence_nr: 0,
            max_sequence_nr: 0,
        }
    }

    /// Snapshots taken at a sequence number within `min..=max`.
    pub fn range(min_sequence_nr: SequenceNr, max_sequence_nr: SequenceNr) -> Self {
        Self {
            min_sequence_nr,
            max_sequence_nr,
        }
    }

    pub fn is_none(&self) -> bool {
        self.max_sequence_nr == 0 || self.min_sequence_nr > self.max_sequence_nr
    }

    pub fn matches(&self, sequence_nr: SequenceNr) -> bool {
        !self.is_none()
            && sequence_nr >= self.min_sequence_nr
            && sequence_nr <= self.max_sequence_nr
    }
}

impl Default for SnapshotSelectionCriteria {
    fn default() -> Self {
        Self::latest()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_selection_criteria() {
        assert!(SnapshotSelectionCriteria::latest().matches(1));
        assert!(SnapshotSelectionCriteria::latest().matches(SequenceNr::MAX));

        assert!(SnapshotSelectionCriteria::none().is_none());
        assert!(!SnapshotSelectionCriteria::none().matches(0));
        assert!(!SnapshotSelectionCriteria::none().matches(5));

        let range = SnapshotSelectionCriteria::range(10, 20);
        assert!(!range.matches(9));
        assert!(range.matches(10));
        assert!(range.matches(20));
        assert!(!range.matches(21));

        assert!(SnapshotSelectionCriteria::range(5, 4).is_none());
    }
}
