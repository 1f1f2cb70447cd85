//! Append-only event log, one stream per persistence id.
//!
//! A journal knows nothing about actors. It stores opaque payloads with their
//! tags and owns sequence number allocation: numbers are contiguous per stream,
//! start at 1, and are never reused, not even after deletion.

use std::collections::BTreeSet;

use bytes::Bytes;
use futures::{future::BoxFuture, stream::BoxStream};
use serde::{Deserialize, Serialize};

use crate::{base::SequenceNr, errors::StoreError, persistence_id::PersistenceId};

pub mod memory;

#[cfg(feature = "local_fs")]
pub mod local_fs;

pub use memory::InMemoryJournal;

#[cfg(feature = "local_fs")]
pub use local_fs::LocalFsJournal;

/// One event about to be appended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventWrite {
    pub payload: Bytes,
    pub tags: BTreeSet<String>,
}

/// A stored event as read back from the journal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersistentRepr {
    pub persistence_id: PersistenceId,
    pub sequence_nr: SequenceNr,
    pub payload: Bytes,
    pub tags: BTreeSet<String>,
}

pub trait EventJournal: Send + Sync + 'static {
    /// Append `writes` atomically after `expected`, which must be the current
    /// highest sequence number of the stream. Returns the new highest number.
    fn append(
        &self,
        persistence_id: PersistenceId,
        expected: SequenceNr,
        writes: Vec<EventWrite>,
    ) -> BoxFuture<'_, Result<SequenceNr, StoreError>>;

    /// Events with a sequence number strictly greater than `after`, ascending.
    fn read_from(
        &self,
        persistence_id: PersistenceId,
        after: SequenceNr,
    ) -> BoxStream<'_, Result<PersistentRepr, StoreError>>;

    /// Delete events up to and including `to`.
    fn delete_up_to(
        &self,
        persistence_id: PersistenceId,
        to: SequenceNr,
    ) -> BoxFuture<'_, Result<(), StoreError>>;

    /// Highest sequence number ever allocated for the stream, 0 if none.
    fn highest_sequence_nr(
        &self,
        persistence_id: PersistenceId,
    ) -> BoxFuture<'_, Result<SequenceNr, StoreError>>;
}

pub(crate) fn check_expected(
    persistence_id: &PersistenceId,
    expected: SequenceNr,
    actual: SequenceNr,
) -> Result<(), StoreError> {
    if expected != actual {
        return Err(StoreError::SequenceConflict {
            persistence_id: persistence_id.clone(),
            expected,
            actual,
        });
    }

    Ok(())
}
