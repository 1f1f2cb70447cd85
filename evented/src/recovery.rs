//! Rebuilding state from the latest snapshot and the events after it.
//!
//! Recovery moves through `Starting → LoadingSnapshot → Replaying → Recovered`.
//! Commands are not read from the mailbox until it is done, so they wait
//! there in arrival order.

use futures::StreamExt;

use crate::{
    base::SequenceNr,
    behavior::{Event, PersistentState},
    debug,
    errors::{PersistenceError, StoreError},
    handler::EventHandler,
    journal::EventJournal,
    persistence_id::PersistenceId,
    snapshot::{SnapshotSelectionCriteria, SnapshotStore},
    trace,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Recovery {
    /// Start from the newest snapshot matching the criteria, then replay.
    Enabled(SnapshotSelectionCriteria),
    /// Start from the empty state without reading anything. New events are
    /// still appended after the highest stored sequence number.
    Disabled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoveryPhase {
    Starting,
    LoadingSnapshot,
    Replaying,
    Recovered,
}

#[derive(Debug)]
pub(crate) struct Recovered<S> {
    pub(crate) state: S,
    pub(crate) sequence_nr: SequenceNr,
    pub(crate) snapshot_nr: Option<SequenceNr>,
    pub(crate) replayed: u64,
}

pub(crate) struct RecoveryEngine<'a, E, S> {
    persistence_id: &'a PersistenceId,
    journal: &'a dyn EventJournal,
    snapshot_store: &'a dyn SnapshotStore,
    event_handler: &'a EventHandler<E, S>,
    phase: RecoveryPhase,
}

// Implementations

impl Recovery {
    pub fn enabled() -> Self {
        Recovery::Enabled(SnapshotSelectionCriteria::latest())
    }

    pub fn disabled() -> Self {
        Recovery::Disabled
    }

    pub fn is_enabled(&self) -> bool {
        matches!(self, Recovery::Enabled(_))
    }
}

impl Default for Recovery {
    fn default() -> Self {
        Self::enabled()
    }
}

impl<'a, E, S> RecoveryEngine<'a, E, S>
where
    E: Event,
    S: PersistentState,
{
    pub(crate) fn new(
        persistence_id: &'a PersistenceId,
        journal: &'a dyn EventJournal,
        snapshot_store: &'a dyn SnapshotStore,
        event_handler: &'a EventHandler<E, S>,
    ) -> Self {
        Self {
            persistence_id,
            journal,
            snapshot_store,
            event_handler,
            phase: RecoveryPhase::Starting,
        }
    }

    pub(crate) fn phase(&self) -> RecoveryPhase {
        self.phase
    }

    pub(crate) async fn run(
        &mut self,
        recovery: Recovery,
        empty_state: &S,
    ) -> Result<Recovered<S>, PersistenceError> {
        let criteria = match recovery {
            Recovery::Enabled(criteria) => criteria,
            Recovery::Disabled => return self.skip(empty_state).await,
        };

        self.transition(RecoveryPhase::LoadingSnapshot);
        let (mut state, snapshot_nr) = self.load_snapshot(criteria, empty_state).await?;

        self.transition(RecoveryPhase::Replaying);
        let mut sequence_nr = snapshot_nr.unwrap_or(0);
        let mut replayed = 0;

        let journal = self.journal;
        let mut events = journal.read_from(self.persistence_id.clone(), sequence_nr);

        while let Some(res) = events.next().await {
            let repr = res.map_err(PersistenceError::Recovery)?;

            if repr.sequence_nr <= sequence_nr {
                continue;
            }
            // Events below the cursor may be gone, the ones after it may not
            if repr.sequence_nr != sequence_nr + 1 {
                return Err(PersistenceError::Recovery(StoreError::Corrupt(format!(
                    "{} replay expected sequence nr {} but read {}",
                    self.persistence_id,
                    sequence_nr + 1,
                    repr.sequence_nr
                ))));
            }

            let event: E =
                postcard::from_bytes(&repr.payload).map_err(|e| PersistenceError::Decode {
                    what: "event",
                    sequence_nr: repr.sequence_nr,
                    source: e,
                })?;

            state = self.event_handler.fold(&state, &event, repr.sequence_nr)?;
            sequence_nr = repr.sequence_nr;
            replayed += 1;
        }

        self.transition(RecoveryPhase::Recovered);
        debug!(
            "{} recovered at {sequence_nr}, snapshot {snapshot_nr:?}, replayed {replayed}",
            self.persistence_id
        );

        Ok(Recovered {
            state,
            sequence_nr,
            snapshot_nr,
            replayed,
        })
    }

    async fn load_snapshot(
        &self,
        criteria: SnapshotSelectionCriteria,
        empty_state: &S,
    ) -> Result<(S, Option<SequenceNr>), PersistenceError> {
        if criteria.is_none() {
            return Ok((empty_state.clone(), None));
        }

        let selected = self
            .snapshot_store
            .latest(self.persistence_id.clone(), criteria)
            .await
            .map_err(PersistenceError::Recovery)?;

        let Some(snapshot) = selected else {
            return Ok((empty_state.clone(), None));
        };

        let sequence_nr = snapshot.metadata.sequence_nr;
        let state = postcard::from_bytes(&snapshot.state).map_err(|e| PersistenceError::Decode {
            what: "snapshot",
            sequence_nr,
            source: e,
        })?;

        Ok((state, Some(sequence_nr)))
    }

    async fn skip(&mut self, empty_state: &S) -> Result<Recovered<S>, PersistenceError> {
        let sequence_nr = self
            .journal
            .highest_sequence_nr(self.persistence_id.clone())
            .await
            .map_err(PersistenceError::Recovery)?;

        self.transition(RecoveryPhase::Recovered);
        debug!(
            "{} skipped recovery, continuing after {sequence_nr}",
            self.persistence_id
        );

        Ok(Recovered {
            state: empty_state.clone(),
            sequence_nr,
            snapshot_nr: None,
            replayed: 0,
        })
    }

    fn transition(&mut self, phase: RecoveryPhase) {
        trace!("{} recovery {:?} -> {phase:?}", self.persistence_id, self.phase);
        self.phase = phase;
    }
}
