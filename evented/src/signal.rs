//! Lifecycle and failure notifications delivered to the signal handler.
//!
//! Signals are never persisted and never replayed. Only `RecoveryFailed` comes
//! with the instance failing; the others leave the state untouched and the
//! actor keeps running.

use std::sync::Arc;

use crate::{
    base::SequenceNr,
    errors::{PersistenceError, StoreError},
    snapshot::SnapshotMetadata,
};

#[derive(Debug, Clone)]
pub enum Signal {
    /// Recovery finished; commands are processed from now on.
    RecoveryCompleted { sequence_nr: SequenceNr },
    /// Loading the snapshot or replaying events failed.
    RecoveryFailed { cause: Arc<PersistenceError> },
    SnapshotFailed {
        metadata: SnapshotMetadata,
        cause: Arc<StoreError>,
    },
    /// Pruning snapshots at or below `up_to` failed.
    DeleteSnapshotsFailed {
        up_to: SequenceNr,
        cause: Arc<StoreError>,
    },
    /// Deleting events at or below `up_to` failed.
    DeleteEventsFailed {
        up_to: SequenceNr,
        cause: Arc<StoreError>,
    },
}

/// Reacts to signals. Runs on the actor's sequential path with a read-only view
/// of the current state; a panic here is logged and otherwise ignored.
pub type SignalHandler<S> = Box<dyn Fn(&S, &Signal) + Send + Sync>;

impl Signal {
    pub fn name(&self) -> &'static str {
        match self {
            Signal::RecoveryCompleted { .. } => "RecoveryCompleted",
            Signal::RecoveryFailed { .. } => "RecoveryFailed",
            Signal::SnapshotFailed { .. } => "SnapshotFailed",
            Signal::DeleteSnapshotsFailed { .. } => "DeleteSnapshotsFailed",
            Signal::DeleteEventsFailed { .. } => "DeleteEventsFailed",
        }
    }

    /// Whether the signal reports a failure.
    pub fn is_failure(&self) -> bool {
        !matches!(self, Signal::RecoveryCompleted { .. })
    }
}
