//! Mailbox plumbing between [`PersistentRef`](crate::actor_ref::PersistentRef)
//! and the actor instance.

use futures::channel::oneshot;
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender};

use crate::{
    base::SequenceNr,
    errors::{Rejection, StoreError},
    snapshot::SnapshotMetadata,
};

/// A command together with where its outcome should go.
pub type CmdPack<C> = (C, Continuation);

pub type CmdTx<C> = UnboundedSender<CmdPack<C>>;
pub type CmdRx<C> = UnboundedReceiver<CmdPack<C>>;

pub(crate) type SigTx = UnboundedSender<RawSignal>;
pub(crate) type SigRx = UnboundedReceiver<RawSignal>;

pub type ReplyTx = oneshot::Sender<Result<Outcome, Rejection>>;

/// What happened to a command that was handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Events were persisted; `sequence_nr` is the last of them.
    Persisted { sequence_nr: SequenceNr },
    /// Nothing to persist; side effects ran against the current state.
    Applied,
    /// No rule accepted the command in the current state.
    Unhandled,
}

#[derive(Debug)]
pub enum Continuation {
    Nil,
    Reply(ReplyTx),
}

/// Control and completion signals, processed on the instance's sequential path.
#[derive(Debug)]
pub(crate) enum RawSignal {
    Stop,
    SnapshotSaved {
        metadata: SnapshotMetadata,
        result: Result<(), StoreError>,
    },
    SnapshotsDeleted {
        up_to: SequenceNr,
        result: Result<(), StoreError>,
    },
    EventsDeleted {
        up_to: SequenceNr,
        result: Result<(), StoreError>,
    },
}

// Implementations

impl Continuation {
    pub fn reply(tx: ReplyTx) -> Self {
        Continuation::Reply(tx)
    }

    pub fn is_nil(&self) -> bool {
        matches!(self, Continuation::Nil)
    }

    /// Deliver the outcome. A caller that gave up waiting is not an error.
    pub(crate) fn send(self, res: Result<Outcome, Rejection>) {
        if let Continuation::Reply(tx) = self {
            let _ = tx.send(res);
        }
    }
}

impl Outcome {
    pub fn is_persisted(&self) -> bool {
        matches!(self, Outcome::Persisted { .. })
    }

    pub fn is_unhandled(&self) -> bool {
        matches!(self, Outcome::Unhandled)
    }
}

impl RawSignal {
    /// Completion of background snapshot or deletion work.
    pub(crate) fn is_completion(&self) -> bool {
        !matches!(self, RawSignal::Stop)
    }
}
