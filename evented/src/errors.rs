use std::io;

use thiserror::Error;

use crate::{base::SequenceNr, persistence_id::PersistenceId};

/// Failure reported by an event journal or snapshot store.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store unavailable: {0}")]
    Unavailable(String),
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error("sequence conflict for {persistence_id}: expected {expected}, store is at {actual}")]
    SequenceConflict {
        persistence_id: PersistenceId,
        expected: SequenceNr,
        actual: SequenceNr,
    },
    #[error("corrupt record: {0}")]
    Corrupt(String),
    #[error("failed to encode: {0}")]
    Encode(#[from] postcard::Error),
}

/// Failure that ends the current actor instance. What happens next is decided
/// by the supervisor strategy, except for fatal variants which always stop.
#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("failed to persist events: {0}")]
    Persist(#[source] StoreError),
    #[error("failed to serialize: {0}")]
    Serialization(#[from] postcard::Error),
    #[error("recovery failed: {0}")]
    Recovery(#[source] StoreError),
    #[error("recovery failed to decode {what} at sequence nr {sequence_nr}: {source}")]
    Decode {
        what: &'static str,
        sequence_nr: SequenceNr,
        #[source]
        source: postcard::Error,
    },
    #[error("event handler failed at sequence nr {sequence_nr}: {reason}")]
    EventHandler {
        sequence_nr: SequenceNr,
        reason: String,
    },
    #[error("command handler panicked: {0}")]
    CommandHandler(String),
    #[error("side effect panicked: {0}")]
    SideEffect(String),
    #[error("stash overflow, capacity {capacity}")]
    StashOverflow { capacity: usize },
}

/// Error returned by [`PersistentRef::tell`](crate::actor_ref::PersistentRef::tell).
#[derive(Debug, Error)]
pub enum SendError<T> {
    #[error("actor mailbox closed")]
    ClosedTx(T),
}

/// Error returned by an `ask` request.
#[derive(Debug, Error)]
pub enum RequestError<T> {
    #[error("actor mailbox closed")]
    ClosedTx(T),
    /// The instance went away before it answered, e.g. it failed or stopped
    /// with the command still queued.
    #[error("actor dropped the request")]
    ClosedRx,
    #[error("command rejected: {0}")]
    Rejected(Rejection),
    #[error("request timed out")]
    Timeout,
}

/// Reason a command was refused without being handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum Rejection {
    #[error("stash is full (capacity {capacity})")]
    StashFull { capacity: usize },
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigError {
    #[error("persistence id must not be empty")]
    EmptyPersistenceId,
    #[error("entity type hint {0:?} must not contain the separator '|'")]
    SeparatorInTypeHint(String),
    #[error("snapshot interval must be at least 1")]
    ZeroSnapshotInterval,
    #[error("number of retained snapshots must be at least 1")]
    ZeroKeepSnapshots,
    #[error("backoff minimum {min_ms}ms exceeds maximum {max_ms}ms")]
    BackoffRange { min_ms: u128, max_ms: u128 },
    #[error("backoff random factor must be within 0.0..=1.0, got {0}")]
    RandomFactor(f64),
    #[error("invalid value {value:?} for {key}")]
    InvalidValue { key: &'static str, value: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SpawnError {
    #[error("an instance for {0} is already running")]
    AlreadyRunning(PersistenceId),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SchedulerError {
    #[error("scheduler has been shut down")]
    ShutDown,
    #[error("no tokio runtime available to schedule on")]
    NoRuntime,
}

// Implementations

impl PersistenceError {
    /// Replay corruption: the data is suspect and restarting would hit it again.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            PersistenceError::EventHandler { .. } | PersistenceError::Decode { .. }
        )
    }
}

impl<T> From<SendError<T>> for RequestError<T> {
    fn from(send_error: SendError<T>) -> Self {
        match send_error {
            SendError::ClosedTx(value) => RequestError::ClosedTx(value),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fatal_classification() {
        let corrupt = PersistenceError::EventHandler {
            sequence_nr: 3,
            reason: "no rule".into(),
        };
        assert!(corrupt.is_fatal());

        let persist = PersistenceError::Persist(StoreError::Unavailable("down".into()));
        assert!(!persist.is_fatal());

        let overflow = PersistenceError::StashOverflow { capacity: 1 };
        assert!(!overflow.is_fatal());
    }

    #[test]
    fn test_display() {
        let err = StoreError::SequenceConflict {
            persistence_id: PersistenceId::new("a").unwrap(),
            expected: 1,
            actual: 2,
        };
        assert_eq!(
            err.to_string(),
            "sequence conflict for a: expected 1, store is at 2"
        );

        let err: RequestError<()> = SendError::ClosedTx(()).into();
        assert!(matches!(err, RequestError::ClosedTx(())));
    }
}
