use crate::{base::SequenceNr, errors::ConfigError};

/// When to take snapshots and what to prune once one is saved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RetentionCriteria {
    #[default]
    Disabled,
    SnapshotEvery {
        every: u64,
        keep: u64,
        delete_events_on_snapshot: bool,
    },
}

impl RetentionCriteria {
    pub fn disabled() -> Self {
        RetentionCriteria::Disabled
    }

    /// Snapshot whenever the sequence number reaches a multiple of `every`,
    /// keeping the `keep` most recent snapshots.
    pub fn snapshot_every(every: u64, keep: u64) -> Result<Self, ConfigError> {
        if every == 0 {
            return Err(ConfigError::ZeroSnapshotInterval);
        }
        if keep == 0 {
            return Err(ConfigError::ZeroKeepSnapshots);
        }

        Ok(RetentionCriteria::SnapshotEvery {
            every,
            keep,
            delete_events_on_snapshot: false,
        })
    }

    /// Also delete the events covered by a snapshot once it is saved.
    /// No-op when snapshotting is disabled.
    pub fn with_delete_events_on_snapshot(self) -> Self {
        match self {
            RetentionCriteria::Disabled => self,
            RetentionCriteria::SnapshotEvery { every, keep, .. } => {
                RetentionCriteria::SnapshotEvery {
                    every,
                    keep,
                    delete_events_on_snapshot: true,
                }
            }
        }
    }

    pub fn is_enabled(&self) -> bool {
        matches!(self, RetentionCriteria::SnapshotEvery { .. })
    }

    /// Whether advancing from `from` to `to` passes a multiple of `every`.
    ///
    /// Boundaries are absolute, so after a restart the first snapshot is taken
    /// at the next multiple rather than catching up on one that was missed.
    pub fn crosses_boundary(&self, from: SequenceNr, to: SequenceNr) -> bool {
        match self {
            RetentionCriteria::Disabled => false,
            RetentionCriteria::SnapshotEvery { every, .. } => to / every > from / every,
        }
    }

    /// Events at or below the returned sequence number may be deleted after a
    /// snapshot at `snapshot_nr` was saved. The bound trails the snapshot by
    /// `every * keep`, so the events behind every retained snapshot survive.
    pub fn delete_events_up_to(&self, snapshot_nr: SequenceNr) -> Option<SequenceNr> {
        match self {
            RetentionCriteria::SnapshotEvery {
                delete_events_on_snapshot: true,
                ..
            } => self.delete_snapshots_up_to(snapshot_nr),
            _ => None,
        }
    }

    /// Snapshots at or below the returned sequence number fall outside the
    /// `keep` most recent ones.
    pub fn delete_snapshots_up_to(&self, snapshot_nr: SequenceNr) -> Option<SequenceNr> {
        match self {
            RetentionCriteria::Disabled => None,
            RetentionCriteria::SnapshotEvery { every, keep, .. } => snapshot_nr
                .checked_sub(every.saturating_mul(*keep))
                .filter(|up_to| *up_to > 0),
        }
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    #[test]
    fn test_validation() {
        assert_eq!(
            RetentionCriteria::snapshot_every(0, 1),
            Err(ConfigError::ZeroSnapshotInterval)
        );
        assert_eq!(
            RetentionCriteria::snapshot_every(10, 0),
            Err(ConfigError::ZeroKeepSnapshots)
        );
        assert!(RetentionCriteria::snapshot_every(10, 2).unwrap().is_enabled());
        assert!(!RetentionCriteria::default().is_enabled());
    }

    #[test]
    fn test_crossing() {
        let criteria = RetentionCriteria::snapshot_every(2, 1).unwrap();

        assert!(!criteria.crosses_boundary(0, 1));
        assert!(criteria.crosses_boundary(1, 2));
        assert!(!criteria.crosses_boundary(2, 3));
        // Batch of events jumping over a boundary
        assert!(criteria.crosses_boundary(3, 6));
        // Resumed at an odd position, the next multiple is the first boundary
        assert!(!criteria.crosses_boundary(5, 5));
        assert!(criteria.crosses_boundary(5, 6));

        assert!(!RetentionCriteria::Disabled.crosses_boundary(0, 100));
    }

    #[test]
    fn test_deletion_bounds() {
        let keep_one = RetentionCriteria::snapshot_every(2, 1)
            .unwrap()
            .with_delete_events_on_snapshot();

        assert_eq!(keep_one.delete_snapshots_up_to(2), None);
        assert_eq!(keep_one.delete_snapshots_up_to(4), Some(2));
        assert_eq!(keep_one.delete_events_up_to(2), None);
        assert_eq!(keep_one.delete_events_up_to(4), Some(2));

        let keep_two = RetentionCriteria::snapshot_every(100, 2).unwrap();
        assert_eq!(keep_two.delete_snapshots_up_to(200), None);
        assert_eq!(keep_two.delete_snapshots_up_to(300), Some(100));
        assert_eq!(keep_two.delete_events_up_to(300), None);

        assert_eq!(
            RetentionCriteria::Disabled.with_delete_events_on_snapshot(),
            RetentionCriteria::Disabled
        );
    }

    proptest! {
        #[test]
        fn test_keep_most_recent_snapshots_and_their_events(
            every in 1u64..50,
            keep in 1u64..6,
            boundaries in 1u64..40,
        ) {
            let criteria = RetentionCriteria::snapshot_every(every, keep)
                .unwrap()
                .with_delete_events_on_snapshot();
            let snapshot_nr = every * boundaries;
            let bound = criteria.delete_snapshots_up_to(snapshot_nr).unwrap_or(0);

            let retained: Vec<_> = (1..=boundaries)
                .map(|b| b * every)
                .filter(|nr| *nr > bound)
                .collect();
            prop_assert_eq!(retained.len() as u64, keep.min(boundaries));
            prop_assert_eq!(retained.last(), Some(&snapshot_nr));

            // Events go exactly as far as snapshots, so every retained snapshot
            // can still replay what follows it
            prop_assert_eq!(
                criteria.delete_events_up_to(snapshot_nr),
                criteria.delete_snapshots_up_to(snapshot_nr)
            );
            prop_assert!(bound < snapshot_nr);
        }
    }
}
