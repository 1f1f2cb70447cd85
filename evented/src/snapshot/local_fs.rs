//! Snapshot store on the local file system: one file per snapshot,
//! `{root}/pid-{encoded id}/snapshot-{sequence nr, zero padded}.bin`.

use std::path::{Path, PathBuf};

use bytes::Bytes;
use futures::{FutureExt, future::BoxFuture};
use tokio::fs;

use crate::{
    base::SequenceNr,
    config::PersistenceConfig,
    errors::StoreError,
    journal::local_fs::stream_dir,
    persistence_id::PersistenceId,
    snapshot::{SelectedSnapshot, SnapshotMetadata, SnapshotSelectionCriteria, SnapshotStore},
    trace,
};

const PREFIX: &str = "snapshot-";
const SUFFIX: &str = ".bin";

#[derive(Debug)]
pub struct LocalFsSnapshotStore {
    root: PathBuf,
}

// Implementations

impl LocalFsSnapshotStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into().join("snapshots"),
        }
    }

    pub fn from_config(config: &PersistenceConfig) -> Self {
        Self::new(config.data_dir.clone())
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    async fn latest_impl(
        &self,
        persistence_id: PersistenceId,
        criteria: SnapshotSelectionCriteria,
    ) -> Result<Option<SelectedSnapshot>, StoreError> {
        if criteria.is_none() {
            return Ok(None);
        }

        let dir = stream_dir(&self.root, &persistence_id);
        let Some(sequence_nr) = list_sequence_nrs(&dir)
            .await?
            .into_iter()
            .filter(|nr| criteria.matches(*nr))
            .max()
        else {
            return Ok(None);
        };

        let state = fs::read(dir.join(file_name(sequence_nr))).await?;

        Ok(Some(SelectedSnapshot {
            metadata: SnapshotMetadata {
                persistence_id,
                sequence_nr,
            },
            state: state.into(),
        }))
    }

    async fn save_impl(&self, metadata: SnapshotMetadata, state: Bytes) -> Result<(), StoreError> {
        let dir = stream_dir(&self.root, &metadata.persistence_id);
        fs::create_dir_all(&dir).await?;

        let name = file_name(metadata.sequence_nr);
        let tmp = dir.join(format!("{name}.tmp"));

        fs::write(&tmp, &state).await?;
        fs::rename(&tmp, dir.join(&name)).await?;

        trace!(
            "{} saved snapshot at {}",
            metadata.persistence_id, metadata.sequence_nr
        );

        Ok(())
    }

    async fn delete_impl(
        &self,
        persistence_id: PersistenceId,
        to: SequenceNr,
    ) -> Result<(), StoreError> {
        let dir = stream_dir(&self.root, &persistence_id);

        for nr in list_sequence_nrs(&dir).await? {
            if nr <= to {
                fs::remove_file(dir.join(file_name(nr))).await?;
            }
        }

        Ok(())
    }
}

impl SnapshotStore for LocalFsSnapshotStore {
    fn latest(
        &self,
        persistence_id: PersistenceId,
        criteria: SnapshotSelectionCriteria,
    ) -> BoxFuture<'_, Result<Option<SelectedSnapshot>, StoreError>> {
        self.latest_impl(persistence_id, criteria).boxed()
    }

    fn save(
        &self,
        metadata: SnapshotMetadata,
        state: Bytes,
    ) -> BoxFuture<'_, Result<(), StoreError>> {
        self.save_impl(metadata, state).boxed()
    }

    fn delete_up_to(
        &self,
        persistence_id: PersistenceId,
        to: SequenceNr,
    ) -> BoxFuture<'_, Result<(), StoreError>> {
        self.delete_impl(persistence_id, to).boxed()
    }
}

fn file_name(sequence_nr: SequenceNr) -> String {
    format!("{PREFIX}{sequence_nr:020}{SUFFIX}")
}

fn parse_file_name(name: &str) -> Option<SequenceNr> {
    name.strip_prefix(PREFIX)?
        .strip_suffix(SUFFIX)?
        .parse()
        .ok()
}

async fn list_sequence_nrs(dir: &Path) -> Result<Vec<SequenceNr>, StoreError> {
    let mut entries = match fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e.into()),
    };

    let mut nrs = Vec::new();
    while let Some(entry) = entries.next_entry().await? {
        if let Some(nr) = entry.file_name().to_str().and_then(parse_file_name) {
            nrs.push(nr);
        }
    }
    nrs.sort_unstable();

    Ok(nrs)
}
