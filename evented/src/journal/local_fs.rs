//! Journal stored on the local file system.
//!
//! Each stream lives in its own directory under the root:
//!
//! ```text
//! {root}/pid-{percent-encoded persistence id}/events.bin   length-prefixed records
//! {root}/pid-{percent-encoded persistence id}/meta.bin     highest sequence number floor
//! ```
//!
//! Every record is `[u32 little-endian length][postcard FsRecord]`. The highest
//! sequence number comes from the last complete record; the meta file is only
//! written on deletion, so the number survives the deletion of every event.
//!
//! A stream is scanned once, when first touched. A trailing partial record left
//! behind by an interrupted write is cut off at that point, and a failed append
//! is truncated away before the error is returned.

use std::{
    collections::BTreeSet,
    io::{self, SeekFrom},
    path::{Path, PathBuf},
};

use futures::{
    FutureExt, StreamExt, TryFutureExt, TryStreamExt,
    future::{self, BoxFuture},
    stream::{self, BoxStream},
};
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use tokio::{
    fs,
    io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt, BufReader, Take},
    sync::Mutex,
};

use crate::{
    base::SequenceNr,
    config::PersistenceConfig,
    debug, error,
    errors::StoreError,
    journal::{EventJournal, EventWrite, PersistentRepr, check_expected},
    persistence_id::PersistenceId,
    warn,
};

const EVENTS_FILE: &str = "events.bin";
const META_FILE: &str = "meta.bin";
const PREFIX_LEN: u64 = 4;

#[derive(Debug)]
pub struct LocalFsJournal {
    root: PathBuf,
    // Also serializes file access; one writer per stream is assumed anyway.
    streams: Mutex<FxHashMap<PersistenceId, StreamState>>,
}

/// What is known about a stream once it has been scanned.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct StreamState {
    highest: SequenceNr,
    /// Byte length of the events file up to the end of the last complete record.
    len: u64,
}

#[derive(Debug, Serialize, Deserialize)]
struct FsRecord {
    sequence_nr: SequenceNr,
    payload: Vec<u8>,
    tags: BTreeSet<String>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct FsMeta {
    highest: SequenceNr,
}

/// Reads frames from the first `remaining` bytes of an events file.
struct FrameReader {
    inner: BufReader<Take<fs::File>>,
    remaining: u64,
}

// Implementations

impl LocalFsJournal {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into().join("journal"),
            streams: Mutex::new(FxHashMap::default()),
        }
    }

    /// Journal under the configured data directory.
    pub fn from_config(config: &PersistenceConfig) -> Self {
        Self::new(config.data_dir.clone())
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    async fn append_impl(
        &self,
        persistence_id: PersistenceId,
        expected: SequenceNr,
        writes: Vec<EventWrite>,
    ) -> Result<SequenceNr, StoreError> {
        let mut streams = self.streams.lock().await;
        let dir = stream_dir(&self.root, &persistence_id);

        let state = load_stream(&mut streams, &dir, &persistence_id).await?;
        check_expected(&persistence_id, expected, state.highest)?;

        let mut buf = Vec::new();
        let mut next = state.highest;
        for write in writes {
            next += 1;
            let record = FsRecord {
                sequence_nr: next,
                payload: write.payload.to_vec(),
                tags: write.tags,
            };
            encode_frame(&record, &mut buf)?;
        }

        fs::create_dir_all(&dir).await?;
        let path = dir.join(EVENTS_FILE);

        if let Err(e) = write_at(&path, state.len, &buf).await {
            // A failed batch must not come back on replay
            if let Err(undo) = truncate(&path, state.len).await {
                error!("{persistence_id} could not roll back a failed append: {undo}");
                streams.remove(&persistence_id);
            }
            return Err(e);
        }

        streams.insert(
            persistence_id,
            StreamState {
                highest: next,
                len: state.len + buf.len() as u64,
            },
        );

        Ok(next)
    }

    async fn open_reader(
        &self,
        persistence_id: PersistenceId,
    ) -> Result<Option<FrameReader>, StoreError> {
        let mut streams = self.streams.lock().await;
        let dir = stream_dir(&self.root, &persistence_id);

        let state = load_stream(&mut streams, &dir, &persistence_id).await?;

        // Opened under the lock, so later appends and deletions are not seen
        match fs::File::open(dir.join(EVENTS_FILE)).await {
            Ok(file) => Ok(Some(FrameReader::new(file, state.len))),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn delete_impl(
        &self,
        persistence_id: PersistenceId,
        to: SequenceNr,
    ) -> Result<(), StoreError> {
        let mut streams = self.streams.lock().await;
        let dir = stream_dir(&self.root, &persistence_id);

        let state = load_stream(&mut streams, &dir, &persistence_id).await?;
        if state.len == 0 {
            return Ok(());
        }

        // The floor goes first so the highest number outlives the records
        write_meta(
            &dir,
            &FsMeta {
                highest: state.highest,
            },
        )
        .await?;

        let data = fs::read(dir.join(EVENTS_FILE)).await?;
        let complete = data.get(..state.len as usize).unwrap_or(&data);

        let mut buf = Vec::new();
        for record in decode_frames(complete)?.iter().filter(|r| r.sequence_nr > to) {
            encode_frame(record, &mut buf)?;
        }

        let tmp = dir.join(format!("{EVENTS_FILE}.tmp"));
        fs::write(&tmp, &buf).await?;
        fs::rename(&tmp, dir.join(EVENTS_FILE)).await?;

        streams.insert(
            persistence_id.clone(),
            StreamState {
                highest: state.highest,
                len: buf.len() as u64,
            },
        );

        debug!("{persistence_id} deleted events up to {to}");

        Ok(())
    }
}

impl EventJournal for LocalFsJournal {
    fn append(
        &self,
        persistence_id: PersistenceId,
        expected: SequenceNr,
        writes: Vec<EventWrite>,
    ) -> BoxFuture<'_, Result<SequenceNr, StoreError>> {
        self.append_impl(persistence_id, expected, writes).boxed()
    }

    fn read_from(
        &self,
        persistence_id: PersistenceId,
        after: SequenceNr,
    ) -> BoxStream<'_, Result<PersistentRepr, StoreError>> {
        self.open_reader(persistence_id.clone())
            .map_ok(|reader| stream::try_unfold(reader, next_record))
            .try_flatten_stream()
            .try_filter(move |r| future::ready(r.sequence_nr > after))
            .map_ok(move |r| PersistentRepr {
                persistence_id: persistence_id.clone(),
                sequence_nr: r.sequence_nr,
                payload: r.payload.into(),
                tags: r.tags,
            })
            .boxed()
    }

    fn delete_up_to(
        &self,
        persistence_id: PersistenceId,
        to: SequenceNr,
    ) -> BoxFuture<'_, Result<(), StoreError>> {
        self.delete_impl(persistence_id, to).boxed()
    }

    fn highest_sequence_nr(
        &self,
        persistence_id: PersistenceId,
    ) -> BoxFuture<'_, Result<SequenceNr, StoreError>> {
        async move {
            let mut streams = self.streams.lock().await;
            let dir = stream_dir(&self.root, &persistence_id);
            let state = load_stream(&mut streams, &dir, &persistence_id).await?;

            Ok(state.highest)
        }
        .boxed()
    }
}

impl FrameReader {
    fn new(file: fs::File, len: u64) -> Self {
        Self {
            inner: BufReader::new(file.take(len)),
            remaining: len,
        }
    }

    /// Next complete frame, `None` at the end. A frame cut short by the end of
    /// the readable range is an `UnexpectedEof`.
    async fn next_frame(&mut self) -> io::Result<Option<Vec<u8>>> {
        if self.remaining == 0 {
            return Ok(None);
        }
        if self.remaining < PREFIX_LEN {
            return Err(io::ErrorKind::UnexpectedEof.into());
        }

        let mut prefix = [0u8; PREFIX_LEN as usize];
        self.inner.read_exact(&mut prefix).await?;

        let len = u64::from(u32::from_le_bytes(prefix));
        if len > self.remaining - PREFIX_LEN {
            return Err(io::ErrorKind::UnexpectedEof.into());
        }

        let mut frame = vec![0; len as usize];
        self.inner.read_exact(&mut frame).await?;
        self.remaining -= PREFIX_LEN + len;

        Ok(Some(frame))
    }
}

/// Directory of one stream. The id is percent-encoded so any id maps to a
/// single, safe path component.
pub(crate) fn stream_dir(root: &Path, persistence_id: &PersistenceId) -> PathBuf {
    let encoded: String =
        url::form_urlencoded::byte_serialize(persistence_id.as_str().as_bytes()).collect();

    root.join(format!("pid-{encoded}"))
}

async fn load_stream(
    streams: &mut FxHashMap<PersistenceId, StreamState>,
    dir: &Path,
    persistence_id: &PersistenceId,
) -> Result<StreamState, StoreError> {
    if let Some(state) = streams.get(persistence_id) {
        return Ok(*state);
    }

    let state = scan(dir).await?;
    streams.insert(persistence_id.clone(), state);

    Ok(state)
}

async fn scan(dir: &Path) -> Result<StreamState, StoreError> {
    let meta = read_meta(dir).await?;
    let path = dir.join(EVENTS_FILE);

    let file = match fs::File::open(&path).await {
        Ok(file) => file,
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            return Ok(StreamState {
                highest: meta.highest,
                len: 0,
            });
        }
        Err(e) => return Err(e.into()),
    };
    let file_len = file.metadata().await?.len();

    let mut reader = FrameReader::new(file, file_len);
    let mut len = 0;
    let mut last = 0;
    loop {
        match reader.next_frame().await {
            Ok(Some(frame)) => {
                last = decode_record(&frame)?.sequence_nr;
                len += PREFIX_LEN + frame.len() as u64;
            }
            Ok(None) => break,
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => break,
            Err(e) => return Err(e.into()),
        }
    }

    if len < file_len {
        warn!(
            "{} drops {} bytes of an incomplete write",
            path.display(),
            file_len - len
        );
        truncate(&path, len).await?;
    }

    Ok(StreamState {
        highest: meta.highest.max(last),
        len,
    })
}

async fn next_record(
    reader: Option<FrameReader>,
) -> Result<Option<(FsRecord, Option<FrameReader>)>, StoreError> {
    let Some(mut reader) = reader else {
        return Ok(None);
    };

    match reader.next_frame().await {
        Ok(Some(frame)) => Ok(Some((decode_record(&frame)?, Some(reader)))),
        Ok(None) => Ok(None),
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => {
            Err(StoreError::Corrupt("truncated record".into()))
        }
        Err(e) => Err(e.into()),
    }
}

async fn write_at(path: &Path, offset: u64, buf: &[u8]) -> Result<(), StoreError> {
    let mut file = fs::OpenOptions::new()
        .create(true)
        .truncate(false)
        .write(true)
        .open(path)
        .await?;

    // The whole batch goes out in one write, never split between appends
    file.set_len(offset).await?;
    file.seek(SeekFrom::Start(offset)).await?;
    file.write_all(buf).await?;
    file.sync_data().await?;

    Ok(())
}

async fn truncate(path: &Path, len: u64) -> Result<(), StoreError> {
    let file = fs::OpenOptions::new().write(true).open(path).await?;
    file.set_len(len).await?;
    file.sync_data().await?;

    Ok(())
}

fn encode_frame<T: Serialize>(value: &T, buf: &mut Vec<u8>) -> Result<(), StoreError> {
    let bytes = postcard::to_stdvec(value)?;
    let len = u32::try_from(bytes.len())
        .map_err(|_| StoreError::Corrupt(format!("record of {} bytes", bytes.len())))?;

    buf.extend_from_slice(&len.to_le_bytes());
    buf.extend_from_slice(&bytes);

    Ok(())
}

fn decode_record(frame: &[u8]) -> Result<FsRecord, StoreError> {
    postcard::from_bytes(frame).map_err(|e| StoreError::Corrupt(e.to_string()))
}

fn decode_frames(mut data: &[u8]) -> Result<Vec<FsRecord>, StoreError> {
    let mut records = Vec::new();

    while !data.is_empty() {
        let Some((len, rest)) = data.split_first_chunk::<4>() else {
            return Err(StoreError::Corrupt("truncated length prefix".into()));
        };
        let len = u32::from_le_bytes(*len) as usize;

        if rest.len() < len {
            return Err(StoreError::Corrupt(format!(
                "truncated record: expected {len} bytes, found {}",
                rest.len()
            )));
        }

        let (frame, rest) = rest.split_at(len);
        records.push(decode_record(frame)?);
        data = rest;
    }

    Ok(records)
}

async fn read_meta(dir: &Path) -> Result<FsMeta, StoreError> {
    match fs::read(dir.join(META_FILE)).await {
        Ok(data) => postcard::from_bytes(&data).map_err(|e| StoreError::Corrupt(e.to_string())),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(FsMeta::default()),
        Err(e) => Err(e.into()),
    }
}

async fn write_meta(dir: &Path, meta: &FsMeta) -> Result<(), StoreError> {
    let data = postcard::to_stdvec(meta)?;
    let tmp = dir.join(format!("{META_FILE}.tmp"));

    fs::write(&tmp, data).await?;
    fs::rename(&tmp, dir.join(META_FILE)).await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use bytes::Bytes;
    use tempfile::TempDir;

    use super::*;

    fn write(payload: &'static [u8]) -> EventWrite {
        EventWrite {
            payload: Bytes::from_static(payload),
            tags: BTreeSet::from(["tag".to_string()]),
        }
    }

    #[tokio::test]
    async fn test_round_trip_across_instances() {
        let tmp = TempDir::new().unwrap();
        let pid = PersistenceId::of("Cart", "a/b|c").unwrap();

        {
            let journal = LocalFsJournal::new(tmp.path());
            journal
                .append(pid.clone(), 0, vec![write(b"1"), write(b"2")])
                .await
                .unwrap();
            journal
                .append(pid.clone(), 2, vec![write(b"3")])
                .await
                .unwrap();
        }

        let journal = LocalFsJournal::new(tmp.path());
        let records: Vec<_> = journal
            .read_from(pid.clone(), 1)
            .try_collect()
            .await
            .unwrap();

        assert_eq!(
            records.iter().map(|r| r.sequence_nr).collect::<Vec<_>>(),
            vec![2, 3]
        );
        assert_eq!(records[1].payload, Bytes::from_static(b"3"));
        assert!(records[0].tags.contains("tag"));
        assert_eq!(journal.highest_sequence_nr(pid).await.unwrap(), 3);
    }

    #[tokio::test]
    async fn test_conflict_and_delete() {
        let tmp = TempDir::new().unwrap();
        let journal = LocalFsJournal::new(tmp.path());
        let pid = PersistenceId::new("x").unwrap();

        journal
            .append(pid.clone(), 0, vec![write(b"1"), write(b"2")])
            .await
            .unwrap();
        assert!(matches!(
            journal.append(pid.clone(), 1, vec![write(b"x")]).await,
            Err(StoreError::SequenceConflict { actual: 2, .. })
        ));

        journal.delete_up_to(pid.clone(), 2).await.unwrap();
        let records: Vec<_> = journal
            .read_from(pid.clone(), 0)
            .try_collect()
            .await
            .unwrap();
        assert!(records.is_empty());

        assert_eq!(journal.highest_sequence_nr(pid.clone()).await.unwrap(), 2);
        assert_eq!(journal.append(pid, 2, vec![write(b"3")]).await.unwrap(), 3);
    }

    #[tokio::test]
    async fn test_torn_tail_is_cut_on_open() {
        let tmp = TempDir::new().unwrap();
        let pid = PersistenceId::new("torn").unwrap();

        let journal = LocalFsJournal::new(tmp.path());
        journal
            .append(pid.clone(), 0, vec![write(b"1"), write(b"2")])
            .await
            .unwrap();
        let events = stream_dir(journal.root(), &pid).join(EVENTS_FILE);
        let intact = std::fs::metadata(&events).unwrap().len();
        drop(journal);

        // Length prefix of a 9 byte record followed by 2 of its bytes
        let mut file = std::fs::OpenOptions::new()
            .append(true)
            .open(&events)
            .unwrap();
        file.write_all(&[9, 0, 0, 0, 1, 2]).unwrap();
        drop(file);

        let journal = LocalFsJournal::new(tmp.path());
        let records: Vec<_> = journal
            .read_from(pid.clone(), 0)
            .try_collect()
            .await
            .unwrap();
        assert_eq!(
            records.iter().map(|r| r.sequence_nr).collect::<Vec<_>>(),
            vec![1, 2]
        );
        assert_eq!(std::fs::metadata(&events).unwrap().len(), intact);

        assert_eq!(
            journal
                .append(pid.clone(), 2, vec![write(b"3")])
                .await
                .unwrap(),
            3
        );
        let records: Vec<_> = journal.read_from(pid, 0).try_collect().await.unwrap();
        assert_eq!(
            records.iter().map(|r| r.sequence_nr).collect::<Vec<_>>(),
            vec![1, 2, 3]
        );
    }

    #[tokio::test]
    async fn test_highest_comes_from_records_with_meta_as_floor() {
        let tmp = TempDir::new().unwrap();
        let pid = PersistenceId::new("meta").unwrap();

        let journal = LocalFsJournal::new(tmp.path());
        journal
            .append(pid.clone(), 0, vec![write(b"1")])
            .await
            .unwrap();
        journal.delete_up_to(pid.clone(), 1).await.unwrap();
        journal
            .append(pid.clone(), 1, vec![write(b"2"), write(b"3")])
            .await
            .unwrap();
        let dir = stream_dir(journal.root(), &pid);
        drop(journal);

        // Appends leave the floor behind, the records still win
        assert_eq!(read_meta(&dir).await.unwrap().highest, 1);
        let journal = LocalFsJournal::new(tmp.path());
        assert_eq!(journal.highest_sequence_nr(pid.clone()).await.unwrap(), 3);

        std::fs::remove_file(dir.join(META_FILE)).unwrap();
        let journal = LocalFsJournal::new(tmp.path());
        assert_eq!(journal.highest_sequence_nr(pid).await.unwrap(), 3);
    }

    #[tokio::test]
    async fn test_read_stops_at_records_present_when_opened() {
        let tmp = TempDir::new().unwrap();
        let journal = LocalFsJournal::new(tmp.path());
        let pid = PersistenceId::new("live").unwrap();
        journal
            .append(pid.clone(), 0, vec![write(b"1"), write(b"2")])
            .await
            .unwrap();

        let mut records = journal.read_from(pid.clone(), 0);
        assert_eq!(records.try_next().await.unwrap().unwrap().sequence_nr, 1);

        journal
            .append(pid.clone(), 2, vec![write(b"3")])
            .await
            .unwrap();
        assert_eq!(records.try_next().await.unwrap().unwrap().sequence_nr, 2);
        assert!(records.try_next().await.unwrap().is_none());
    }

    #[test]
    fn test_stream_dir_is_single_component() {
        let pid = PersistenceId::new("../escape|me").unwrap();
        let dir = stream_dir(Path::new("/root"), &pid);

        assert_eq!(dir.parent(), Some(Path::new("/root")));
        assert!(dir.file_name().unwrap().to_str().unwrap().starts_with("pid-"));
    }

    #[test]
    fn test_truncated_frame_is_corrupt() {
        let mut buf = Vec::new();
        encode_frame(
            &FsRecord {
                sequence_nr: 1,
                payload: vec![1, 2, 3],
                tags: BTreeSet::new(),
            },
            &mut buf,
        )
        .unwrap();
        buf.pop();

        assert!(matches!(decode_frames(&buf), Err(StoreError::Corrupt(_))));
    }
}
