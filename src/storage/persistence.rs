//! File-backed chunk store: MessagePack snapshot plus an append-only WAL.

use super::engine::{ChunkStore, ListPage, MAX_BATCH_KEYS, select_page};
use crate::core::{Chunk, ReproError, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::{self, File, OpenOptions};
use std::io::{BufReader, ErrorKind, Read, Write};
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;
use tracing::{debug, warn};

const SNAPSHOT_FILE: &str = "snapshot.bin";
const WAL_FILE: &str = "wal.log";
const SNAPSHOT_FORMAT_VERSION: u32 = 1;

// ============================================================================
// WAL Entry Types
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum WalEntry {
    PutBatch(BTreeMap<String, Chunk>),
    DeleteAll,
}

// ============================================================================
// Store Snapshot
// ============================================================================

#[derive(Debug, Serialize, Deserialize)]
pub struct StoreSnapshot {
    pub version: u32,
    pub created_at_ms: i64,
    pub entries: BTreeMap<String, Chunk>,
}

/// Outcome of reading a WAL file.
struct WalReplay {
    entries: Vec<WalEntry>,
    torn_tail: bool,
}

struct FileStoreInner {
    entries: BTreeMap<String, Chunk>,
    /// Opened in append mode; every record is written as one frame.
    wal: File,
    entries_since_checkpoint: usize,
    /// Set when a failed append could not be rolled back. Writes are refused
    /// from then on, since the WAL may end in a partial record.
    broken: Option<String>,
    #[cfg(test)]
    fail_write_after: Option<usize>,
}

pub struct FileChunkStore {
    dir: PathBuf,
    inner: Mutex<FileStoreInner>,
    checkpoint_threshold: usize,
    sync_writes: bool,
}

impl FileChunkStore {
    /// Default number of WAL entries between snapshots.
    pub const DEFAULT_CHECKPOINT_THRESHOLD: usize = 64;

    pub fn open<P: AsRef<Path>>(dir: P) -> Result<Self> {
        Self::open_with(dir, Self::DEFAULT_CHECKPOINT_THRESHOLD, false)
    }

    pub fn open_with<P: AsRef<Path>>(
        dir: P,
        checkpoint_threshold: usize,
        sync_writes: bool,
    ) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir).map_err(|e| {
            ReproError::Storage(format!(
                "Failed to create store directory '{}': {}",
                dir.display(),
                e
            ))
        })?;

        let mut entries = read_snapshot(&dir.join(SNAPSHOT_FILE))?;
        let replay = read_wal(&dir.join(WAL_FILE))?;
        let replayed = replay.entries.len();
        for entry in replay.entries {
            apply_entry(&mut entries, entry);
        }

        let wal = open_wal(&dir.join(WAL_FILE))?;
        let store = Self {
            dir,
            inner: Mutex::new(FileStoreInner {
                entries,
                wal,
                entries_since_checkpoint: replayed,
                broken: None,
                #[cfg(test)]
                fail_write_after: None,
            }),
            checkpoint_threshold: checkpoint_threshold.max(1),
            sync_writes,
        };

        if replay.torn_tail {
            warn!(dir = %store.dir.display(), "discarding torn WAL tail");
            let mut inner = store.inner.try_lock().map_err(|e| {
                ReproError::Storage(format!("store lock unavailable during open: {}", e))
            })?;
            store.checkpoint(&mut inner)?;
        }

        debug!(dir = %store.dir.display(), replayed, "opened file chunk store");
        Ok(store)
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Append one length-prefixed record. On failure the WAL is cut back to
    /// its previous length so a later append never lands behind torn bytes.
    fn append(&self, inner: &mut FileStoreInner, entry: &WalEntry) -> Result<()> {
        if let Some(reason) = &inner.broken {
            return Err(ReproError::Storage(format!(
                "Store '{}' is read-only after a failed WAL rollback: {}",
                self.dir.display(),
                reason
            )));
        }
        let serialized = rmp_serde::to_vec(entry).map_err(|e| {
            ReproError::Serialization(format!("Failed to serialize WAL entry: {}", e))
        })?;
        let mut frame = Vec::with_capacity(4 + serialized.len());
        frame.extend_from_slice(&(serialized.len() as u32).to_le_bytes());
        frame.extend_from_slice(&serialized);

        let start = inner
            .wal
            .metadata()
            .map_err(|e| ReproError::Storage(format!("Failed to stat WAL: {}", e)))?
            .len();
        if let Err(e) = write_frame(inner, &frame, self.sync_writes) {
            if let Err(rollback) = inner.wal.set_len(start) {
                warn!(dir = %self.dir.display(), error = %rollback, "WAL rollback failed");
                inner.broken = Some(rollback.to_string());
            }
            return Err(ReproError::Storage(format!("Failed to write WAL: {}", e)));
        }
        inner.entries_since_checkpoint += 1;
        Ok(())
    }

    /// Checkpoint after a durable append. The write already succeeded, so a
    /// failed snapshot is only logged and retried on the next threshold.
    fn checkpoint_after_write(&self, inner: &mut FileStoreInner) {
        if let Err(e) = self.checkpoint(inner) {
            warn!(dir = %self.dir.display(), error = %e, "checkpoint failed, keeping WAL");
        }
    }

    /// Rewrite the snapshot atomically and truncate the WAL.
    fn checkpoint(&self, inner: &mut FileStoreInner) -> Result<()> {
        let snapshot = StoreSnapshot {
            version: SNAPSHOT_FORMAT_VERSION,
            created_at_ms: chrono::Utc::now().timestamp_millis(),
            entries: inner.entries.clone(),
        };
        let mut temp = tempfile::NamedTempFile::new_in(&self.dir)
            .map_err(|e| ReproError::Storage(format!("Failed to create temp snapshot: {}", e)))?;
        rmp_serde::encode::write(&mut temp, &snapshot).map_err(|e| {
            ReproError::Serialization(format!("Failed to serialize snapshot: {}", e))
        })?;
        temp.as_file()
            .sync_all()
            .map_err(|e| ReproError::Storage(format!("Failed to sync snapshot: {}", e)))?;
        temp.persist(self.dir.join(SNAPSHOT_FILE))
            .map_err(|e| ReproError::Storage(format!("Failed to persist snapshot: {}", e)))?;

        inner
            .wal
            .set_len(0)
            .map_err(|e| ReproError::Storage(format!("Failed to truncate WAL: {}", e)))?;
        inner.entries_since_checkpoint = 0;
        debug!(dir = %self.dir.display(), keys = inner.entries.len(), "checkpointed chunk store");
        Ok(())
    }
}

#[async_trait]
impl ChunkStore for FileChunkStore {
    async fn list(&self, prefix: &str, limit: usize, start: Option<&str>) -> Result<ListPage> {
        let inner = self.inner.lock().await;
        Ok(select_page(&inner.entries, prefix, limit, start))
    }

    async fn put_batch(&self, batch: BTreeMap<String, Chunk>) -> Result<()> {
        if batch.len() > MAX_BATCH_KEYS {
            return Err(ReproError::BatchTooLarge(batch.len(), MAX_BATCH_KEYS));
        }
        let mut inner = self.inner.lock().await;
        let entry = WalEntry::PutBatch(batch);
        self.append(&mut inner, &entry)?;
        apply_entry(&mut inner.entries, entry);
        if inner.entries_since_checkpoint >= self.checkpoint_threshold {
            self.checkpoint_after_write(&mut inner);
        }
        Ok(())
    }

    async fn delete_all(&self) -> Result<()> {
        let mut inner = self.inner.lock().await;
        self.append(&mut inner, &WalEntry::DeleteAll)?;
        apply_entry(&mut inner.entries, WalEntry::DeleteAll);
        self.checkpoint_after_write(&mut inner);
        Ok(())
    }
}

fn apply_entry(entries: &mut BTreeMap<String, Chunk>, entry: WalEntry) {
    match entry {
        WalEntry::PutBatch(batch) => entries.extend(batch),
        WalEntry::DeleteAll => entries.clear(),
    }
}

fn open_wal(path: &Path) -> Result<File> {
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|e| ReproError::Storage(format!("Failed to open WAL file: {}", e)))
}

fn write_frame(inner: &mut FileStoreInner, frame: &[u8], sync: bool) -> std::io::Result<()> {
    #[cfg(test)]
    if let Some(limit) = inner.fail_write_after.take() {
        inner.wal.write_all(&frame[..limit.min(frame.len())])?;
        return Err(std::io::Error::other("injected short write"));
    }
    inner.wal.write_all(frame)?;
    if sync {
        inner.wal.sync_data()?;
    }
    Ok(())
}

fn read_snapshot(path: &Path) -> Result<BTreeMap<String, Chunk>> {
    if !path.exists() {
        return Ok(BTreeMap::new());
    }
    let file = File::open(path)
        .map_err(|e| ReproError::Storage(format!("Failed to open snapshot: {}", e)))?;
    let snapshot: StoreSnapshot = rmp_serde::from_read(BufReader::new(file)).map_err(|e| {
        ReproError::Serialization(format!("Failed to deserialize snapshot: {}", e))
    })?;
    if snapshot.version != SNAPSHOT_FORMAT_VERSION {
        return Err(ReproError::Storage(format!(
            "Unsupported snapshot version {}",
            snapshot.version
        )));
    }
    Ok(snapshot.entries)
}

fn read_wal(path: &Path) -> Result<WalReplay> {
    let mut replay = WalReplay {
        entries: Vec::new(),
        torn_tail: false,
    };
    if !path.exists() {
        return Ok(replay);
    }
    let file = File::open(path)
        .map_err(|e| ReproError::Storage(format!("Failed to open WAL for reading: {}", e)))?;
    let mut reader = BufReader::new(file);
    loop {
        let mut len_bytes = [0u8; 4];
        match read_full(&mut reader, &mut len_bytes)? {
            ReadOutcome::Complete => {}
            ReadOutcome::Empty => break,
            ReadOutcome::Partial => {
                replay.torn_tail = true;
                break;
            }
        }
        let len = u32::from_le_bytes(len_bytes) as usize;
        let mut buf = vec![0u8; len];
        if read_full(&mut reader, &mut buf)? != ReadOutcome::Complete {
            replay.torn_tail = true;
            break;
        }
        match rmp_serde::from_slice::<WalEntry>(&buf) {
            Ok(entry) => replay.entries.push(entry),
            Err(_) => {
                replay.torn_tail = true;
                break;
            }
        }
    }
    Ok(replay)
}

#[derive(Debug, PartialEq, Eq)]
enum ReadOutcome {
    Complete,
    Empty,
    Partial,
}

fn read_full<R: Read>(reader: &mut R, buf: &mut [u8]) -> Result<ReadOutcome> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(ReproError::Storage(format!("Failed to read WAL: {}", e))),
        }
    }
    Ok(match filled {
        0 if !buf.is_empty() => ReadOutcome::Empty,
        n if n == buf.len() => ReadOutcome::Complete,
        _ => ReadOutcome::Partial,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{CHUNK_PREFIX, chunk_key, generate_chunk};

    fn batch(ids: std::ops::Range<u16>) -> BTreeMap<String, Chunk> {
        ids.map(|id| (chunk_key(id), generate_chunk())).collect()
    }

    #[tokio::test]
    async fn reopen_replays_wal() {
        let dir = tempfile::tempdir().unwrap();
        {
            let store = FileChunkStore::open(dir.path()).unwrap();
            store.put_batch(batch(0..10)).await.unwrap();
            store.put_batch(batch(10..20)).await.unwrap();
        }
        let store = FileChunkStore::open(dir.path()).unwrap();
        let page = store.list(CHUNK_PREFIX, 100, None).await.unwrap();
        assert_eq!(page.len(), 20);
    }

    #[tokio::test]
    async fn checkpoint_truncates_wal_and_keeps_data() {
        let dir = tempfile::tempdir().unwrap();
        {
            let store = FileChunkStore::open_with(dir.path(), 2, false).unwrap();
            store.put_batch(batch(0..3)).await.unwrap();
            store.put_batch(batch(3..6)).await.unwrap();
            store.put_batch(batch(6..7)).await.unwrap();
        }
        assert!(dir.path().join(SNAPSHOT_FILE).exists());
        let store = FileChunkStore::open(dir.path()).unwrap();
        let page = store.list(CHUNK_PREFIX, 100, None).await.unwrap();
        assert_eq!(page.len(), 7);
    }

    #[tokio::test]
    async fn delete_all_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        {
            let store = FileChunkStore::open(dir.path()).unwrap();
            store.put_batch(batch(0..5)).await.unwrap();
            store.delete_all().await.unwrap();
        }
        let store = FileChunkStore::open(dir.path()).unwrap();
        assert!(store.list(CHUNK_PREFIX, 10, None).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn torn_wal_tail_is_ignored() {
        let dir = tempfile::tempdir().unwrap();
        {
            let store = FileChunkStore::open(dir.path()).unwrap();
            store.put_batch(batch(0..4)).await.unwrap();
        }
        {
            let mut wal = OpenOptions::new()
                .append(true)
                .open(dir.path().join(WAL_FILE))
                .unwrap();
            wal.write_all(&500u32.to_le_bytes()).unwrap();
            wal.write_all(&[1, 2, 3]).unwrap();
        }
        let store = FileChunkStore::open(dir.path()).unwrap();
        store.put_batch(batch(4..6)).await.unwrap();
        drop(store);

        let store = FileChunkStore::open(dir.path()).unwrap();
        let page = store.list(CHUNK_PREFIX, 100, None).await.unwrap();
        assert_eq!(page.len(), 6);
    }

    #[tokio::test]
    async fn failed_append_leaves_no_partial_record() {
        let dir = tempfile::tempdir().unwrap();
        {
            let store = FileChunkStore::open(dir.path()).unwrap();
            store.put_batch(batch(0..4)).await.unwrap();

            store.inner.lock().await.fail_write_after = Some(7);
            assert!(store.put_batch(batch(4..6)).await.is_err());
            assert_eq!(store.list(CHUNK_PREFIX, 100, None).await.unwrap().len(), 4);

            store.put_batch(batch(6..8)).await.unwrap();
        }
        let replay = read_wal(&dir.path().join(WAL_FILE)).unwrap();
        assert!(!replay.torn_tail);
        assert_eq!(replay.entries.len(), 2);

        let store = FileChunkStore::open(dir.path()).unwrap();
        let keys: Vec<_> = store
            .list(CHUNK_PREFIX, 100, None)
            .await
            .unwrap()
            .entries
            .into_iter()
            .map(|(key, _)| key)
            .collect();
        assert_eq!(keys.len(), 6);
        assert!(!keys.contains(&chunk_key(4)));
        assert!(keys.contains(&chunk_key(7)));
    }

    #[tokio::test]
    async fn checkpoint_failure_does_not_fail_a_durable_write() {
        let dir = tempfile::tempdir().unwrap();
        let store_dir = dir.path().join("store");
        let store = FileChunkStore::open_with(&store_dir, 1, false).unwrap();
        fs::remove_dir_all(&store_dir).unwrap();

        store.put_batch(batch(0..3)).await.unwrap();
        assert_eq!(store.list(CHUNK_PREFIX, 10, None).await.unwrap().len(), 3);

        store.delete_all().await.unwrap();
        assert!(store.list(CHUNK_PREFIX, 10, None).await.unwrap().is_empty());
    }
}
