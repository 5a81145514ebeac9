//! Key-value store persisted to a single JSON file
//!
//! Every mutation runs under an exclusive advisory lock on `<path>.lock`:
//! the document is reloaded from disk, changed, and rewritten atomically
//! (temp file, fsync, rename). Separate processes and separate handles on
//! the same path therefore see each other's leases and watermark writes.
//! Reads take no lock; the rename guarantees they see a whole document.

use std::fs::{File, OpenOptions};
use std::io::{ErrorKind, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use fd_lock::RwLock;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::{Clock, EntryTable, KvStore, SystemClock};
use crate::error::StoreError;

/// File-backed key-value store
pub struct FileStore {
    path: PathBuf,
    lock_path: PathBuf,
    // In-process writers queue here rather than on the file lock
    writer: Mutex<()>,
    clock: Arc<dyn Clock>,
}

impl FileStore {
    /// Open the store at `path`; the file is created on first write
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        Self::open_with_clock(path, Arc::new(SystemClock))
    }

    pub fn open_with_clock(
        path: impl Into<PathBuf>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, StoreError> {
        let path = path.into();
        let mut lock_name = path.clone().into_os_string();
        lock_name.push(".lock");

        let store = Self {
            lock_path: PathBuf::from(lock_name),
            path,
            writer: Mutex::new(()),
            clock,
        };

        let entries = store.load()?.len();
        info!(path = %store.path.display(), entries, "Opened state file");
        Ok(store)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Current on-disk table; a missing file is empty, a corrupt one is
    /// logged and treated as empty
    fn load(&self) -> Result<EntryTable, StoreError> {
        match load_from_disk(&self.path) {
            Ok(table) => Ok(table),
            Err(StoreError::Io(e)) if e.kind() == ErrorKind::NotFound => Ok(EntryTable::default()),
            Err(StoreError::Serialization(e)) => {
                warn!(path = %self.path.display(), error = %e, "State file is corrupt, treating it as empty");
                Ok(EntryTable::default())
            }
            Err(e) => Err(e),
        }
    }

    fn open_lock_file(&self) -> Result<File, StoreError> {
        if let Some(parent) = self.lock_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        Ok(OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&self.lock_path)?)
    }

    /// Reload, apply a mutation and persist it, all under the file lock
    ///
    /// The table lives only for the duration of the call, so a failed save
    /// leaves no trace of the mutation anywhere.
    async fn mutate<T>(
        &self,
        op: impl FnOnce(&mut EntryTable) -> (T, bool),
    ) -> Result<T, StoreError> {
        let _writer = self.writer.lock().await;

        let mut lock = RwLock::new(self.open_lock_file()?);
        let _guard = lock.write()?;

        let mut table = self.load()?;
        let (result, changed) = op(&mut table);

        if changed {
            let purged = table.purge_expired(self.clock.now());
            if purged > 0 {
                debug!(purged, "Purged expired entries");
            }
            save_to_disk(&self.path, &table)?;
        }

        Ok(result)
    }
}

#[async_trait]
impl KvStore for FileStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let now = self.clock.now();
        let table = self.load()?;
        Ok(table.get(key, now).map(str::to_string))
    }

    async fn put(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<(), StoreError> {
        let now = self.clock.now();
        self.mutate(|t| {
            t.put(key, value, ttl, now);
            ((), true)
        })
        .await
    }

    async fn put_if_absent(
        &self,
        key: &str,
        value: &str,
        ttl: Option<Duration>,
    ) -> Result<bool, StoreError> {
        let now = self.clock.now();
        self.mutate(|t| {
            let written = t.compare_and_swap(key, None, value, ttl, now);
            (written, written)
        })
        .await
    }

    async fn compare_and_swap(
        &self,
        key: &str,
        expected: Option<&str>,
        value: &str,
        ttl: Option<Duration>,
    ) -> Result<bool, StoreError> {
        let now = self.clock.now();
        self.mutate(|t| {
            let written = t.compare_and_swap(key, expected, value, ttl, now);
            (written, written)
        })
        .await
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        self.mutate(|t| ((), t.delete(key))).await
    }

    async fn scan_prefix(&self, prefix: &str) -> Result<Vec<(String, String)>, StoreError> {
        let now = self.clock.now();
        let table = self.load()?;
        Ok(table.scan_prefix(prefix, now))
    }
}

fn save_to_disk(path: &Path, table: &EntryTable) -> Result<(), StoreError> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }

    let json =
        serde_json::to_vec_pretty(table).map_err(|e| StoreError::Serialization(e.to_string()))?;

    // Write atomically using temp file
    let temp_path = path.with_extension("tmp");
    let mut file = OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .open(&temp_path)?;
    file.write_all(&json)?;
    file.sync_all()?;

    std::fs::rename(&temp_path, path)?;
    Ok(())
}

fn load_from_disk(path: &Path) -> Result<EntryTable, StoreError> {
    let mut file = File::open(path)?;
    let mut data = Vec::new();
    file.read_to_end(&mut data)?;

    if data.is_empty() {
        return Ok(EntryTable::default());
    }

    serde_json::from_slice(&data).map_err(|e| StoreError::Serialization(e.to_string()))
}
