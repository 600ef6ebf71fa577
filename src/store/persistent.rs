//! Persistent Partition Store
//!
//! One directory per partition under a root `object-store` directory, one
//! file per entry. Writes publish atomically via temp-then-rename; files
//! that fail to deserialize are quarantined instead of failing the caller.

use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use bytes::Bytes;
use chrono::Utc;
use dashmap::DashMap;
use tracing::{debug, warn};

use crate::error::{StoreError, StoreResult};
use crate::ordinal::Ordinal;
use crate::serializer::{BinaryRecordSerializer, PersistedRecord, Serializer};
use crate::store::PartitionableStore;

const STORE_DIR: &str = "object-store";
const QUARANTINE_DIR: &str = ".corrupted";
const DESCRIPTOR_FILE: &str = "partition-descriptor";
const ENTRY_SUFFIX: &str = ".obj";
const TMP_SUFFIX: &str = ".tmp";

/// Encode an arbitrary string into a filesystem-safe file name component
///
/// Every byte outside [A-Za-z0-9_-] becomes %XX, so distinct inputs map
/// to distinct names and nothing can escape the partition directory.
fn encode_component(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for byte in raw.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' => out.push(byte as char),
            _ => out.push_str(&format!("%{byte:02X}")),
        }
    }
    out
}

fn unix_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// Disk-backed base store multiplexing named partitions
///
/// Layout under the working directory:
///
/// ```text
/// <working-dir>/object-store/<encoded-partition>/<encoded-key>.obj
/// <working-dir>/object-store/<encoded-partition>/partition-descriptor
/// <working-dir>/.corrupted/<run-id>/...
/// ```
pub struct PersistentPartitionStore {
    root: PathBuf,
    quarantine: PathBuf,
    serializer: Arc<dyn Serializer>,
    seq: AtomicU64,
    open_partitions: DashMap<String, PathBuf>,
}

impl PersistentPartitionStore {
    /// Create a store rooted at `working_dir` with the default record
    /// codec
    pub fn new(working_dir: impl Into<PathBuf>) -> Self {
        Self::with_serializer(working_dir, Arc::new(BinaryRecordSerializer::new()))
    }

    /// Create a store with an injected record codec
    pub fn with_serializer(working_dir: impl Into<PathBuf>, serializer: Arc<dyn Serializer>) -> Self {
        let working_dir = working_dir.into();
        let run_id = format!("run-{}", Utc::now().format("%Y%m%dT%H%M%S%3fZ"));
        Self {
            root: working_dir.join(STORE_DIR),
            quarantine: working_dir.join(QUARANTINE_DIR).join(run_id),
            serializer,
            seq: AtomicU64::new(0),
            open_partitions: DashMap::new(),
        }
    }

    /// Directory holding this run's quarantined files
    pub fn quarantine_dir(&self) -> &Path {
        &self.quarantine
    }

    fn partition_dir(&self, partition: &str) -> PathBuf {
        self.root.join(encode_component(partition))
    }

    fn entry_path(&self, dir: &Path, key: &str) -> PathBuf {
        dir.join(format!("{}{ENTRY_SUFFIX}", encode_component(key)))
    }

    fn next_ordinal(&self) -> Ordinal {
        Ordinal::new(unix_millis(), self.seq.fetch_add(1, Ordering::Relaxed))
    }

    /// Create the partition directory and its descriptor marker, and
    /// sweep any temp files left behind by an interrupted write
    fn ensure_partition(&self, partition: &str) -> StoreResult<PathBuf> {
        if let Some(dir) = self.open_partitions.get(partition) {
            return Ok(dir.value().clone());
        }

        let dir = self.partition_dir(partition);
        fs::create_dir_all(&dir)?;

        let descriptor = dir.join(DESCRIPTOR_FILE);
        if !descriptor.exists() {
            fs::write(&descriptor, partition.as_bytes())?;
        }

        for entry in fs::read_dir(&dir)? {
            let path = entry?.path();
            if path_has_suffix(&path, TMP_SUFFIX) {
                let _ = fs::remove_file(&path);
            }
        }

        self.open_partitions.insert(partition.to_owned(), dir.clone());
        Ok(dir)
    }

    /// Read and decode one entry file; a file that cannot be decoded is
    /// quarantined and reported as absent
    fn read_record(&self, path: &Path) -> Option<PersistedRecord> {
        let bytes = match fs::read(path) {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return None,
            Err(err) => {
                warn!(path = %path.display(), error = %err, "unreadable entry file");
                self.quarantine_file(path);
                return None;
            }
        };
        match self.serializer.deserialize(&bytes) {
            Ok(record) => Some(record),
            Err(err) => {
                warn!(path = %path.display(), error = %err, "corrupted entry file");
                self.quarantine_file(path);
                None
            }
        }
    }

    /// Best-effort relocation out of the active directory; never fails
    /// the caller
    fn quarantine_file(&self, path: &Path) {
        let Some(name) = path.file_name() else {
            return;
        };
        if fs::create_dir_all(&self.quarantine).is_err() {
            return;
        }
        let target = self.quarantine.join(name);
        match fs::rename(path, &target) {
            Ok(()) => debug!(path = %path.display(), "quarantined entry file"),
            Err(err) => warn!(path = %path.display(), error = %err, "quarantine move failed"),
        }
    }

    /// Decode every live record in the partition, quarantining corrupt
    /// files along the way
    fn scan_records(&self, partition: &str) -> StoreResult<Vec<(PathBuf, PersistedRecord)>> {
        let dir = self.partition_dir(partition);
        let entries = match fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(err.into()),
        };

        let mut records = Vec::new();
        for entry in entries {
            let path = entry?.path();
            if !path_has_suffix(&path, ENTRY_SUFFIX) {
                continue;
            }
            if let Some(record) = self.read_record(&path) {
                records.push((path, record));
            }
        }
        Ok(records)
    }
}

fn path_has_suffix(path: &Path, suffix: &str) -> bool {
    path.file_name()
        .and_then(|name| name.to_str())
        .map(|name| name.ends_with(suffix))
        .unwrap_or(false)
}

impl PartitionableStore for PersistentPartitionStore {
    fn open_partition(&self, partition: &str) -> StoreResult<()> {
        self.ensure_partition(partition)?;
        Ok(())
    }

    fn close_partition(&self, partition: &str) -> StoreResult<()> {
        self.open_partitions.remove(partition);
        Ok(())
    }

    fn store_in(&self, partition: &str, key: &str, value: Bytes) -> StoreResult<()> {
        let dir = self.ensure_partition(partition)?;
        let path = self.entry_path(&dir, key);
        // A corrupt occupant is quarantined by the read and frees the slot
        if path.exists() && self.read_record(&path).is_some() {
            return Err(StoreError::AlreadyExists(key.to_owned()));
        }

        let record = PersistedRecord {
            key: key.to_owned(),
            value,
            ordinal: self.next_ordinal(),
        };
        let bytes = self.serializer.serialize(&record)?;

        // Publish atomically: a reader sees the whole file or no file
        let tmp = dir.join(format!("{}{ENTRY_SUFFIX}{TMP_SUFFIX}", encode_component(key)));
        fs::write(&tmp, &bytes)?;
        fs::rename(&tmp, &path)?;
        Ok(())
    }

    fn retrieve_from(&self, partition: &str, key: &str) -> StoreResult<Bytes> {
        let path = self.entry_path(&self.partition_dir(partition), key);
        self.read_record(&path)
            .map(|record| record.value)
            .ok_or_else(|| StoreError::DoesNotExist(key.to_owned()))
    }

    fn remove_from(&self, partition: &str, key: &str) -> StoreResult<Bytes> {
        let path = self.entry_path(&self.partition_dir(partition), key);
        let record = self
            .read_record(&path)
            .ok_or_else(|| StoreError::DoesNotExist(key.to_owned()))?;
        fs::remove_file(&path)?;
        Ok(record.value)
    }

    fn contains_in(&self, partition: &str, key: &str) -> bool {
        let path = self.entry_path(&self.partition_dir(partition), key);
        self.read_record(&path).is_some()
    }

    fn clear_partition(&self, partition: &str) -> StoreResult<()> {
        let dir = self.partition_dir(partition);
        let entries = match fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(()),
            Err(err) => return Err(err.into()),
        };
        // The descriptor marker survives so the partition stays usable
        for entry in entries {
            let path = entry?.path();
            if path_has_suffix(&path, ENTRY_SUFFIX) || path_has_suffix(&path, TMP_SUFFIX) {
                fs::remove_file(&path)?;
            }
        }
        Ok(())
    }

    fn keys_in(&self, partition: &str) -> StoreResult<Vec<String>> {
        Ok(self
            .scan_records(partition)?
            .into_iter()
            .map(|(_, record)| record.key)
            .collect())
    }

    fn retrieve_all_in(&self, partition: &str) -> StoreResult<HashMap<String, Bytes>> {
        Ok(self
            .scan_records(partition)?
            .into_iter()
            .map(|(_, record)| (record.key, record.value))
            .collect())
    }

    fn expire(
        &self,
        partition: &str,
        entry_ttl: Option<Duration>,
        max_entries: Option<usize>,
    ) -> StoreResult<usize> {
        let mut records = self.scan_records(partition)?;
        let mut removed = 0;

        if let Some(ttl) = entry_ttl {
            let ttl_ms = ttl.as_millis() as u64;
            let now = unix_millis();
            records.retain(|(path, record)| {
                if now.saturating_sub(record.ordinal.at) >= ttl_ms {
                    if fs::remove_file(path).is_ok() {
                        removed += 1;
                    }
                    false
                } else {
                    true
                }
            });
        }

        if let Some(max) = max_entries {
            if records.len() > max {
                // Composite order: wall-clock stamp, then insert sequence
                records.sort_unstable_by_key(|(_, record)| record.ordinal);
                let surplus = records.len() - max;
                for (path, _) in records.iter().take(surplus) {
                    if fs::remove_file(path).is_ok() {
                        removed += 1;
                    }
                }
            }
        }

        if removed > 0 {
            debug!(partition, removed, "expired persisted entries");
        }
        Ok(removed)
    }

    fn dispose_partition(&self, partition: &str) -> StoreResult<()> {
        self.open_partitions.remove(partition);
        let dir = self.partition_dir(partition);
        match fs::remove_dir_all(&dir) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }

    fn is_persistent(&self) -> bool {
        true
    }
}
