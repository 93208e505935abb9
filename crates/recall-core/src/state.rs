//! Persisted record of what has been indexed.
//!
//! The state is a cache of indexing decisions, not a source of truth: a
//! missing or unreadable file loads as an empty state and forces a full
//! reindex.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::{self, File, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;
use sysinfo::{Pid, ProcessesToUpdate, System};
use tracing::{debug, warn};

use crate::error::{RecallError, Result};
use crate::types::ChunkId;

const UNWRITTEN_LOCK_GRACE: Duration = Duration::from_secs(10);

/// What the indexer last wrote for one source file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexRecord {
    pub fingerprint: String,
    pub chunk_ids: Vec<ChunkId>,
}

impl IndexRecord {
    /// Marker for a file whose old chunks are gone but whose new chunks did
    /// not land. Matches no fingerprint, references no chunk.
    pub fn pending() -> Self {
        Self::default()
    }

    pub fn is_pending(&self) -> bool {
        self.fingerprint.is_empty()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexState {
    #[serde(default)]
    pub files: BTreeMap<String, IndexRecord>,
    #[serde(default)]
    pub last_full_index: Option<DateTime<Utc>>,
}

impl IndexState {
    pub fn total_chunks(&self) -> usize {
        self.files.values().map(|r| r.chunk_ids.len()).sum()
    }

    pub fn chunk_count(&self, source_path: &str) -> usize {
        self.files.get(source_path).map_or(0, |r| r.chunk_ids.len())
    }
}

pub struct IndexStateStore {
    path: PathBuf,
}

impl IndexStateStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn load(&self) -> IndexState {
        match self.try_load() {
            Ok(state) => state,
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "ignoring index state, full reindex follows");
                IndexState::default()
            }
        }
    }

    fn try_load(&self) -> Result<IndexState> {
        let raw = match fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!(path = %self.path.display(), "no index state yet");
                return Ok(IndexState::default());
            }
            Err(e) => return Err(e.into()),
        };
        serde_json::from_str(&raw).map_err(|e| RecallError::IndexStateCorrupt(e.to_string()))
    }

    /// Write atomically: serialize to a sibling temp file, then rename over.
    pub fn save(&self, state: &IndexState) -> Result<()> {
        let dir = self.parent_dir();
        fs::create_dir_all(&dir)?;
        let mut tmp = tempfile::NamedTempFile::new_in(&dir)?;
        serde_json::to_writer_pretty(&mut tmp, state)?;
        tmp.write_all(b"\n")?;
        tmp.as_file().sync_all()?;
        tmp.persist(&self.path).map_err(|e| RecallError::Io(e.error))?;
        Ok(())
    }

    /// Take the single-writer lock for a reindex run.
    ///
    /// The lock file holds the owner's pid. A lock left behind by a process
    /// that no longer runs (killed, crashed) is stale and taken over.
    pub fn lock(&self) -> Result<IndexLock> {
        fs::create_dir_all(self.parent_dir())?;
        let lock_path = self.lock_path();
        match try_create_lock(&lock_path)? {
            Some(lock) => Ok(lock),
            None if lock_is_stale(&lock_path) => {
                warn!(path = %lock_path.display(), "removing stale index lock");
                match fs::remove_file(&lock_path) {
                    Ok(()) => {}
                    Err(e) if e.kind() == ErrorKind::NotFound => {}
                    Err(e) => return Err(e.into()),
                }
                try_create_lock(&lock_path)?.ok_or_else(|| RecallError::IndexLocked(lock_path.display().to_string()))
            }
            None => Err(RecallError::IndexLocked(lock_path.display().to_string())),
        }
    }

    pub fn lock_path(&self) -> PathBuf {
        let mut name = self.path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
        name.push(".lock");
        self.path.with_file_name(name)
    }

    fn parent_dir(&self) -> PathBuf {
        match self.path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
            _ => PathBuf::from("."),
        }
    }
}

/// Held for the duration of a reindex; removes the lock file on drop.
#[derive(Debug)]
pub struct IndexLock {
    path: PathBuf,
    _file: File,
}

impl Drop for IndexLock {
    fn drop(&mut self) {
        if let Err(e) = fs::remove_file(&self.path) {
            warn!(path = %self.path.display(), error = %e, "failed to remove index lock");
        }
    }
}

fn try_create_lock(path: &Path) -> Result<Option<IndexLock>> {
    match OpenOptions::new().write(true).create_new(true).open(path) {
        Ok(mut file) => {
            writeln!(file, "{}", std::process::id())?;
            file.sync_all()?;
            Ok(Some(IndexLock { path: path.to_path_buf(), _file: file }))
        }
        Err(e) if e.kind() == ErrorKind::AlreadyExists => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// A lock is stale when it names no running process. A lock file without a
/// pid is only stale once it is older than `UNWRITTEN_LOCK_GRACE`, since its
/// owner may be between creating and writing it.
fn lock_is_stale(path: &Path) -> bool {
    let raw = match fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(e) => return e.kind() == ErrorKind::NotFound,
    };
    match raw.trim().parse::<u32>() {
        Ok(pid) => !process_alive(pid),
        Err(_) => fs::metadata(path)
            .and_then(|m| m.modified())
            .ok()
            .and_then(|at| at.elapsed().ok())
            .is_some_and(|age| age > UNWRITTEN_LOCK_GRACE),
    }
}

fn process_alive(pid: u32) -> bool {
    let pid = Pid::from_u32(pid);
    let mut sys = System::new();
    sys.refresh_processes(ProcessesToUpdate::Some(&[pid]), true);
    sys.process(pid).is_some()
}
