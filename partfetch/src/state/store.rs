//! Synchronized, durable owner of a [`TransferState`].
//!
//! Workers of the scheduler and the hook pipeline share one `StateStore`
//! through an `Arc`. Every read and mutation goes through the internal mutex,
//! so `completed_count` and the per-chunk flags are never observed torn.
//! `save` holds the same lock while writing, which also keeps two concurrent
//! saves from interleaving on the temporary file.

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, warn};

use super::model::{ChunkDescriptor, TransferState};
use super::naming;
use super::StateError;

/// Thread-safe handle to a transfer's persisted progress.
#[derive(Debug)]
pub struct StateStore {
    /// Directory holding the state file and chunk artifacts.
    dir: PathBuf,
    /// Full path of the state file.
    path: PathBuf,
    inner: Mutex<TransferState>,
}

impl StateStore {
    /// Create a fresh state for a transfer. Nothing is written until [`save`](Self::save).
    pub fn create(
        dir: impl Into<PathBuf>,
        url: &str,
        total_size: u64,
        chunk_size: u64,
        prefix: &str,
    ) -> Result<Self, StateError> {
        let state = TransferState::new(url, total_size, chunk_size, prefix)?;
        Ok(Self::from_state(dir.into(), state))
    }

    /// Load the persisted state for `prefix` from `dir`.
    ///
    /// Returns `Ok(None)` when no state file exists. A file that cannot be
    /// parsed or that violates the plan invariants is an error.
    pub fn load(dir: impl Into<PathBuf>, prefix: &str) -> Result<Option<Self>, StateError> {
        let dir = dir.into();
        let path = naming::state_file_path(&dir, prefix);

        let data = match fs::read(&path) {
            Ok(data) => data,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(source) => return Err(StateError::Read { path, source }),
        };

        let mut state: TransferState =
            serde_json::from_slice(&data).map_err(|source| StateError::Parse {
                path: path.clone(),
                source,
            })?;

        state
            .check_invariants()
            .map_err(|reason| StateError::Corrupt {
                path: path.clone(),
                reason,
            })?;

        if state.repair_completed_count() {
            warn!(
                path = %path.display(),
                completed = state.completed_count,
                "State file had a stale completed count, recounted"
            );
        }

        debug!(
            path = %path.display(),
            completed = state.completed_count,
            chunks = state.chunks.len(),
            "Loaded transfer state"
        );

        Ok(Some(Self::from_state(dir, state)))
    }

    fn from_state(dir: PathBuf, state: TransferState) -> Self {
        let path = naming::state_file_path(&dir, &state.filename_prefix);
        Self {
            dir,
            path,
            inner: Mutex::new(state),
        }
    }

    /// Fail with [`StateError::Mismatch`] unless this state describes `url`
    /// with `total_size` bytes.
    pub fn ensure_matches(&self, url: &str, total_size: u64) -> Result<(), StateError> {
        let state = self.inner.lock();
        if state.url != url || state.total_size != total_size {
            return Err(StateError::Mismatch {
                prefix: state.filename_prefix.clone(),
                stored_url: state.url.clone(),
                stored_size: state.total_size,
                requested_url: url.to_string(),
                requested_size: total_size,
            });
        }
        Ok(())
    }

    /// Mark a chunk's transfer complete.
    ///
    /// Idempotent: returns `true` only for the call that flipped the flag;
    /// later calls leave `completed_count` untouched.
    pub fn mark_transfer_complete(&self, index: usize, downloaded: u64) -> bool {
        let mut state = self.inner.lock();
        let Some(chunk) = state.chunks.get_mut(index) else {
            return false;
        };
        if chunk.completed {
            return false;
        }
        chunk.completed = true;
        chunk.downloaded = chunk.downloaded.max(downloaded);
        state.completed_count += 1;
        true
    }

    /// Record the outcome of a chunk's hook.
    ///
    /// A success is sticky; a later failure never clears it.
    pub fn mark_hook_complete(&self, index: usize, success: bool) {
        let mut state = self.inner.lock();
        if let Some(chunk) = state.chunks.get_mut(index) {
            chunk.post_part_completed |= success;
        }
    }

    /// Record how many bytes of a chunk are on disk. Never decreases.
    pub fn record_downloaded(&self, index: usize, downloaded: u64) {
        let mut state = self.inner.lock();
        if let Some(chunk) = state.chunks.get_mut(index) {
            chunk.downloaded = chunk.downloaded.max(downloaded.min(chunk.len()));
        }
    }

    /// Persist the full state atomically.
    ///
    /// Writes `<state file>.tmp`, syncs it, then renames it over the state
    /// file so a crash mid-write leaves the previous valid state in place.
    pub fn save(&self) -> Result<(), StateError> {
        let state = self.inner.lock();

        let data = serde_json::to_vec_pretty(&*state).map_err(StateError::Serialize)?;

        let tmp_path = self.tmp_path();
        let write = |path: &Path| -> io::Result<()> {
            let mut file = fs::File::create(path)?;
            file.write_all(&data)?;
            file.sync_all()
        };
        write(&tmp_path).map_err(|source| StateError::Write {
            path: tmp_path.clone(),
            source,
        })?;

        fs::rename(&tmp_path, &self.path).map_err(|source| StateError::Write {
            path: self.path.clone(),
            source,
        })?;

        Ok(())
    }

    /// [`save`](Self::save) on the blocking thread pool, for async callers.
    pub async fn save_async(self: &Arc<Self>) -> Result<(), StateError> {
        let store = Arc::clone(self);
        tokio::task::spawn_blocking(move || store.save())
            .await
            .map_err(|e| StateError::Task(e.to_string()))?
    }

    /// Remove the persisted state file. A missing file is not an error.
    pub fn delete(&self) -> Result<(), StateError> {
        let _state = self.inner.lock();
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(source) => Err(StateError::Write {
                path: self.path.clone(),
                source,
            }),
        }
    }

    fn tmp_path(&self) -> PathBuf {
        let mut name = self.path.as_os_str().to_owned();
        name.push(".tmp");
        PathBuf::from(name)
    }

    /// A consistent copy of the whole state.
    pub fn snapshot(&self) -> TransferState {
        self.inner.lock().clone()
    }

    /// A copy of one chunk's descriptor.
    pub fn chunk(&self, index: usize) -> Option<ChunkDescriptor> {
        self.inner.lock().chunks.get(index).cloned()
    }

    /// Number of chunks in the plan.
    pub fn chunk_count(&self) -> usize {
        self.inner.lock().chunks.len()
    }

    /// Number of chunks whose transfer is complete.
    pub fn completed_count(&self) -> usize {
        self.inner.lock().completed_count
    }

    /// Whether every chunk's transfer is complete.
    pub fn is_transfer_complete(&self) -> bool {
        self.inner.lock().is_transfer_complete()
    }

    /// Indices of chunks whose hook still has to run.
    pub fn pending_hooks(&self) -> Vec<usize> {
        self.inner.lock().pending_hooks()
    }

    /// Resource URL.
    pub fn url(&self) -> String {
        self.inner.lock().url.clone()
    }

    /// Total resource size in bytes.
    pub fn total_size(&self) -> u64 {
        self.inner.lock().total_size
    }

    /// Artifact name prefix.
    pub fn prefix(&self) -> String {
        self.inner.lock().filename_prefix.clone()
    }

    /// Directory holding the state file and artifacts.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path of the persisted state file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Path of the partial artifact for a chunk.
    pub fn partial_path(&self, index: usize) -> PathBuf {
        let prefix = self.prefix();
        self.dir.join(naming::partial_name(&prefix, index))
    }

    /// Path of the complete artifact for a chunk.
    pub fn complete_path(&self, index: usize) -> PathBuf {
        let prefix = self.prefix();
        self.dir.join(naming::complete_name(&prefix, index))
    }
}
