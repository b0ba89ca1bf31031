//! Write-through durable store.
//!
//! The store keeps the current [`StoreSnapshot`] in memory and rewrites the
//! document atomically on every mutation before the mutation becomes visible.
//! Reads are served from memory. Writes are serialized by a mutex, which is
//! held across the disk write so two writers can never interleave.

use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};

use thiserror::Error;
use tracing::{debug, info};

use super::snapshot::{SnapshotError, StoreSnapshot, save_snapshot_atomic, try_load_snapshot};

/// File name of the store document inside the state directory.
pub const STORE_FILE_NAME: &str = "store.json";

/// Errors from the durable store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The existing document could not be read at startup.
    #[error("failed to open store at {path}: {source}")]
    Open {
        path: PathBuf,
        #[source]
        source: SnapshotError,
    },

    /// A mutation could not be persisted. The in-memory state is unchanged.
    #[error("failed to persist store: {0}")]
    Write(#[from] SnapshotError),
}

/// The durable store shared by the registry and the cursor store.
#[derive(Debug)]
pub struct Store {
    path: PathBuf,
    state: Mutex<StoreSnapshot>,
}

impl Store {
    /// Opens (or creates) the store document at `<state_dir>/store.json`.
    pub fn open(state_dir: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = state_dir.as_ref().join(STORE_FILE_NAME);
        let snapshot = match try_load_snapshot(&path) {
            Ok(Some(snapshot)) => {
                info!(
                    path = %path.display(),
                    feeds = snapshot.feeds.len(),
                    webhooks = snapshot.webhooks.len(),
                    cursors = snapshot.cursors.len(),
                    "Loaded store"
                );
                snapshot
            }
            Ok(None) => {
                info!(path = %path.display(), "No store found, creating empty store");
                let snapshot = StoreSnapshot::new();
                save_snapshot_atomic(&path, &snapshot).map_err(|source| StoreError::Open {
                    path: path.clone(),
                    source,
                })?;
                snapshot
            }
            Err(source) => return Err(StoreError::Open { path, source }),
        };

        Ok(Store {
            path,
            state: Mutex::new(snapshot),
        })
    }

    /// Returns the path of the store document.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Runs `f` against the current state.
    pub fn read<T>(&self, f: impl FnOnce(&StoreSnapshot) -> T) -> T {
        f(&self.lock())
    }

    /// Applies `f` to a copy of the state and persists it.
    ///
    /// If `f` fails, or the write fails, nothing changes: neither the document
    /// on disk nor the in-memory state.
    pub fn update<T, E>(&self, f: impl FnOnce(&mut StoreSnapshot) -> Result<T, E>) -> Result<T, E>
    where
        E: From<StoreError>,
    {
        let mut guard = self.lock();
        let mut next = guard.clone();
        let value = f(&mut next)?;

        next.written_at = chrono::Utc::now();
        save_snapshot_atomic(&self.path, &next).map_err(StoreError::from)?;
        *guard = next;

        debug!(path = %self.path.display(), "Persisted store");
        Ok(value)
    }

    fn lock(&self) -> MutexGuard<'_, StoreSnapshot> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
