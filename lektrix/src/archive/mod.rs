//! Point-in-time backups of the store.
//!
//! The archiver has two independent jobs:
//!
//! - **Local snapshot**: copy the store to
//!   `<backup_dir>/<label>_<YYYYMMDD_HHMMSS>.db` (UTC). A missing store is
//!   logged and skipped.
//! - **Remote push**: hand the whole backup directory to a [`RemoteSync`].
//!   Best-effort: failures are logged and never affect the snapshot.
//!
//! As a [`Cycle`] the archiver only snapshots; pushes are explicit calls.

mod remote;

pub use remote::{Rclone, RemoteSync, SyncError};

use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use lektrix_store::{Clock, Store, StoreError, Timestamp};
use thiserror::Error;
use tracing::{info, warn};

use crate::schedule::Cycle;

/// Startup failures of the archiver.
#[derive(Debug, Error)]
pub enum ArchiveError {
    #[error("cannot create backup directory {}: {source}", path.display())]
    BackupDir { path: PathBuf, source: io::Error },
}

/// Result of a local snapshot.
#[derive(Debug, Clone, PartialEq)]
pub enum SnapshotOutcome {
    Created { path: PathBuf, rows: Option<u64> },
    /// No store file exists yet.
    NoStore,
    /// A backup with this name was already taken this second; it is kept
    /// as is.
    AlreadyExists { path: PathBuf },
    Failed { reason: String },
}

/// Result of a remote push.
#[derive(Debug, Clone, PartialEq)]
pub enum PushOutcome {
    /// No remote configured.
    Disabled,
    Pushed,
    Failed { reason: String },
}

/// Everything a one-shot archive run did.
#[derive(Debug, Clone, PartialEq)]
pub struct ArchiveReport {
    pub snapshot: SnapshotOutcome,
    pub push: Option<PushOutcome>,
}

/// Snapshots the store into a backup directory.
#[derive(Debug)]
pub struct Archiver {
    store: Store,
    backup_dir: PathBuf,
    label: String,
    clock: Arc<dyn Clock>,
    remote: Option<Box<dyn RemoteSync>>,
}

impl Archiver {
    /// Create an archiver. Backup names are stamped with the store's clock.
    pub fn new(store: Store, backup_dir: impl Into<PathBuf>, label: impl Into<String>) -> Self {
        let clock = store.clock().clone();
        Self {
            store,
            backup_dir: backup_dir.into(),
            label: label.into(),
            clock,
            remote: None,
        }
    }

    /// Use `remote` for [`Archiver::push`].
    pub fn with_remote(mut self, remote: Box<dyn RemoteSync>) -> Self {
        self.remote = Some(remote);
        self
    }

    pub fn backup_dir(&self) -> &Path {
        &self.backup_dir
    }

    /// Create the backup directory. Failure here is fatal for the process.
    pub fn prepare(&self) -> Result<(), ArchiveError> {
        std::fs::create_dir_all(&self.backup_dir).map_err(|source| ArchiveError::BackupDir {
            path: self.backup_dir.clone(),
            source,
        })
    }

    /// Backup path for a snapshot taken at `timestamp`.
    pub fn backup_path(&self, timestamp: Timestamp) -> PathBuf {
        let stamp = DateTime::<Utc>::from_timestamp(timestamp, 0)
            .map(|t| t.format("%Y%m%d_%H%M%S").to_string())
            .unwrap_or_else(|| timestamp.to_string());
        self.backup_dir.join(format!("{}_{}.db", self.label, stamp))
    }

    /// Copy the store to a new timestamped backup.
    pub fn snapshot(&self) -> SnapshotOutcome {
        let dest = self.backup_path(self.clock.now());

        match self.store.snapshot_to(&dest) {
            Ok(()) => {
                let rows = Store::new(&dest).count().ok();
                info!(
                    component = "archive",
                    path = %dest.display(),
                    rows,
                    "backup written"
                );
                SnapshotOutcome::Created { path: dest, rows }
            }
            Err(StoreError::Missing(path)) => {
                info!(component = "archive", path = %path.display(), "no store found, skipping backup");
                SnapshotOutcome::NoStore
            }
            Err(StoreError::Exists(path)) => {
                warn!(
                    component = "archive",
                    path = %path.display(),
                    "backup for this second already exists, keeping it"
                );
                SnapshotOutcome::AlreadyExists { path }
            }
            Err(err) => {
                warn!(component = "archive", error = %err, "backup failed, retrying next cycle");
                SnapshotOutcome::Failed {
                    reason: err.to_string(),
                }
            }
        }
    }

    /// Push the backup directory to the configured remote, if any.
    pub fn push(&self) -> PushOutcome {
        let Some(remote) = &self.remote else {
            return PushOutcome::Disabled;
        };

        info!(component = "archive", remote = remote.target(), "syncing backups");
        match remote.push(&self.backup_dir) {
            Ok(()) => {
                info!(component = "archive", remote = remote.target(), "sync completed");
                PushOutcome::Pushed
            }
            Err(err) => {
                warn!(component = "archive", remote = remote.target(), error = %err, "sync failed");
                PushOutcome::Failed {
                    reason: err.to_string(),
                }
            }
        }
    }

    /// Snapshot once and optionally push, for externally scheduled runs.
    ///
    /// The push runs even when there was nothing to snapshot, so earlier
    /// backups still reach the remote.
    pub fn run_once(&self, push: bool) -> ArchiveReport {
        let snapshot = self.snapshot();
        let push = push.then(|| self.push());
        ArchiveReport { snapshot, push }
    }
}

impl Cycle for Archiver {
    type Outcome = SnapshotOutcome;

    fn name(&self) -> &'static str {
        "archive"
    }

    fn run_cycle(&mut self) -> SnapshotOutcome {
        self.snapshot()
    }
}
