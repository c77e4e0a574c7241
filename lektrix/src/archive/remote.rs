//! Best-effort push of the backup directory to a remote sink.

use std::fmt::Debug;
use std::io;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use thiserror::Error;

/// Errors from a remote push. Always logged and swallowed by the archiver.
#[derive(Debug, Error)]
pub enum SyncError {
    /// The transport tool is not installed.
    #[error("sync tool not found: {0}")]
    ToolMissing(String),

    /// The transport ran but reported failure.
    #[error("sync to {remote} failed: {detail}")]
    Failed { remote: String, detail: String },

    /// Spawning or talking to the transport failed.
    #[error("sync I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Copies a local directory to some remote destination.
pub trait RemoteSync: Send + Debug {
    /// Human-readable destination for logs.
    fn target(&self) -> &str;

    fn push(&self, dir: &Path) -> Result<(), SyncError>;
}

/// Pushes with `rclone copy <dir> <remote>`.
#[derive(Debug, Clone)]
pub struct Rclone {
    program: PathBuf,
    remote: String,
}

impl Rclone {
    pub fn new(program: impl Into<PathBuf>, remote: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            remote: remote.into(),
        }
    }
}

impl RemoteSync for Rclone {
    fn target(&self) -> &str {
        &self.remote
    }

    fn push(&self, dir: &Path) -> Result<(), SyncError> {
        let output = Command::new(&self.program)
            .arg("copy")
            .arg(dir)
            .arg(&self.remote)
            .stdin(Stdio::null())
            .output()
            .map_err(|err| match err.kind() {
                io::ErrorKind::NotFound => {
                    SyncError::ToolMissing(self.program.display().to_string())
                }
                _ => SyncError::Io(err),
            })?;

        if output.status.success() {
            return Ok(());
        }

        let stderr = String::from_utf8_lossy(&output.stderr);
        let detail = match stderr.trim() {
            "" => output.status.to_string(),
            msg => format!("{}: {}", output.status, msg),
        };
        Err(SyncError::Failed {
            remote: self.remote.clone(),
            detail,
        })
    }
}
