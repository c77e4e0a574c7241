//! Error types for store operations.

use std::path::PathBuf;

use thiserror::Error;

/// Errors returned by [`Store`](crate::Store) operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The store could not be opened, read or written.
    ///
    /// Long-running loops treat this as recoverable: skip the cycle and
    /// retry on the next tick.
    #[error("storage unavailable: {0}")]
    Unavailable(String),

    /// A measurement already exists for this second. The existing row wins.
    #[error("duplicate measurement at timestamp {timestamp}")]
    DuplicateKey { timestamp: i64 },

    /// There is no store file to copy.
    #[error("no store found at {}", .0.display())]
    Missing(PathBuf),

    /// The snapshot destination already exists and was left untouched.
    #[error("{} already exists", .0.display())]
    Exists(PathBuf),
}

impl StoreError {
    /// Returns true for errors that are expected in normal operation and
    /// should not be reported as failures.
    pub fn is_expected(&self) -> bool {
        matches!(
            self,
            StoreError::DuplicateKey { .. } | StoreError::Missing(_) | StoreError::Exists(_)
        )
    }
}

impl From<rusqlite::Error> for StoreError {
    fn from(err: rusqlite::Error) -> Self {
        StoreError::Unavailable(err.to_string())
    }
}

impl From<std::io::Error> for StoreError {
    fn from(err: std::io::Error) -> Self {
        StoreError::Unavailable(err.to_string())
    }
}

/// Result alias for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duplicate_and_missing_are_expected() {
        assert!(StoreError::DuplicateKey { timestamp: 1 }.is_expected());
        assert!(StoreError::Missing(PathBuf::from("/nope")).is_expected());
        assert!(StoreError::Exists(PathBuf::from("/nope")).is_expected());
        assert!(!StoreError::Unavailable("disk full".into()).is_expected());
    }

    #[test]
    fn io_errors_map_to_unavailable() {
        let err: StoreError = std::io::Error::other("boom").into();
        assert!(matches!(err, StoreError::Unavailable(ref msg) if msg.contains("boom")));
    }

    #[test]
    fn display_messages() {
        assert_eq!(
            StoreError::DuplicateKey { timestamp: 1000 }.to_string(),
            "duplicate measurement at timestamp 1000"
        );
        assert_eq!(
            StoreError::Missing(PathBuf::from("/data/lektrix.db")).to_string(),
            "no store found at /data/lektrix.db"
        );
    }
}
