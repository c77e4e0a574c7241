//! SQLite-backed implementation of the shared measurement store.
//!
//! Every operation opens its own short-lived connection. Processes share
//! nothing but the file, so all coordination is delegated to SQLite:
//! `busy_timeout` makes contending writers wait for the engine lock, and WAL
//! journal mode lets readers and the backup copier run alongside the writer.

use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use rusqlite::backup::{Backup, StepResult};
use rusqlite::{ffi, params, Connection, ErrorCode, OpenFlags};
use tracing::debug;

use crate::clock::{Clock, SystemClock};
use crate::error::{Result, StoreError};
use crate::measurement::{Measurement, Timestamp};

/// How long a connection waits on a locked database before giving up.
pub const DEFAULT_BUSY_TIMEOUT: Duration = Duration::from_secs(5);

const WAL_ATTEMPTS: usize = 50;
const WAL_RETRY_DELAY: Duration = Duration::from_millis(20);
const BACKUP_RETRY_DELAY: Duration = Duration::from_millis(50);

const SCHEMA_SQL: &str = "
CREATE TABLE IF NOT EXISTS measurements (
    ts INTEGER PRIMARY KEY,
    value REAL NOT NULL
);
";

/// Handle to the on-disk measurement table.
///
/// A `Store` is only a path plus settings; it holds no open connection and
/// is cheap to clone into each component.
#[derive(Clone)]
pub struct Store {
    path: PathBuf,
    busy_timeout: Duration,
    clock: Arc<dyn Clock>,
}

impl Store {
    /// Create a handle for the store at `path`, stamping appends with the
    /// system clock.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            busy_timeout: DEFAULT_BUSY_TIMEOUT,
            clock: Arc::new(SystemClock),
        }
    }

    /// Replace the clock used by [`Store::append`].
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Set how long operations wait on a locked database.
    pub fn with_busy_timeout(mut self, timeout: Duration) -> Self {
        self.busy_timeout = timeout;
        self
    }

    /// Path of the backing file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The clock used to stamp appends.
    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    /// Returns true if the backing file exists.
    pub fn exists(&self) -> bool {
        self.path.is_file()
    }

    /// Create the backing file and schema if they are missing.
    ///
    /// Safe to call from several processes at once: the schema statement is
    /// idempotent and lock contention is absorbed by the busy timeout.
    pub fn initialize(&self) -> Result<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(&self.path)?;
        conn.busy_timeout(self.busy_timeout)?;
        enable_wal(&conn)?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;
        conn.execute_batch(SCHEMA_SQL)?;

        debug!(path = %self.path.display(), "store initialized");
        Ok(())
    }

    /// Append `value` stamped with the current second and return the
    /// timestamp used.
    ///
    /// Fails with [`StoreError::DuplicateKey`] if a measurement already
    /// exists for this second; the existing row is kept.
    pub fn append(&self, value: f64) -> Result<Timestamp> {
        let timestamp = self.clock.now();
        self.append_at(timestamp, value)?;
        Ok(timestamp)
    }

    /// Append a measurement with an explicit timestamp.
    pub fn append_at(&self, timestamp: Timestamp, value: f64) -> Result<()> {
        // SQLite stores NaN as NULL, which the schema rejects.
        if value.is_nan() {
            return Err(StoreError::Unavailable(format!(
                "refusing to store NaN at timestamp {timestamp}"
            )));
        }

        let conn = self.open()?;
        match conn.execute(
            "INSERT INTO measurements (ts, value) VALUES (?1, ?2)",
            params![timestamp, value],
        ) {
            Ok(_) => Ok(()),
            Err(rusqlite::Error::SqliteFailure(err, _))
                if err.extended_code == ffi::SQLITE_CONSTRAINT_PRIMARYKEY =>
            {
                Err(StoreError::DuplicateKey { timestamp })
            }
            Err(err) => Err(err.into()),
        }
    }

    /// All measurements with `timestamp >= cutoff`, oldest first.
    pub fn query_since(&self, cutoff: Timestamp) -> Result<Vec<Measurement>> {
        let conn = self.open()?;
        let mut stmt =
            conn.prepare("SELECT ts, value FROM measurements WHERE ts >= ?1 ORDER BY ts ASC")?;
        let rows = stmt.query_map(params![cutoff], |row| {
            Ok(Measurement {
                timestamp: row.get(0)?,
                value: row.get(1)?,
            })
        })?;
        let measurements = rows.collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(measurements)
    }

    /// Number of stored measurements.
    pub fn count(&self) -> Result<u64> {
        let conn = self.open()?;
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM measurements", [], |row| row.get(0))?;
        Ok(count as u64)
    }

    /// Copy the committed contents of the store to `dest`.
    ///
    /// All pages are copied in a single backup step, i.e. inside one read
    /// transaction, so the copy reflects exactly one committed state. An
    /// append in flight during the copy is either wholly present or absent.
    /// The copy is assembled in a temporary file next to `dest` and renamed
    /// into place, so `dest` never exists in a partial state. An existing
    /// `dest` is never replaced: the call fails with [`StoreError::Exists`].
    pub fn snapshot_to(&self, dest: &Path) -> Result<()> {
        if !self.exists() {
            return Err(StoreError::Missing(self.path.clone()));
        }

        let dir = dest
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        let tmp = tempfile::Builder::new()
            .prefix(".snapshot-")
            .suffix(".partial")
            .tempfile_in(dir)?;

        let src = self.open()?;
        {
            let mut dst = Connection::open(tmp.path())?;
            let backup = Backup::new(&src, &mut dst)?;
            self.copy_all_pages(&backup)?;
        }

        tmp.as_file().sync_all()?;
        tmp.persist_noclobber(dest).map_err(|err| match err.error.kind() {
            io::ErrorKind::AlreadyExists => StoreError::Exists(dest.to_path_buf()),
            _ => StoreError::from(err.error),
        })?;

        debug!(
            source = %self.path.display(),
            dest = %dest.display(),
            "snapshot written"
        );
        Ok(())
    }

    /// Run the backup as one step over all pages, waiting out lock
    /// contention for at most the busy timeout.
    fn copy_all_pages(&self, backup: &Backup<'_, '_>) -> Result<()> {
        let attempts = (self.busy_timeout.as_millis() / BACKUP_RETRY_DELAY.as_millis()).max(1);
        for _ in 0..attempts {
            match backup.step(-1)? {
                StepResult::Done => return Ok(()),
                StepResult::Busy | StepResult::Locked => thread::sleep(BACKUP_RETRY_DELAY),
                _ => {}
            }
        }
        Err(StoreError::Unavailable(format!(
            "backup of {} did not complete within {:?}",
            self.path.display(),
            self.busy_timeout
        )))
    }

    /// Open a connection to an existing store. Never creates the file.
    fn open(&self) -> Result<Connection> {
        let flags = OpenFlags::SQLITE_OPEN_READ_WRITE
            | OpenFlags::SQLITE_OPEN_NO_MUTEX
            | OpenFlags::SQLITE_OPEN_URI;
        let conn = Connection::open_with_flags(&self.path, flags)?;
        conn.busy_timeout(self.busy_timeout)?;
        Ok(conn)
    }
}

impl fmt::Debug for Store {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Store")
            .field("path", &self.path)
            .field("busy_timeout", &self.busy_timeout)
            .finish()
    }
}

/// Switch the file to WAL journal mode.
///
/// Changing the journal mode needs an exclusive lock, which a concurrently
/// initializing process may hold, so busy results are retried.
fn enable_wal(conn: &Connection) -> Result<()> {
    let mut last = String::new();
    for _ in 0..WAL_ATTEMPTS {
        match conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| {
            row.get::<_, String>(0)
        }) {
            Ok(mode) if mode.eq_ignore_ascii_case("wal") => return Ok(()),
            Ok(mode) => last = mode,
            Err(err) if is_busy(&err) => last = err.to_string(),
            Err(err) => return Err(err.into()),
        }
        thread::sleep(WAL_RETRY_DELAY);
    }
    Err(StoreError::Unavailable(format!(
        "could not enable WAL journal mode (last result: {last})"
    )))
}

fn is_busy(err: &rusqlite::Error) -> bool {
    matches!(
        err.sqlite_error_code(),
        Some(ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked)
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ManualClock;
    use std::sync::atomic::{AtomicBool, Ordering};
    use tempfile::TempDir;

    fn temp_store() -> (TempDir, Store) {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::new(dir.path().join("lektrix.db"));
        store.initialize().unwrap();
        (dir, store)
    }

    #[test]
    fn test_initialize_is_idempotent() {
        let (_dir, store) = temp_store();
        store.append_at(10, 1.0).unwrap();

        store.initialize().unwrap();
        store.initialize().unwrap();

        assert_eq!(store.count().unwrap(), 1);
    }

    #[test]
    fn test_initialize_creates_parent_directories() {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::new(dir.path().join("nested/data/lektrix.db"));

        store.initialize().unwrap();

        assert!(store.exists());
        assert_eq!(store.count().unwrap(), 0);
    }

    #[test]
    fn test_concurrent_initialize() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("lektrix.db");

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let store = Store::new(&path);
                thread::spawn(move || store.initialize())
            })
            .collect();

        for handle in handles {
            handle.join().unwrap().unwrap();
        }
        assert_eq!(Store::new(&path).count().unwrap(), 0);
    }

    #[test]
    fn test_append_uses_clock() {
        let (_dir, store) = temp_store();
        let store = store.with_clock(Arc::new(ManualClock::new(1000)));

        let ts = store.append(42.0).unwrap();

        assert_eq!(ts, 1000);
        assert_eq!(
            store.query_since(0).unwrap(),
            vec![Measurement::new(1000, 42.0)]
        );
    }

    #[test]
    fn test_round_trip_is_ordered() {
        let (_dir, store) = temp_store();
        // Inserted out of order on purpose.
        let rows = [(30, 3.5), (10, -1.25), (20, 0.0), (40, 1e9)];
        for (ts, value) in rows {
            store.append_at(ts, value).unwrap();
        }

        let result = store.query_since(0).unwrap();

        assert_eq!(
            result,
            vec![
                Measurement::new(10, -1.25),
                Measurement::new(20, 0.0),
                Measurement::new(30, 3.5),
                Measurement::new(40, 1e9),
            ]
        );
    }

    #[test]
    fn test_query_since_filters_by_cutoff() {
        let (_dir, store) = temp_store();
        for ts in 1..=10 {
            store.append_at(ts * 100, ts as f64).unwrap();
        }

        for cutoff in [-5, 0, 100, 450, 500, 1000, 1001] {
            let result = store.query_since(cutoff).unwrap();
            let expected: Vec<_> = (1..=10)
                .map(|ts| Measurement::new(ts * 100, ts as f64))
                .filter(|m| m.timestamp >= cutoff)
                .collect();
            assert_eq!(result, expected, "cutoff {cutoff}");
        }
    }

    #[test]
    fn test_query_since_empty_is_not_an_error() {
        let (_dir, store) = temp_store();
        assert!(store.query_since(0).unwrap().is_empty());

        store.append_at(10, 1.0).unwrap();
        assert!(store.query_since(11).unwrap().is_empty());
    }

    #[test]
    fn test_duplicate_timestamp_keeps_first() {
        let (_dir, store) = temp_store();
        let store = store.with_clock(Arc::new(ManualClock::new(500)));

        assert_eq!(store.append(1.0).unwrap(), 500);
        let err = store.append(2.0).unwrap_err();

        assert!(matches!(err, StoreError::DuplicateKey { timestamp: 500 }));
        assert_eq!(store.query_since(0).unwrap(), vec![Measurement::new(500, 1.0)]);
    }

    #[test]
    fn test_nan_is_rejected_without_touching_store() {
        let (_dir, store) = temp_store();

        let err = store.append_at(1, f64::NAN).unwrap_err();

        assert!(matches!(err, StoreError::Unavailable(_)));
        assert_eq!(store.count().unwrap(), 0);
    }

    #[test]
    fn test_operations_on_missing_store_are_unavailable() {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::new(dir.path().join("absent.db"));

        assert!(matches!(store.query_since(0), Err(StoreError::Unavailable(_))));
        assert!(matches!(store.append_at(1, 1.0), Err(StoreError::Unavailable(_))));
        // Reads must not create the file as a side effect.
        assert!(!store.exists());
    }

    #[test]
    fn test_snapshot_of_missing_store() {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::new(dir.path().join("absent.db"));

        let err = store.snapshot_to(&dir.path().join("copy.db")).unwrap_err();

        assert!(matches!(err, StoreError::Missing(_)));
        assert!(!dir.path().join("copy.db").exists());
    }

    #[test]
    fn test_snapshot_copies_all_rows() {
        let (dir, store) = temp_store();
        for ts in 0..25 {
            store.append_at(ts, ts as f64 * 0.5).unwrap();
        }
        let dest = dir.path().join("backup.db");

        store.snapshot_to(&dest).unwrap();

        let copy = Store::new(&dest);
        assert_eq!(copy.count().unwrap(), 25);
        assert_eq!(copy.query_since(0).unwrap(), store.query_since(0).unwrap());
    }

    #[test]
    fn test_snapshot_never_replaces_existing_backup() {
        let (dir, store) = temp_store();
        store.append_at(1, 1.0).unwrap();
        let dest = dir.path().join("backup.db");
        store.snapshot_to(&dest).unwrap();

        store.append_at(2, 2.0).unwrap();
        let err = store.snapshot_to(&dest).unwrap_err();

        assert!(matches!(err, StoreError::Exists(ref p) if *p == dest));
        assert!(err.is_expected());
        assert_eq!(Store::new(&dest).count().unwrap(), 1);
        // The rejected copy is cleaned up.
        let leftovers = std::fs::read_dir(dir.path())
            .unwrap()
            .filter(|e| e.as_ref().unwrap().file_name().to_string_lossy().ends_with(".partial"))
            .count();
        assert_eq!(leftovers, 0);
    }

    #[test]
    fn test_snapshot_leaves_no_temporary_files() {
        let (dir, store) = temp_store();
        store.append_at(1, 1.0).unwrap();
        let backups = dir.path().join("backups");
        std::fs::create_dir(&backups).unwrap();

        store.snapshot_to(&backups.join("copy.db")).unwrap();

        let names: Vec<_> = std::fs::read_dir(&backups)
            .unwrap()
            .map(|e| e.unwrap().file_name().into_string().unwrap())
            .collect();
        assert_eq!(names, vec!["copy.db".to_string()]);
    }

    #[test]
    fn test_snapshot_during_appends_is_consistent() {
        let (dir, store) = temp_store();
        let stop = Arc::new(AtomicBool::new(false));

        let writer = {
            let store = store.clone();
            let stop = stop.clone();
            thread::spawn(move || {
                let mut ts = 0;
                while !stop.load(Ordering::Relaxed) {
                    store.append_at(ts, ts as f64 * 2.0).unwrap();
                    ts += 1;
                }
                ts
            })
        };

        let mut previous = 0;
        for i in 0..20 {
            let dest = dir.path().join(format!("snap-{i}.db"));
            store.snapshot_to(&dest).unwrap();

            let rows = Store::new(&dest).query_since(0).unwrap();
            // Rows form a gap-free prefix of what the writer produced.
            for (expected_ts, row) in rows.iter().enumerate() {
                assert_eq!(row.timestamp, expected_ts as i64);
                assert_eq!(row.value, row.timestamp as f64 * 2.0);
            }
            assert!(rows.len() >= previous, "snapshots never go backwards");
            previous = rows.len();
        }

        stop.store(true, Ordering::Relaxed);
        let written = writer.join().unwrap();
        assert_eq!(store.count().unwrap(), written as u64);
    }

    #[test]
    fn test_concurrent_reader_and_writer() {
        let (_dir, store) = temp_store();

        let writer = {
            let store = store.clone();
            thread::spawn(move || {
                for ts in 0..200 {
                    store.append_at(ts, 1.0).unwrap();
                }
            })
        };

        let mut last = 0;
        while !writer.is_finished() {
            let rows = store.query_since(0).unwrap();
            assert!(rows.windows(2).all(|w| w[0].timestamp < w[1].timestamp));
            assert!(rows.len() >= last);
            last = rows.len();
        }
        writer.join().unwrap();
        assert_eq!(store.query_since(0).unwrap().len(), 200);
    }
}
