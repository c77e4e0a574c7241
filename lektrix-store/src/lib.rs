//! # lektrix-store
//!
//! The append-only time-series table shared by every lektrix process.
//!
//! Independent processes (the ingestor, the renderer and the archiver) open
//! the same SQLite file without any coordinating daemon. The guarantees they
//! rely on all come from the storage engine:
//!
//! - **Atomic append**: a single `INSERT` either commits fully or not at all.
//! - **Non-blocking readers**: the file runs in WAL journal mode, so range
//!   queries and snapshots read a committed point in time while the writer
//!   keeps appending.
//! - **Consistent snapshots**: [`Store::snapshot_to`] copies every page inside
//!   one read transaction. An append racing the snapshot is either fully in
//!   the copy or absent from it, never torn.
//!
//! ## Example
//!
//! ```rust,no_run
//! use lektrix_store::Store;
//!
//! # fn main() -> Result<(), lektrix_store::StoreError> {
//! let store = Store::new("/data/lektrix.db");
//! store.initialize()?;
//!
//! let ts = store.append(42.0)?;
//! let recent = store.query_since(ts - 3600)?;
//! assert_eq!(recent.last().map(|m| m.value), Some(42.0));
//! # Ok(())
//! # }
//! ```

mod clock;
mod error;
mod measurement;
mod store;

pub use clock::{Clock, ManualClock, SystemClock};
pub use error::{Result, StoreError};
pub use measurement::{Measurement, Timestamp};
pub use store::{Store, DEFAULT_BUSY_TIMEOUT};
