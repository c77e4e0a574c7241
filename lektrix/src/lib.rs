//! # lektrix
//!
//! A minimal telemetry pipeline around one shared SQLite file.
//!
//! Four independent loops cooperate only through the filesystem:
//!
//! ```text
//!   ┌──────────┐  append   ┌─────────────┐  snapshot  ┌───────────────┐
//!   │ Ingestor │──────────▶│    Store    │───────────▶│   Archiver    │──▶ remote
//!   └──────────┘           │ (lektrix.db)│            │ (backups/*.db)│
//!                          └──────┬──────┘            └───────────────┘
//!                                 │ query_since
//!                                 ▼
//!                          ┌─────────────┐  rename   ┌──────────────┐
//!                          │  Renderer   │──────────▶│ chart (png)  │
//!                          └─────────────┘           └──────┬───────┘
//!                                                           │ read
//!                                                           ▼
//!                                                    ┌──────────────┐
//!                                                    │ ImageServer  │──▶ GET /plot
//!                                                    └──────────────┘
//! ```
//!
//! - **[`ingest`]**: samples a [`SignalSource`] and appends one row per cycle
//! - **[`archive`]**: point-in-time store backups and best-effort remote push
//! - **[`render`]**: charts the trailing window and atomically replaces the PNG
//! - **[`server`]**: serves the chart and a small HTML page over HTTP
//! - **[`schedule`]**: runs any [`Cycle`] periodically until stopped
//! - **[`config`]**: layered settings from a file and the environment
//!
//! Storage lives in the `lektrix-store` crate.
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::time::Duration;
//! use lektrix::{ConstantSignal, Ingestor, Schedule, Store};
//!
//! # tokio_test::block_on(async {
//! let store = Store::new("/tmp/lektrix.db");
//! store.initialize().unwrap();
//!
//! let handle = Schedule::new(Duration::from_secs(10))
//!     .spawn(Ingestor::new(store, ConstantSignal(1.0)));
//!
//! tokio::time::sleep(Duration::from_secs(60)).await;
//! let (_, cycles) = handle.shutdown().await.unwrap();
//! println!("{cycles} samples taken");
//! # });
//! ```

pub mod archive;
pub mod config;
pub mod duration;
pub mod ingest;
pub mod logging;
pub mod render;
pub mod schedule;
pub mod server;

pub use archive::{ArchiveError, ArchiveReport, Archiver, PushOutcome, Rclone, RemoteSync, SnapshotOutcome, SyncError};
pub use config::{ConfigError, Settings};
pub use ingest::{ConstantSignal, IngestOutcome, Ingestor, SignalSource, UniformSignal};
pub use render::{RenderError, RenderOutcome, Renderer};
pub use schedule::{Cycle, Schedule, ScheduleHandle};
pub use server::ImageServer;

// Re-export the storage layer for convenience
pub use lektrix_store::{Clock, ManualClock, Measurement, Store, StoreError, SystemClock, Timestamp};
