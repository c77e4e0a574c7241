//! Periodic chart rendering.
//!
//! Each cycle queries the trailing window of measurements and replaces the
//! chart artifact. The new chart is encoded in memory, written to a
//! temporary file next to the artifact and renamed over it, so readers see
//! either the previous chart or the new one in full.

mod chart;
mod text;

pub use chart::render_png;

use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use lektrix_store::{Clock, Store, StoreError};
use tempfile::NamedTempFile;
use thiserror::Error;
use tracing::{info, warn};

use crate::schedule::Cycle;

/// Default trailing window.
pub const DEFAULT_WINDOW: Duration = Duration::from_secs(3600);

#[derive(Debug, Error)]
pub enum RenderError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("chart error: {0}")]
    Chart(String),

    #[error("cannot write chart: {0}")]
    Io(#[from] io::Error),
}

/// Result of one render cycle.
#[derive(Debug, Clone, PartialEq)]
pub enum RenderOutcome {
    Rendered { points: usize, path: PathBuf },
    /// The window was empty; the existing chart was left alone.
    NoData,
    Failed { reason: String },
}

/// Renders the trailing window of the store into a PNG file.
#[derive(Debug)]
pub struct Renderer {
    store: Store,
    chart_path: PathBuf,
    window: Duration,
    width: u32,
    height: u32,
    clock: Arc<dyn Clock>,
}

impl Renderer {
    /// Create a renderer with a one hour window and a 1000x400 canvas.
    pub fn new(store: Store, chart_path: impl Into<PathBuf>) -> Self {
        let clock = store.clock().clone();
        Self {
            store,
            chart_path: chart_path.into(),
            window: DEFAULT_WINDOW,
            width: 1000,
            height: 400,
            clock,
        }
    }

    pub fn with_window(mut self, window: Duration) -> Self {
        self.window = window;
        self
    }

    pub fn with_size(mut self, width: u32, height: u32) -> Self {
        self.width = width;
        self.height = height;
        self
    }

    pub fn chart_path(&self) -> &Path {
        &self.chart_path
    }

    /// Query the window and replace the chart.
    pub fn render_once(&self) -> RenderOutcome {
        match self.try_render() {
            Ok(0) => {
                info!(component = "render", "no data in window, keeping existing chart");
                RenderOutcome::NoData
            }
            Ok(points) => {
                info!(
                    component = "render",
                    points,
                    path = %self.chart_path.display(),
                    "chart updated"
                );
                RenderOutcome::Rendered {
                    points,
                    path: self.chart_path.clone(),
                }
            }
            Err(err) => {
                warn!(component = "render", error = %err, "render failed, retrying next cycle");
                RenderOutcome::Failed {
                    reason: err.to_string(),
                }
            }
        }
    }

    fn try_render(&self) -> Result<usize, RenderError> {
        let window = i64::try_from(self.window.as_secs()).unwrap_or(i64::MAX);
        let cutoff = self.clock.now().saturating_sub(window);

        let points = self.store.query_since(cutoff)?;
        if points.is_empty() {
            return Ok(0);
        }

        let png = render_png(&points, self.width, self.height)?;
        replace_file(&self.chart_path, &png)?;
        Ok(points.len())
    }
}

impl Cycle for Renderer {
    type Outcome = RenderOutcome;

    fn name(&self) -> &'static str {
        "render"
    }

    fn run_cycle(&mut self) -> RenderOutcome {
        self.render_once()
    }
}

/// Atomically replace `path` with `contents`.
pub(crate) fn replace_file(path: &Path, contents: &[u8]) -> io::Result<()> {
    let parent = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    std::fs::create_dir_all(parent)?;

    let mut tmp = NamedTempFile::new_in(parent)?;
    tmp.write_all(contents)?;
    tmp.as_file().sync_all()?;
    tmp.persist(path)?;
    Ok(())
}
