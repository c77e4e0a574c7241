//! Sample-and-append loop.

use std::fmt::Debug;

use lektrix_store::{Store, StoreError, Timestamp};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::{info, warn};

use crate::schedule::Cycle;

/// Produces one value of the monitored signal per call.
pub trait SignalSource: Send + Debug {
    fn sample(&mut self) -> f64;
}

/// Uniform random draw over `[low, high]`.
#[derive(Debug)]
pub struct UniformSignal {
    rng: StdRng,
    low: f64,
    high: f64,
}

impl UniformSignal {
    /// Create a signal over `[low, high]`.
    ///
    /// The bounds are swapped if given in the wrong order.
    pub fn new(low: f64, high: f64) -> Self {
        Self::with_rng(StdRng::from_os_rng(), low, high)
    }

    /// Deterministic signal for reproducible runs.
    pub fn seeded(seed: u64, low: f64, high: f64) -> Self {
        Self::with_rng(StdRng::seed_from_u64(seed), low, high)
    }

    fn with_rng(rng: StdRng, low: f64, high: f64) -> Self {
        let (low, high) = if low <= high { (low, high) } else { (high, low) };
        Self { rng, low, high }
    }
}

impl SignalSource for UniformSignal {
    fn sample(&mut self) -> f64 {
        self.rng.random_range(self.low..=self.high)
    }
}

/// A signal that always returns the same value.
#[derive(Debug, Clone, Copy)]
pub struct ConstantSignal(pub f64);

impl SignalSource for ConstantSignal {
    fn sample(&mut self) -> f64 {
        self.0
    }
}

/// Result of one ingest cycle.
#[derive(Debug, Clone, PartialEq)]
pub enum IngestOutcome {
    Appended { timestamp: Timestamp, value: f64 },
    /// A row already existed for this second; the sample was discarded.
    Duplicate { timestamp: Timestamp, value: f64 },
    /// The store could not be written; the sample was discarded.
    Unavailable { reason: String },
}

/// Samples a signal and appends it to the store, once per cycle.
#[derive(Debug)]
pub struct Ingestor<S> {
    store: Store,
    source: S,
}

impl<S: SignalSource> Ingestor<S> {
    pub fn new(store: Store, source: S) -> Self {
        Self { store, source }
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    /// Take one sample and append it.
    pub fn ingest_once(&mut self) -> IngestOutcome {
        let value = self.source.sample();
        match self.store.append(value) {
            Ok(timestamp) => {
                info!(component = "ingest", timestamp, value, "measurement stored");
                IngestOutcome::Appended { timestamp, value }
            }
            Err(StoreError::DuplicateKey { timestamp }) => {
                info!(
                    component = "ingest",
                    timestamp, value, "measurement already recorded for this second, skipping"
                );
                IngestOutcome::Duplicate { timestamp, value }
            }
            Err(err) => {
                warn!(component = "ingest", value, error = %err, "append failed, retrying next cycle");
                IngestOutcome::Unavailable {
                    reason: err.to_string(),
                }
            }
        }
    }
}

impl<S: SignalSource + 'static> Cycle for Ingestor<S> {
    type Outcome = IngestOutcome;

    fn name(&self) -> &'static str {
        "ingest"
    }

    fn run_cycle(&mut self) -> IngestOutcome {
        self.ingest_once()
    }
}
