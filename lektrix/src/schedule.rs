//! Periodic execution of a component's cycle.
//!
//! A [`Schedule`] runs a [`Cycle`] repeatedly until stopped. The pause is
//! measured from the end of one cycle to the start of the next, so a slow
//! cycle delays the following one instead of causing a burst of catch-up
//! runs.
//!
//! Cycles do blocking work (SQLite, PNG encoding, child processes), so each
//! one runs on tokio's blocking pool while the schedule task stays free to
//! observe a stop request. Schedules are driven by `tokio::time`, so tests
//! can run them on a paused clock without real sleeps.

use std::fmt::Debug;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::{JoinError, JoinHandle};
use tracing::{debug, error, info};

/// One iteration of a long-running component.
///
/// Implementations report the result of the iteration as a value and never
/// panic or return an error for per-cycle failures; the schedule keeps going
/// whatever the outcome.
pub trait Cycle: Send + 'static {
    type Outcome: Debug + Send + 'static;

    /// Short component name used in logs.
    fn name(&self) -> &'static str;

    /// Run one iteration.
    fn run_cycle(&mut self) -> Self::Outcome;
}

/// Runs a cycle at a fixed pause until stopped.
#[derive(Debug, Clone, Copy)]
pub struct Schedule {
    period: Duration,
}

impl Schedule {
    pub fn new(period: Duration) -> Self {
        Self { period }
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    /// Run `cycle` until `stop` becomes true or its sender is dropped.
    ///
    /// The first cycle runs immediately. A stop request never interrupts a
    /// cycle in progress; it is observed while waiting for the next one.
    /// Returns the cycle and the number of completed cycles, or the join
    /// error if a cycle panicked.
    pub async fn run<C: Cycle>(
        &self,
        mut cycle: C,
        mut stop: watch::Receiver<bool>,
    ) -> Result<(C, u64), JoinError> {
        let name = cycle.name();
        let mut completed = 0u64;

        loop {
            if *stop.borrow() {
                break;
            }

            let (returned, outcome) = match tokio::task::spawn_blocking(move || {
                let outcome = cycle.run_cycle();
                (cycle, outcome)
            })
            .await
            {
                Ok(done) => done,
                Err(e) => {
                    error!(component = name, error = %e, "cycle panicked, stopping schedule");
                    return Err(e);
                }
            };
            cycle = returned;
            completed += 1;
            debug!(component = name, cycle = completed, ?outcome, "cycle finished");

            tokio::select! {
                _ = tokio::time::sleep(self.period) => {}
                changed = stop.changed() => {
                    if changed.is_err() || *stop.borrow() {
                        break;
                    }
                }
            }
        }

        info!(component = name, cycles = completed, "schedule stopped");
        Ok((cycle, completed))
    }

    /// Spawn the schedule as a background task.
    ///
    /// The cycle is handed back when the schedule stops, so callers can run
    /// shutdown work against it.
    pub fn spawn<C: Cycle>(self, cycle: C) -> ScheduleHandle<C> {
        let (stop_tx, stop_rx) = watch::channel(false);
        let task = tokio::spawn(async move { self.run(cycle, stop_rx).await });
        ScheduleHandle { stop_tx, task }
    }
}

/// Handle to a spawned schedule.
pub struct ScheduleHandle<C> {
    stop_tx: watch::Sender<bool>,
    task: JoinHandle<Result<(C, u64), JoinError>>,
}

impl<C> ScheduleHandle<C> {
    /// Ask the schedule to stop after the current cycle.
    pub fn stop(&self) {
        let _ = self.stop_tx.send(true);
    }

    /// Stop the schedule and wait for it to finish.
    ///
    /// Returns the cycle and the number of completed cycles.
    pub async fn shutdown(self) -> Result<(C, u64), JoinError> {
        self.stop();
        self.task.await?
    }
}

impl<C> Debug for ScheduleHandle<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScheduleHandle")
            .field("stopped", &*self.stop_tx.borrow())
            .finish()
    }
}
