//! Periodic pass driver.
//!
//! Runs [`MatchingEngine::run_pass`] on a fixed interval. Passes are
//! synchronous and may take a while, so each one runs on Tokio's blocking
//! pool. Ticks never overlap: the next tick waits for the running pass.
//!
//! Failure policy:
//! - transient store errors: logged, retried on the next tick
//! - invariant violations: stop the scheduler (or, if configured, logged and
//!   retried like transient errors)
//! - a panicking pass: rolled back with its transaction, stops the scheduler

use std::{future::Future, sync::Arc, time::Duration};

use keysweep_core::{MatchStore, MatchingEngine, PassReport, ValidationOracle};
use tokio::time::{self, MissedTickBehavior};

use crate::ServerError;

/// Counters over a scheduler run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SchedulerSummary {
    /// Passes that committed
    pub committed: u64,
    /// Passes that aborted and were retried
    pub failed: u64,
    /// Matches applied by committed passes
    pub matches: u64,
}

/// Drives an engine on a fixed interval.
pub struct Scheduler<S, O> {
    engine: Arc<MatchingEngine<S, O>>,
    interval: Duration,
    stop_on_invariant: bool,
}

impl<S, O> Scheduler<S, O>
where
    S: MatchStore,
    O: ValidationOracle + 'static,
{
    /// Scheduler running a pass every `interval`.
    pub fn new(engine: MatchingEngine<S, O>, interval: Duration) -> Self {
        Self { engine: Arc::new(engine), interval, stop_on_invariant: true }
    }

    /// Keep running after invariant violations instead of stopping.
    pub fn with_stop_on_invariant(mut self, stop: bool) -> Self {
        self.stop_on_invariant = stop;
        self
    }

    /// The engine passes run on.
    pub fn engine(&self) -> &MatchingEngine<S, O> {
        &self.engine
    }

    /// Run one pass on the blocking pool.
    ///
    /// # Errors
    ///
    /// - `Engine`: the pass aborted and rolled back
    /// - `Internal`: the pass panicked
    pub async fn run_once(&self) -> Result<PassReport, ServerError> {
        let engine = Arc::clone(&self.engine);

        let report = tokio::task::spawn_blocking(move || engine.run_pass())
            .await
            .map_err(|e| ServerError::Internal(format!("pass worker failed: {e}")))??;

        Ok(report)
    }

    /// Run passes until `shutdown` resolves or a pass fails fatally.
    ///
    /// A pass in flight when `shutdown` resolves is allowed to finish.
    ///
    /// # Errors
    ///
    /// The error of the pass that stopped the scheduler.
    pub async fn run<F>(&self, shutdown: F) -> Result<SchedulerSummary, ServerError>
    where
        F: Future<Output = ()>,
    {
        let mut ticker = time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        tokio::pin!(shutdown);

        let mut summary = SchedulerSummary::default();

        tracing::info!(interval_ms = self.interval.as_millis() as u64, "Scheduler started");

        loop {
            tokio::select! {
                biased;

                () = &mut shutdown => {
                    tracing::info!(
                        committed = summary.committed,
                        failed = summary.failed,
                        matches = summary.matches,
                        "Scheduler stopping"
                    );
                    return Ok(summary);
                }

                _ = ticker.tick() => {
                    match self.run_once().await {
                        Ok(report) => {
                            summary.committed += 1;
                            summary.matches += report.matches.len() as u64;
                        },
                        Err(e) if e.is_transient() => {
                            summary.failed += 1;
                        },
                        Err(e @ ServerError::Engine(_)) if !self.stop_on_invariant => {
                            tracing::error!(error = %e, "Pass failed, continuing");
                            summary.failed += 1;
                        },
                        Err(e) => {
                            tracing::error!(error = %e, "Scheduler stopped");
                            return Err(e);
                        },
                    }
                }
            }
        }
    }
}
