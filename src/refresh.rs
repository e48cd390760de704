//! Refresh trigger
//!
//! Kicks off the external refresh pipeline for a symbol and waits a bounded
//! time for it. Concurrent triggers for the same symbol share one pipeline
//! run through a registry owned by each [`RefreshTrigger`].

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::time::Instant;

use crate::data::{normalize_symbol, RefreshPipeline};
use crate::single_flight::{FlightError, SingleFlight};

/// Result of waiting on a refresh run
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", content = "reason", rename_all = "snake_case")]
pub enum RefreshStatus {
    /// The pipeline finished and the store holds whatever it produced
    Done,
    /// The budget ran out; the run continues in the background
    TimedOut,
    /// The pipeline reported failure
    Failed(String),
}

impl fmt::Display for RefreshStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RefreshStatus::Done => write!(f, "done"),
            RefreshStatus::TimedOut => write!(f, "timed out"),
            RefreshStatus::Failed(reason) => write!(f, "failed: {}", reason),
        }
    }
}

/// Deduplicating, time-bounded front for a [`RefreshPipeline`]
pub struct RefreshTrigger {
    pipeline: Arc<dyn RefreshPipeline>,
    runs: SingleFlight<String, RefreshStatus>,
}

impl RefreshTrigger {
    pub fn new(pipeline: Arc<dyn RefreshPipeline>) -> Self {
        Self {
            pipeline,
            runs: SingleFlight::new(),
        }
    }

    /// Starts (or joins) a refresh for `symbol` and waits at most `budget`
    pub async fn trigger(&self, symbol: &str, budget: Duration) -> RefreshStatus {
        let symbol = normalize_symbol(symbol);
        let pipeline = Arc::clone(&self.pipeline);
        let run_symbol = symbol.clone();

        let run = async move {
            let started = Instant::now();
            let status = match pipeline.run_refresh(&run_symbol).await {
                Ok(()) => RefreshStatus::Done,
                Err(err) => RefreshStatus::Failed(err.to_string()),
            };
            // Waiters may have given up already; this is the only record of the result
            tracing::info!(symbol = %run_symbol, elapsed = ?started.elapsed(), %status, "Refresh finished");
            status
        };

        match self.runs.resolve_within(symbol.clone(), budget, run).await {
            Ok(status) => status,
            Err(FlightError::Elapsed(waited)) => {
                tracing::warn!(%symbol, ?waited, "Refresh exceeded its budget");
                RefreshStatus::TimedOut
            }
            Err(FlightError::Aborted(reason)) => RefreshStatus::Failed(reason),
        }
    }

    /// Whether a run for `symbol` is still going
    pub fn is_running(&self, symbol: &str) -> bool {
        self.runs.is_in_flight(&normalize_symbol(symbol))
    }

    /// Number of runs still going
    pub fn running(&self) -> usize {
        self.runs.in_flight()
    }
}
