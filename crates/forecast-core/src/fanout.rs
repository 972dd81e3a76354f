//! Bounded fan-out of independent work units.
//!
//! Units start in submission order on a fixed-size pool of OS threads. A unit
//! that returns an error or panics is recorded as failed; the rest of the batch
//! keeps draining and `run` joins every unit before it returns.

use std::any::Any;
use std::fmt::Display;
use std::panic::{self, AssertUnwindSafe};
use std::sync::mpsc;
use std::time::{Duration, Instant};

use tracing::{debug, error, info, warn};

use crate::error::{PipelineError, Result};
use crate::ids::VpuId;

/// Something the fan-out can dispatch and report on.
pub trait WorkUnit {
    /// Identity used in logs and in the batch report.
    fn label(&self) -> String;
}

impl WorkUnit for VpuId {
    fn label(&self) -> String {
        format!("vpu {self}")
    }
}

/// Result of one unit.
#[derive(Debug, Clone)]
pub struct UnitOutcome {
    pub label: String,
    pub result: std::result::Result<(), String>,
    pub elapsed: Duration,
}

impl UnitOutcome {
    pub fn is_success(&self) -> bool {
        self.result.is_ok()
    }
}

/// Per-unit outcomes of a batch, in submission order.
#[derive(Debug, Default)]
pub struct BatchReport {
    pub outcomes: Vec<UnitOutcome>,
}

impl BatchReport {
    pub fn total(&self) -> usize {
        self.outcomes.len()
    }

    pub fn succeeded(&self) -> usize {
        self.outcomes.iter().filter(|o| o.is_success()).count()
    }

    pub fn failures(&self) -> impl Iterator<Item = &UnitOutcome> {
        self.outcomes.iter().filter(|o| !o.is_success())
    }

    pub fn is_success(&self) -> bool {
        self.outcomes.iter().all(UnitOutcome::is_success)
    }

    /// Logs one line per failed unit and an overall summary whose level
    /// reflects how much of the batch failed.
    pub fn log_summary(&self, stage: &str) {
        for failure in self.failures() {
            if let Err(reason) = &failure.result {
                warn!(stage, unit = %failure.label, %reason, "unit failed");
            }
        }
        let (total, ok) = (self.total(), self.succeeded());
        let failed = total - ok;
        if failed == 0 {
            info!(stage, total, "batch complete: {ok}/{total} successful");
        } else if ok == 0 {
            error!(stage, total, failed, "batch complete: {ok}/{total} successful, {failed} failed");
        } else {
            warn!(stage, total, failed, "batch complete: {ok}/{total} successful, {failed} failed");
        }
    }
}

/// Bounded worker pool for independent units.
#[derive(Debug, Clone, Copy, Default)]
pub struct JobFanout {
    max_workers: Option<usize>,
}

impl JobFanout {
    /// `max_workers` caps the pool on top of hardware parallelism.
    pub fn new(max_workers: Option<usize>) -> Self {
        Self { max_workers }
    }

    /// `min(available parallelism, units, cap)`, never zero.
    pub fn worker_count(&self, units: usize) -> usize {
        let hardware = std::thread::available_parallelism().map_or(1, |n| n.get());
        let mut workers = hardware.min(units);
        if let Some(cap) = self.max_workers {
            workers = workers.min(cap);
        }
        workers.max(1)
    }

    /// Runs `worker` once per unit and collects every outcome.
    pub fn run<U, F, E>(&self, units: &[U], worker: F) -> Result<BatchReport>
    where
        U: WorkUnit + Sync,
        F: Fn(&U) -> std::result::Result<(), E> + Sync,
        E: Display,
    {
        if units.is_empty() {
            return Ok(BatchReport::default());
        }
        let workers = self.worker_count(units.len());
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(workers)
            .thread_name(|i| format!("fanout-{i}"))
            .build()
            .map_err(|e| PipelineError::WorkerPool(e.to_string()))?;
        info!(units = units.len(), workers, "dispatching batch");

        let (tx, rx) = mpsc::channel();
        let worker = &worker;
        pool.scope_fifo(|scope| {
            for (index, unit) in units.iter().enumerate() {
                let tx = tx.clone();
                scope.spawn_fifo(move |_| {
                    let outcome = run_unit(unit, worker);
                    // The receiver outlives the scope, so a send cannot fail.
                    let _ = tx.send((index, outcome));
                });
            }
        });
        drop(tx);

        let mut indexed: Vec<(usize, UnitOutcome)> = rx.into_iter().collect();
        indexed.sort_by_key(|(index, _)| *index);
        Ok(BatchReport {
            outcomes: indexed.into_iter().map(|(_, outcome)| outcome).collect(),
        })
    }
}

fn run_unit<U, F, E>(unit: &U, worker: &F) -> UnitOutcome
where
    U: WorkUnit,
    F: Fn(&U) -> std::result::Result<(), E>,
    E: Display,
{
    let label = unit.label();
    let started = Instant::now();
    debug!(unit = %label, "unit started");
    let result = match panic::catch_unwind(AssertUnwindSafe(|| worker(unit))) {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => Err(e.to_string()),
        Err(payload) => Err(format!("panicked: {}", panic_message(payload.as_ref()))),
    };
    let elapsed = started.elapsed();
    match &result {
        Ok(()) => debug!(unit = %label, elapsed_ms = (elapsed.as_millis() as u64), "unit finished"),
        Err(reason) => error!(unit = %label, %reason, "unit failed"),
    }
    UnitOutcome { label, result, elapsed }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
