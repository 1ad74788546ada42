use std::any::Any;
use std::collections::BTreeSet;
use std::panic::{self, AssertUnwindSafe};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use chrono::{DateTime, Local};
use shellshift_core::{InstallationTarget, ShiftError, StepOutcome, StepRecord, StepSink};
use tracing::{debug, warn};

use crate::mutators::{DemotionRecord, MutationOutput, Mutator};

/// What one batch mutator reported, in the order results arrived.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchOutcome {
    pub id: String,
    pub outcome: StepOutcome,
    pub demotion: Option<DemotionRecord>,
    pub error: Option<ShiftError>,
}

struct WorkerResult {
    index: usize,
    started_at: DateTime<Local>,
    output: MutationOutput,
}

/// Runs one mutator on the calling thread, turning errors and panics into
/// failure outputs.
pub fn apply_guarded(mutator: &dyn Mutator, target: &InstallationTarget) -> MutationOutput {
    match panic::catch_unwind(AssertUnwindSafe(|| mutator.apply(target))) {
        Ok(Ok(output)) => output,
        Ok(Err(err)) => MutationOutput::failure(format!("{err:#}")),
        Err(payload) => MutationOutput::failure(format!(
            "panicked: {}",
            panic_message(payload.as_ref())
        )),
    }
}

/// Runs every mutator once on its own thread and records each outcome into
/// `sink` from the calling thread as results arrive.
///
/// A mutator still running at `timeout` is recorded as failed and its late
/// result is dropped. One failure never stops the others.
pub fn run_parallel_batch(
    mutators: &[Arc<dyn Mutator>],
    target: &InstallationTarget,
    timeout: Duration,
    sink: &dyn StepSink,
) -> Vec<BatchOutcome> {
    let (tx, rx) = mpsc::channel::<WorkerResult>();
    let batch_started_at = Local::now();
    let mut outcomes = Vec::with_capacity(mutators.len());
    let mut pending = BTreeSet::new();

    for (index, mutator) in mutators.iter().enumerate() {
        let worker_tx = tx.clone();
        let worker_mutator = Arc::clone(mutator);
        let worker_target = target.clone();
        let spawned = thread::Builder::new()
            .name(format!("shellshift-{}", mutator.id()))
            .spawn(move || {
                let started_at = Local::now();
                let output = apply_guarded(worker_mutator.as_ref(), &worker_target);
                let _ = worker_tx.send(WorkerResult {
                    index,
                    started_at,
                    output,
                });
            });

        match spawned {
            Ok(_) => {
                pending.insert(index);
            }
            Err(err) => {
                let output = MutationOutput::failure(format!("failed to start worker thread: {err}"));
                outcomes.push(record_outcome(mutator.id(), batch_started_at, output, sink));
            }
        }
    }
    drop(tx);

    let deadline = Instant::now() + timeout;
    while !pending.is_empty() {
        let remaining = deadline.saturating_duration_since(Instant::now());
        match rx.recv_timeout(remaining) {
            Ok(result) => {
                if !pending.remove(&result.index) {
                    continue;
                }
                let id = mutators[result.index].id();
                debug!(step = id, "batch mutator finished");
                outcomes.push(record_outcome(id, result.started_at, result.output, sink));
            }
            Err(RecvTimeoutError::Timeout) => {
                for index in std::mem::take(&mut pending) {
                    let id = mutators[index].id();
                    let err = ShiftError::MutatorTimedOut {
                        name: id.to_string(),
                        timeout,
                    };
                    warn!(step = id, "batch mutator timed out");
                    let output = MutationOutput::failure(err.to_string());
                    let mut outcome = record_outcome(id, batch_started_at, output, sink);
                    outcome.error = Some(err);
                    outcomes.push(outcome);
                }
            }
            Err(RecvTimeoutError::Disconnected) => {
                for index in std::mem::take(&mut pending) {
                    let output = MutationOutput::failure("worker exited without reporting");
                    outcomes.push(record_outcome(mutators[index].id(), batch_started_at, output, sink));
                }
            }
        }
    }

    outcomes
}

fn record_outcome(
    id: &str,
    started_at: DateTime<Local>,
    output: MutationOutput,
    sink: &dyn StepSink,
) -> BatchOutcome {
    let error = output.outcome.reason().filter(|_| output.outcome.is_failure()).map(|reason| {
        ShiftError::OptionalMutationFailed {
            name: id.to_string(),
            reason: reason.to_string(),
        }
    });
    sink.record(StepRecord::finish(
        id,
        started_at,
        output.outcome.clone(),
        output.detail,
    ));
    BatchOutcome {
        id: id.to_string(),
        outcome: output.outcome,
        demotion: output.demotion,
        error,
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        return (*message).to_string();
    }
    if let Some(message) = payload.downcast_ref::<String>() {
        return message.clone();
    }
    "unknown panic payload".to_string()
}
