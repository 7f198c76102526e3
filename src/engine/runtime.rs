// src/engine/runtime.rs

use std::fmt;
use std::sync::Arc;
use std::time::Instant;

use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info};

use crate::errors::Result;
use crate::job::{BatchResult, FailureKind, JobResult, JobSpec};
use crate::types::{CompletionState, ConcurrencyMode};

use super::RuntimeEvent;
use super::core::BatchLedger;
use super::pipeline::{PipelineContext, run_job};

/// Requests cancellation of a running batch. Cheap to clone.
#[derive(Debug, Clone)]
pub struct CancelHandle {
    tx: Arc<watch::Sender<bool>>,
}

impl CancelHandle {
    /// Stop launching jobs and kill the process trees of running ones.
    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.tx.borrow()
    }
}

/// Drives job pipelines for a batch and collects their results.
///
/// This is the async IO shell around [`BatchLedger`], which holds the
/// scheduling and accounting rules. Pipelines run as their own Tokio tasks
/// and report back over one channel; results are handed to the caller in
/// completion order.
pub struct Orchestrator {
    ctx: Arc<PipelineContext>,
    cancel: Arc<watch::Sender<bool>>,
}

impl fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Orchestrator")
            .field("ctx", &self.ctx)
            .field("cancelled", &*self.cancel.borrow())
            .finish()
    }
}

impl Orchestrator {
    pub fn new(ctx: PipelineContext) -> Self {
        let (tx, _rx) = watch::channel(false);
        Self {
            ctx: Arc::new(ctx),
            cancel: Arc::new(tx),
        }
    }

    pub fn cancel_handle(&self) -> CancelHandle {
        CancelHandle {
            tx: self.cancel.clone(),
        }
    }

    /// Run `jobs` and return once every job has a result.
    ///
    /// `on_result` is called as each job finishes. Fails only for
    /// batch-level problems (engine unavailable, duplicate job ids).
    pub async fn run<F>(
        &self,
        jobs: Vec<JobSpec>,
        mode: ConcurrencyMode,
        on_result: F,
    ) -> Result<BatchResult>
    where
        F: FnMut(&JobResult),
    {
        self.run_with_progress(jobs, mode, on_result, |_, _| {})
            .await
    }

    /// Like [`Orchestrator::run`], also reporting `(job id, fraction)`
    /// progress updates.
    pub async fn run_with_progress<F, P>(
        &self,
        jobs: Vec<JobSpec>,
        mode: ConcurrencyMode,
        mut on_result: F,
        mut on_progress: P,
    ) -> Result<BatchResult>
    where
        F: FnMut(&JobResult),
        P: FnMut(&str, f64),
    {
        self.ctx.backend.check_available()?;

        let started = Instant::now();
        let mut ledger = BatchLedger::new(jobs, mode)?;
        let (tx, mut rx) = mpsc::channel::<RuntimeEvent>(64);
        let mut cancel_rx = self.cancel.subscribe();
        let mut results = Vec::with_capacity(ledger.pending_count());

        info!(jobs = ledger.pending_count(), slots = mode.slots(), "batch started");

        if *cancel_rx.borrow_and_update() {
            info!("batch cancelled before any job started");
            for result in ledger.cancel() {
                report(result, &mut on_result, &mut results);
            }
        }
        self.dispatch(&mut ledger, &tx);

        while !ledger.is_finished() {
            tokio::select! {
                event = rx.recv() => match event {
                    Some(RuntimeEvent::JobFinished(result)) => {
                        match ledger.record(&result) {
                            Ok(()) => report(*result, &mut on_result, &mut results),
                            Err(e) => error!(error = %e, "dropping unexpected result"),
                        }
                        self.dispatch(&mut ledger, &tx);
                    }
                    Some(RuntimeEvent::JobProgressed { job, fraction }) => {
                        on_progress(&job, fraction);
                    }
                    None => {
                        error!("result channel closed with jobs outstanding");
                        break;
                    }
                },
                changed = cancel_rx.changed(), if !ledger.is_cancelled() => {
                    if changed.is_ok() && *cancel_rx.borrow_and_update() {
                        info!(
                            running = ledger.running_count(),
                            pending = ledger.pending_count(),
                            "batch cancellation requested"
                        );
                        for result in ledger.cancel() {
                            report(result, &mut on_result, &mut results);
                        }
                    }
                }
            }
        }

        let batch = BatchResult {
            results,
            elapsed: started.elapsed(),
        };
        info!(
            succeeded = batch.succeeded(),
            failed = batch.failed(),
            elapsed_ms = batch.elapsed.as_millis() as u64,
            "batch finished"
        );
        Ok(batch)
    }

    /// Spawn a pipeline for every job the ledger releases.
    fn dispatch(&self, ledger: &mut BatchLedger, tx: &mpsc::Sender<RuntimeEvent>) {
        for job in ledger.next_dispatch() {
            debug!(job = %job.id(), "dispatching job");
            let ctx = self.ctx.clone();
            let tx = tx.clone();
            let cancel = self.cancel.subscribe();

            tokio::spawn(async move {
                let fallback = job.clone();
                let started = Instant::now();
                let inner = tokio::spawn(run_job(ctx, job, cancel, tx.clone()));
                let result = match inner.await {
                    Ok(result) => result,
                    Err(e) => {
                        error!(job = %fallback.id(), error = %e, "job pipeline panicked");
                        JobResult::not_launched(
                            &fallback,
                            CompletionState::CompletedFailure,
                            FailureKind::Internal,
                            format!("job pipeline failed: {e}"),
                            started.elapsed(),
                        )
                    }
                };
                if tx
                    .send(RuntimeEvent::JobFinished(Box::new(result)))
                    .await
                    .is_err()
                {
                    error!(job = %fallback.id(), "orchestrator gone; result lost");
                }
            });
        }
    }
}

/// Hand a finished job to the caller and keep it for the batch result.
fn report<F>(result: JobResult, on_result: &mut F, results: &mut Vec<JobResult>)
where
    F: FnMut(&JobResult),
{
    on_result(&result);
    results.push(result);
}
