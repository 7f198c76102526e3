// src/engine/pipeline.rs

//! One job, start to finish.
//!
//! workspace → references → launch → supervise/monitor → harvest → cleanup.
//!
//! Every failure scoped to the job ends up in its `JobResult`; nothing here
//! returns an error to the orchestrator.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{mpsc, watch};
use tracing::{error, info, warn};

use crate::exec::{ExecutionBackend, SupervisorSettings, deadline_after, supervise};
use crate::harvest::ResultHarvester;
use crate::job::{FailureKind, JobResult, JobSpec};
use crate::monitor::{CompletionMonitor, MonitorSettings};
use crate::types::CompletionState;
use crate::workspace::{Workspace, WorkspaceManager};

use super::RuntimeEvent;

/// Shared, read-only collaborators for all job pipelines of a batch.
pub struct PipelineContext {
    pub workspaces: Arc<WorkspaceManager>,
    pub backend: Arc<dyn ExecutionBackend>,
    pub monitor: Arc<MonitorSettings>,
    pub harvester: Arc<ResultHarvester>,
    pub supervisor: SupervisorSettings,
    /// Where outputs go; the job's project directory when `None`.
    pub results_dir: Option<PathBuf>,
    /// Remove workspaces after harvest.
    pub cleanup: bool,
}

impl std::fmt::Debug for PipelineContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PipelineContext")
            .field("backend", &self.backend.kind())
            .field("workspace_root", &self.workspaces.root())
            .field("results_dir", &self.results_dir)
            .field("cleanup", &self.cleanup)
            .finish_non_exhaustive()
    }
}

/// Run one job's pipeline to a terminal `JobResult`.
///
/// Progress fractions are sent on `events` as `JobProgressed`; the final
/// result is returned, not sent.
pub async fn run_job(
    ctx: Arc<PipelineContext>,
    job: JobSpec,
    cancel: watch::Receiver<bool>,
    events: mpsc::Sender<RuntimeEvent>,
) -> JobResult {
    let started = Instant::now();

    if *cancel.borrow() {
        return JobResult::not_launched(
            &job,
            CompletionState::TimedOut,
            FailureKind::Cancelled,
            "batch cancelled before the job started",
            started.elapsed(),
        );
    }

    // Workspace copy is blocking IO of arbitrary size.
    let created = {
        let manager = ctx.workspaces.clone();
        let job = job.clone();
        tokio::task::spawn_blocking(move || manager.create(&job)).await
    };
    let workspace = match created {
        Ok(Ok(ws)) => ws,
        Ok(Err(e)) => {
            warn!(job = %job.id(), error = %e, "workspace creation failed");
            return JobResult::not_launched(
                &job,
                CompletionState::CompletedFailure,
                FailureKind::WorkspaceCreation,
                e.to_string(),
                started.elapsed(),
            );
        }
        Err(e) => {
            error!(job = %job.id(), error = %e, "workspace task failed");
            return JobResult::not_launched(
                &job,
                CompletionState::CompletedFailure,
                FailureKind::Internal,
                format!("workspace task failed: {e}"),
                started.elapsed(),
            );
        }
    };

    let prepared = {
        let manager = ctx.workspaces.clone();
        let ws = workspace.clone();
        let job = job.clone();
        tokio::task::spawn_blocking(move || manager.prepare(&ws, &job)).await
    };
    let prepare_failure = match prepared {
        Ok(Ok(changed)) => {
            info!(job = %job.id(), files = changed.len(), "workspace prepared");
            None
        }
        Ok(Err(e)) => Some(e.to_string()),
        Err(e) => Some(format!("prepare task failed: {e}")),
    };
    if let Some(reason) = prepare_failure {
        warn!(job = %job.id(), error = %reason, "workspace preparation failed");
        let mut result = JobResult::not_launched(
            &job,
            CompletionState::CompletedFailure,
            FailureKind::Rewrite,
            reason,
            started.elapsed(),
        );
        finish_workspace(&ctx, &workspace, &mut result).await;
        return result;
    }

    if *cancel.borrow() {
        let mut result = JobResult::not_launched(
            &job,
            CompletionState::TimedOut,
            FailureKind::Cancelled,
            "batch cancelled before the engine was launched",
            started.elapsed(),
        );
        finish_workspace(&ctx, &workspace, &mut result).await;
        return result;
    }

    // A launch can be a multi-step handshake, so it is bounded by the job's
    // timeout and the batch cancel signal as well. Dropping the launch future
    // drops its ProcessHandle, which kills the tree without further requests.
    let launch_deadline = deadline_after(tokio::time::Instant::now(), job.options().timeout);
    let mut launch_cancel = cancel.clone();
    let launch_outcome = tokio::select! {
        launched = ctx.backend.launch(&workspace, &job) => match launched {
            Ok(handle) => Ok(handle),
            Err(e) => {
                warn!(job = %job.id(), error = %e, "engine launch failed");
                Err((CompletionState::CompletedFailure, FailureKind::Launch, e.to_string()))
            }
        },
        _ = tokio::time::sleep_until(launch_deadline) => {
            warn!(job = %job.id(), "engine launch exceeded the job timeout; killing process tree");
            Err((
                CompletionState::TimedOut,
                FailureKind::Timeout,
                "engine did not finish starting within its timeout and was terminated".to_string(),
            ))
        }
        _ = wait_for_cancel(&mut launch_cancel) => {
            info!(job = %job.id(), "batch cancelled during launch; killing process tree");
            Err((
                CompletionState::TimedOut,
                FailureKind::Cancelled,
                "batch cancelled while the engine was starting".to_string(),
            ))
        }
    };
    let handle = match launch_outcome {
        Ok(handle) => handle,
        Err((state, failure, message)) => {
            let mut result =
                JobResult::not_launched(&job, state, failure, message, started.elapsed());
            finish_workspace(&ctx, &workspace, &mut result).await;
            return result;
        }
    };

    let monitor = CompletionMonitor::for_job(workspace.root(), &job, ctx.monitor.clone());
    let job_id = job.id().to_string();
    let mut on_progress = |fraction: f64| {
        // Progress is advisory; a full channel just drops an update.
        let _ = events.try_send(RuntimeEvent::JobProgressed {
            job: job_id.clone(),
            fraction,
        });
    };
    let outcome = supervise(
        handle,
        monitor,
        job.options().timeout,
        ctx.supervisor,
        cancel,
        &mut on_progress,
    )
    .await;

    let mut message = outcome.message;
    if outcome.state == CompletionState::Crashed {
        let exit = ctx.backend.describe_exit(outcome.exit_code);
        message = Some(match message {
            Some(m) => format!("{m} ({exit})"),
            None => exit,
        });
    }

    let mut result = JobResult {
        id: job.id().to_string(),
        plan: job.plan().to_string(),
        state: outcome.state,
        failure: outcome.failure,
        elapsed: Duration::ZERO,
        exit_code: outcome.exit_code,
        message,
        harvested: Vec::new(),
        warnings: Vec::new(),
        workspace: None,
        launched_at: Some(outcome.launched_at),
        exited_at: Some(outcome.exited_at),
    };

    let target = ctx
        .results_dir
        .clone()
        .unwrap_or_else(|| job.project_dir().to_path_buf());
    let harvested = {
        let harvester = ctx.harvester.clone();
        let root = workspace.root().to_path_buf();
        let job = job.clone();
        tokio::task::spawn_blocking(move || harvester.harvest(&root, &job, &target)).await
    };
    match harvested {
        Ok(Ok(report)) => {
            result.harvested = report.harvested;
            result.warnings.extend(report.warnings);
        }
        Ok(Err(e)) => {
            warn!(job = %job.id(), error = %e, "harvest failed");
            result.warnings.push(format!("harvest failed: {e}"));
        }
        Err(e) => {
            error!(job = %job.id(), error = %e, "harvest task failed");
            result.warnings.push(format!("harvest task failed: {e}"));
        }
    }

    finish_workspace(&ctx, &workspace, &mut result).await;
    result.elapsed = started.elapsed();

    info!(
        job = %result.id,
        state = %result.state,
        harvested = result.harvested.len(),
        elapsed_ms = result.elapsed.as_millis() as u64,
        "job finished"
    );
    result
}

/// Resolves once `cancel` turns true; never, if the sender is gone first.
async fn wait_for_cancel(cancel: &mut watch::Receiver<bool>) {
    loop {
        if *cancel.borrow_and_update() {
            return;
        }
        if cancel.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

/// Destroy or keep the workspace, recording the outcome on `result`.
async fn finish_workspace(ctx: &PipelineContext, workspace: &Workspace, result: &mut JobResult) {
    if ctx.cleanup {
        if let Some(warning) = ctx.workspaces.destroy(workspace).await {
            result.warnings.push(warning);
            result.workspace = Some(workspace.root().to_path_buf());
        }
    } else {
        info!(job = %workspace.job_id(), workspace = ?workspace.root(), "keeping workspace");
        result.workspace = Some(workspace.root().to_path_buf());
    }
}
