// src/exec/supervisor.rs

//! Supervision of one launched engine process.
//!
//! The supervisor polls instead of blocking on `wait()`, so it can enforce
//! the job's timeout, react to batch cancellation, and feed the
//! [`CompletionMonitor`] at a steady interval. Whatever the verdict, the
//! process tree is gone when [`supervise`] returns.

use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::job::FailureKind;
use crate::monitor::{CompletionMonitor, Poll, ProcessStatus};
use crate::types::CompletionState;

use super::process::ProcessHandle;

/// Timing knobs shared by all jobs of a batch.
#[derive(Debug, Clone, Copy)]
pub struct SupervisorSettings {
    /// How often liveness and artifacts are checked.
    pub poll_interval: Duration,
    /// How long a process judged complete may take to exit by itself before
    /// its tree is killed.
    pub exit_grace: Duration,
}

impl Default for SupervisorSettings {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(1),
            exit_grace: Duration::from_secs(5),
        }
    }
}

/// Terminal outcome of one supervised run.
#[derive(Debug, Clone)]
pub struct Supervision {
    pub state: CompletionState,
    pub failure: Option<FailureKind>,
    pub message: Option<String>,
    pub progress: Option<f64>,
    pub exit_code: Option<i32>,
    pub launched_at: DateTime<Utc>,
    pub exited_at: DateTime<Utc>,
}

/// `start + timeout`, or about thirty years out when that overflows.
pub fn deadline_after(start: Instant, timeout: Duration) -> Instant {
    start
        .checked_add(timeout)
        .unwrap_or_else(|| start + Duration::from_secs(86_400 * 365 * 30))
}

/// Watch `handle` until the monitor reaches a terminal verdict, the timeout
/// fires, or `cancel` turns true.
///
/// `on_progress` is called whenever the progress fraction changes.
pub async fn supervise(
    mut handle: ProcessHandle,
    mut monitor: CompletionMonitor,
    timeout: Duration,
    settings: SupervisorSettings,
    mut cancel: watch::Receiver<bool>,
    on_progress: &mut (dyn FnMut(f64) + Send),
) -> Supervision {
    let job = handle.job_id().to_string();
    let deadline = deadline_after(Instant::from_std(handle.started()), timeout);
    let mut last_progress: Option<f64> = None;
    let mut cancel_open = true;

    info!(job = %job, pid = ?handle.pid(), timeout_s = timeout.as_secs_f64(), "supervising engine");

    let poll = loop {
        let status = match handle.try_wait() {
            Ok(Some(exit)) => ProcessStatus::Exited { code: exit.code() },
            Ok(None) => ProcessStatus::Running,
            Err(e) => {
                warn!(job = %job, error = %e, "could not query engine process; treating it as exited");
                ProcessStatus::Exited { code: None }
            }
        };

        let status = match status {
            ProcessStatus::Running if *cancel.borrow() => {
                info!(job = %job, "batch cancelled; killing engine process tree");
                ProcessStatus::Cancelled
            }
            ProcessStatus::Running if Instant::now() >= deadline => {
                warn!(
                    job = %job,
                    elapsed_ms = handle.elapsed().as_millis() as u64,
                    "engine timed out; killing process tree"
                );
                ProcessStatus::TimedOut
            }
            other => other,
        };

        if matches!(status, ProcessStatus::TimedOut | ProcessStatus::Cancelled) {
            if let Err(e) = handle.kill_tree().await {
                warn!(job = %job, error = %e, "failed to kill engine process tree");
            }
        }

        // Artifact scans read files of arbitrary size.
        let checked = tokio::task::spawn_blocking(move || {
            let poll = monitor.poll(status);
            (monitor, poll)
        })
        .await;
        let poll = match checked {
            Ok((returned, poll)) => {
                monitor = returned;
                poll
            }
            Err(e) => {
                error!(job = %job, error = %e, "completion check failed");
                break Poll {
                    state: CompletionState::CompletedFailure,
                    progress: last_progress,
                    failure: Some(FailureKind::Internal),
                    message: Some(format!("completion check failed: {e}")),
                };
            }
        };
        if let Some(p) = poll.progress {
            if last_progress != Some(p) {
                last_progress = Some(p);
                on_progress(p);
            }
        }
        if poll.state.is_terminal() {
            break poll;
        }

        let now = Instant::now();
        let wait = settings
            .poll_interval
            .min(deadline.saturating_duration_since(now))
            .max(Duration::from_millis(10));
        tokio::select! {
            _ = tokio::time::sleep(wait) => {}
            changed = cancel.changed(), if cancel_open => {
                if changed.is_err() {
                    cancel_open = false;
                }
            }
        }
    };

    // Verdict reached while the engine is still up: let it close cleanly,
    // then take the tree down regardless.
    if handle.exit_status().is_none() {
        handle.release().await;
        match handle.wait_for_exit(settings.exit_grace).await {
            Ok(Some(_)) => debug!(job = %job, "engine exited after completion"),
            Ok(None) => debug!(job = %job, "engine still running after grace period"),
            Err(e) => debug!(job = %job, error = %e, "waiting for engine exit failed"),
        }
    }
    // Sweeps helper processes left in the group as well.
    if let Err(e) = handle.kill_tree().await {
        warn!(job = %job, error = %e, "failed to kill engine process tree");
    }

    let exit_code = handle.exit_status().and_then(|s| s.code());
    info!(
        job = %job,
        state = %poll.state,
        exit_code = ?exit_code,
        elapsed_ms = handle.elapsed().as_millis() as u64,
        "engine supervision finished"
    );

    Supervision {
        state: poll.state,
        failure: poll.failure,
        message: poll.message,
        progress: poll.progress,
        exit_code,
        launched_at: handle.launched_at(),
        exited_at: Utc::now(),
    }
}
