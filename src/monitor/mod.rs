// src/monitor/mod.rs

//! Completion detection from engine side-effect artifacts.
//!
//! The engine's exit status is not trusted. A job is judged by, in priority
//! order:
//! 1. supervisor timeout / cancellation (always wins),
//! 2. a success marker in the final-results artifact,
//! 3. a failure marker or volume-accounting error in the incremental log,
//! 4. after exit: a final-results artifact without the marker (failure) or
//!    no artifact at all (crash).
//!
//! Progress comes from the latest simulation time read off the incremental
//! log, relative to the job's simulation window.
//!
//! - [`tail`] reads the log incrementally.
//! - [`artifact`] scans the final-results file for markers.
//! - [`sim_time`] parses engine timestamps.

pub mod artifact;
pub mod sim_time;
pub mod tail;

use std::path::Path;
use std::sync::Arc;

use chrono::NaiveDateTime;
use regex::Regex;
use tracing::{debug, warn};

use crate::job::{FailureKind, JobSpec};
use crate::types::CompletionState;

use artifact::{ArtifactStatus, FinalResultsProbe};
use sim_time::{SimulationWindow, find_log_timestamp, parse_engine_datetime};
use tail::LogCursor;

/// Artifact names and markers, shared by every job in a batch.
#[derive(Debug, Clone)]
pub struct MonitorSettings {
    /// Final-results file name template, e.g. `{stem}.p{suffix}.hdf`.
    pub final_results: String,
    /// Incremental log file name template, e.g. `{stem}.bco{suffix}`.
    pub progress_log: Option<String>,
    pub success_markers: Vec<String>,
    pub failure_markers: Vec<String>,
    /// First capture group is the volume-accounting error (percent).
    pub volume_error_pattern: Option<Regex>,
    pub max_volume_error_percent: Option<f64>,
}

impl Default for MonitorSettings {
    fn default() -> Self {
        Self {
            final_results: "{stem}.p{suffix}.hdf".to_string(),
            progress_log: Some("{stem}.bco{suffix}".to_string()),
            success_markers: vec![
                "Finished Successfully".to_string(),
                "Completed Successfully".to_string(),
            ],
            failure_markers: Vec::new(),
            volume_error_pattern: None,
            max_volume_error_percent: None,
        }
    }
}

/// Raw process status as seen by the supervisor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessStatus {
    Running,
    Exited { code: Option<i32> },
    TimedOut,
    Cancelled,
}

/// One evaluation of the evidence.
#[derive(Debug, Clone, PartialEq)]
pub struct Poll {
    pub state: CompletionState,
    /// Fraction of the simulation window computed so far, when known.
    pub progress: Option<f64>,
    pub failure: Option<FailureKind>,
    pub message: Option<String>,
}

impl Poll {
    fn running(progress: Option<f64>) -> Self {
        Self {
            state: CompletionState::Running,
            progress,
            failure: None,
            message: None,
        }
    }

    fn terminal(
        state: CompletionState,
        progress: Option<f64>,
        failure: Option<FailureKind>,
        message: Option<String>,
    ) -> Self {
        Self {
            state,
            progress,
            failure,
            message,
        }
    }
}

/// Per-job monitor. Holds the log cursor so every poll reads only new bytes.
#[derive(Debug)]
pub struct CompletionMonitor {
    job_id: String,
    settings: Arc<MonitorSettings>,
    probe: FinalResultsProbe,
    log: Option<LogCursor>,
    window: Option<SimulationWindow>,
    latest_time: Option<NaiveDateTime>,
    log_failure: Option<String>,
}

impl CompletionMonitor {
    pub fn for_job(workspace_root: &Path, job: &JobSpec, settings: Arc<MonitorSettings>) -> Self {
        let probe = FinalResultsProbe::new(
            workspace_root.join(job.render(&settings.final_results)),
            &settings.success_markers,
        );
        let log = settings
            .progress_log
            .as_ref()
            .map(|tpl| LogCursor::new(workspace_root.join(job.render(tpl))));

        Self {
            job_id: job.id().to_string(),
            settings,
            probe,
            log,
            window: job.window().copied(),
            latest_time: None,
            log_failure: None,
        }
    }

    /// Latest simulation time seen in the incremental log.
    pub fn latest_time(&self) -> Option<NaiveDateTime> {
        self.latest_time
    }

    /// Evaluate all evidence given the current process status.
    pub fn poll(&mut self, process: ProcessStatus) -> Poll {
        let exited = !matches!(process, ProcessStatus::Running);
        self.scan_log(exited);
        let progress = self.progress();

        match process {
            ProcessStatus::TimedOut => {
                return Poll::terminal(
                    CompletionState::TimedOut,
                    progress,
                    Some(FailureKind::Timeout),
                    Some("engine exceeded its timeout and was terminated".to_string()),
                );
            }
            ProcessStatus::Cancelled => {
                return Poll::terminal(
                    CompletionState::TimedOut,
                    progress,
                    Some(FailureKind::Cancelled),
                    Some("batch cancelled; engine terminated".to_string()),
                );
            }
            _ => {}
        }

        let artifact = match self.probe.inspect() {
            Ok(status) => status,
            Err(e) => {
                warn!(
                    job = %self.job_id,
                    path = ?self.probe.path(),
                    error = %e,
                    "could not inspect final results artifact"
                );
                ArtifactStatus::Missing
            }
        };

        if artifact == ArtifactStatus::Succeeded {
            return Poll::terminal(CompletionState::CompletedSuccess, Some(1.0), None, None);
        }

        if let Some(reason) = &self.log_failure {
            return Poll::terminal(
                CompletionState::CompletedFailure,
                progress,
                Some(FailureKind::EngineReported),
                Some(reason.clone()),
            );
        }

        match (process, artifact) {
            (ProcessStatus::Exited { .. }, ArtifactStatus::Unconfirmed) => Poll::terminal(
                CompletionState::CompletedFailure,
                progress,
                Some(FailureKind::EngineReported),
                Some("final results artifact has no success marker".to_string()),
            ),
            (ProcessStatus::Exited { .. }, _) => Poll::terminal(
                CompletionState::Crashed,
                progress,
                Some(FailureKind::Crash),
                Some("engine exited without writing final results".to_string()),
            ),
            _ => Poll::running(progress),
        }
    }

    fn progress(&self) -> Option<f64> {
        match (&self.window, self.latest_time) {
            (Some(window), Some(t)) => Some(window.fraction(t)),
            _ => None,
        }
    }

    fn scan_log(&mut self, final_read: bool) {
        let Some(cursor) = self.log.as_mut() else {
            return;
        };
        let mut lines = match cursor.read_new_lines() {
            Ok(lines) => lines,
            Err(e) => {
                debug!(job = %self.job_id, error = %e, "incremental log not readable yet");
                return;
            }
        };
        if final_read {
            lines.extend(cursor.take_partial());
        }

        for line in &lines {
            if let Some(t) = find_log_timestamp(line).and_then(parse_engine_datetime) {
                self.latest_time = Some(t);
            }
            if self.log_failure.is_none() {
                self.log_failure = self.failure_in_line(line);
            }
        }
    }

    fn failure_in_line(&self, line: &str) -> Option<String> {
        if let Some(marker) = self
            .settings
            .failure_markers
            .iter()
            .find(|m| !m.is_empty() && line.contains(m.as_str()))
        {
            return Some(format!("engine log reports failure: {marker}"));
        }

        let (Some(re), Some(limit)) = (
            &self.settings.volume_error_pattern,
            self.settings.max_volume_error_percent,
        ) else {
            return None;
        };
        let value = re
            .captures(line)
            .and_then(|c| c.get(1))
            .and_then(|m| m.as_str().parse::<f64>().ok())?;
        (value.abs() > limit).then(|| {
            format!("volume accounting error {value}% exceeds limit of {limit}%")
        })
    }
}
