// src/engine/core.rs

//! Pure batch bookkeeping.
//!
//! The [`BatchLedger`] decides which jobs may start and keeps the
//! exactly-once accounting of results. The async shell
//! (`engine::runtime::Orchestrator`) is responsible for:
//! - spawning job pipelines for what the ledger dispatches
//! - receiving results from the channel
//! - reacting to cancellation
//!
//! The ledger has no channels, no Tokio types and does no IO, so its rules
//! are unit tested directly.

use std::collections::{BTreeSet, VecDeque};
use std::time::Duration;

use crate::errors::{Result, SimbatchError};
use crate::job::{FailureKind, JobResult, JobSpec};
use crate::types::{CompletionState, ConcurrencyMode};

/// Scheduling and accounting state for one batch.
#[derive(Debug)]
pub struct BatchLedger {
    pending: VecDeque<JobSpec>,
    submitted: BTreeSet<String>,
    running: BTreeSet<String>,
    reported: BTreeSet<String>,
    slots: usize,
    cancelled: bool,
}

impl BatchLedger {
    /// Rejects batches that submit the same job id twice, since results
    /// are keyed by id.
    pub fn new(jobs: Vec<JobSpec>, mode: ConcurrencyMode) -> Result<Self> {
        let mut submitted = BTreeSet::new();
        for job in &jobs {
            if !submitted.insert(job.id().to_string()) {
                return Err(SimbatchError::ConfigError(format!(
                    "job '{}' submitted more than once",
                    job.id()
                )));
            }
        }
        Ok(Self {
            pending: jobs.into(),
            submitted,
            running: BTreeSet::new(),
            reported: BTreeSet::new(),
            slots: mode.slots(),
            cancelled: false,
        })
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    pub fn running_count(&self) -> usize {
        self.running.len()
    }

    pub fn reported_count(&self) -> usize {
        self.reported.len()
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled
    }

    /// True once every submitted job has reported.
    pub fn is_finished(&self) -> bool {
        self.reported.len() == self.submitted.len()
    }

    /// Jobs to start now, in submission order, filling free slots.
    pub fn next_dispatch(&mut self) -> Vec<JobSpec> {
        let mut out = Vec::new();
        if self.cancelled {
            return out;
        }
        while self.running.len() < self.slots {
            let Some(job) = self.pending.pop_front() else {
                break;
            };
            self.running.insert(job.id().to_string());
            out.push(job);
        }
        out
    }

    /// Account for a finished job and free its slot.
    ///
    /// Unknown ids and second reports for the same job are rejected.
    pub fn record(&mut self, result: &JobResult) -> Result<()> {
        if !self.submitted.contains(&result.id) {
            return Err(SimbatchError::Other(anyhow::anyhow!(
                "result for unknown job '{}'",
                result.id
            )));
        }
        if !self.reported.insert(result.id.clone()) {
            return Err(SimbatchError::Other(anyhow::anyhow!(
                "duplicate result for job '{}'",
                result.id
            )));
        }
        self.running.remove(&result.id);
        Ok(())
    }

    /// Stop dispatching. Jobs that never started are reported here as
    /// cancelled; running jobs report through their pipelines.
    pub fn cancel(&mut self) -> Vec<JobResult> {
        self.cancelled = true;
        let mut out = Vec::new();
        while let Some(job) = self.pending.pop_front() {
            let result = JobResult::not_launched(
                &job,
                CompletionState::TimedOut,
                FailureKind::Cancelled,
                "batch cancelled before the job started",
                Duration::ZERO,
            );
            self.reported.insert(result.id.clone());
            out.push(result);
        }
        out
    }
}
