// src/engine/mod.rs

//! Batch orchestration for simbatch.
//!
//! This module ties together:
//! - the batch ledger (which jobs may start, exactly-once result accounting)
//! - the per-job pipeline (workspace, launch, supervision, harvest, cleanup)
//! - the async runtime loop that reacts to:
//!   - job results
//!   - job progress updates
//!   - cancellation requests
//!
//! The pure core lives in [`core`]; the async/IO shell is implemented in
//! [`runtime`] and [`pipeline`].

use crate::job::JobResult;

/// Events flowing from job pipelines into the runtime loop.
#[derive(Debug, Clone)]
pub enum RuntimeEvent {
    /// A running job reported a new simulated-time fraction in `[0, 1]`.
    JobProgressed { job: String, fraction: f64 },
    /// A job reached its terminal result.
    JobFinished(Box<JobResult>),
}

pub mod core;
pub mod pipeline;
pub mod runtime;

pub use core::BatchLedger;
pub use pipeline::{PipelineContext, run_job};
pub use runtime::{CancelHandle, Orchestrator};
