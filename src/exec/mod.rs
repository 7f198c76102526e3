// src/exec/mod.rs

//! Engine execution layer.
//!
//! This module starts the external engine for one job and keeps it under
//! control until a verdict is reached:
//!
//! - [`backend`] provides the `ExecutionBackend` trait and the command-line
//!   `SubprocessBackend`.
//! - [`automation`] drives the engine through an automation host session.
//! - [`process`] owns the spawned process group and tree termination.
//! - [`supervisor`] polls liveness, enforces the timeout and consults the
//!   completion monitor.
//! - [`discovery`] resolves the engine installation before any job runs.

pub mod automation;
pub mod backend;
pub mod discovery;
pub mod process;
pub mod supervisor;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use crate::errors::Result;
use crate::types::BackendKind;

pub use automation::{AutomationBackend, AutomationSession};
pub use backend::{ExecutionBackend, SubprocessBackend, SubprocessOptions};
pub use process::ProcessHandle;
pub use supervisor::{Supervision, SupervisorSettings, deadline_after, supervise};

/// Everything needed to pick and build the batch's backend.
#[derive(Debug, Clone)]
pub struct EngineSettings {
    pub backend: BackendKind,
    /// Engine (subprocess) or automation host program: a path or a name to
    /// look up on `PATH`.
    pub program: String,
    /// Argument templates; `None` uses the backend's default.
    pub args: Option<Vec<String>>,
    pub max_cores_flag: Option<String>,
    pub hide_flag: Option<String>,
    pub search_paths: Vec<PathBuf>,
    pub reply_timeout: Duration,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            backend: BackendKind::Subprocess,
            program: "Ras.exe".to_string(),
            args: None,
            max_cores_flag: Some("-MaxCores".to_string()),
            hide_flag: None,
            search_paths: discovery::DEFAULT_SEARCH_PATHS
                .iter()
                .map(PathBuf::from)
                .collect(),
            reply_timeout: automation::DEFAULT_REPLY_TIMEOUT,
        }
    }
}

/// Resolve the engine and build the one backend used for the whole batch.
///
/// Fails with `EngineUnavailable` when the engine cannot be found.
pub fn build_backend(settings: &EngineSettings) -> Result<Arc<dyn ExecutionBackend>> {
    let program =
        discovery::locate_engine(settings.backend, &settings.program, &settings.search_paths)?;

    let backend: Arc<dyn ExecutionBackend> = match settings.backend {
        BackendKind::Subprocess => Arc::new(SubprocessBackend::new(
            program,
            SubprocessOptions {
                args: settings
                    .args
                    .clone()
                    .unwrap_or_else(backend::default_subprocess_args),
                max_cores_flag: settings.max_cores_flag.clone(),
                hide_flag: settings.hide_flag.clone(),
            },
        )),
        BackendKind::Automation => Arc::new(AutomationBackend::new(
            program,
            settings.args.clone().unwrap_or_default(),
            settings.reply_timeout,
        )),
    };
    Ok(backend)
}
