// src/exec/backend.rs

//! Pluggable engine launch abstraction.
//!
//! The orchestrator talks to an `ExecutionBackend` chosen once per run and
//! never branches on which one it has. A backend only reports whether the
//! launch itself worked; job success is decided by the completion monitor.
//!
//! - [`SubprocessBackend`] runs the engine's command-line entry point.
//! - [`super::automation::AutomationBackend`] drives an automation host.
//! - Tests provide their own implementations that spawn scripted engines.

use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::process::Stdio;

use tokio::process::Command;
use tracing::info;

use crate::errors::{Result, SimbatchError};
use crate::job::JobSpec;
use crate::types::BackendKind;
use crate::workspace::Workspace;

use super::process::{ProcessHandle, drain_output, isolate_process_tree};

/// Trait abstracting how the engine is started for one job.
pub trait ExecutionBackend: Send + Sync {
    fn kind(&self) -> BackendKind;

    /// Batch-level installation check. An error here means no job starts.
    fn check_available(&self) -> Result<()>;

    /// Start the engine for `job` inside `workspace`.
    fn launch<'a>(
        &'a self,
        workspace: &'a Workspace,
        job: &'a JobSpec,
    ) -> Pin<Box<dyn Future<Output = Result<ProcessHandle>> + Send + 'a>>;

    /// Human-readable description of a raw exit status.
    fn describe_exit(&self, code: Option<i32>) -> String {
        match code {
            Some(c) => format!("engine exited with code {c}"),
            None => "engine was terminated by a signal".to_string(),
        }
    }
}

/// Expand argument templates for one job.
///
/// Workspace placeholders: `{project}` (workspace project file),
/// `{plan_path}` (workspace plan file), `{workspace}`. Job placeholders are
/// handled by [`JobSpec::render`].
pub fn render_args(templates: &[String], workspace: &Workspace, job: &JobSpec) -> Vec<String> {
    let project = workspace.project_file().to_string_lossy();
    let plan_path = workspace.plan_file().to_string_lossy();
    let root = workspace.root().to_string_lossy();
    templates
        .iter()
        .map(|t| {
            let t = t
                .replace("{project}", &project)
                .replace("{plan_path}", &plan_path)
                .replace("{workspace}", &root);
            job.render(&t)
        })
        .collect()
}

/// Ask the OS not to create a console window for the engine.
pub fn hide_console(cmd: &mut Command) {
    #[cfg(windows)]
    {
        const CREATE_NO_WINDOW: u32 = 0x0800_0000;
        cmd.creation_flags(CREATE_NO_WINDOW);
    }
    #[cfg(not(windows))]
    let _ = cmd;
}

/// Command-line options for [`SubprocessBackend`].
#[derive(Debug, Clone)]
pub struct SubprocessOptions {
    pub args: Vec<String>,
    /// Flag followed by the job's core limit, e.g. `-MaxCores`.
    pub max_cores_flag: Option<String>,
    /// Flag asking the engine to run headless.
    pub hide_flag: Option<String>,
}

impl Default for SubprocessOptions {
    fn default() -> Self {
        Self {
            args: default_subprocess_args(),
            max_cores_flag: Some("-MaxCores".to_string()),
            hide_flag: None,
        }
    }
}

pub fn default_subprocess_args() -> Vec<String> {
    vec![
        "-c".to_string(),
        "{project}".to_string(),
        "{plan_path}".to_string(),
    ]
}

/// Runs the engine's command-line entry point, one process per job.
#[derive(Debug, Clone)]
pub struct SubprocessBackend {
    program: PathBuf,
    options: SubprocessOptions,
}

impl SubprocessBackend {
    /// `program` should already be resolved (see `discovery::locate_engine`).
    pub fn new(program: impl Into<PathBuf>, options: SubprocessOptions) -> Self {
        Self {
            program: program.into(),
            options,
        }
    }

    pub fn program(&self) -> &Path {
        &self.program
    }

    /// Full argument list for `job`.
    pub fn command_args(&self, workspace: &Workspace, job: &JobSpec) -> Vec<String> {
        let mut args = render_args(&self.options.args, workspace, job);
        if let (Some(flag), Some(cores)) = (&self.options.max_cores_flag, job.options().max_cores) {
            args.push(flag.clone());
            args.push(cores.to_string());
        }
        if job.options().hide_window {
            if let Some(flag) = &self.options.hide_flag {
                args.push(flag.clone());
            }
        }
        args
    }
}

impl ExecutionBackend for SubprocessBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Subprocess
    }

    fn check_available(&self) -> Result<()> {
        if self.program.is_file() || which::which(&self.program).is_ok() {
            Ok(())
        } else {
            Err(SimbatchError::EngineUnavailable {
                backend: self.kind(),
                reason: format!("{:?} is not an executable file", self.program),
            })
        }
    }

    fn launch<'a>(
        &'a self,
        workspace: &'a Workspace,
        job: &'a JobSpec,
    ) -> Pin<Box<dyn Future<Output = Result<ProcessHandle>> + Send + 'a>> {
        Box::pin(async move {
            let args = self.command_args(workspace, job);
            info!(
                job = %job.id(),
                program = ?self.program,
                ?args,
                "launching engine"
            );

            let mut cmd = Command::new(&self.program);
            cmd.args(&args)
                .current_dir(workspace.root())
                .stdin(Stdio::null())
                .stdout(Stdio::piped())
                .stderr(Stdio::piped());
            isolate_process_tree(&mut cmd);
            if job.options().hide_window {
                hide_console(&mut cmd);
            }

            let mut child = cmd.spawn().map_err(|e| SimbatchError::Launch {
                job: job.id().to_string(),
                reason: format!("spawning {:?}: {e}", self.program),
            })?;

            if let Some(out) = child.stdout.take() {
                drain_output(job.id(), "stdout", out);
            }
            if let Some(err) = child.stderr.take() {
                drain_output(job.id(), "stderr", err);
            }

            Ok(ProcessHandle::new(job.id(), child))
        })
    }
}
