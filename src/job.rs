// src/job.rs

//! Job data model: what goes into a batch (`JobSpec`) and what comes out
//! (`JobResult`, `BatchResult`).

use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::monitor::sim_time::SimulationWindow;
use crate::types::CompletionState;

/// Default per-job timeout when the catalog does not set one.
pub const DEFAULT_JOB_TIMEOUT: Duration = Duration::from_secs(2 * 60 * 60);

/// Engine options that travel with one job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendOptions {
    /// Core-count limit handed to the engine, if any.
    pub max_cores: Option<u32>,
    /// Wall-clock limit for the engine process.
    pub timeout: Duration,
    /// Ask the engine not to show its window.
    pub hide_window: bool,
}

impl Default for BackendOptions {
    fn default() -> Self {
        Self {
            max_cores: None,
            timeout: DEFAULT_JOB_TIMEOUT,
            hide_window: false,
        }
    }
}

/// One unit of work: a plan computed against a shared base project.
///
/// Immutable once built. The `id` is the plan's component suffix (e.g. `"03"`
/// for `model.p03`), which also tags every output file the engine writes for
/// it.
#[derive(Debug, Clone)]
pub struct JobSpec {
    id: String,
    plan: String,
    project_file: PathBuf,
    plan_file: String,
    geometry_file: Option<String>,
    flow_file: Option<String>,
    external_input: Option<PathBuf>,
    window: Option<SimulationWindow>,
    options: BackendOptions,
}

impl JobSpec {
    /// `project_file` is the absolute path to the base project's main file;
    /// `plan_file` is the plan file's name inside the project directory.
    pub fn new(
        id: impl Into<String>,
        plan: impl Into<String>,
        project_file: impl Into<PathBuf>,
        plan_file: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            plan: plan.into(),
            project_file: project_file.into(),
            plan_file: plan_file.into(),
            geometry_file: None,
            flow_file: None,
            external_input: None,
            window: None,
            options: BackendOptions::default(),
        }
    }

    pub fn with_components(mut self, geometry: Option<String>, flow: Option<String>) -> Self {
        self.geometry_file = geometry;
        self.flow_file = flow;
        self
    }

    pub fn with_external_input(mut self, path: impl Into<PathBuf>) -> Self {
        self.external_input = Some(path.into());
        self
    }

    pub fn with_window(mut self, window: SimulationWindow) -> Self {
        self.window = Some(window);
        self
    }

    pub fn with_options(mut self, options: BackendOptions) -> Self {
        self.options = options;
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Plan title as the engine knows it.
    pub fn plan(&self) -> &str {
        &self.plan
    }

    /// Plan key as written in the project file (`p` + suffix).
    pub fn plan_key(&self) -> String {
        format!("p{}", self.id)
    }

    pub fn project_file(&self) -> &Path {
        &self.project_file
    }

    /// Directory holding the base project tree.
    pub fn project_dir(&self) -> &Path {
        self.project_file.parent().unwrap_or_else(|| Path::new("."))
    }

    /// Project file name without its extension (`model` for `model.prj`).
    pub fn project_stem(&self) -> String {
        self.project_file
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default()
    }

    pub fn plan_file(&self) -> &str {
        &self.plan_file
    }

    pub fn geometry_file(&self) -> Option<&str> {
        self.geometry_file.as_deref()
    }

    pub fn flow_file(&self) -> Option<&str> {
        self.flow_file.as_deref()
    }

    /// Absolute path of a large shared input that the workspace must keep
    /// referencing at its original location.
    pub fn external_input(&self) -> Option<&Path> {
        self.external_input.as_deref()
    }

    pub fn window(&self) -> Option<&SimulationWindow> {
        self.window.as_ref()
    }

    pub fn options(&self) -> &BackendOptions {
        &self.options
    }

    /// Expand `{stem}`, `{suffix}`, `{plan}`, `{plan_key}` and `{plan_file}`
    /// in a file name or argument template.
    pub fn render(&self, template: &str) -> String {
        template
            .replace("{stem}", &self.project_stem())
            .replace("{suffix}", &self.id)
            .replace("{plan_key}", &self.plan_key())
            .replace("{plan_file}", &self.plan_file)
            .replace("{plan}", &self.plan)
    }
}

/// Why a job did not complete successfully.
///
/// Distinguishes "the simulation itself failed" (`Crash`, `EngineReported`,
/// `Timeout`) from "orchestration failed" (`WorkspaceCreation`, `Rewrite`,
/// `Launch`, `Internal`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum FailureKind {
    WorkspaceCreation,
    Rewrite,
    Launch,
    Timeout,
    Cancelled,
    Crash,
    EngineReported,
    Internal,
}

impl FailureKind {
    /// True for failures caused by the orchestrator rather than the engine.
    pub fn is_infrastructure(&self) -> bool {
        matches!(
            self,
            FailureKind::WorkspaceCreation
                | FailureKind::Rewrite
                | FailureKind::Launch
                | FailureKind::Internal
        )
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            FailureKind::WorkspaceCreation => "workspace creation error",
            FailureKind::Rewrite => "reference rewrite error",
            FailureKind::Launch => "launch error",
            FailureKind::Timeout => "timeout",
            FailureKind::Cancelled => "cancelled",
            FailureKind::Crash => "engine crash",
            FailureKind::EngineReported => "engine-reported failure",
            FailureKind::Internal => "internal orchestration error",
        };
        f.write_str(s)
    }
}

/// Final record for one job. Produced exactly once per submitted `JobSpec`.
#[derive(Debug, Clone, Serialize)]
pub struct JobResult {
    pub id: String,
    pub plan: String,
    pub state: CompletionState,
    pub failure: Option<FailureKind>,
    pub elapsed: Duration,
    pub exit_code: Option<i32>,
    pub message: Option<String>,
    /// Paths (in the results directory) of harvested output files.
    pub harvested: Vec<PathBuf>,
    /// Harvest and cleanup warnings; they never change `state`.
    pub warnings: Vec<String>,
    /// Set when the workspace was kept (cleanup disabled).
    pub workspace: Option<PathBuf>,
    pub launched_at: Option<DateTime<Utc>>,
    pub exited_at: Option<DateTime<Utc>>,
}

impl JobResult {
    /// A result for a job that never reached the engine.
    pub fn not_launched(
        job: &JobSpec,
        state: CompletionState,
        failure: FailureKind,
        message: impl Into<String>,
        elapsed: Duration,
    ) -> Self {
        Self {
            id: job.id().to_string(),
            plan: job.plan().to_string(),
            state,
            failure: Some(failure),
            elapsed,
            exit_code: None,
            message: Some(message.into()),
            harvested: Vec::new(),
            warnings: Vec::new(),
            workspace: None,
            launched_at: None,
            exited_at: None,
        }
    }

    pub fn succeeded(&self) -> bool {
        self.state.is_success()
    }

    /// One-line human-readable status, e.g. `03 (plan03): timed-out after 2.0s`.
    pub fn summary_line(&self) -> String {
        let mut line = format!(
            "{} ({}): {} after {:.1}s",
            self.id,
            self.plan,
            self.state,
            self.elapsed.as_secs_f64()
        );
        if let Some(kind) = self.failure {
            line.push_str(&format!(" [{kind}]"));
        }
        if let Some(msg) = &self.message {
            line.push_str(&format!(" - {msg}"));
        }
        line
    }
}

/// Aggregate over one Orchestrator run, in reporting order.
#[derive(Debug, Clone, Default, Serialize)]
pub struct BatchResult {
    pub results: Vec<JobResult>,
    pub elapsed: Duration,
}

impl BatchResult {
    pub fn succeeded(&self) -> usize {
        self.results.iter().filter(|r| r.succeeded()).count()
    }

    pub fn failed(&self) -> usize {
        self.results.len() - self.succeeded()
    }

    pub fn all_succeeded(&self) -> bool {
        self.failed() == 0
    }

    pub fn get(&self, id: &str) -> Option<&JobResult> {
        self.results.iter().find(|r| r.id == id)
    }
}
