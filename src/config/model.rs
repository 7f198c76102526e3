// src/config/model.rs

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::Deserialize;

use crate::harvest;
use crate::types::{BackendKind, ModeSetting};

/// Configuration as read from a TOML file, before validation.
///
/// ```toml
/// [config]
/// mode = "parallel"
/// max_concurrency = 4
///
/// [engine]
/// backend = "subprocess"
/// program = "Ras.exe"
///
/// [job.01]
/// project = "river/model.prj"
/// plan = "Base run"
///
/// [job.03]
/// project = "river/model.prj"
/// plan = "Dam breach"
/// timeout = "4h"
/// ```
///
/// All sections except `[job.*]` are optional and have defaults.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct RawConfigFile {
    #[serde(default)]
    pub config: ConfigSection,

    #[serde(default)]
    pub engine: EngineSection,

    #[serde(default)]
    pub monitor: MonitorSection,

    #[serde(default)]
    pub workspace: WorkspaceSection,

    #[serde(default)]
    pub harvest: HarvestSection,

    /// Job catalog from `[job.<suffix>]`.
    ///
    /// Keys are plan suffixes (`"01"`, `"03"`), which double as job ids.
    #[serde(default)]
    pub job: BTreeMap<String, JobConfig>,
}

/// Validated configuration. Built from [`RawConfigFile`] via `TryFrom`.
#[derive(Debug, Clone)]
pub struct ConfigFile {
    pub config: ConfigSection,
    pub engine: EngineSection,
    pub monitor: MonitorSection,
    pub workspace: WorkspaceSection,
    pub harvest: HarvestSection,
    pub job: BTreeMap<String, JobConfig>,
}

impl ConfigFile {
    /// Assemble a config without validation; use `ConfigFile::try_from`.
    pub(crate) fn new_unchecked(raw: RawConfigFile) -> Self {
        Self {
            config: raw.config,
            engine: raw.engine,
            monitor: raw.monitor,
            workspace: raw.workspace,
            harvest: raw.harvest,
            job: raw.job,
        }
    }
}

/// `[config]` section: batch-wide behaviour.
#[derive(Debug, Clone, Deserialize)]
pub struct ConfigSection {
    /// `"parallel"` (default) or `"sequential"`.
    #[serde(default)]
    pub mode: ModeSetting,

    /// Parallel slot count; half the available cores when unset.
    #[serde(default)]
    pub max_concurrency: Option<usize>,

    /// Remove workspaces once their outputs are harvested.
    #[serde(default = "default_true")]
    pub cleanup: bool,

    /// How often running jobs are polled, e.g. `"1s"`.
    #[serde(default = "default_poll_interval")]
    pub poll_interval: String,

    /// How long to wait for the engine to exit after a verdict.
    #[serde(default = "default_exit_grace")]
    pub exit_grace: String,

    /// Default per-job timeout; `[job.*].timeout` overrides it.
    #[serde(default = "default_timeout")]
    pub timeout: String,

    /// Where harvested outputs go; each job's project directory when unset.
    #[serde(default)]
    pub results_dir: Option<PathBuf>,

    /// Parent directory for workspaces; the system temp dir when unset.
    #[serde(default)]
    pub workspace_root: Option<PathBuf>,
}

fn default_true() -> bool {
    true
}

fn default_poll_interval() -> String {
    "1s".to_string()
}

fn default_exit_grace() -> String {
    "5s".to_string()
}

fn default_timeout() -> String {
    "2h".to_string()
}

impl Default for ConfigSection {
    fn default() -> Self {
        Self {
            mode: ModeSetting::default(),
            max_concurrency: None,
            cleanup: true,
            poll_interval: default_poll_interval(),
            exit_grace: default_exit_grace(),
            timeout: default_timeout(),
            results_dir: None,
            workspace_root: None,
        }
    }
}

/// `[engine]` section: which backend and how to start it.
#[derive(Debug, Clone, Deserialize)]
pub struct EngineSection {
    #[serde(default)]
    pub backend: BackendKind,

    /// Engine (or automation host) path, or a name looked up on `PATH`.
    #[serde(default = "default_program")]
    pub program: String,

    /// Argument templates. Placeholders: `{project}`, `{plan}`,
    /// `{plan_file}`, `{plan_path}`, `{suffix}`, `{workspace}`.
    #[serde(default)]
    pub args: Option<Vec<String>>,

    /// Flag preceding the core limit; `""` disables it.
    #[serde(default = "default_max_cores_flag")]
    pub max_cores_flag: String,

    /// Flag appended when `hide_window` is set.
    #[serde(default)]
    pub hide_flag: Option<String>,

    #[serde(default)]
    pub hide_window: bool,

    /// Candidate install locations checked after `PATH`.
    #[serde(default)]
    pub search_paths: Option<Vec<PathBuf>>,

    /// Automation backend: how long to wait for one reply.
    #[serde(default = "default_reply_timeout")]
    pub reply_timeout: String,
}

fn default_program() -> String {
    "Ras.exe".to_string()
}

fn default_max_cores_flag() -> String {
    "-MaxCores".to_string()
}

fn default_reply_timeout() -> String {
    "120s".to_string()
}

impl Default for EngineSection {
    fn default() -> Self {
        Self {
            backend: BackendKind::default(),
            program: default_program(),
            args: None,
            max_cores_flag: default_max_cores_flag(),
            hide_flag: None,
            hide_window: false,
            search_paths: None,
            reply_timeout: default_reply_timeout(),
        }
    }
}

/// `[monitor]` section: artifact names and markers.
#[derive(Debug, Clone, Deserialize)]
pub struct MonitorSection {
    #[serde(default = "default_final_results")]
    pub final_results: String,

    /// Incremental log template; `""` turns progress monitoring off.
    #[serde(default = "default_progress_log")]
    pub progress_log: String,

    #[serde(default = "default_success_markers")]
    pub success_markers: Vec<String>,

    #[serde(default)]
    pub failure_markers: Vec<String>,

    /// Regex whose first capture group is a volume-accounting error in
    /// percent.
    #[serde(default)]
    pub volume_error_pattern: Option<String>,

    #[serde(default)]
    pub max_volume_error_percent: Option<f64>,
}

fn default_final_results() -> String {
    "{stem}.p{suffix}.hdf".to_string()
}

fn default_progress_log() -> String {
    "{stem}.bco{suffix}".to_string()
}

fn default_success_markers() -> Vec<String> {
    vec![
        "Finished Successfully".to_string(),
        "Completed Successfully".to_string(),
    ]
}

impl Default for MonitorSection {
    fn default() -> Self {
        Self {
            final_results: default_final_results(),
            progress_log: default_progress_log(),
            success_markers: default_success_markers(),
            failure_markers: Vec::new(),
            volume_error_pattern: None,
            max_volume_error_percent: None,
        }
    }
}

/// `[workspace]` section: what gets copied and how it is prepared.
#[derive(Debug, Clone, Deserialize)]
pub struct WorkspaceSection {
    /// Globs relative to the project directory; matching files stay put
    /// and are referenced at their original location.
    #[serde(default)]
    pub exclude: Vec<String>,

    /// File-name globs of files holding reference lines.
    #[serde(default = "default_reference_files")]
    pub reference_files: Vec<String>,

    #[serde(default = "default_reference_marker")]
    pub reference_marker: String,

    #[serde(default = "default_true")]
    pub activate_plan: bool,

    #[serde(default = "default_true")]
    pub detailed_log: bool,
}

fn default_reference_files() -> Vec<String> {
    vec!["*.u[0-9][0-9]".to_string()]
}

fn default_reference_marker() -> String {
    "DSS File=".to_string()
}

impl Default for WorkspaceSection {
    fn default() -> Self {
        Self {
            exclude: Vec::new(),
            reference_files: default_reference_files(),
            reference_marker: default_reference_marker(),
            activate_plan: true,
            detailed_log: true,
        }
    }
}

/// `[harvest]` section.
#[derive(Debug, Clone, Deserialize)]
pub struct HarvestSection {
    /// Output name endings, each containing `{suffix}`.
    #[serde(default = "harvest::default_patterns")]
    pub patterns: Vec<String>,
}

impl Default for HarvestSection {
    fn default() -> Self {
        Self {
            patterns: harvest::default_patterns(),
        }
    }
}

/// `[job.<suffix>]` section.
#[derive(Debug, Clone, Deserialize)]
pub struct JobConfig {
    /// Base project file. Relative paths are resolved against the config
    /// file's directory.
    pub project: PathBuf,

    /// Plan title as the engine knows it.
    pub plan: String,

    /// Plan file name; `{stem}.p{suffix}` when unset.
    #[serde(default)]
    pub plan_file: Option<String>,

    /// Large shared input kept at its original location.
    #[serde(default)]
    pub external_input: Option<PathBuf>,

    #[serde(default)]
    pub timeout: Option<String>,

    #[serde(default)]
    pub max_cores: Option<u32>,
}
