// src/workspace/mod.rs

//! Per-job isolated working directories.
//!
//! The engine locks and rewrites whatever files it touches, so every job runs
//! against its own full copy of the base project. The original tree is only
//! ever read.
//!
//! - [`copy`] does the recursive, timestamp-preserving copy.
//! - [`rewrite`] edits the copied configuration after the copy completes.

pub mod copy;
pub mod rewrite;

use std::collections::BTreeMap;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use globset::{GlobBuilder, GlobSet, GlobSetBuilder};
use tracing::{debug, info, warn};

use crate::errors::{Result, SimbatchError};
use crate::job::JobSpec;

use rewrite::ReferenceRewriter;

const DESTROY_ATTEMPTS: u32 = 3;
const DESTROY_BACKOFF: Duration = Duration::from_millis(500);

/// Files left at their original location, keyed by lowercase file name.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExternalReferenceMap {
    entries: BTreeMap<String, PathBuf>,
}

impl ExternalReferenceMap {
    pub fn insert(&mut self, file_name: &str, original: &Path) {
        self.entries
            .insert(file_name.to_lowercase(), original.to_path_buf());
    }

    /// Original absolute path of a file name, compared case-insensitively.
    pub fn resolve(&self, file_name: &str) -> Option<&Path> {
        self.entries
            .get(&file_name.to_lowercase())
            .map(PathBuf::as_path)
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }
}

/// How workspaces are laid out and prepared.
#[derive(Debug, Clone)]
pub struct WorkspaceSettings {
    /// Parent of all workspaces; the system temp directory when `None`.
    pub root: Option<PathBuf>,
    /// Globs (relative to the project directory) of files not duplicated.
    pub exclude: Vec<String>,
    /// File-name globs of configuration files holding reference lines.
    pub reference_files: Vec<String>,
    pub reference_marker: String,
    /// Point the copied project's current plan at the job's plan.
    pub activate_plan: bool,
    /// Turn on the plan's incremental log.
    pub detailed_log: bool,
    /// Directories never copied into a workspace, such as the results
    /// directory. The workspace root is always among them.
    pub skip_dirs: Vec<PathBuf>,
}

impl Default for WorkspaceSettings {
    fn default() -> Self {
        Self {
            root: None,
            exclude: Vec::new(),
            reference_files: vec!["*.u[0-9][0-9]".to_string()],
            reference_marker: "DSS File=".to_string(),
            activate_plan: true,
            detailed_log: true,
            skip_dirs: Vec::new(),
        }
    }
}

/// One job's isolated copy of the base project.
#[derive(Debug, Clone)]
pub struct Workspace {
    job_id: String,
    root: PathBuf,
    project_file: PathBuf,
    plan_file: PathBuf,
    external: ExternalReferenceMap,
}

impl Workspace {
    pub fn job_id(&self) -> &str {
        &self.job_id
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Workspace-local copy of the project's main file.
    pub fn project_file(&self) -> &Path {
        &self.project_file
    }

    /// Workspace-local copy of the job's plan file.
    pub fn plan_file(&self) -> &Path {
        &self.plan_file
    }

    pub fn external(&self) -> &ExternalReferenceMap {
        &self.external
    }
}

/// Creates, prepares and destroys workspaces.
#[derive(Debug)]
pub struct WorkspaceManager {
    root: PathBuf,
    skip: Vec<PathBuf>,
    exclude: GlobSet,
    rewriter: ReferenceRewriter,
    activate_plan: bool,
    detailed_log: bool,
}

impl WorkspaceManager {
    pub fn new(settings: &WorkspaceSettings) -> Result<Self> {
        let mut builder = GlobSetBuilder::new();
        for pattern in &settings.exclude {
            let glob = GlobBuilder::new(pattern)
                .case_insensitive(true)
                .literal_separator(false)
                .build()
                .map_err(|e| {
                    SimbatchError::ConfigError(format!("invalid exclude glob '{pattern}': {e}"))
                })?;
            builder.add(glob);
        }
        let exclude = builder
            .build()
            .map_err(|e| SimbatchError::ConfigError(format!("building exclude globs: {e}")))?;

        let root = settings.root.clone().unwrap_or_else(std::env::temp_dir);
        let mut skip = vec![root.clone()];
        skip.extend(settings.skip_dirs.iter().cloned());

        Ok(Self {
            root,
            skip,
            exclude,
            rewriter: ReferenceRewriter::new(
                &settings.reference_files,
                settings.reference_marker.clone(),
            )?,
            activate_plan: settings.activate_plan,
            detailed_log: settings.detailed_log,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Allocate a uniquely named directory and copy the job's base project
    /// into it.
    ///
    /// Blocking. On any failure the partial directory is removed and
    /// `WorkspaceCreation` is returned, so no later stage sees an incomplete
    /// copy.
    pub fn create(&self, job: &JobSpec) -> Result<Workspace> {
        let failed = |reason: String| SimbatchError::WorkspaceCreation {
            job: job.id().to_string(),
            reason,
        };

        std::fs::create_dir_all(&self.root)
            .map_err(|e| failed(format!("creating workspace root {:?}: {e}", self.root)))?;
        let dir = tempfile::Builder::new()
            .prefix(&format!("simbatch_{}_", job.id()))
            .tempdir_in(&self.root)
            .map_err(|e| failed(format!("allocating directory in {:?}: {e}", self.root)))?;

        let source = job.project_dir();
        debug!(job = %job.id(), from = ?source, to = ?dir.path(), "copying base project");
        // Dropping `dir` on error removes the partial copy.
        let report = copy::copy_tree(source, dir.path(), &self.skip, &self.exclude)
            .map_err(|e| failed(format!("copying {source:?}: {e}")))?;

        let project_name = job
            .project_file()
            .file_name()
            .ok_or_else(|| failed(format!("project path {:?} has no file name", job.project_file())))?;
        let project_file = dir.path().join(project_name);
        if !project_file.is_file() {
            return Err(failed(format!(
                "project file {project_name:?} not present after copy"
            )));
        }

        let root = dir.keep();
        info!(
            job = %job.id(),
            workspace = ?root,
            files = report.files,
            bytes = report.bytes,
            external = report.external.len(),
            "workspace created"
        );

        Ok(Workspace {
            job_id: job.id().to_string(),
            plan_file: root.join(job.plan_file()),
            project_file: root.join(project_name),
            root,
            external: report.external,
        })
    }

    /// Rewrite references and activate the job's plan inside `workspace`.
    ///
    /// Blocking. Returns the files that were modified.
    pub fn prepare(&self, workspace: &Workspace, job: &JobSpec) -> Result<Vec<PathBuf>> {
        let mut changed =
            self.rewriter
                .rewrite(workspace.root(), workspace.external(), job.external_input())?;

        if self.activate_plan && rewrite::activate_plan(workspace.project_file(), &job.plan_key())? {
            changed.push(workspace.project_file().to_path_buf());
        }
        if self.detailed_log && workspace.plan_file().is_file() {
            if rewrite::enable_detailed_log(workspace.plan_file())? {
                changed.push(workspace.plan_file().to_path_buf());
            }
        }
        Ok(changed)
    }

    /// Remove a workspace tree.
    ///
    /// Files already gone are fine. Removal is retried a few times because
    /// the engine's helper processes can hold files briefly after exit. A
    /// failure comes back as a warning string, never as an error.
    pub async fn destroy(&self, workspace: &Workspace) -> Option<String> {
        let mut last_error = None;
        for attempt in 1..=DESTROY_ATTEMPTS {
            match tokio::fs::remove_dir_all(workspace.root()).await {
                Ok(()) => {
                    debug!(job = %workspace.job_id(), workspace = ?workspace.root(), "workspace removed");
                    return None;
                }
                Err(e) if e.kind() == io::ErrorKind::NotFound => return None,
                Err(e) => {
                    debug!(
                        job = %workspace.job_id(),
                        attempt,
                        error = %e,
                        "workspace removal failed"
                    );
                    last_error = Some(e);
                }
            }
            if attempt < DESTROY_ATTEMPTS {
                tokio::time::sleep(DESTROY_BACKOFF).await;
            }
        }

        let message = format!(
            "could not remove workspace {:?}: {}",
            workspace.root(),
            last_error.map(|e| e.to_string()).unwrap_or_default()
        );
        warn!(job = %workspace.job_id(), "{message}");
        Some(message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn project() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("model.prj"), "Proj Title=Demo\nCurrent Plan=p01\n").unwrap();
        fs::write(dir.path().join("model.p02"), "Plan Title=plan02\n").unwrap();
        fs::write(dir.path().join("model.u01"), "DSS File=big.dss\n").unwrap();
        fs::write(dir.path().join("big.dss"), "data").unwrap();
        dir
    }

    fn manager(root: &Path, exclude: &[&str]) -> WorkspaceManager {
        WorkspaceManager::new(&WorkspaceSettings {
            root: Some(root.to_path_buf()),
            exclude: exclude.iter().map(|s| s.to_string()).collect(),
            ..WorkspaceSettings::default()
        })
        .unwrap()
    }

    fn job(project: &Path) -> JobSpec {
        JobSpec::new("02", "plan02", project.join("model.prj"), "model.p02")
    }

    #[test]
    fn concurrent_jobs_get_distinct_workspaces() {
        let project = project();
        let root = tempfile::tempdir().unwrap();
        let manager = manager(root.path(), &[]);

        let a = manager.create(&job(project.path())).unwrap();
        let b = manager.create(&job(project.path())).unwrap();

        assert_ne!(a.root(), b.root());
        assert!(a.root().starts_with(root.path()));
        assert!(a.project_file().is_file());
        assert!(b.root().join("big.dss").is_file());
    }

    #[test]
    fn workspace_root_inside_the_project_is_not_copied() {
        let project = project();
        let root = project.path().join(".work");
        let manager = manager(&root, &[]);

        let a = manager.create(&job(project.path())).unwrap();
        fs::write(a.root().join("model.p02.hdf"), "first run").unwrap();
        let b = manager.create(&job(project.path())).unwrap();

        assert!(b.project_file().is_file());
        assert!(!b.root().join(".work").exists());
        let nested = walkdir::WalkDir::new(b.root())
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name() == "model.p02.hdf")
            .count();
        assert_eq!(nested, 0);
    }

    #[test]
    fn results_dir_inside_the_project_is_not_copied() {
        let project = project();
        let results = project.path().join("results");
        fs::create_dir_all(&results).unwrap();
        fs::write(results.join("model.p01.hdf"), "old").unwrap();
        let root = tempfile::tempdir().unwrap();
        let manager = WorkspaceManager::new(&WorkspaceSettings {
            root: Some(root.path().to_path_buf()),
            skip_dirs: vec![results],
            ..WorkspaceSettings::default()
        })
        .unwrap();

        let ws = manager.create(&job(project.path())).unwrap();
        assert!(ws.root().join("model.u01").is_file());
        assert!(!ws.root().join("results").exists());
    }

    #[test]
    fn prepare_repoints_excluded_input_and_activates_plan() {
        let project = project();
        let root = tempfile::tempdir().unwrap();
        let manager = manager(root.path(), &["*.dss"]);
        let job = job(project.path());

        let ws = manager.create(&job).unwrap();
        assert!(!ws.root().join("big.dss").exists());

        manager.prepare(&ws, &job).unwrap();

        let flow = fs::read_to_string(ws.root().join("model.u01")).unwrap();
        assert_eq!(
            flow,
            format!("DSS File={}\n", project.path().join("big.dss").display())
        );
        let prj = fs::read_to_string(ws.project_file()).unwrap();
        assert!(prj.contains("Current Plan=p02"));
        let plan = fs::read_to_string(ws.plan_file()).unwrap();
        assert!(plan.contains("Write Detailed= 1"));

        // base project untouched
        assert_eq!(
            fs::read_to_string(project.path().join("model.u01")).unwrap(),
            "DSS File=big.dss\n"
        );
    }

    #[test]
    fn missing_project_dir_fails_without_leftovers() {
        let root = tempfile::tempdir().unwrap();
        let manager = manager(root.path(), &[]);
        let job = JobSpec::new("07", "plan07", "/definitely/not/here/model.prj", "model.p07");

        let err = manager.create(&job).unwrap_err();
        assert!(matches!(err, SimbatchError::WorkspaceCreation { .. }));
        assert_eq!(fs::read_dir(root.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn destroy_tolerates_already_removed_workspace() {
        let project = project();
        let root = tempfile::tempdir().unwrap();
        let manager = manager(root.path(), &[]);
        let ws = manager.create(&job(project.path())).unwrap();

        assert_eq!(manager.destroy(&ws).await, None);
        assert!(!ws.root().exists());
        assert_eq!(manager.destroy(&ws).await, None);
    }
}
