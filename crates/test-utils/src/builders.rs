#![allow(dead_code)]

use std::fs;
use std::path::{Path, PathBuf};

use simbatch::config::{ConfigFile, load_and_validate};
use simbatch::job::JobSpec;
use tempfile::TempDir;

/// Stem of every fixture project (`model.prj`, `model.p01`, ...).
pub const STEM: &str = "model";

/// Simulation window written into every fixture plan: one day.
pub const SIMULATION_DATE: &str = "01JAN2024,0000,02JAN2024,0000";

/// A scratch base project on disk.
///
/// Layout:
/// - `model.prj` with a `Current Plan=` line
/// - `model.g01` geometry
/// - `model.u01` flow file whose `DSS File=` points at `shared.dss`
/// - `shared.dss` large shared input (see [`ProjectFixture::external_input`])
/// - one `model.pNN` plan per [`ProjectFixture::with_plan`] call
pub struct ProjectFixture {
    dir: TempDir,
}

impl ProjectFixture {
    pub fn new() -> Self {
        let dir = tempfile::tempdir().expect("create project dir");
        let root = dir.path();
        fs::write(
            root.join("model.prj"),
            "Proj Title=Fixture River\r\nCurrent Plan=p01\r\nDefault Exp/Contr=0.3,0.1\r\n",
        )
        .expect("write project file");
        fs::write(root.join("model.g01"), "Geom Title=Reach\r\n").expect("write geometry");
        fs::write(
            root.join("model.u01"),
            "Flow Title=Storm\r\nDSS File=shared.dss\r\nDSS Path=/A/B/FLOW//1HOUR/X/\r\n",
        )
        .expect("write flow file");
        fs::write(root.join("shared.dss"), vec![0u8; 4096]).expect("write shared input");
        Self { dir }
    }

    /// Add plan file `model.p<suffix>`.
    pub fn with_plan(self, suffix: &str, title: &str) -> Self {
        let body = format!(
            "Plan Title={title}\r\nGeom File=g01\r\nFlow File=u01\r\nSimulation Date={SIMULATION_DATE}\r\nWrite Detailed= 0\r\n"
        );
        fs::write(self.dir.path().join(format!("model.p{suffix}")), body)
            .expect("write plan file");
        self
    }

    pub fn dir(&self) -> &Path {
        self.dir.path()
    }

    pub fn project_file(&self) -> PathBuf {
        self.dir.path().join("model.prj")
    }

    pub fn external_input(&self) -> PathBuf {
        self.dir.path().join("shared.dss")
    }

    /// A job for an existing plan, with the shared input kept external.
    pub fn job(&self, suffix: &str) -> JobSpec {
        JobSpec::new(
            suffix,
            format!("plan{suffix}"),
            self.project_file(),
            format!("model.p{suffix}"),
        )
        .with_external_input(self.external_input())
    }

    /// Snapshot of every file name and content in the base project.
    pub fn snapshot(&self) -> Vec<(String, Vec<u8>)> {
        let mut out: Vec<(String, Vec<u8>)> = fs::read_dir(self.dir.path())
            .expect("read project dir")
            .filter_map(|e| e.ok())
            .filter(|e| e.path().is_file())
            .map(|e| {
                let name = e.file_name().to_string_lossy().into_owned();
                let bytes = fs::read(e.path()).expect("read project file");
                (name, bytes)
            })
            .collect();
        out.sort();
        out
    }
}

impl Default for ProjectFixture {
    fn default() -> Self {
        Self::new()
    }
}

/// Builder for a `Simbatch.toml` pointing at a fixture project.
///
/// Defaults are tuned for tests: fast polling, a short exit grace, the
/// shared input excluded from copies.
pub struct ConfigBuilder {
    config: Vec<String>,
    engine: Vec<String>,
    monitor: Vec<String>,
    workspace: Vec<String>,
    jobs: Vec<String>,
}

impl ConfigBuilder {
    pub fn new(engine_section: impl Into<String>) -> Self {
        Self {
            config: vec![
                "poll_interval = \"50ms\"".to_string(),
                "exit_grace = \"500ms\"".to_string(),
            ],
            engine: vec![engine_section.into()],
            monitor: Vec::new(),
            workspace: vec!["exclude = [\"*.dss\"]".to_string()],
            jobs: Vec::new(),
        }
    }

    /// Add a raw `key = value` line to `[config]`.
    pub fn config(mut self, line: &str) -> Self {
        self.config.push(line.to_string());
        self
    }

    pub fn monitor(mut self, line: &str) -> Self {
        self.monitor.push(line.to_string());
        self
    }

    pub fn workspace(mut self, line: &str) -> Self {
        self.workspace.push(line.to_string());
        self
    }

    /// Add `[job.<suffix>]` for `project`; `extra` lines go into the section.
    pub fn job(mut self, suffix: &str, project: &ProjectFixture, extra: &[&str]) -> Self {
        let mut section = format!(
            "[job.\"{suffix}\"]\nproject = {:?}\nplan = \"plan{suffix}\"\nexternal_input = {:?}\n",
            project.project_file().to_string_lossy(),
            project.external_input().to_string_lossy(),
        );
        for line in extra {
            section.push_str(line);
            section.push('\n');
        }
        self.jobs.push(section);
        self
    }

    pub fn to_toml(&self) -> String {
        let mut out = String::new();
        out.push_str("[config]\n");
        for line in &self.config {
            out.push_str(line);
            out.push('\n');
        }
        out.push_str("\n[engine]\n");
        for line in &self.engine {
            out.push_str(line);
            out.push('\n');
        }
        out.push_str("\n[monitor]\n");
        for line in &self.monitor {
            out.push_str(line);
            out.push('\n');
        }
        out.push_str("\n[workspace]\n");
        for line in &self.workspace {
            out.push_str(line);
            out.push('\n');
        }
        for job in &self.jobs {
            out.push('\n');
            out.push_str(job);
        }
        out
    }

    /// Write `Simbatch.toml` into `dir` and return its path.
    pub fn write(&self, dir: &Path) -> PathBuf {
        let path = dir.join("Simbatch.toml");
        fs::write(&path, self.to_toml()).expect("write config");
        path
    }

    /// Write into `dir` and load through the real loader.
    pub fn load(&self, dir: &Path) -> ConfigFile {
        load_and_validate(self.write(dir)).expect("fixture config is valid")
    }
}

/// Scratch layout for one end-to-end batch: a fixture project plus a
/// separate directory for the engine script, config, workspaces and
/// harvested results.
pub struct BatchHarness {
    pub project: ProjectFixture,
    scratch: TempDir,
}

impl BatchHarness {
    /// A project with one plan per suffix.
    pub fn new(suffixes: &[&str]) -> Self {
        let mut project = ProjectFixture::new();
        for suffix in suffixes {
            project = project.with_plan(suffix, &format!("plan{suffix}"));
        }
        let scratch = tempfile::tempdir().expect("create scratch dir");
        fs::create_dir(scratch.path().join("workspaces")).expect("create workspace root");
        Self { project, scratch }
    }

    pub fn scratch(&self) -> &Path {
        self.scratch.path()
    }

    pub fn results_dir(&self) -> PathBuf {
        self.scratch.path().join("results")
    }

    pub fn workspace_root(&self) -> PathBuf {
        self.scratch.path().join("workspaces")
    }

    /// Config builder with results and workspaces inside the scratch dir
    /// and one `[job]` per `suffixes`.
    pub fn config(&self, engine_section: impl Into<String>, suffixes: &[&str]) -> ConfigBuilder {
        let mut builder = ConfigBuilder::new(engine_section)
            .config(&format!(
                "results_dir = {:?}",
                self.results_dir().to_string_lossy()
            ))
            .config(&format!(
                "workspace_root = {:?}",
                self.workspace_root().to_string_lossy()
            ));
        for suffix in suffixes {
            builder = builder.job(suffix, &self.project, &[]);
        }
        builder
    }

    /// Names of workspaces still present under the workspace root.
    pub fn workspaces_left(&self) -> Vec<String> {
        fs::read_dir(self.workspace_root())
            .map(|rd| {
                rd.filter_map(|e| e.ok())
                    .map(|e| e.file_name().to_string_lossy().into_owned())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// File names in the results directory, sorted.
    pub fn harvested_names(&self) -> Vec<String> {
        let mut names: Vec<String> = fs::read_dir(self.results_dir())
            .map(|rd| {
                rd.filter_map(|e| e.ok())
                    .map(|e| e.file_name().to_string_lossy().into_owned())
                    .collect()
            })
            .unwrap_or_default();
        names.sort();
        names
    }
}
