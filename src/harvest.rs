// src/harvest.rs

//! Selective copy-back of a job's outputs.
//!
//! Only top-level workspace files whose name ends with one of the configured
//! output kinds, rendered with the job's own suffix, are copied. There is no
//! "newer than" heuristic: a file is harvested because of what it is, not
//! because of when it was written.

use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use crate::errors::{Result, SimbatchError};
use crate::job::JobSpec;
use crate::workspace::copy::copy_file_with_times;

/// Recognised output kinds. `{suffix}` is replaced with the job suffix.
pub fn default_patterns() -> Vec<String> {
    [
        // plan, flow, cross-section output, geometry, compiled results,
        // boundary conditions, boundary-condition output, time series,
        // initial-condition output
        ".p{suffix}",
        ".u{suffix}",
        ".x{suffix}",
        ".g{suffix}",
        ".c{suffix}",
        ".b{suffix}",
        ".bco{suffix}",
        ".dss{suffix}",
        ".ic.o{suffix}",
        // compiled HDF results
        ".p{suffix}.hdf",
        ".u{suffix}.hdf",
        ".g{suffix}.hdf",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

/// Files copied and problems met during one harvest.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct HarvestReport {
    /// Paths in the target directory.
    pub harvested: Vec<PathBuf>,
    pub warnings: Vec<String>,
}

/// Copies recognised outputs from workspaces to a results directory.
#[derive(Debug, Clone)]
pub struct ResultHarvester {
    patterns: Vec<String>,
}

impl ResultHarvester {
    pub fn new(patterns: Vec<String>) -> Result<Self> {
        if let Some(bad) = patterns.iter().find(|p| !p.contains("{suffix}")) {
            return Err(SimbatchError::ConfigError(format!(
                "harvest pattern '{bad}' must contain {{suffix}}"
            )));
        }
        Ok(Self { patterns })
    }

    /// Lowercased name endings that identify `job`'s outputs.
    fn endings(&self, job: &JobSpec) -> Vec<String> {
        self.patterns
            .iter()
            .map(|p| job.render(p).to_lowercase())
            .collect()
    }

    /// Whether `file_name` is one of `job`'s recognised outputs.
    pub fn matches(&self, job: &JobSpec, file_name: &str) -> bool {
        let name = file_name.to_lowercase();
        self.endings(job).iter().any(|end| name.ends_with(end.as_str()))
    }

    /// Copy `job`'s outputs from `workspace_root` into `target_dir`.
    ///
    /// Missing outputs are not an error. A file that fails to copy is
    /// reported as a warning and left out of the harvested list. Only a
    /// failure to read the workspace or create `target_dir` fails the call.
    pub fn harvest(
        &self,
        workspace_root: &Path,
        job: &JobSpec,
        target_dir: &Path,
    ) -> Result<HarvestReport> {
        let endings = self.endings(job);
        let mut report = HarvestReport::default();

        fs::create_dir_all(target_dir)?;

        let mut entries: Vec<_> = fs::read_dir(workspace_root)?
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().map(|t| t.is_file()).unwrap_or(false))
            .collect();
        entries.sort_by_key(|e| e.file_name());

        for entry in entries {
            let name = entry.file_name().to_string_lossy().into_owned();
            let lower = name.to_lowercase();
            if !endings.iter().any(|end| lower.ends_with(end.as_str())) {
                continue;
            }

            let target = target_dir.join(&name);
            match copy_file_with_times(&entry.path(), &target) {
                Ok(bytes) => {
                    debug!(job = %job.id(), file = %name, bytes, "harvested output");
                    report.harvested.push(target);
                }
                Err(e) => {
                    let msg = format!("could not harvest {name}: {e}");
                    warn!(job = %job.id(), "{msg}");
                    report.warnings.push(msg);
                }
            }
        }

        info!(
            job = %job.id(),
            files = report.harvested.len(),
            warnings = report.warnings.len(),
            target = ?target_dir,
            "harvest finished"
        );
        Ok(report)
    }
}

impl Default for ResultHarvester {
    fn default() -> Self {
        Self {
            patterns: default_patterns(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn job(id: &str) -> JobSpec {
        JobSpec::new(id, format!("plan{id}"), "/base/model.prj", format!("model.p{id}"))
    }

    fn touch(dir: &Path, name: &str) {
        fs::write(dir.join(name), name).unwrap();
    }

    #[test]
    fn copies_only_recognised_outputs_of_this_job() {
        let ws = tempfile::tempdir().unwrap();
        let out = tempfile::tempdir().unwrap();
        for name in [
            "model.p03",
            "model.p03.hdf",
            "model.bco03",
            "model.IC.O03",
            "model.p03.tmp.hdf",
            "model.p04.hdf",
            "model.prj",
            "notes.txt",
        ] {
            touch(ws.path(), name);
        }

        let report = ResultHarvester::default()
            .harvest(ws.path(), &job("03"), out.path())
            .unwrap();

        let mut names: Vec<String> = report
            .harvested
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        names.sort();
        assert_eq!(
            names,
            vec!["model.IC.O03", "model.bco03", "model.p03", "model.p03.hdf"]
        );
        assert!(!out.path().join("model.p04.hdf").exists());
        assert!(report.warnings.is_empty());
    }

    #[test]
    fn harvested_outputs_keep_the_engine_timestamps() {
        let ws = tempfile::tempdir().unwrap();
        let out = tempfile::tempdir().unwrap();
        touch(ws.path(), "model.p06.hdf");
        let written = std::time::SystemTime::now() - std::time::Duration::from_secs(6 * 3600);
        fs::File::options()
            .write(true)
            .open(ws.path().join("model.p06.hdf"))
            .unwrap()
            .set_modified(written)
            .unwrap();

        ResultHarvester::default()
            .harvest(ws.path(), &job("06"), out.path())
            .unwrap();

        let source = fs::metadata(ws.path().join("model.p06.hdf")).unwrap().modified().unwrap();
        let copied = fs::metadata(out.path().join("model.p06.hdf")).unwrap().modified().unwrap();
        assert_eq!(copied, source);
    }

    #[test]
    fn nothing_to_harvest_is_fine() {
        let ws = tempfile::tempdir().unwrap();
        let out = tempfile::tempdir().unwrap();
        let report = ResultHarvester::default()
            .harvest(ws.path(), &job("01"), out.path())
            .unwrap();
        assert_eq!(report, HarvestReport::default());
    }

    #[test]
    fn patterns_must_carry_the_suffix() {
        assert!(ResultHarvester::new(vec![".hdf".to_string()]).is_err());
        let custom = ResultHarvester::new(vec![".rst{suffix}".to_string()]).unwrap();
        assert!(custom.matches(&job("02"), "model.RST02"));
        assert!(!custom.matches(&job("02"), "model.p02"));
    }

    #[test]
    fn copy_failure_becomes_a_warning() {
        let ws = tempfile::tempdir().unwrap();
        let out = tempfile::tempdir().unwrap();
        touch(ws.path(), "model.p05");
        touch(ws.path(), "model.u05");
        // a directory at the destination makes the copy fail
        fs::create_dir(out.path().join("model.u05")).unwrap();

        let report = ResultHarvester::default()
            .harvest(ws.path(), &job("05"), out.path())
            .unwrap();

        assert_eq!(report.harvested, vec![out.path().join("model.p05")]);
        assert_eq!(report.warnings.len(), 1);
        assert!(report.warnings[0].contains("model.u05"));
    }
}
