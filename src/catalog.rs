// src/catalog.rs

//! Job catalog: turns `[job.<suffix>]` entries into [`JobSpec`]s.
//!
//! Besides the config values, the plan file in the base project is read for
//! its simulation window (used for progress) and its geometry and flow
//! components. A plan file that cannot be read is not fatal here; the job
//! fails in its own pipeline instead.

use std::fs;
use std::path::Path;

use tracing::{debug, warn};

use crate::config::model::{ConfigFile, JobConfig};
use crate::config::parse_duration;
use crate::errors::{Result, SimbatchError};
use crate::job::{BackendOptions, JobSpec};
use crate::monitor::sim_time::SimulationWindow;
use crate::workspace::rewrite::decode_text;

/// Values read from a plan file's `Key=value` lines.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PlanDetails {
    pub window: Option<SimulationWindow>,
    pub geometry: Option<String>,
    pub flow: Option<String>,
}

/// Extract the simulation window and component references from plan text.
pub fn parse_plan_details(text: &str) -> PlanDetails {
    let mut details = PlanDetails::default();
    for line in text.lines() {
        let Some((key, value)) = line.split_once('=') else {
            continue;
        };
        let value = value.trim();
        match key.trim() {
            "Simulation Date" => details.window = SimulationWindow::parse_plan_value(value),
            "Geom File" if !value.is_empty() => details.geometry = Some(value.to_string()),
            "Flow File" if !value.is_empty() => details.flow = Some(value.to_string()),
            _ => {}
        }
    }
    details
}

fn read_plan_details(path: &Path) -> Option<PlanDetails> {
    let bytes = match fs::read(path) {
        Ok(b) => b,
        Err(e) => {
            warn!(plan_file = ?path, error = %e, "could not read plan file");
            return None;
        }
    };
    match decode_text(&bytes) {
        Ok((text, _)) => Some(parse_plan_details(&text)),
        Err(e) => {
            warn!(plan_file = ?path, error = %e, "plan file is not text");
            None
        }
    }
}

/// Build the batch's jobs, in suffix order.
///
/// `only` restricts the batch to the named suffixes (case-insensitive);
/// naming a suffix that is not in the catalog is an error.
pub fn build_jobs(config: &ConfigFile, only: &[String]) -> Result<Vec<JobSpec>> {
    for wanted in only {
        if !config.job.keys().any(|k| k.eq_ignore_ascii_case(wanted)) {
            return Err(SimbatchError::ConfigError(format!(
                "job '{wanted}' is not in the catalog"
            )));
        }
    }

    let default_timeout = config.default_timeout()?;
    let mut jobs = Vec::new();
    for (suffix, entry) in &config.job {
        if !only.is_empty() && !only.iter().any(|w| w.eq_ignore_ascii_case(suffix)) {
            continue;
        }
        let timeout = match &entry.timeout {
            Some(t) => parse_duration(t).map_err(|e| {
                SimbatchError::ConfigError(format!("[job.{suffix}].timeout: {e}"))
            })?,
            None => default_timeout,
        };
        let options = BackendOptions {
            max_cores: entry.max_cores,
            timeout,
            hide_window: config.engine.hide_window,
        };
        jobs.push(job_from_entry(suffix, entry, options));
    }
    Ok(jobs)
}

fn job_from_entry(suffix: &str, entry: &JobConfig, options: BackendOptions) -> JobSpec {
    let stem = entry
        .project
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let plan_file = entry
        .plan_file
        .clone()
        .unwrap_or_else(|| format!("{stem}.p{suffix}"));

    let mut job = JobSpec::new(suffix, entry.plan.clone(), entry.project.clone(), plan_file)
        .with_options(options);

    let plan_path = job.project_dir().join(job.plan_file());
    if let Some(details) = read_plan_details(&plan_path) {
        job = job.with_components(details.geometry, details.flow);
        if let Some(window) = details.window {
            job = job.with_window(window);
        }
    }
    if let Some(input) = &entry.external_input {
        job = job.with_external_input(input.clone());
    }

    debug!(
        job = %job.id(),
        plan = %job.plan(),
        window = job.window().is_some(),
        "catalog entry resolved"
    );
    job
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::model::RawConfigFile;
    use chrono::NaiveDate;
    use std::time::Duration;

    const PLAN: &str = "Plan Title=Base\r\nGeom File=g01\r\nFlow File=u02\r\nSimulation Date=01JAN2024,0000,02JAN2024,2400\r\n";

    fn config(dir: &Path, body: &str) -> ConfigFile {
        let raw: RawConfigFile = toml::from_str(body).unwrap();
        let mut cfg = ConfigFile::try_from(raw).unwrap();
        crate::config::loader::resolve_relative_paths(&mut cfg, dir);
        cfg
    }

    #[test]
    fn plan_details_include_window_and_components() {
        let details = parse_plan_details(PLAN);
        assert_eq!(details.geometry.as_deref(), Some("g01"));
        assert_eq!(details.flow.as_deref(), Some("u02"));
        let window = details.window.unwrap();
        assert_eq!(
            window.end,
            NaiveDate::from_ymd_opt(2024, 1, 3)
                .unwrap()
                .and_hms_opt(0, 0, 0)
                .unwrap()
        );
    }

    #[test]
    fn builds_jobs_from_catalog_and_plan_files() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("model.prj"), "Proj Title=River\n").unwrap();
        fs::write(dir.path().join("model.p01"), PLAN).unwrap();

        let cfg = config(
            dir.path(),
            r#"
[config]
timeout = "30m"

[engine]
hide_window = true

[job.01]
project = "model.prj"
plan = "Base"
max_cores = 4

[job.02]
project = "model.prj"
plan = "Missing plan file"
timeout = "10s"
"#,
        );

        let jobs = build_jobs(&cfg, &[]).unwrap();
        assert_eq!(jobs.len(), 2);

        let first = &jobs[0];
        assert_eq!(first.id(), "01");
        assert_eq!(first.plan_file(), "model.p01");
        assert!(first.window().is_some());
        assert_eq!(first.geometry_file(), Some("g01"));
        assert_eq!(first.options().max_cores, Some(4));
        assert_eq!(first.options().timeout, Duration::from_secs(1800));
        assert!(first.options().hide_window);

        let second = &jobs[1];
        assert!(second.window().is_none());
        assert_eq!(second.options().timeout, Duration::from_secs(10));
    }

    #[test]
    fn selection_filters_and_rejects_unknown_jobs() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = config(
            dir.path(),
            r#"
[job.01]
project = "model.prj"
plan = "A"

[job.02]
project = "model.prj"
plan = "B"
"#,
        );

        let jobs = build_jobs(&cfg, &["02".to_string()]).unwrap();
        assert_eq!(jobs.iter().map(|j| j.id()).collect::<Vec<_>>(), vec!["02"]);

        assert!(matches!(
            build_jobs(&cfg, &["07".to_string()]),
            Err(SimbatchError::ConfigError(_))
        ));
    }
}
