// src/config/validate.rs

use std::collections::BTreeMap;

use globset::Glob;
use regex::Regex;

use crate::config::duration::parse_duration;
use crate::config::model::{ConfigFile, RawConfigFile};
use crate::errors::{Result, SimbatchError};

impl TryFrom<RawConfigFile> for ConfigFile {
    type Error = crate::errors::SimbatchError;

    fn try_from(raw: RawConfigFile) -> std::result::Result<Self, Self::Error> {
        validate_raw_config(&raw)?;
        Ok(ConfigFile::new_unchecked(raw))
    }
}

fn validate_raw_config(cfg: &RawConfigFile) -> Result<()> {
    ensure_has_jobs(cfg)?;
    validate_global_config(cfg)?;
    validate_engine(cfg)?;
    validate_monitor(cfg)?;
    validate_workspace(cfg)?;
    validate_harvest(cfg)?;
    validate_jobs(cfg)?;
    Ok(())
}

fn config_error(msg: impl Into<String>) -> SimbatchError {
    SimbatchError::ConfigError(msg.into())
}

fn check_duration(field: &str, value: &str) -> Result<()> {
    parse_duration(value)
        .map(|_| ())
        .map_err(|e| config_error(format!("{field}: {e}")))
}

fn ensure_has_jobs(cfg: &RawConfigFile) -> Result<()> {
    if cfg.job.is_empty() {
        return Err(config_error(
            "config must contain at least one [job.<suffix>] section",
        ));
    }
    Ok(())
}

fn validate_global_config(cfg: &RawConfigFile) -> Result<()> {
    if cfg.config.max_concurrency == Some(0) {
        return Err(config_error("[config].max_concurrency must be >= 1 (got 0)"));
    }
    check_duration("[config].poll_interval", &cfg.config.poll_interval)?;
    check_duration("[config].exit_grace", &cfg.config.exit_grace)?;
    check_duration("[config].timeout", &cfg.config.timeout)?;
    if parse_duration(&cfg.config.poll_interval).is_ok_and(|d| d.is_zero()) {
        return Err(config_error("[config].poll_interval must be greater than zero"));
    }
    Ok(())
}

fn validate_engine(cfg: &RawConfigFile) -> Result<()> {
    if cfg.engine.program.trim().is_empty() {
        return Err(config_error("[engine].program must not be empty"));
    }
    check_duration("[engine].reply_timeout", &cfg.engine.reply_timeout)?;
    Ok(())
}

fn validate_monitor(cfg: &RawConfigFile) -> Result<()> {
    let monitor = &cfg.monitor;
    if monitor.final_results.trim().is_empty() {
        return Err(config_error("[monitor].final_results must not be empty"));
    }
    if monitor.success_markers.iter().all(|m| m.is_empty()) {
        return Err(config_error(
            "[monitor].success_markers must contain at least one non-empty marker",
        ));
    }
    if let Some(pattern) = &monitor.volume_error_pattern {
        let re = Regex::new(pattern).map_err(|e| {
            config_error(format!("[monitor].volume_error_pattern is invalid: {e}"))
        })?;
        if re.captures_len() < 2 {
            return Err(config_error(
                "[monitor].volume_error_pattern needs a capture group for the percentage",
            ));
        }
    }
    if let Some(limit) = monitor.max_volume_error_percent {
        if monitor.volume_error_pattern.is_none() {
            return Err(config_error(
                "[monitor].max_volume_error_percent requires volume_error_pattern",
            ));
        }
        if !limit.is_finite() || limit < 0.0 {
            return Err(config_error(format!(
                "[monitor].max_volume_error_percent must be a non-negative number (got {limit})"
            )));
        }
    }
    Ok(())
}

fn validate_workspace(cfg: &RawConfigFile) -> Result<()> {
    let ws = &cfg.workspace;
    for pattern in ws.exclude.iter().chain(ws.reference_files.iter()) {
        Glob::new(pattern)
            .map_err(|e| config_error(format!("[workspace] invalid glob '{pattern}': {e}")))?;
    }
    if ws.reference_marker.is_empty() {
        return Err(config_error("[workspace].reference_marker must not be empty"));
    }
    Ok(())
}

fn validate_harvest(cfg: &RawConfigFile) -> Result<()> {
    if let Some(bad) = cfg
        .harvest
        .patterns
        .iter()
        .find(|p| !p.contains("{suffix}"))
    {
        return Err(config_error(format!(
            "[harvest] pattern '{bad}' must contain {{suffix}}"
        )));
    }
    Ok(())
}

fn validate_jobs(cfg: &RawConfigFile) -> Result<()> {
    // Output files are matched case-insensitively, so "A1" and "a1" would
    // harvest each other's results.
    let mut seen: BTreeMap<String, &str> = BTreeMap::new();

    for (suffix, job) in cfg.job.iter() {
        if suffix.is_empty() || !suffix.chars().all(|c| c.is_ascii_alphanumeric()) {
            return Err(config_error(format!(
                "job suffix '{suffix}' must be non-empty and alphanumeric"
            )));
        }
        if let Some(other) = seen.insert(suffix.to_lowercase(), suffix) {
            return Err(config_error(format!(
                "job suffixes '{other}' and '{suffix}' differ only by case"
            )));
        }
        if job.plan.trim().is_empty() {
            return Err(config_error(format!("job '{suffix}' has an empty plan")));
        }
        if job.project.as_os_str().is_empty() {
            return Err(config_error(format!("job '{suffix}' has an empty project")));
        }
        if let Some(timeout) = &job.timeout {
            check_duration(&format!("[job.{suffix}].timeout"), timeout)?;
        }
        if job.max_cores == Some(0) {
            return Err(config_error(format!(
                "[job.{suffix}].max_cores must be >= 1 (got 0)"
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(toml_src: &str) -> Result<ConfigFile> {
        let raw: RawConfigFile = toml::from_str(toml_src)?;
        ConfigFile::try_from(raw)
    }

    fn assert_config_error(toml_src: &str, needle: &str) {
        match parse(toml_src) {
            Err(SimbatchError::ConfigError(msg)) => {
                assert!(msg.contains(needle), "unexpected message: {msg}")
            }
            other => panic!("expected ConfigError containing '{needle}', got {other:?}"),
        }
    }

    const JOB: &str = r#"
[job.01]
project = "model.prj"
plan = "Base"
"#;

    #[test]
    fn minimal_config_gets_defaults() {
        let cfg = parse(JOB).unwrap();
        assert!(cfg.config.cleanup);
        assert_eq!(cfg.config.poll_interval, "1s");
        assert_eq!(cfg.monitor.final_results, "{stem}.p{suffix}.hdf");
        assert_eq!(cfg.harvest.patterns, crate::harvest::default_patterns());
        assert_eq!(cfg.job["01"].plan, "Base");
    }

    #[test]
    fn empty_catalog_is_rejected() {
        assert_config_error("[config]\nmode = \"sequential\"\n", "at least one [job");
    }

    #[test]
    fn zero_concurrency_is_rejected() {
        assert_config_error(
            &format!("[config]\nmax_concurrency = 0\n{JOB}"),
            "max_concurrency",
        );
    }

    #[test]
    fn bad_duration_is_rejected() {
        assert_config_error(
            &format!("[config]\npoll_interval = \"fast\"\n{JOB}"),
            "poll_interval",
        );
    }

    #[test]
    fn suffixes_differing_by_case_are_rejected() {
        let src = r#"
[job.a1]
project = "model.prj"
plan = "One"

[job.A1]
project = "model.prj"
plan = "Two"
"#;
        assert_config_error(src, "differ only by case");
    }

    #[test]
    fn harvest_pattern_without_suffix_is_rejected() {
        assert_config_error(
            &format!("[harvest]\npatterns = [\".hdf\"]\n{JOB}"),
            "{suffix}",
        );
    }

    #[test]
    fn empty_success_markers_are_rejected() {
        assert_config_error(
            &format!("[monitor]\nsuccess_markers = []\n{JOB}"),
            "success_markers",
        );
    }

    #[test]
    fn volume_threshold_needs_a_pattern() {
        assert_config_error(
            &format!("[monitor]\nmax_volume_error_percent = 1.0\n{JOB}"),
            "requires volume_error_pattern",
        );
        assert_config_error(
            &format!("[monitor]\nvolume_error_pattern = \"(\"\n{JOB}"),
            "invalid",
        );
    }

    #[test]
    fn invalid_glob_is_rejected() {
        assert_config_error(
            &format!("[workspace]\nexclude = [\"a[\"]\n{JOB}"),
            "invalid glob",
        );
    }

    #[test]
    fn unknown_backend_fails_deserialization() {
        let src = format!("[engine]\nbackend = \"telnet\"\n{JOB}");
        assert!(matches!(parse(&src), Err(SimbatchError::TomlError(_))));
    }
}
