// src/config/loader.rs

use std::fs;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::config::model::{ConfigFile, RawConfigFile};
use crate::errors::Result;

/// Load a configuration file from a given path and return the raw
/// `RawConfigFile`.
///
/// This only performs TOML deserialization; it does **not** perform semantic
/// validation. Use [`load_and_validate`] for that.
pub fn load_from_path(path: impl AsRef<Path>) -> Result<RawConfigFile> {
    let path = path.as_ref();
    let contents = fs::read_to_string(path)?;

    let config: RawConfigFile = toml::from_str(&contents)?;

    Ok(config)
}

/// Load a configuration file from path, validate it, and resolve relative
/// paths against the file's directory.
///
/// This is the recommended entry point for the rest of the application.
pub fn load_and_validate(path: impl AsRef<Path>) -> Result<ConfigFile> {
    let path = path.as_ref();
    let raw_config = load_from_path(path)?;
    let mut config = ConfigFile::try_from(raw_config)?;

    let base = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    resolve_relative_paths(&mut config, base);
    debug!(path = ?path, jobs = config.job.len(), "config loaded");

    Ok(config)
}

/// Make every path in `config` absolute with respect to `base`.
pub fn resolve_relative_paths(config: &mut ConfigFile, base: &Path) {
    let base = std::path::absolute(base).unwrap_or_else(|_| base.to_path_buf());
    let fix = |p: &mut PathBuf| {
        if p.is_relative() {
            *p = base.join(&*p);
        }
    };

    if let Some(dir) = config.config.results_dir.as_mut() {
        fix(dir);
    }
    if let Some(dir) = config.config.workspace_root.as_mut() {
        fix(dir);
    }
    for job in config.job.values_mut() {
        fix(&mut job.project);
        if let Some(input) = job.external_input.as_mut() {
            fix(input);
        }
    }
}

/// The config file used when `--config` is not given: `Simbatch.toml` in
/// the current working directory.
pub fn default_config_path() -> PathBuf {
    PathBuf::from("Simbatch.toml")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn relative_paths_follow_the_config_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("Simbatch.toml");
        fs::write(
            &path,
            r#"
[config]
results_dir = "out"

[job.02]
project = "river/model.prj"
plan = "Levee"
external_input = "/data/shared.dss"
"#,
        )
        .unwrap();

        let cfg = load_and_validate(&path).unwrap();
        let base = std::path::absolute(dir.path()).unwrap();
        assert_eq!(cfg.config.results_dir, Some(base.join("out")));
        assert_eq!(cfg.job["02"].project, base.join("river/model.prj"));
        assert_eq!(
            cfg.job["02"].external_input.as_deref(),
            Some(Path::new("/data/shared.dss"))
        );
    }

    #[test]
    fn missing_file_is_an_io_error() {
        let err = load_and_validate("/definitely/not/here/Simbatch.toml").unwrap_err();
        assert!(matches!(err, crate::errors::SimbatchError::IoError(_)));
    }
}
