// src/exec/discovery.rs

//! Engine installation check.
//!
//! Resolution order:
//! 1. `program` as a path, when it contains a directory component;
//! 2. `program` looked up on `PATH`;
//! 3. each configured search path, in order.

use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::errors::{Result, SimbatchError};
use crate::types::BackendKind;

/// Install locations the engine's installer uses, newest first.
pub const DEFAULT_SEARCH_PATHS: &[&str] = &[
    r"C:\Program Files\HEC\HEC-RAS\6.6\Ras.exe",
    r"C:\Program Files\HEC\HEC-RAS\6.5\Ras.exe",
    r"C:\Program Files\HEC\HEC-RAS\6.4.1\Ras.exe",
    r"C:\Program Files (x86)\HEC\HEC-RAS\6.6\Ras.exe",
    r"C:\Program Files (x86)\HEC\HEC-RAS\6.5\Ras.exe",
];

/// Resolve the program a backend launches, or fail with `EngineUnavailable`.
pub fn locate_engine(
    backend: BackendKind,
    program: &str,
    search_paths: &[PathBuf],
) -> Result<PathBuf> {
    let unavailable = |reason: String| SimbatchError::EngineUnavailable { backend, reason };

    if program.trim().is_empty() {
        return Err(unavailable("no engine program configured".to_string()));
    }

    let as_path = Path::new(program);
    let has_dir = as_path
        .parent()
        .is_some_and(|p| !p.as_os_str().is_empty());
    if has_dir {
        if as_path.is_file() {
            info!(%backend, path = ?as_path, "using configured engine path");
            return Ok(as_path.to_path_buf());
        }
        return Err(unavailable(format!("{program} does not exist")));
    }

    match which::which(program) {
        Ok(found) => {
            info!(%backend, path = ?found, "found engine on PATH");
            return Ok(found);
        }
        Err(e) => debug!(%backend, program, error = %e, "engine not on PATH"),
    }

    if let Some(found) = search_paths.iter().find(|p| p.is_file()) {
        info!(%backend, path = ?found, "found engine at install location");
        return Ok(found.clone());
    }

    Err(unavailable(format!(
        "'{program}' not found on PATH or in {} search location(s)",
        search_paths.len()
    )))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn explicit_path_must_exist() {
        let dir = tempfile::tempdir().unwrap();
        let exe = dir.path().join("engine");
        std::fs::write(&exe, "").unwrap();

        let found = locate_engine(BackendKind::Subprocess, exe.to_str().unwrap(), &[]).unwrap();
        assert_eq!(found, exe);

        let missing = dir.path().join("nope");
        let err = locate_engine(BackendKind::Subprocess, missing.to_str().unwrap(), &[]).unwrap_err();
        assert!(matches!(err, SimbatchError::EngineUnavailable { .. }));
    }

    #[test]
    fn falls_back_to_search_paths() {
        let dir = tempfile::tempdir().unwrap();
        let exe = dir.path().join("Engine.exe");
        std::fs::write(&exe, "").unwrap();

        let found = locate_engine(
            BackendKind::Automation,
            "simbatch-no-such-engine-xyz",
            &[dir.path().join("absent.exe"), exe.clone()],
        )
        .unwrap();
        assert_eq!(found, exe);
    }

    #[test]
    fn unavailable_names_the_backend() {
        let err = locate_engine(BackendKind::Automation, "simbatch-no-such-engine-xyz", &[])
            .unwrap_err();
        assert!(err.to_string().contains("automation"));
    }

    #[cfg(unix)]
    #[test]
    fn finds_program_on_path() {
        assert!(locate_engine(BackendKind::Subprocess, "sh", &[]).is_ok());
    }
}
