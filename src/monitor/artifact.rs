// src/monitor/artifact.rs

//! Inspection of the engine's final-results artifact.

use std::fs::File;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::time::SystemTime;

const CHUNK_SIZE: usize = 1024 * 1024;

/// What the final-results artifact currently tells us.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArtifactStatus {
    Missing,
    /// Present and contains one of the success markers.
    Succeeded,
    /// Present but no success marker (yet).
    Unconfirmed,
}

/// Watches one final-results file, rescanning only when it changes.
#[derive(Debug)]
pub struct FinalResultsProbe {
    path: PathBuf,
    markers: Vec<Vec<u8>>,
    last_seen: Option<(u64, Option<SystemTime>)>,
    last_status: ArtifactStatus,
}

impl FinalResultsProbe {
    pub fn new(path: impl Into<PathBuf>, markers: &[String]) -> Self {
        Self {
            path: path.into(),
            markers: markers
                .iter()
                .filter(|m| !m.is_empty())
                .map(|m| m.as_bytes().to_vec())
                .collect(),
            last_seen: None,
            last_status: ArtifactStatus::Missing,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn inspect(&mut self) -> io::Result<ArtifactStatus> {
        let meta = match std::fs::metadata(&self.path) {
            Ok(m) if m.is_file() => m,
            Ok(_) => return Ok(ArtifactStatus::Missing),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                self.last_seen = None;
                self.last_status = ArtifactStatus::Missing;
                return Ok(ArtifactStatus::Missing);
            }
            Err(e) => return Err(e),
        };

        let fingerprint = (meta.len(), meta.modified().ok());
        if self.last_seen == Some(fingerprint) {
            return Ok(self.last_status);
        }

        let status = if contains_any_marker(&self.path, &self.markers)? {
            ArtifactStatus::Succeeded
        } else {
            ArtifactStatus::Unconfirmed
        };
        self.last_seen = Some(fingerprint);
        self.last_status = status;
        Ok(status)
    }
}

/// Stream `path` in chunks looking for any marker. Consecutive chunks overlap
/// by `longest marker - 1` bytes so a marker split across a boundary is found.
pub fn contains_any_marker(path: &Path, markers: &[Vec<u8>]) -> io::Result<bool> {
    let Some(longest) = markers.iter().map(Vec::len).max() else {
        return Ok(false);
    };
    let overlap = longest.saturating_sub(1);

    let mut file = File::open(path)?;
    let mut window: Vec<u8> = Vec::with_capacity(CHUNK_SIZE + overlap);
    let mut chunk = vec![0u8; CHUNK_SIZE];

    loop {
        let n = file.read(&mut chunk)?;
        if n == 0 {
            return Ok(false);
        }
        window.extend_from_slice(&chunk[..n]);
        if markers.iter().any(|m| contains_subslice(&window, m)) {
            return Ok(true);
        }
        let keep_from = window.len().saturating_sub(overlap);
        window.drain(..keep_from);
    }
}

fn contains_subslice(haystack: &[u8], needle: &[u8]) -> bool {
    !needle.is_empty()
        && haystack.len() >= needle.len()
        && haystack.windows(needle.len()).any(|w| w == needle)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn markers() -> Vec<String> {
        vec![
            "Finished Successfully".to_string(),
            "Completed Successfully".to_string(),
        ]
    }

    #[test]
    fn missing_artifact() {
        let dir = tempfile::tempdir().unwrap();
        let mut probe = FinalResultsProbe::new(dir.path().join("model.p01.hdf"), &markers());
        assert_eq!(probe.inspect().unwrap(), ArtifactStatus::Missing);
    }

    #[test]
    fn finds_marker_in_binary_content() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("model.p01.hdf");
        let mut data = vec![0u8; 100];
        data.extend_from_slice(b"Finished Successfully");
        data.extend_from_slice(&[0u8; 100]);
        std::fs::write(&path, data).unwrap();

        let mut probe = FinalResultsProbe::new(&path, &markers());
        assert_eq!(probe.inspect().unwrap(), ArtifactStatus::Succeeded);
    }

    #[test]
    fn present_without_marker_is_unconfirmed() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("model.p01.hdf");
        std::fs::write(&path, b"\x00\x00Incomplete").unwrap();

        let mut probe = FinalResultsProbe::new(&path, &markers());
        assert_eq!(probe.inspect().unwrap(), ArtifactStatus::Unconfirmed);
    }

    #[test]
    fn empty_file_is_unconfirmed() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("model.p01.hdf");
        std::fs::write(&path, b"").unwrap();

        let mut probe = FinalResultsProbe::new(&path, &markers());
        assert_eq!(probe.inspect().unwrap(), ArtifactStatus::Unconfirmed);
    }

    #[test]
    fn marker_spanning_chunk_boundary_is_found() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("model.p01.hdf");
        let mut data = vec![0u8; CHUNK_SIZE - 8];
        data.extend_from_slice(b"Finished Successfully");
        data.extend_from_slice(&[0u8; 100]);
        std::fs::write(&path, data).unwrap();

        let mut probe = FinalResultsProbe::new(&path, &markers());
        assert_eq!(probe.inspect().unwrap(), ArtifactStatus::Succeeded);
    }

    #[test]
    fn rescans_after_file_changes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("model.p01.hdf");
        std::fs::write(&path, b"partial").unwrap();

        let mut probe = FinalResultsProbe::new(&path, &markers());
        assert_eq!(probe.inspect().unwrap(), ArtifactStatus::Unconfirmed);

        std::fs::write(&path, b"partial ... Completed Successfully").unwrap();
        assert_eq!(probe.inspect().unwrap(), ArtifactStatus::Succeeded);
    }
}
