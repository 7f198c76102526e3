// src/workspace/rewrite.rs

//! In-workspace edits of the engine's text configuration.
//!
//! - [`ReferenceRewriter`] repoints external-reference lines (e.g.
//!   `DSS File=...`) so the isolated copy still resolves inputs that were not
//!   duplicated.
//! - [`activate_plan`] and [`enable_detailed_log`] prepare the copied project
//!   so the engine computes the right plan and writes its incremental log.
//!
//! All edits run strictly after the copy has finished, write a file only when
//! its content changes, and keep the file's original encoding and line
//! endings.

use std::fs;
use std::path::{Path, PathBuf};

use globset::{GlobBuilder, GlobSet, GlobSetBuilder};
use tracing::{debug, info};

use crate::errors::{Result, SimbatchError};

use super::ExternalReferenceMap;

/// Text encodings the engine's configuration files are found in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TextEncoding {
    Utf8,
    /// ISO-8859-1: every byte is one character.
    Latin1,
}

/// Decode configuration text, trying UTF-8 first and Latin-1 second.
///
/// Bytes containing NUL are not configuration text and are rejected rather
/// than decoded into garbage.
pub fn decode_text(bytes: &[u8]) -> std::result::Result<(String, TextEncoding), String> {
    if bytes.contains(&0) {
        return Err("file contains NUL bytes; not a text file".to_string());
    }
    match std::str::from_utf8(bytes) {
        Ok(s) => Ok((s.to_string(), TextEncoding::Utf8)),
        Err(_) => Ok((
            bytes.iter().map(|&b| char::from(b)).collect(),
            TextEncoding::Latin1,
        )),
    }
}

/// Encode text back into the encoding it was read with.
pub fn encode_text(text: &str, encoding: TextEncoding) -> std::result::Result<Vec<u8>, String> {
    match encoding {
        TextEncoding::Utf8 => Ok(text.as_bytes().to_vec()),
        TextEncoding::Latin1 => text
            .chars()
            .map(|c| {
                u8::try_from(u32::from(c))
                    .map_err(|_| format!("character {c:?} cannot be written as Latin-1"))
            })
            .collect(),
    }
}

fn read_text(path: &Path) -> Result<(String, TextEncoding)> {
    let bytes = fs::read(path)?;
    decode_text(&bytes).map_err(|reason| SimbatchError::Rewrite {
        path: path.to_path_buf(),
        reason,
    })
}

fn write_text(path: &Path, text: &str, encoding: TextEncoding) -> Result<()> {
    let bytes = encode_text(text, encoding).map_err(|reason| SimbatchError::Rewrite {
        path: path.to_path_buf(),
        reason,
    })?;
    fs::write(path, bytes)?;
    Ok(())
}

/// Split `line` into its body and its terminator (`"\r\n"`, `"\n"` or `""`).
fn split_ending(line: &str) -> (&str, &str) {
    if let Some(body) = line.strip_suffix("\r\n") {
        (body, "\r\n")
    } else if let Some(body) = line.strip_suffix('\n') {
        (body, "\n")
    } else {
        (line, "")
    }
}

/// Line terminator used by most lines of `text`; `"\n"` when there are none.
fn dominant_ending(text: &str) -> &'static str {
    let crlf = text.matches("\r\n").count();
    let lf = text.matches('\n').count();
    if crlf > 0 && crlf * 2 >= lf { "\r\n" } else { "\n" }
}

/// Final path component of a reference, whichever separator it uses.
fn reference_basename(value: &str) -> &str {
    value.rsplit(['/', '\\']).next().unwrap_or(value)
}

/// True for `/x`, `\x`, `\\server\x` and `C:\x` / `C:/x`.
fn is_absolute_reference(value: &str) -> bool {
    let b = value.as_bytes();
    matches!(b.first(), Some(b'/') | Some(b'\\'))
        || (b.len() >= 3 && b[0].is_ascii_alphabetic() && b[1] == b':' && matches!(b[2], b'/' | b'\\'))
}

/// Rewrites external-reference lines in a workspace's configuration files.
#[derive(Debug, Clone)]
pub struct ReferenceRewriter {
    files: GlobSet,
    marker: String,
}

impl ReferenceRewriter {
    /// `file_patterns` select which top-level workspace files hold reference
    /// lines (matched case-insensitively against the file name); `marker` is
    /// the line prefix that introduces a reference.
    pub fn new(file_patterns: &[String], marker: impl Into<String>) -> Result<Self> {
        let mut builder = GlobSetBuilder::new();
        for pattern in file_patterns {
            let glob = GlobBuilder::new(pattern)
                .case_insensitive(true)
                .build()
                .map_err(|e| {
                    SimbatchError::ConfigError(format!("invalid reference file glob '{pattern}': {e}"))
                })?;
            builder.add(glob);
        }
        let files = builder
            .build()
            .map_err(|e| SimbatchError::ConfigError(format!("building reference globs: {e}")))?;

        Ok(Self {
            files,
            marker: marker.into(),
        })
    }

    /// Rewrite every matching file in `workspace_root`.
    ///
    /// A reference is repointed when:
    /// - `override_target` is set: every reference points there;
    /// - its file name is in `external`: it points at the original location;
    /// - it is absolute and its file was copied into the workspace: it
    ///   becomes the bare file name so the engine resolves the local copy.
    ///
    /// Everything else is left alone. Returns the files that changed.
    pub fn rewrite(
        &self,
        workspace_root: &Path,
        external: &ExternalReferenceMap,
        override_target: Option<&Path>,
    ) -> Result<Vec<PathBuf>> {
        let mut local_names = Vec::new();
        let mut candidates = Vec::new();
        for entry in fs::read_dir(workspace_root)? {
            let entry = entry?;
            if !entry.file_type()?.is_file() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().into_owned();
            if self.files.is_match(&name) {
                candidates.push(entry.path());
            }
            local_names.push(name.to_lowercase());
        }
        candidates.sort();

        let override_value = override_target.map(|p| p.to_string_lossy().into_owned());
        let resolve = |value: &str| -> Option<String> {
            if let Some(target) = &override_value {
                return Some(target.clone());
            }
            let base = reference_basename(value);
            if let Some(original) = external.resolve(base) {
                return Some(original.to_string_lossy().into_owned());
            }
            if is_absolute_reference(value) && local_names.contains(&base.to_lowercase()) {
                return Some(base.to_string());
            }
            None
        };

        let mut changed = Vec::new();
        for path in candidates {
            if self.rewrite_file(&path, &resolve)? {
                info!(file = ?path, "rewrote external references");
                changed.push(path);
            }
        }
        Ok(changed)
    }

    /// Apply `resolve` to each reference line of one file. Returns whether
    /// the file was written.
    pub fn rewrite_file(
        &self,
        path: &Path,
        resolve: &dyn Fn(&str) -> Option<String>,
    ) -> Result<bool> {
        let (text, encoding) = read_text(path)?;
        match self.rewrite_text(&text, resolve) {
            Some(new_text) => {
                write_text(path, &new_text, encoding)?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Rewritten text, or `None` when nothing changed.
    pub fn rewrite_text(
        &self,
        text: &str,
        resolve: &dyn Fn(&str) -> Option<String>,
    ) -> Option<String> {
        let mut out = String::with_capacity(text.len());
        let mut changed = false;

        for line in text.split_inclusive('\n') {
            let (body, ending) = split_ending(line);
            let Some(raw_value) = body.strip_prefix(self.marker.as_str()) else {
                out.push_str(line);
                continue;
            };
            let value = raw_value.trim();
            match resolve(value) {
                Some(new_value) if new_value != value => {
                    debug!(from = %value, to = %new_value, "repointing reference");
                    out.push_str(&self.marker);
                    out.push_str(&new_value);
                    out.push_str(ending);
                    changed = true;
                }
                _ => out.push_str(line),
            }
        }

        changed.then_some(out)
    }
}

/// Set `key` to `value` on the first line starting with `key`, or add it via
/// `insert`. Returns the new text when it differs.
fn set_key_line(
    text: &str,
    key: &str,
    value: &str,
    insert: impl FnOnce(&mut Vec<String>, String),
) -> Option<String> {
    let ending = dominant_ending(text);
    let mut lines: Vec<String> = text.split_inclusive('\n').map(str::to_string).collect();
    let wanted = format!("{key}{value}");

    let existing = lines
        .iter()
        .position(|l| split_ending(l).0.starts_with(key));
    match existing {
        Some(idx) => {
            let (body, line_ending) = split_ending(&lines[idx]);
            if body.trim_end() == wanted.trim_end() {
                return None;
            }
            let line_ending = if line_ending.is_empty() { ending } else { line_ending };
            lines[idx] = format!("{wanted}{line_ending}");
        }
        None => {
            if let Some(last) = lines.last_mut() {
                if !last.ends_with('\n') {
                    last.push_str(ending);
                }
            }
            insert(&mut lines, format!("{wanted}{ending}"));
        }
    }
    Some(lines.concat())
}

/// Point the project's `Current Plan=` at `plan_key` (e.g. `p03`).
///
/// Inserted after the first line (the project title) when absent.
pub fn activate_plan(project_file: &Path, plan_key: &str) -> Result<bool> {
    let (text, encoding) = read_text(project_file)?;
    let updated = set_key_line(&text, "Current Plan=", plan_key, |lines, line| {
        let at = lines.len().min(1);
        lines.insert(at, line);
    });
    match updated {
        Some(new_text) => {
            write_text(project_file, &new_text, encoding)?;
            Ok(true)
        }
        None => Ok(false),
    }
}

/// Make the plan write its incremental log (`Write Detailed= 1`), appending
/// the line when missing.
pub fn enable_detailed_log(plan_file: &Path) -> Result<bool> {
    let (text, encoding) = read_text(plan_file)?;
    let updated = set_key_line(&text, "Write Detailed=", " 1", |lines, line| {
        lines.push(line);
    });
    match updated {
        Some(new_text) => {
            write_text(plan_file, &new_text, encoding)?;
            Ok(true)
        }
        None => Ok(false),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rewriter() -> ReferenceRewriter {
        ReferenceRewriter::new(&["*.u[0-9][0-9]".to_string()], "DSS File=").unwrap()
    }

    fn external(name: &str, path: &str) -> ExternalReferenceMap {
        let mut map = ExternalReferenceMap::default();
        map.insert(name, Path::new(path));
        map
    }

    #[test]
    fn repoints_excluded_reference_and_keeps_other_lines() {
        let dir = tempfile::tempdir().unwrap();
        let flow = dir.path().join("model.u01");
        fs::write(
            &flow,
            "Flow Title=Base\r\nDSS File=inflow.dss\r\nProgram Version=6.5\r\n",
        )
        .unwrap();

        let changed = rewriter()
            .rewrite(dir.path(), &external("inflow.dss", "/data/shared/inflow.dss"), None)
            .unwrap();

        assert_eq!(changed, vec![flow.clone()]);
        assert_eq!(
            fs::read_to_string(&flow).unwrap(),
            "Flow Title=Base\r\nDSS File=/data/shared/inflow.dss\r\nProgram Version=6.5\r\n"
        );
    }

    #[test]
    fn rewriting_twice_is_a_no_op() {
        let dir = tempfile::tempdir().unwrap();
        let flow = dir.path().join("model.U02");
        fs::write(&flow, "DSS File=C:\\old\\inflow.dss\n").unwrap();
        let map = external("inflow.dss", "/data/shared/inflow.dss");

        rewriter().rewrite(dir.path(), &map, None).unwrap();
        let once = fs::read(&flow).unwrap();
        let changed = rewriter().rewrite(dir.path(), &map, None).unwrap();

        assert!(changed.is_empty());
        assert_eq!(fs::read(&flow).unwrap(), once);
    }

    #[test]
    fn absolute_reference_to_copied_file_becomes_local() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("Local.dss"), "x").unwrap();
        let flow = dir.path().join("model.u01");
        fs::write(&flow, "DSS File=C:\\OldMachine\\project\\Local.dss\n").unwrap();

        rewriter()
            .rewrite(dir.path(), &ExternalReferenceMap::default(), None)
            .unwrap();

        assert_eq!(fs::read_to_string(&flow).unwrap(), "DSS File=Local.dss\n");
    }

    #[test]
    fn unknown_references_are_untouched() {
        let dir = tempfile::tempdir().unwrap();
        let flow = dir.path().join("model.u01");
        fs::write(&flow, "DSS File=/elsewhere/other.dss\n").unwrap();

        let changed = rewriter()
            .rewrite(dir.path(), &ExternalReferenceMap::default(), None)
            .unwrap();
        assert!(changed.is_empty());
    }

    #[test]
    fn override_replaces_every_reference() {
        let dir = tempfile::tempdir().unwrap();
        let flow = dir.path().join("model.u01");
        fs::write(&flow, "DSS File=a.dss\nDSS File=b.dss\n").unwrap();

        rewriter()
            .rewrite(
                dir.path(),
                &ExternalReferenceMap::default(),
                Some(Path::new("/runs/event.dss")),
            )
            .unwrap();

        assert_eq!(
            fs::read_to_string(&flow).unwrap(),
            "DSS File=/runs/event.dss\nDSS File=/runs/event.dss\n"
        );
    }

    #[test]
    fn latin1_file_is_written_back_as_latin1() {
        let dir = tempfile::tempdir().unwrap();
        let flow = dir.path().join("model.u01");
        let mut bytes = b"Flow Title=Br".to_vec();
        bytes.push(0xF8); // 'ø'
        bytes.extend_from_slice(b"nn\nDSS File=inflow.dss\n");
        fs::write(&flow, &bytes).unwrap();

        rewriter()
            .rewrite(dir.path(), &external("inflow.dss", "/data/inflow.dss"), None)
            .unwrap();

        let mut expected = b"Flow Title=Br".to_vec();
        expected.push(0xF8);
        expected.extend_from_slice(b"nn\nDSS File=/data/inflow.dss\n");
        assert_eq!(fs::read(&flow).unwrap(), expected);
    }

    #[test]
    fn latin1_file_cannot_take_wide_characters() {
        let dir = tempfile::tempdir().unwrap();
        let flow = dir.path().join("model.u01");
        fs::write(&flow, b"T=\xE6\nDSS File=a.dss\n").unwrap();

        let err = rewriter()
            .rewrite(
                dir.path(),
                &ExternalReferenceMap::default(),
                Some(Path::new("/data/\u{6C34}.dss")),
            )
            .unwrap_err();
        assert!(matches!(err, SimbatchError::Rewrite { .. }));
    }

    #[test]
    fn binary_content_is_a_decode_failure() {
        assert!(decode_text(b"DSS File=\x00\x01").is_err());
        assert_eq!(decode_text(b"ok").unwrap().1, TextEncoding::Utf8);
        assert_eq!(decode_text(b"\xFF").unwrap().1, TextEncoding::Latin1);
    }

    #[test]
    fn activates_plan_in_project_file() {
        let dir = tempfile::tempdir().unwrap();
        let prj = dir.path().join("model.prj");

        fs::write(&prj, "Proj Title=Demo\r\nCurrent Plan=p01\r\nPlan File=p01\r\n").unwrap();
        assert!(activate_plan(&prj, "p03").unwrap());
        assert_eq!(
            fs::read_to_string(&prj).unwrap(),
            "Proj Title=Demo\r\nCurrent Plan=p03\r\nPlan File=p01\r\n"
        );
        assert!(!activate_plan(&prj, "p03").unwrap());

        fs::write(&prj, "Proj Title=Demo\nPlan File=p01\n").unwrap();
        activate_plan(&prj, "p02").unwrap();
        assert_eq!(
            fs::read_to_string(&prj).unwrap(),
            "Proj Title=Demo\nCurrent Plan=p02\nPlan File=p01\n"
        );
    }

    #[test]
    fn enables_detailed_log() {
        let dir = tempfile::tempdir().unwrap();
        let plan = dir.path().join("model.p01");

        fs::write(&plan, "Plan Title=A\nWrite Detailed= 0 \n").unwrap();
        assert!(enable_detailed_log(&plan).unwrap());
        assert_eq!(
            fs::read_to_string(&plan).unwrap(),
            "Plan Title=A\nWrite Detailed= 1\n"
        );
        assert!(!enable_detailed_log(&plan).unwrap());

        fs::write(&plan, "Plan Title=A").unwrap();
        enable_detailed_log(&plan).unwrap();
        assert_eq!(
            fs::read_to_string(&plan).unwrap(),
            "Plan Title=A\nWrite Detailed= 1\n"
        );
    }
}
