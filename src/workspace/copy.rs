// src/workspace/copy.rs

//! Recursive project copy that preserves file timestamps.

use std::fs::{self, File, FileTimes};
use std::io;
use std::path::{Path, PathBuf};

use globset::GlobSet;
use tracing::trace;
use walkdir::WalkDir;

use super::ExternalReferenceMap;

/// What a copy did.
#[derive(Debug, Default)]
pub struct CopyReport {
    pub files: usize,
    pub bytes: u64,
    /// Files matched by an exclude pattern. They stay where they are and are
    /// referenced at their original location.
    pub external: ExternalReferenceMap,
}

/// Copy every file under `src` into `dst`, keeping the relative layout.
///
/// Paths (relative to `src`) matching `exclude` are not copied; they are
/// recorded in the report instead. `dst` and every directory in `skip` are
/// left out when they live inside `src`, along with everything under them.
pub fn copy_tree(
    src: &Path,
    dst: &Path,
    skip: &[PathBuf],
    exclude: &GlobSet,
) -> io::Result<CopyReport> {
    let mut report = CopyReport::default();

    let real_src = fs::canonicalize(src)?;
    let mut pruned: Vec<PathBuf> = Vec::with_capacity(skip.len() + 1);
    for dir in std::iter::once(dst).chain(skip.iter().map(PathBuf::as_path)) {
        // Also match through symlinks and relative spellings.
        let real = fs::canonicalize(dir).ok();
        // A directory holding the project is not a reason to skip all of it.
        if src.starts_with(dir) || real.as_ref().is_some_and(|r| real_src.starts_with(r)) {
            continue;
        }
        pruned.push(dir.to_path_buf());
        pruned.extend(real);
    }

    let walker = WalkDir::new(src)
        .follow_links(true)
        .into_iter()
        .filter_entry(|e| !is_pruned(e, &pruned));

    for entry in walker {
        let entry = entry.map_err(io::Error::other)?;
        let rel = match entry.path().strip_prefix(src) {
            Ok(rel) if !rel.as_os_str().is_empty() => rel,
            _ => continue,
        };
        let target = dst.join(rel);

        if entry.file_type().is_dir() {
            fs::create_dir_all(&target)?;
            continue;
        }

        if exclude.is_match(rel) {
            trace!(path = ?entry.path(), "leaving excluded file in place");
            report
                .external
                .insert(entry.file_name().to_string_lossy().as_ref(), entry.path());
            continue;
        }

        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)?;
        }
        report.bytes += copy_file_with_times(entry.path(), &target)?;
        report.files += 1;
    }

    Ok(report)
}

fn is_pruned(entry: &walkdir::DirEntry, pruned: &[PathBuf]) -> bool {
    if pruned.iter().any(|p| entry.path().starts_with(p)) {
        return true;
    }
    if entry.depth() == 0 || !entry.file_type().is_dir() {
        return false;
    }
    match fs::canonicalize(entry.path()) {
        Ok(real) => pruned.iter().any(|p| real == *p),
        Err(_) => false,
    }
}

/// Copy one file and carry over its access and modification times.
pub fn copy_file_with_times(src: &Path, dst: &Path) -> io::Result<u64> {
    let bytes = fs::copy(src, dst)?;
    let meta = fs::metadata(src)?;

    let mut times = FileTimes::new();
    if let Ok(modified) = meta.modified() {
        times = times.set_modified(modified);
    }
    if let Ok(accessed) = meta.accessed() {
        times = times.set_accessed(accessed);
    }
    File::options().write(true).open(dst)?.set_times(times)?;

    Ok(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use globset::{Glob, GlobSetBuilder};
    use std::time::{Duration, SystemTime};

    fn no_excludes() -> GlobSet {
        GlobSet::empty()
    }

    #[test]
    fn copies_nested_tree() {
        let src = tempfile::tempdir().unwrap();
        let dst = tempfile::tempdir().unwrap();
        fs::write(src.path().join("model.prj"), "Proj Title=demo\n").unwrap();
        fs::create_dir_all(src.path().join("terrain/tiles")).unwrap();
        fs::write(src.path().join("terrain/tiles/a.tif"), vec![7u8; 2048]).unwrap();

        let report = copy_tree(src.path(), dst.path(), &[], &no_excludes()).unwrap();

        assert_eq!(report.files, 2);
        assert_eq!(report.bytes, 2048 + 16);
        assert_eq!(
            fs::read(dst.path().join("terrain/tiles/a.tif")).unwrap(),
            vec![7u8; 2048]
        );
        assert!(report.external.is_empty());
    }

    #[test]
    fn preserves_modification_time() {
        let src = tempfile::tempdir().unwrap();
        let dst = tempfile::tempdir().unwrap();
        let path = src.path().join("model.g01");
        fs::write(&path, "Geom Title=g\n").unwrap();

        let old = SystemTime::now() - Duration::from_secs(3 * 24 * 3600);
        File::options()
            .write(true)
            .open(&path)
            .unwrap()
            .set_modified(old)
            .unwrap();

        copy_tree(src.path(), dst.path(), &[], &no_excludes()).unwrap();

        let copied = fs::metadata(dst.path().join("model.g01"))
            .unwrap()
            .modified()
            .unwrap();
        let original = fs::metadata(&path).unwrap().modified().unwrap();
        assert_eq!(copied, original);
    }

    #[test]
    fn excluded_files_are_recorded_not_copied() {
        let src = tempfile::tempdir().unwrap();
        let dst = tempfile::tempdir().unwrap();
        fs::write(src.path().join("model.prj"), "x").unwrap();
        fs::write(src.path().join("Inflow.DSS"), "big").unwrap();

        let mut builder = GlobSetBuilder::new();
        builder.add(
            globset::GlobBuilder::new("*.dss")
                .case_insensitive(true)
                .build()
                .unwrap(),
        );
        builder.add(Glob::new("unused/**").unwrap());
        let exclude = builder.build().unwrap();

        let report = copy_tree(src.path(), dst.path(), &[], &exclude).unwrap();

        assert!(!dst.path().join("Inflow.DSS").exists());
        assert_eq!(
            report.external.resolve("inflow.dss"),
            Some(src.path().join("Inflow.DSS").as_path())
        );
    }

    #[test]
    fn skips_destination_nested_inside_source() {
        let src = tempfile::tempdir().unwrap();
        fs::write(src.path().join("model.prj"), "x").unwrap();
        let dst = src.path().join(".work");
        fs::create_dir_all(&dst).unwrap();

        let report = copy_tree(src.path(), &dst, &[], &no_excludes()).unwrap();
        assert_eq!(report.files, 1);
        assert!(!dst.join(".work").exists());
    }

    #[test]
    fn skips_sibling_directories_under_a_nested_root() {
        let src = tempfile::tempdir().unwrap();
        fs::write(src.path().join("model.prj"), "x").unwrap();
        let root = src.path().join(".work");
        let earlier = root.join("simbatch_01_a");
        fs::create_dir_all(&earlier).unwrap();
        fs::write(earlier.join("model.p01.hdf"), "other job").unwrap();
        let results = src.path().join("results");
        fs::create_dir_all(&results).unwrap();
        fs::write(results.join("model.p01.hdf"), "harvested").unwrap();
        let dst = root.join("simbatch_02_b");
        fs::create_dir_all(&dst).unwrap();

        let report = copy_tree(
            src.path(),
            &dst,
            &[root.clone(), results.clone()],
            &no_excludes(),
        )
        .unwrap();

        assert_eq!(report.files, 1);
        assert!(dst.join("model.prj").is_file());
        assert!(!dst.join(".work").exists());
        assert!(!dst.join("results").exists());
    }

    #[test]
    fn skip_dirs_enclosing_the_source_are_ignored() {
        let parent = tempfile::tempdir().unwrap();
        let src = parent.path().join("project");
        fs::create_dir_all(&src).unwrap();
        fs::write(src.join("model.prj"), "x").unwrap();
        let dst = tempfile::tempdir().unwrap();

        let report = copy_tree(&src, dst.path(), &[parent.path().to_path_buf()], &no_excludes()).unwrap();
        assert_eq!(report.files, 1);
    }

    #[cfg(unix)]
    #[test]
    fn skip_list_matches_through_a_symlinked_source() {
        let real = tempfile::tempdir().unwrap();
        fs::write(real.path().join("model.prj"), "x").unwrap();
        fs::create_dir_all(real.path().join("out")).unwrap();
        fs::write(real.path().join("out/old.hdf"), "x").unwrap();
        let links = tempfile::tempdir().unwrap();
        let linked = links.path().join("project");
        std::os::unix::fs::symlink(real.path(), &linked).unwrap();
        let dst = tempfile::tempdir().unwrap();

        let report = copy_tree(
            &linked,
            dst.path(),
            &[real.path().join("out")],
            &no_excludes(),
        )
        .unwrap();

        assert_eq!(report.files, 1);
        assert!(!dst.path().join("out").exists());
    }
}
