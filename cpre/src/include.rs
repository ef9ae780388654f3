use std::path::{Component, Path, PathBuf};

use log::debug;

use crate::config::{IncludeKind, SearchRule};

/// A header resolved to a concrete file.
#[derive(Clone, Debug)]
pub(crate) struct ResolvedFile {
    /// Normalized path, the key for the once-included set.
    pub(crate) path: PathBuf,
    /// Index of the search directory that matched, `None` when the file was
    /// found in the current or including file's directory. `#include_next`
    /// from the opened file resumes after this index.
    pub(crate) dir_index: Option<usize>,
}

/// Normalize a path: resolve symlinks and `.`/`..` through the filesystem
/// when the file exists, otherwise collapse lexically.
pub(crate) fn normalize(path: &Path) -> PathBuf {
    std::fs::canonicalize(path).unwrap_or_else(|_| clean_path(path))
}

/// Collapse `.` and `..` components without touching the filesystem.
pub(crate) fn clean_path(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if !out.pop() {
                    out.push(Component::ParentDir);
                }
            }
            other => out.push(other),
        }
    }
    out
}

/// Resolve an include request to a file on disk.
///
/// The quoted form consults, per the search rule, the process current
/// directory and/or the including file's directory before the configured
/// search list; the angle form searches only the list. `next_after` carries
/// the directory index where the including file was found: the search
/// resumes strictly after it and skips the local directories, which is what
/// lets a header hand off to the next one of the same name.
pub(crate) fn resolve(
    name: &str,
    kind: IncludeKind,
    search_rule: SearchRule,
    include_dirs: &[PathBuf],
    includer_dir: Option<&Path>,
    next_after: Option<Option<usize>>,
) -> Option<ResolvedFile> {
    let requested = Path::new(name);
    if requested.is_absolute() {
        return probe(requested, None);
    }

    if let Some(found_at) = next_after {
        let start = found_at.map_or(0, |i| i + 1);
        for (index, dir) in include_dirs.iter().enumerate().skip(start) {
            if let Some(hit) = probe(&dir.join(requested), Some(index)) {
                return Some(hit);
            }
        }
        return None;
    }

    if kind == IncludeKind::Local {
        let try_current = matches!(search_rule, SearchRule::Current | SearchRule::Both);
        let try_source = matches!(search_rule, SearchRule::Source | SearchRule::Both);
        if try_current && let Some(hit) = probe(requested, None) {
            return Some(hit);
        }
        if try_source
            && let Some(dir) = includer_dir
            && let Some(hit) = probe(&dir.join(requested), None)
        {
            return Some(hit);
        }
    }

    for (index, dir) in include_dirs.iter().enumerate() {
        if let Some(hit) = probe(&dir.join(requested), Some(index)) {
            return Some(hit);
        }
    }
    None
}

fn probe(candidate: &Path, dir_index: Option<usize>) -> Option<ResolvedFile> {
    debug!("probing include candidate {}", candidate.display());
    if candidate.is_file() {
        let path = normalize(candidate);
        debug!("include resolved to {}", path.display());
        Some(ResolvedFile { path, dir_index })
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn scratch_dir(tag: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("cpre-include-{}-{}", tag, std::process::id()));
        let _ = fs::remove_dir_all(&dir);
        fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn clean_path_collapses_dots() {
        assert_eq!(clean_path(Path::new("a/./b/../c.h")), PathBuf::from("a/c.h"));
        assert_eq!(clean_path(Path::new("./h.h")), PathBuf::from("h.h"));
        assert_eq!(clean_path(Path::new("../h.h")), PathBuf::from("../h.h"));
    }

    #[test]
    fn angle_form_searches_only_the_list() {
        let root = scratch_dir("angle");
        let sys = root.join("sys");
        fs::create_dir_all(&sys).unwrap();
        fs::write(sys.join("h.h"), "x").unwrap();
        fs::write(root.join("h.h"), "y").unwrap();

        let dirs = vec![sys.clone()];
        let hit = resolve(
            "h.h",
            IncludeKind::System,
            SearchRule::Source,
            &dirs,
            Some(root.as_path()),
            None,
        )
        .unwrap();
        assert_eq!(hit.dir_index, Some(0));
        assert!(hit.path.starts_with(normalize(&sys)));
        let _ = fs::remove_dir_all(&root);
    }

    #[test]
    fn quoted_form_prefers_source_directory() {
        let root = scratch_dir("quoted");
        let sys = root.join("sys");
        fs::create_dir_all(&sys).unwrap();
        fs::write(sys.join("h.h"), "x").unwrap();
        fs::write(root.join("h.h"), "y").unwrap();

        let dirs = vec![sys];
        let hit = resolve(
            "h.h",
            IncludeKind::Local,
            SearchRule::Source,
            &dirs,
            Some(root.as_path()),
            None,
        )
        .unwrap();
        assert_eq!(hit.dir_index, None);
        let _ = fs::remove_dir_all(&root);
    }

    #[test]
    fn include_next_resumes_after_matched_directory() {
        let root = scratch_dir("next");
        let first = root.join("first");
        let second = root.join("second");
        fs::create_dir_all(&first).unwrap();
        fs::create_dir_all(&second).unwrap();
        fs::write(first.join("h.h"), "a").unwrap();
        fs::write(second.join("h.h"), "b").unwrap();

        let dirs = vec![first.clone(), second.clone()];
        let outer =
            resolve("h.h", IncludeKind::System, SearchRule::Source, &dirs, None, None).unwrap();
        assert_eq!(outer.dir_index, Some(0));
        let inner = resolve(
            "h.h",
            IncludeKind::System,
            SearchRule::Source,
            &dirs,
            None,
            Some(outer.dir_index),
        )
        .unwrap();
        assert_eq!(inner.dir_index, Some(1));
        assert!(inner.path.starts_with(normalize(&second)));
        let _ = fs::remove_dir_all(&root);
    }

    #[test]
    fn missing_header_is_none() {
        let dirs: Vec<PathBuf> = Vec::new();
        assert!(
            resolve("no-such.h", IncludeKind::System, SearchRule::Current, &dirs, None, None)
                .is_none()
        );
    }
}
