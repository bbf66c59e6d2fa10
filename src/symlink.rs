//! Executable links from `<prefix>/bin` into staged trees.

use crate::error::Result;
use std::fs;
use std::os::unix::fs as unix_fs;
use std::path::{Component, Path, PathBuf};
use tracing::{debug, warn};

/// Link every entry of `<staged>/bin` into `bin_dir`.
///
/// Links are relative (`../Cellar/foo/1.0/bin/foo`). A name already taken by
/// something that is not our link is left alone and not reported.
pub fn link_binaries(staged: &Path, bin_dir: &Path) -> Result<Vec<PathBuf>> {
    let source_dir = staged.join("bin");
    if !source_dir.is_dir() {
        return Ok(Vec::new());
    }

    fs::create_dir_all(bin_dir)?;

    let mut linked = Vec::new();
    for entry in fs::read_dir(&source_dir)? {
        let entry = entry?;
        let source = entry.path();
        let target = bin_dir.join(entry.file_name());
        let relative = relative_path(bin_dir, &source);

        if target.symlink_metadata().is_ok() {
            if fs::read_link(&target).ok().as_deref() == Some(relative.as_path()) {
                linked.push(target);
            } else {
                warn!("Not linking {}: already exists", target.display());
            }
            continue;
        }

        unix_fs::symlink(&relative, &target)?;
        debug!("Linked {} -> {}", target.display(), relative.display());
        linked.push(target);
    }

    Ok(linked)
}

/// Remove links in `bin_dir` that point into `dependent_dir` but not into
/// `keep`, so a newly staged version can take over the names.
pub fn unlink_other_versions(bin_dir: &Path, dependent_dir: &Path, keep: &Path) -> Result<Vec<PathBuf>> {
    let stale: Vec<PathBuf> = links_into(bin_dir, dependent_dir)?
        .into_iter()
        .filter(|link| !points_into(link, keep))
        .collect();
    for link in &stale {
        debug!("Unlinking {}", link.display());
        fs::remove_file(link)?;
    }
    Ok(stale)
}

/// Links in `bin_dir` that resolve into `tree`. Read-only.
pub fn links_into(bin_dir: &Path, tree: &Path) -> Result<Vec<PathBuf>> {
    if !bin_dir.is_dir() {
        return Ok(Vec::new());
    }

    let mut links: Vec<PathBuf> = fs::read_dir(bin_dir)?
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|path| points_into(path, tree))
        .collect();
    links.sort();
    Ok(links)
}

/// Whether `link` is a symlink whose target lies under `tree`.
pub fn points_into(link: &Path, tree: &Path) -> bool {
    let Ok(target) = fs::read_link(link) else {
        return false;
    };
    let resolved = if target.is_relative() {
        link.parent().unwrap_or(Path::new("/")).join(target)
    } else {
        target
    };
    normalize(&resolved).starts_with(normalize(tree))
}

/// Lexically resolve `.` and `..` without touching the filesystem.
fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other),
        }
    }
    out
}

/// Relative path from directory `from` to `to`.
pub fn relative_path(from: &Path, to: &Path) -> PathBuf {
    let from = normalize(from);
    let to = normalize(to);

    let from_parts: Vec<Component> = from.components().collect();
    let to_parts: Vec<Component> = to.components().collect();
    let common = from_parts
        .iter()
        .zip(&to_parts)
        .take_while(|(a, b)| a == b)
        .count();

    let mut relative = PathBuf::new();
    for _ in common..from_parts.len() {
        relative.push("..");
    }
    for part in &to_parts[common..] {
        relative.push(part);
    }
    relative
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_relative_path() {
        assert_eq!(
            relative_path(Path::new("/opt/hop/bin"), Path::new("/opt/hop/Cellar/foo/1.0/bin/foo")),
            PathBuf::from("../Cellar/foo/1.0/bin/foo")
        );
    }

    #[test]
    fn test_link_and_find_links() {
        let dir = tempfile::tempdir().unwrap();
        let staged = dir.path().join("Cellar/foo/1.0");
        fs::create_dir_all(staged.join("bin")).unwrap();
        fs::write(staged.join("bin/foo"), b"#!/bin/sh").unwrap();
        let bin = dir.path().join("bin");

        let linked = link_binaries(&staged, &bin).unwrap();
        assert_eq!(linked, vec![bin.join("foo")]);
        assert!(points_into(&bin.join("foo"), &staged));

        // relinking is a no-op that still reports the link
        assert_eq!(link_binaries(&staged, &bin).unwrap(), linked);

        assert_eq!(links_into(&bin, &dir.path().join("Cellar/foo")).unwrap(), linked);
        assert!(links_into(&bin, &dir.path().join("Cellar/bar")).unwrap().is_empty());
    }

    #[test]
    fn test_unlink_other_versions_keeps_current() {
        let dir = tempfile::tempdir().unwrap();
        let cellar = dir.path().join("Cellar");
        let bin = dir.path().join("bin");
        for version in ["1.0", "2.0"] {
            let staged = cellar.join("foo").join(version);
            fs::create_dir_all(staged.join("bin")).unwrap();
            fs::write(staged.join("bin").join(format!("foo-{}", version)), b"x").unwrap();
            link_binaries(&staged, &bin).unwrap();
        }

        let removed =
            unlink_other_versions(&bin, &cellar.join("foo"), &cellar.join("foo/2.0")).unwrap();
        assert_eq!(removed, vec![bin.join("foo-1.0")]);
        assert!(bin.join("foo-1.0").symlink_metadata().is_err());
        assert!(points_into(&bin.join("foo-2.0"), &cellar.join("foo/2.0")));
    }

    #[test]
    fn test_foreign_file_is_not_clobbered() {
        let dir = tempfile::tempdir().unwrap();
        let staged = dir.path().join("Cellar/foo/1.0");
        fs::create_dir_all(staged.join("bin")).unwrap();
        fs::write(staged.join("bin/foo"), b"x").unwrap();
        let bin = dir.path().join("bin");
        fs::create_dir_all(&bin).unwrap();
        fs::write(bin.join("foo"), b"someone else's").unwrap();

        assert!(link_binaries(&staged, &bin).unwrap().is_empty());
        assert_eq!(fs::read(bin.join("foo")).unwrap(), b"someone else's");
    }
}
