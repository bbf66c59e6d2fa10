//! Staging fetched artifacts into the install root.
//!
//! ```text
//! Input:  <cache>/foo--curl/foo-1.0.tar.gz     (or a VCS checkout directory)
//! Output: <install-root>/foo/1.0/
//!   bin/
//!   share/
//! ```
//!
//! Gzipped tarballs are unpacked; when the archive holds a single top-level
//! directory its contents become the staged tree. VCS checkouts are copied
//! without their bookkeeping directories. Anything else is copied in as-is.
//! The tree is assembled under `<version>.incomplete` and renamed into place.

use crate::cache::CacheStore;
use crate::download::vcs::is_vcs_metadata;
use crate::error::Result;
use flate2::read::GzDecoder;
use std::fs;
use std::path::{Path, PathBuf};
use tar::Archive;
use tracing::debug;
use walkdir::WalkDir;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArtifactKind {
    TarGz,
    Directory,
    File,
}

impl ArtifactKind {
    pub fn of(artifact: &Path) -> Self {
        if artifact.is_dir() {
            return ArtifactKind::Directory;
        }
        let name = artifact
            .file_name()
            .map(|n| n.to_string_lossy().to_ascii_lowercase())
            .unwrap_or_default();
        if name.ends_with(".tar.gz") || name.ends_with(".tgz") {
            ArtifactKind::TarGz
        } else {
            ArtifactKind::File
        }
    }
}

/// Stage `artifact` at `destination`, replacing any previous tree there.
pub fn stage(artifact: &Path, destination: &Path) -> Result<PathBuf> {
    let incomplete = CacheStore::incomplete_path(destination);
    if incomplete.exists() {
        fs::remove_dir_all(&incomplete)?;
    }
    fs::create_dir_all(&incomplete)?;

    let kind = ArtifactKind::of(artifact);
    debug!(
        "Staging {} ({:?}) into {}",
        artifact.display(),
        kind,
        destination.display()
    );

    let staged = match kind {
        ArtifactKind::TarGz => unpack_tarball(artifact, &incomplete),
        ArtifactKind::Directory => copy_tree(artifact, &incomplete),
        ArtifactKind::File => copy_file(artifact, &incomplete),
    };
    if let Err(e) = staged {
        let _ = fs::remove_dir_all(&incomplete);
        return Err(e);
    }

    CacheStore::commit(&incomplete, destination)?;
    Ok(destination.to_path_buf())
}

fn unpack_tarball(artifact: &Path, into: &Path) -> Result<()> {
    let file = fs::File::open(artifact)?;
    let mut archive = Archive::new(GzDecoder::new(file));
    archive.unpack(into)?;
    hoist_single_directory(into)
}

/// `foo-1.0/bin/foo` -> `bin/foo` when `foo-1.0/` is the only entry.
fn hoist_single_directory(dir: &Path) -> Result<()> {
    let entries: Vec<PathBuf> = fs::read_dir(dir)?
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .collect();

    let [only] = entries.as_slice() else {
        return Ok(());
    };
    if !only.is_dir() || only.is_symlink() {
        return Ok(());
    }

    let holder = dir.join(".hoist");
    fs::rename(only, &holder)?;
    for entry in fs::read_dir(&holder)? {
        let entry = entry?;
        fs::rename(entry.path(), dir.join(entry.file_name()))?;
    }
    fs::remove_dir(&holder)?;
    Ok(())
}

fn copy_tree(source: &Path, into: &Path) -> Result<()> {
    for entry in WalkDir::new(source)
        .min_depth(1)
        .into_iter()
        .filter_entry(|e| !is_vcs_metadata(e))
    {
        let entry = entry.map_err(std::io::Error::other)?;
        let relative = entry
            .path()
            .strip_prefix(source)
            .map_err(std::io::Error::other)?;
        let target = into.join(relative);
        let file_type = entry.file_type();

        if file_type.is_symlink() {
            let link = fs::read_link(entry.path())?;
            std::os::unix::fs::symlink(link, &target)?;
        } else if file_type.is_dir() {
            fs::create_dir_all(&target)?;
        } else {
            fs::copy(entry.path(), &target)?;
        }
    }
    Ok(())
}

fn copy_file(source: &Path, into: &Path) -> Result<()> {
    let name = source
        .file_name()
        .ok_or_else(|| std::io::Error::other(format!("no file name: {}", source.display())))?;
    fs::copy(source, into.join(name))?;
    Ok(())
}
