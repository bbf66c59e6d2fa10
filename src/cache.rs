//! Download cache locations.
//!
//! Every (dependent, strategy) pair owns one location, `<root>/<name>--<tag>`.
//! Writers to a location are serialized through [`CacheStore::lock`]; artifacts
//! are written under an `.incomplete` name and renamed into place only once
//! complete, so an interrupted fetch never leaves a truncated file that looks
//! finished.

use crate::error::Result;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tokio::sync::OwnedMutexGuard;
use tracing::debug;
use walkdir::WalkDir;

const INCOMPLETE_SUFFIX: &str = ".incomplete";

type LocationLocks = HashMap<PathBuf, Arc<tokio::sync::Mutex<()>>>;

#[derive(Debug, Clone)]
pub struct CacheStore {
    root: PathBuf,
    locks: Arc<Mutex<LocationLocks>>,
}

/// Held while a location is being written; the lock entry is dropped from
/// the map when nobody else holds or waits on it.
pub struct LocationGuard {
    guard: Option<OwnedMutexGuard<()>>,
    location: PathBuf,
    locks: Arc<Mutex<LocationLocks>>,
}

impl Drop for LocationGuard {
    fn drop(&mut self) {
        self.guard.take();
        let mut locks = self
            .locks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if locks
            .get(&self.location)
            .is_some_and(|mutex| Arc::strong_count(mutex) == 1)
        {
            locks.remove(&self.location);
        }
    }
}

impl CacheStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            locks: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// `<root>/<name>--<tag>`
    pub fn location(&self, name: &str, tag: &str) -> PathBuf {
        self.root.join(format!("{}--{}", name, tag))
    }

    pub fn exists(&self, location: &Path) -> bool {
        location.symlink_metadata().is_ok()
    }

    /// Remove a location; absent locations are fine.
    pub fn clear(&self, location: &Path) -> Result<()> {
        let metadata = match location.symlink_metadata() {
            Ok(m) => m,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(e.into()),
        };

        debug!("Clearing cache location {}", location.display());
        if metadata.is_dir() {
            std::fs::remove_dir_all(location)?;
        } else {
            std::fs::remove_file(location)?;
        }
        Ok(())
    }

    /// Remove every location; returns how many were removed.
    pub fn clear_all(&self) -> Result<usize> {
        if !self.root.exists() {
            return Ok(0);
        }

        let mut removed = 0;
        for entry in std::fs::read_dir(&self.root)? {
            self.clear(&entry?.path())?;
            removed += 1;
        }
        Ok(removed)
    }

    /// Exclusive access to one location for the lifetime of the guard.
    pub async fn lock(&self, location: &Path) -> LocationGuard {
        let mutex = {
            let mut locks = self
                .locks
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            locks
                .entry(location.to_path_buf())
                .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
                .clone()
        };
        LocationGuard {
            guard: Some(mutex.lock_owned().await),
            location: location.to_path_buf(),
            locks: self.locks.clone(),
        }
    }

    /// Number of locations with a live lock entry
    pub fn lock_count(&self) -> usize {
        self.locks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .len()
    }

    /// Sibling path an in-progress write goes to
    pub fn incomplete_path(path: &Path) -> PathBuf {
        let mut name = path.file_name().unwrap_or_default().to_os_string();
        name.push(INCOMPLETE_SUFFIX);
        path.with_file_name(name)
    }

    /// Move a finished write into its final place, replacing what was there.
    pub fn commit(incomplete: &Path, destination: &Path) -> Result<()> {
        if destination.is_dir() && !destination.is_symlink() {
            std::fs::remove_dir_all(destination)?;
        } else if destination.symlink_metadata().is_ok() {
            std::fs::remove_file(destination)?;
        }
        std::fs::rename(incomplete, destination)?;
        Ok(())
    }

    /// Delete `.incomplete` leftovers from interrupted fetches.
    pub fn sweep_incomplete(&self) -> Result<usize> {
        if !self.root.exists() {
            return Ok(0);
        }

        let stale: Vec<PathBuf> = WalkDir::new(&self.root)
            .min_depth(1)
            .max_depth(2)
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().ends_with(INCOMPLETE_SUFFIX))
            .map(|e| e.into_path())
            .collect();

        for path in &stale {
            self.clear(path)?;
        }
        Ok(stale.len())
    }

    /// Total bytes of regular files under the root
    pub fn size(&self) -> u64 {
        WalkDir::new(&self.root)
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file())
            .filter_map(|e| e.metadata().ok())
            .map(|m| m.len())
            .sum()
    }
}
