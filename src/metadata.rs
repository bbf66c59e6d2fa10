//! Per-dependent metadata directories.
//!
//! `<install-root>/<name>/.metadata/<version>/<timestamp>/<leaf>`, where the
//! timestamp is UTC `YYYYmmddHHMMSS.mmm`. Lexicographic order of timestamp
//! directories equals chronological order.

use crate::config::Config;
use crate::dependent::Version;
use crate::error::Result;
use chrono::Utc;
use std::path::PathBuf;

const TIMESTAMP_FORMAT: &str = "%Y%m%d%H%M%S%.3f";

/// Which timestamp directory to address
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Timestamp {
    /// Most recent existing one
    Latest,
    /// A fresh one for the current instant
    Now,
}

#[derive(Debug, Clone)]
pub struct MetadataStore {
    install_root: PathBuf,
}

impl MetadataStore {
    pub fn new(install_root: impl Into<PathBuf>) -> Self {
        Self {
            install_root: install_root.into(),
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(config.install_root.clone())
    }

    /// `<install-root>/<name>/.metadata`
    pub fn root(&self, name: &str) -> PathBuf {
        self.install_root.join(name).join(".metadata")
    }

    pub fn versioned_dir(&self, name: &str, version: &Version) -> PathBuf {
        self.root(name).join(version.as_dir_name())
    }

    /// Timestamp directory for a version.
    ///
    /// `Latest` yields `None` when no timestamp directory exists yet. `Now`
    /// always yields a path, created on disk when `create` is set.
    pub fn timestamped_dir(
        &self,
        name: &str,
        version: &Version,
        timestamp: Timestamp,
        create: bool,
    ) -> Result<Option<PathBuf>> {
        let versioned = self.versioned_dir(name, version);

        let dir = match timestamp {
            Timestamp::Latest => {
                if !versioned.is_dir() {
                    return Ok(None);
                }
                let mut stamps: Vec<String> = std::fs::read_dir(&versioned)?
                    .filter_map(|e| e.ok())
                    .filter(|e| e.path().is_dir())
                    .map(|e| e.file_name().to_string_lossy().into_owned())
                    .collect();
                stamps.sort();
                match stamps.pop() {
                    Some(latest) => versioned.join(latest),
                    None => return Ok(None),
                }
            }
            Timestamp::Now => versioned.join(Utc::now().format(TIMESTAMP_FORMAT).to_string()),
        };

        if create {
            std::fs::create_dir_all(&dir)?;
        }
        Ok(Some(dir))
    }

    /// `<timestamped-dir>/<leaf>`; the leaf itself may not exist unless `create`.
    pub fn subdir(
        &self,
        name: &str,
        version: &Version,
        leaf: &str,
        timestamp: Timestamp,
        create: bool,
    ) -> Result<Option<PathBuf>> {
        let Some(parent) = self.timestamped_dir(name, version, timestamp, create)? else {
            return Ok(None);
        };

        let dir = parent.join(leaf);
        if create {
            std::fs::create_dir_all(&dir)?;
        }
        Ok(Some(dir))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_latest_without_metadata_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let store = MetadataStore::new(dir.path());
        let version = Version::from("1.0");

        assert!(
            store
                .subdir("foo", &version, "gpg", Timestamp::Latest, false)
                .unwrap()
                .is_none()
        );
    }

    #[test]
    fn test_now_then_latest_finds_it() {
        let dir = tempfile::tempdir().unwrap();
        let store = MetadataStore::new(dir.path());
        let version = Version::from("1.0");

        let created = store
            .subdir("foo", &version, "gpg", Timestamp::Now, true)
            .unwrap()
            .unwrap();
        assert!(created.is_dir());
        assert!(created.starts_with(dir.path().join("foo/.metadata/1.0")));

        let latest = store
            .subdir("foo", &version, "gpg", Timestamp::Latest, false)
            .unwrap()
            .unwrap();
        assert_eq!(latest, created);
    }

    #[test]
    fn test_latest_picks_newest_timestamp() {
        let dir = tempfile::tempdir().unwrap();
        let store = MetadataStore::new(dir.path());
        let version = Version::Latest;
        let versioned = store.versioned_dir("foo", &version);
        std::fs::create_dir_all(versioned.join("20230101000000.000")).unwrap();
        std::fs::create_dir_all(versioned.join("20240101000000.000")).unwrap();

        let latest = store
            .timestamped_dir("foo", &version, Timestamp::Latest, false)
            .unwrap()
            .unwrap();
        assert!(latest.ends_with("20240101000000.000"));
    }
}
