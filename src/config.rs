//! Runtime configuration - filesystem layout and tunables.
//!
//! Everything is derived from the environment so the binary and the tests can
//! point the whole lifecycle at a throwaway prefix:
//!
//! ```text
//! $HOPPER_PREFIX/
//!   Cellar/<name>/<version>/      staged artifacts + INSTALL_RECEIPT.json
//!   Cellar/<name>/.metadata/      per-dependent metadata (cached signatures)
//!   bin/                          links into staged trees
//! $HOPPER_CACHE/<name>--<tag>     download cache locations
//! ```

use serde::Serialize;
use std::path::PathBuf;
use std::time::Duration;

const DEFAULT_JOBS: usize = 4;
const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(300);

#[derive(Debug, Clone, Serialize)]
pub struct Config {
    pub prefix: PathBuf,
    pub install_root: PathBuf,
    pub cache_root: PathBuf,
    pub bin_dir: PathBuf,
    pub catalog: PathBuf,
    /// Concurrent fetch/verify workers per dependency level
    pub jobs: usize,
    #[serde(serialize_with = "serialize_secs")]
    pub command_timeout: Duration,
    /// Write the quarantine attribute on downloaded content
    pub quarantine: bool,
}

fn serialize_secs<S: serde::Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_u64(d.as_secs())
}

impl Config {
    /// Build configuration from `HOPPER_*` environment variables.
    pub fn from_env() -> Self {
        let mut config = Self::with_prefix(detect_prefix());

        if let Some(cache) = std::env::var_os("HOPPER_CACHE") {
            config.cache_root = PathBuf::from(cache);
        } else {
            config.cache_root = default_cache_dir();
        }

        if let Some(catalog) = std::env::var_os("HOPPER_CATALOG") {
            config.catalog = PathBuf::from(catalog);
        }

        if let Some(jobs) = std::env::var("HOPPER_JOBS")
            .ok()
            .and_then(|v| v.parse::<usize>().ok())
            .filter(|j| *j > 0)
        {
            config.jobs = jobs;
        }

        if let Some(secs) = std::env::var("HOPPER_COMMAND_TIMEOUT")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
        {
            config.command_timeout = Duration::from_secs(secs);
        }

        if std::env::var_os("HOPPER_NO_QUARANTINE").is_some() {
            config.quarantine = false;
        }

        config
    }

    /// Layout rooted entirely under `prefix` (cache included).
    pub fn with_prefix(prefix: impl Into<PathBuf>) -> Self {
        let prefix = prefix.into();
        Self {
            install_root: prefix.join("Cellar"),
            cache_root: prefix.join("cache"),
            bin_dir: prefix.join("bin"),
            catalog: prefix.join("catalog.json"),
            jobs: DEFAULT_JOBS,
            command_timeout: DEFAULT_COMMAND_TIMEOUT,
            quarantine: cfg!(target_os = "macos"),
            prefix,
        }
    }

    /// `<install-root>/<name>`
    pub fn dependent_dir(&self, name: &str) -> PathBuf {
        self.install_root.join(name)
    }

    /// `<install-root>/<name>/<version>`
    pub fn staged_path(&self, name: &str, version: &str) -> PathBuf {
        self.dependent_dir(name).join(version)
    }

    /// `<install-root>/<name>/.metadata`
    pub fn metadata_root(&self, name: &str) -> PathBuf {
        self.dependent_dir(name).join(".metadata")
    }
}

/// Detect the prefix on this system
pub fn detect_prefix() -> PathBuf {
    if let Ok(prefix) = std::env::var("HOPPER_PREFIX") {
        return PathBuf::from(prefix);
    }

    #[cfg(target_arch = "aarch64")]
    {
        PathBuf::from("/opt/hopper")
    }
    #[cfg(not(target_arch = "aarch64"))]
    {
        PathBuf::from("/usr/local/hopper")
    }
}

/// Get the download cache directory (~/.cache/hopper/downloads or equivalent)
pub fn default_cache_dir() -> PathBuf {
    if let Some(cache_home) = std::env::var_os("XDG_CACHE_HOME") {
        PathBuf::from(cache_home).join("hopper/downloads")
    } else if let Some(home) = std::env::var_os("HOME") {
        PathBuf::from(home).join(".cache/hopper/downloads")
    } else {
        PathBuf::from(".cache/hopper/downloads")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_with_prefix_layout() {
        let config = Config::with_prefix("/tmp/hop");
        assert_eq!(config.install_root, PathBuf::from("/tmp/hop/Cellar"));
        assert_eq!(config.bin_dir, PathBuf::from("/tmp/hop/bin"));
        assert_eq!(
            config.staged_path("wget", "1.21"),
            PathBuf::from("/tmp/hop/Cellar/wget/1.21")
        );
        assert_eq!(
            config.metadata_root("wget"),
            PathBuf::from("/tmp/hop/Cellar/wget/.metadata")
        );
    }

    #[test]
    fn test_default_cache_dir_suffix() {
        assert!(default_cache_dir().ends_with("hopper/downloads"));
    }

    #[test]
    fn test_config_serializes_timeout_as_seconds() {
        let config = Config::with_prefix("/tmp/hop");
        let json = serde_json::to_value(&config).unwrap();
        assert_eq!(json["command_timeout"], 300);
    }
}
