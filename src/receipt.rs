//! Install receipts.
//!
//! Each staged version carries an `INSTALL_RECEIPT.json` describing how it got
//! there:
//! ```text
//! <install-root>/ripgrep/14.1.0/
//!   INSTALL_RECEIPT.json
//!   bin/
//! ```
//!
//! A version directory with a receipt counts as installed. The recorded link
//! list is what uninstall removes besides the tree itself.

use crate::error::Result;
use crate::requirement::host_arch;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

pub const RECEIPT_FILE: &str = "INSTALL_RECEIPT.json";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuntimeDependency {
    pub full_name: String,
    pub version: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstallReceipt {
    pub hopper_version: String,
    pub name: String,
    pub version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tap: Option<String>,
    pub installed_on_request: bool,
    pub installed_as_dependency: bool,
    pub time: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_modified_time: Option<i64>,
    /// Cache tag of the strategy that fetched the source
    pub strategy: String,
    pub cached_location: PathBuf,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_commit: Option<String>,
    #[serde(default)]
    pub linked_files: Vec<PathBuf>,
    #[serde(default)]
    pub quarantined: bool,
    #[serde(default)]
    pub signature_verified: bool,
    #[serde(default)]
    pub runtime_dependencies: Vec<RuntimeDependency>,
    pub arch: String,
}

impl InstallReceipt {
    pub fn new(
        name: &str,
        version: &str,
        strategy: &str,
        cached_location: &Path,
        installed_on_request: bool,
    ) -> Self {
        Self {
            hopper_version: format!("hopper/{}", env!("CARGO_PKG_VERSION")),
            name: name.to_string(),
            version: version.to_string(),
            tap: None,
            installed_on_request,
            installed_as_dependency: !installed_on_request,
            time: Utc::now().timestamp(),
            source_modified_time: None,
            strategy: strategy.to_string(),
            cached_location: cached_location.to_path_buf(),
            last_commit: None,
            linked_files: Vec::new(),
            quarantined: false,
            signature_verified: false,
            runtime_dependencies: Vec::new(),
            arch: host_arch().to_string(),
        }
    }

    pub fn with_source_modified_time(mut self, time: Option<DateTime<Utc>>) -> Self {
        self.source_modified_time = time.map(|t| t.timestamp());
        self
    }

    pub fn path(staged: &Path) -> PathBuf {
        staged.join(RECEIPT_FILE)
    }

    pub fn exists(staged: &Path) -> bool {
        Self::path(staged).is_file()
    }

    pub fn read(staged: &Path) -> Result<Self> {
        let contents = fs::read_to_string(Self::path(staged))?;
        Ok(serde_json::from_str(&contents)?)
    }

    pub fn write(&self, staged: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        fs::write(Self::path(staged), json)?;
        Ok(())
    }
}
