//! Download quarantine marker (`com.apple.quarantine`).
//!
//! The attribute value is a single `;`-separated record:
//!
//! ```text
//! <type>;<hex-timestamp>;<agent_name>;<event_identifier>
//! 0081;6529f1c0;Safari;123
//! ```
//!
//! `type` is written as four lowercase hex digits (the form Launch Services
//! writes), the timestamp as lowercase hex Unix seconds without a `0x` prefix.
//! Reading and writing the attribute itself goes through an [`AttributeStore`]
//! so the codec can be exercised against [`MemoryAttributes`].

use crate::command::{CommandRunner, Invocation};
use crate::error::{HopperError, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tracing::debug;

pub const QUARANTINE_ATTRIBUTE: &str = "com.apple.quarantine";

// These apply to the container (.zip, .dmg, .app), not the executable inside it.
pub const UNOPENED: u16 = 0x0000;
pub const CANCELLED: u16 = 0x00A0;
pub const OPENED: u16 = 0x00E0;

/// Value Safari writes on downloaded .dmg/.zip containers
pub const QUARANTINED_FILE: u16 = 0x0081;

pub const AGENT_NAME: &str = "hopper";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuarantineAttribute {
    pub kind: u16,
    pub timestamp: DateTime<Utc>,
    pub agent_name: String,
    pub event_identifier: String,
}

/// Encode an attribute value.
///
/// Sub-second precision is dropped; timestamps before the epoch clamp to 0.
pub fn encode(
    kind: u16,
    timestamp: DateTime<Utc>,
    agent: Option<&str>,
    event_id: Option<&str>,
) -> Vec<u8> {
    let secs = timestamp.timestamp().max(0) as u64;
    format!(
        "{:04x};{:x};{};{}",
        kind,
        secs,
        agent.unwrap_or_default(),
        event_id.unwrap_or_default()
    )
    .into_bytes()
}

/// Decode an attribute value; `None` in means the attribute is absent.
pub fn decode(raw: Option<&[u8]>) -> Result<Option<QuarantineAttribute>> {
    let Some(raw) = raw else {
        return Ok(None);
    };

    let value = std::str::from_utf8(raw)
        .map_err(|_| HopperError::InvalidAttributeFormat("value is not UTF-8".to_string()))?;
    let value = value.trim_end_matches(['\n', '\r']);

    let fields: Vec<&str> = value.splitn(4, ';').collect();
    if fields.len() < 4 {
        return Err(HopperError::InvalidAttributeFormat(format!(
            "expected 4 fields, found {}: {:?}",
            fields.len(),
            value
        )));
    }

    let kind = u16::from_str_radix(fields[0], 16).map_err(|_| {
        HopperError::InvalidAttributeFormat(format!("bad type field: {:?}", fields[0]))
    })?;

    let secs = i64::from_str_radix(fields[1], 16).map_err(|_| {
        HopperError::InvalidAttributeFormat(format!("bad timestamp field: {:?}", fields[1]))
    })?;
    let timestamp = DateTime::from_timestamp(secs, 0).ok_or_else(|| {
        HopperError::InvalidAttributeFormat(format!("timestamp out of range: {}", secs))
    })?;

    Ok(Some(QuarantineAttribute {
        kind,
        timestamp,
        agent_name: fields[2].to_string(),
        event_identifier: fields[3].to_string(),
    }))
}

/// Named extended attributes on a filesystem path
#[async_trait]
pub trait AttributeStore: Send + Sync {
    async fn get(&self, path: &Path, name: &str) -> Result<Option<Vec<u8>>>;
    async fn set(&self, path: &Path, name: &str, value: &[u8]) -> Result<()>;
    /// Removing an absent attribute is not an error.
    async fn remove(&self, path: &Path, name: &str) -> Result<()>;
}

/// Attribute access through the `xattr` tool
pub struct XattrCommand {
    runner: Arc<dyn CommandRunner>,
}

impl XattrCommand {
    pub fn new(runner: Arc<dyn CommandRunner>) -> Self {
        Self { runner }
    }
}

fn ensure_exists(path: &Path) -> Result<()> {
    if path.symlink_metadata().is_err() {
        return Err(HopperError::IoError(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            format!("No such file: {}", path.display()),
        )));
    }
    Ok(())
}

fn is_missing_attribute(stderr: &str) -> bool {
    stderr.contains("No such xattr") || stderr.contains("No such attribute")
}

#[async_trait]
impl AttributeStore for XattrCommand {
    async fn get(&self, path: &Path, name: &str) -> Result<Option<Vec<u8>>> {
        ensure_exists(path)?;
        let out = self
            .runner
            .run(&Invocation::new("xattr").args(["-p", name]).path_arg(path))
            .await?;

        if out.success() {
            Ok(Some(out.stdout.trim_end_matches('\n').as_bytes().to_vec()))
        } else if is_missing_attribute(&out.stderr) {
            Ok(None)
        } else {
            Err(std::io::Error::other(out.combined()).into())
        }
    }

    async fn set(&self, path: &Path, name: &str, value: &[u8]) -> Result<()> {
        ensure_exists(path)?;
        let value = String::from_utf8_lossy(value).into_owned();
        let out = self
            .runner
            .run(
                &Invocation::new("xattr")
                    .args(["-w", name])
                    .arg(value)
                    .path_arg(path),
            )
            .await?;

        if !out.success() {
            return Err(std::io::Error::other(out.combined()).into());
        }
        Ok(())
    }

    async fn remove(&self, path: &Path, name: &str) -> Result<()> {
        ensure_exists(path)?;
        let out = self
            .runner
            .run(&Invocation::new("xattr").args(["-d", name]).path_arg(path))
            .await?;

        if out.success() || is_missing_attribute(&out.stderr) {
            Ok(())
        } else {
            Err(std::io::Error::other(out.combined()).into())
        }
    }
}

/// In-memory attribute table for tests and platforms without xattrs
#[derive(Debug, Default)]
pub struct MemoryAttributes {
    values: Mutex<HashMap<(PathBuf, String), Vec<u8>>>,
}

impl MemoryAttributes {
    pub fn new() -> Self {
        Self::default()
    }

    fn table(&self) -> std::sync::MutexGuard<'_, HashMap<(PathBuf, String), Vec<u8>>> {
        self.values.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl AttributeStore for MemoryAttributes {
    async fn get(&self, path: &Path, name: &str) -> Result<Option<Vec<u8>>> {
        Ok(self
            .table()
            .get(&(path.to_path_buf(), name.to_string()))
            .cloned())
    }

    async fn set(&self, path: &Path, name: &str, value: &[u8]) -> Result<()> {
        self.table()
            .insert((path.to_path_buf(), name.to_string()), value.to_vec());
        Ok(())
    }

    async fn remove(&self, path: &Path, name: &str) -> Result<()> {
        self.table().remove(&(path.to_path_buf(), name.to_string()));
        Ok(())
    }
}

/// Reads and writes the quarantine attribute on files
#[derive(Clone)]
pub struct Quarantine {
    store: Arc<dyn AttributeStore>,
}

impl Quarantine {
    pub fn new(store: Arc<dyn AttributeStore>) -> Self {
        Self { store }
    }

    pub async fn set(
        &self,
        path: &Path,
        kind: u16,
        timestamp: DateTime<Utc>,
        agent: Option<&str>,
        event_id: Option<&str>,
    ) -> Result<()> {
        let value = encode(kind, timestamp, agent, event_id);
        self.store.set(path, QUARANTINE_ATTRIBUTE, &value).await
    }

    pub async fn get(&self, path: &Path) -> Result<Option<QuarantineAttribute>> {
        let raw = self.store.get(path, QUARANTINE_ATTRIBUTE).await?;
        decode(raw.as_deref())
    }

    pub async fn remove(&self, path: &Path) -> Result<()> {
        self.store.remove(path, QUARANTINE_ATTRIBUTE).await
    }

    /// Mark freshly downloaded, untrusted content.
    pub async fn quarantine_download(&self, path: &Path) -> Result<()> {
        debug!("Quarantining {}", path.display());
        self.set(path, QUARANTINED_FILE, Utc::now(), Some(AGENT_NAME), None)
            .await
    }
}
