//! Environment precondition checks.

use crate::command::{CommandRunner, Invocation};
use crate::dependent::{Requirement, RequirementCheck};
use crate::error::{HopperError, Result};
use std::cmp::Ordering;
use std::fmt;
use std::sync::Arc;
use tokio::sync::OnceCell;
use tracing::debug;

/// Release names accepted in place of a version number
const MACOS_RELEASES: &[(&str, &str)] = &[
    ("sequoia", "15"),
    ("sonoma", "14"),
    ("ventura", "13"),
    ("monterey", "12"),
    ("big_sur", "11"),
    ("catalina", "10.15"),
    ("mojave", "10.14"),
    ("high_sierra", "10.13"),
    ("sierra", "10.12"),
    ("el_capitan", "10.11"),
];

/// Dotted numeric macOS version
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MacosVersion(Vec<u32>);

impl MacosVersion {
    /// Parse `14`, `10.15.7` or a release name such as `big_sur`.
    pub fn parse(input: &str) -> Result<Self> {
        let input = input.trim();
        let numeric = MACOS_RELEASES
            .iter()
            .find(|(name, _)| name.eq_ignore_ascii_case(input))
            .map(|(_, number)| *number)
            .unwrap_or(input);

        numeric
            .split('.')
            .map(|part| part.parse::<u32>())
            .collect::<std::result::Result<Vec<_>, _>>()
            .map(MacosVersion)
            .map_err(|_| HopperError::InvalidArgument(format!("invalid macOS version: {}", input)))
    }

    /// Marketing name of the release, if known
    pub fn pretty_name(&self) -> Option<&'static str> {
        let key = if self.0.first() == Some(&10) {
            self.0.iter().take(2).map(u32::to_string).collect::<Vec<_>>().join(".")
        } else {
            self.0.first()?.to_string()
        };
        MACOS_RELEASES
            .iter()
            .find(|(_, number)| *number == key)
            .map(|(name, _)| *name)
    }
}

impl PartialOrd for MacosVersion {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for MacosVersion {
    fn cmp(&self, other: &Self) -> Ordering {
        let len = self.0.len().max(other.0.len());
        (0..len)
            .map(|i| {
                let a = self.0.get(i).copied().unwrap_or(0);
                let b = other.0.get(i).copied().unwrap_or(0);
                a.cmp(&b)
            })
            .find(|o| *o != Ordering::Equal)
            .unwrap_or(Ordering::Equal)
    }
}

impl fmt::Display for MacosVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let joined: Vec<String> = self.0.iter().map(u32::to_string).collect();
        f.write_str(&joined.join("."))
    }
}

/// Architecture name in the form requirements use (`arm64`, `x86_64`)
pub fn host_arch() -> &'static str {
    match std::env::consts::ARCH {
        "aarch64" => "arm64",
        other => other,
    }
}

fn normalize_arch(arch: &str) -> &str {
    match arch {
        "aarch64" | "arm" | "arm64" => "arm64",
        "intel" | "x86_64" => "x86_64",
        other => other,
    }
}

/// Evaluates requirements against the running host
pub struct RequirementChecker {
    runner: Arc<dyn CommandRunner>,
    macos: OnceCell<Option<MacosVersion>>,
}

impl RequirementChecker {
    pub fn new(runner: Arc<dyn CommandRunner>) -> Self {
        Self {
            runner,
            macos: OnceCell::new(),
        }
    }

    /// Host macOS version from `sw_vers`; `None` off macOS.
    pub async fn macos_version(&self) -> Option<&MacosVersion> {
        self.macos
            .get_or_init(|| async {
                let output = self
                    .runner
                    .run(&Invocation::new("sw_vers").arg("-productVersion"))
                    .await
                    .ok()?;
                if !output.success() {
                    return None;
                }
                MacosVersion::parse(&output.stdout).ok()
            })
            .await
            .as_ref()
    }

    /// Whether the requirement holds on this host
    pub async fn is_satisfied(&self, requirement: &Requirement) -> Result<bool> {
        let satisfied = match &requirement.check {
            RequirementCheck::MinimumMacos { version } => {
                let wanted = MacosVersion::parse(version)?;
                matches!(self.macos_version().await, Some(host) if *host >= wanted)
            }
            RequirementCheck::Arch { arch } => normalize_arch(arch) == normalize_arch(host_arch()),
            RequirementCheck::Binary { name } => self.runner.which(name).await.is_some(),
        };
        debug!("Requirement {} satisfied: {}", requirement, satisfied);
        Ok(satisfied)
    }

    /// Human-readable reason an unsatisfied requirement fails
    pub fn message(requirement: &Requirement) -> String {
        match &requirement.check {
            RequirementCheck::MinimumMacos { version } => match MacosVersion::parse(version) {
                Ok(v) => match v.pretty_name() {
                    Some(name) => format!("macOS {} ({}) or newer is required.", v, name),
                    None => format!("macOS {} or newer is required.", v),
                },
                Err(_) => format!("macOS {} or newer is required.", version),
            },
            RequirementCheck::Arch { arch } => format!(
                "The {} architecture is required (host is {}).",
                arch,
                host_arch()
            ),
            RequirementCheck::Binary { name } => format!("{} must be installed and on PATH.", name),
        }
    }

    /// `Ok` when satisfied, otherwise `UnsatisfiedRequirement`.
    pub async fn check(&self, dependent: &str, requirement: &Requirement) -> Result<()> {
        if self.is_satisfied(requirement).await? {
            return Ok(());
        }
        Err(HopperError::UnsatisfiedRequirement {
            dependent: dependent.to_string(),
            message: Self::message(requirement),
        })
    }
}
