//! Library interface for hopper
//!
//! Dependency resolution, source fetching, signature verification, quarantine
//! marking and the install/uninstall lifecycle. The `hop` binary is a thin
//! layer over [`Installer`].

pub mod cache;
pub mod catalog;
pub mod colors;
pub mod command;
pub mod config;
pub mod dependent;
pub mod download;
pub mod error;
pub mod gpg;
pub mod installer;
pub mod metadata;
pub mod quarantine;
pub mod receipt;
pub mod requirement;
pub mod resolver;
pub mod stage;
pub mod symlink;

// Re-export commonly used types
pub use catalog::Catalog;
pub use command::{CommandOutput, CommandRunner, Invocation, SystemRunner};
pub use config::Config;
pub use dependent::{Dependency, Dependent, Requirement, RequirementCheck, Tag, Version};
pub use download::{DownloadStrategy, Strategy, StrategyKind};
pub use error::{HopperError, Result};
pub use installer::{BatchReport, InstallOptions, Installer, Outcome, UninstallOptions, UninstallPlan};
pub use quarantine::{AttributeStore, Quarantine};
pub use resolver::{EdgeKind, Policy, Resolver};
