//! Version-control checkouts.
//!
//! The first fetch clones into an `.incomplete` sibling of the cache location
//! and renames it into place; later fetches update the existing checkout.

use super::{
    DownloadStrategy, FetchContext, SafeArg, StrategyKind, expand_safe_args, invocation_from,
    newest_mtime,
};
use crate::cache::CacheStore;
use crate::error::{HopperError, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::path::{Path, PathBuf};
use tracing::{debug, info};
use walkdir::DirEntry;

/// Entries holding VCS bookkeeping rather than source
pub const VCS_METADATA: &[&str] = &[
    ".git",
    ".svn",
    ".hg",
    ".bzr",
    "CVS",
    ".fslckout",
    "_FOSSIL_",
    ".repo.fossil",
];

pub fn is_vcs_metadata(entry: &DirEntry) -> bool {
    entry.depth() > 0
        && VCS_METADATA
            .iter()
            .any(|name| entry.file_name().to_str() == Some(name))
}

fn prepare_incomplete(location: &Path) -> Result<PathBuf> {
    let incomplete = CacheStore::incomplete_path(location);
    if incomplete.exists() {
        std::fs::remove_dir_all(&incomplete)?;
    }
    if let Some(parent) = location.parent() {
        std::fs::create_dir_all(parent)?;
    }
    Ok(incomplete)
}

fn path_string(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

pub struct GitStrategy {
    name: String,
    url: String,
    location: PathBuf,
    ctx: FetchContext,
}

impl GitStrategy {
    pub fn new(name: &str, url: &str, location: PathBuf, ctx: FetchContext) -> Self {
        Self {
            name: name.to_string(),
            url: url.to_string(),
            location,
            ctx,
        }
    }

    fn is_checked_out(&self) -> bool {
        self.location.join(".git").exists()
    }

    async fn git(&self, args: Vec<SafeArg>, cwd: &Path) -> Result<String> {
        let invocation =
            invocation_from(expand_safe_args(&args, self.ctx.verbose)).current_dir(cwd);
        let output = self.ctx.run_fetch_command(&self.name, invocation).await?;
        Ok(output.stdout)
    }

    /// Plain git query whose output is parsed; no quiet flag.
    async fn query(&self, args: &[&str]) -> Result<Option<String>> {
        if !self.is_checked_out() {
            return Ok(None);
        }
        let invocation = crate::command::Invocation::new("git")
            .args(args.iter().copied())
            .current_dir(&self.location);
        let output = self.ctx.run_fetch_command(&self.name, invocation).await?;
        Ok(Some(output.stdout.trim().to_string()))
    }

    async fn clone_repo(&self) -> Result<()> {
        info!("Cloning {}", self.url);
        let incomplete = prepare_incomplete(&self.location)?;
        let parent = self.location.parent().unwrap_or(Path::new("."));

        self.git(
            vec![
                "git".into(),
                "clone".into(),
                "--depth".into(),
                "1".into(),
                self.url.clone().into(),
                path_string(&incomplete).into(),
            ],
            parent,
        )
        .await
        .inspect_err(|_| {
            let _ = std::fs::remove_dir_all(&incomplete);
        })?;

        CacheStore::commit(&incomplete, &self.location)
    }

    async fn update_repo(&self) -> Result<()> {
        info!("Updating {}", self.location.display());
        self.git(
            vec!["git".into(), "fetch".into(), "origin".into()],
            &self.location,
        )
        .await?;
        self.git(
            vec![
                "git".into(),
                "reset".into(),
                "--hard".into(),
                "FETCH_HEAD".into(),
            ],
            &self.location,
        )
        .await?;
        Ok(())
    }
}

#[async_trait]
impl DownloadStrategy for GitStrategy {
    fn kind(&self) -> StrategyKind {
        StrategyKind::Git
    }

    fn cached_location(&self) -> PathBuf {
        self.location.clone()
    }

    async fn fetch(&self, force: bool) -> Result<PathBuf> {
        let _guard = self.ctx.cache.lock(&self.location).await;

        if force {
            self.ctx.cache.clear(&self.location)?;
        } else if self.location.exists() && !self.is_checked_out() {
            debug!("Discarding non-git cache at {}", self.location.display());
            self.ctx.cache.clear(&self.location)?;
        }

        if self.is_checked_out() {
            self.update_repo().await?;
        } else {
            self.clone_repo().await?;
        }
        Ok(self.location.clone())
    }

    async fn source_modified_time(&self) -> Result<Option<DateTime<Utc>>> {
        let Some(date) = self.query(&["show", "-s", "--format=%cD"]).await? else {
            return Ok(None);
        };
        let parsed = DateTime::parse_from_rfc2822(&date).map_err(|e| HopperError::FetchFailed {
            dependent: self.name.clone(),
            reason: format!("unparseable commit date {:?}: {}", date, e),
            transient: false,
        })?;
        Ok(Some(parsed.with_timezone(&Utc)))
    }

    async fn last_commit(&self) -> Result<Option<String>> {
        self.query(&["rev-parse", "HEAD"]).await
    }
}

/// Non-git version-control tools
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VcsTool {
    Subversion,
    Mercurial,
    Bazaar,
    Cvs,
    Fossil,
}

impl VcsTool {
    pub fn kind(&self) -> StrategyKind {
        match self {
            VcsTool::Subversion => StrategyKind::Subversion,
            VcsTool::Mercurial => StrategyKind::Mercurial,
            VcsTool::Bazaar => StrategyKind::Bazaar,
            VcsTool::Cvs => StrategyKind::Cvs,
            VcsTool::Fossil => StrategyKind::Fossil,
        }
    }

    pub fn program(&self) -> &'static str {
        match self {
            VcsTool::Subversion => "svn",
            VcsTool::Mercurial => "hg",
            VcsTool::Bazaar => "bzr",
            VcsTool::Cvs => "cvs",
            VcsTool::Fossil => "fossil",
        }
    }

    /// Marker inside a working copy
    fn checkout_marker(&self) -> &'static str {
        match self {
            VcsTool::Subversion => ".svn",
            VcsTool::Mercurial => ".hg",
            VcsTool::Bazaar => ".bzr",
            VcsTool::Cvs => "CVS",
            VcsTool::Fossil => ".fslckout",
        }
    }

    /// URL handed to the tool, with any `<tool>://` routing prefix removed
    pub fn remote_url<'a>(&self, url: &'a str) -> &'a str {
        match self {
            VcsTool::Subversion => url.strip_prefix("svn+").unwrap_or(url),
            VcsTool::Mercurial => url.strip_prefix("hg://").unwrap_or(url),
            VcsTool::Bazaar => url.strip_prefix("bzr://").unwrap_or(url),
            VcsTool::Cvs => url.strip_prefix("cvs://").unwrap_or(url),
            VcsTool::Fossil => url.strip_prefix("fossil://").unwrap_or(url),
        }
    }

    /// Command lines that create a fresh checkout at `dest`
    pub fn checkout_commands(&self, url: &str, dest: &Path) -> Vec<Vec<SafeArg>> {
        let remote = self.remote_url(url).to_string();
        let dest_str = path_string(dest);
        match self {
            VcsTool::Subversion => vec![vec![
                "svn".into(),
                "checkout".into(),
                remote.into(),
                dest_str.into(),
            ]],
            VcsTool::Mercurial => vec![vec![
                "hg".into(),
                "clone".into(),
                remote.into(),
                dest_str.into(),
            ]],
            VcsTool::Bazaar => vec![vec![
                "bzr".into(),
                "branch".into(),
                remote.into(),
                dest_str.into(),
            ]],
            VcsTool::Cvs => {
                // :pserver:user@host:/cvsroot:module, checked out relative to the parent
                let (root, module) = remote.rsplit_once(':').unwrap_or((remote.as_str(), ""));
                let dest_name = dest
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or(dest_str);
                vec![vec![
                    "cvs".into(),
                    SafeArg::QuietFlag("-Q".into()),
                    "-d".into(),
                    root.into(),
                    "checkout".into(),
                    "-d".into(),
                    dest_name.into(),
                    module.into(),
                ]]
            }
            VcsTool::Fossil => {
                let repo = path_string(&dest.join(".repo.fossil"));
                vec![
                    vec![
                        "fossil".into(),
                        "clone".into(),
                        remote.into(),
                        repo.clone().into(),
                        SafeArg::QuietFlag(String::new()),
                    ],
                    vec![
                        "fossil".into(),
                        "open".into(),
                        repo.into(),
                        SafeArg::QuietFlag(String::new()),
                    ],
                ]
            }
        }
    }

    /// Command lines that refresh an existing checkout (run inside it)
    pub fn update_commands(&self) -> Vec<Vec<SafeArg>> {
        match self {
            VcsTool::Subversion => vec![vec!["svn".into(), "update".into()]],
            VcsTool::Mercurial => vec![
                vec!["hg".into(), "pull".into()],
                vec!["hg".into(), "update".into()],
            ],
            VcsTool::Bazaar => vec![vec!["bzr".into(), "pull".into()]],
            VcsTool::Cvs => vec![vec![
                "cvs".into(),
                SafeArg::QuietFlag("-Q".into()),
                "up".into(),
            ]],
            VcsTool::Fossil => vec![
                vec!["fossil".into(), "pull".into(), SafeArg::QuietFlag(String::new())],
                vec!["fossil".into(), "update".into(), SafeArg::QuietFlag(String::new())],
            ],
        }
    }
}

pub struct VcsStrategy {
    tool: VcsTool,
    name: String,
    url: String,
    location: PathBuf,
    ctx: FetchContext,
}

impl VcsStrategy {
    pub fn new(tool: VcsTool, name: &str, url: &str, location: PathBuf, ctx: FetchContext) -> Self {
        Self {
            tool,
            name: name.to_string(),
            url: url.to_string(),
            location,
            ctx,
        }
    }

    fn is_checked_out(&self) -> bool {
        self.location.join(self.tool.checkout_marker()).exists()
    }

    async fn run_all(&self, commands: Vec<Vec<SafeArg>>, cwd: &Path) -> Result<()> {
        for args in commands {
            let args: Vec<String> = expand_safe_args(&args, self.ctx.verbose)
                .into_iter()
                .filter(|a| !a.is_empty())
                .collect();
            let invocation = invocation_from(args).current_dir(cwd);
            self.ctx.run_fetch_command(&self.name, invocation).await?;
        }
        Ok(())
    }

    async fn checkout(&self) -> Result<()> {
        info!("Checking out {}", self.url);
        let incomplete = prepare_incomplete(&self.location)?;
        if self.tool == VcsTool::Fossil {
            std::fs::create_dir_all(&incomplete)?;
        }

        let cwd = if self.tool == VcsTool::Fossil {
            incomplete.clone()
        } else {
            self.location.parent().unwrap_or(Path::new(".")).to_path_buf()
        };

        let result = self
            .run_all(self.tool.checkout_commands(&self.url, &incomplete), &cwd)
            .await;
        if let Err(e) = result {
            let _ = std::fs::remove_dir_all(&incomplete);
            return Err(e);
        }

        CacheStore::commit(&incomplete, &self.location)
    }

    async fn query(&self, args: &[&str]) -> Result<Option<String>> {
        if !self.is_checked_out() {
            return Ok(None);
        }
        let invocation = crate::command::Invocation::new(self.tool.program())
            .args(args.iter().copied())
            .current_dir(&self.location);
        let output = self.ctx.run_fetch_command(&self.name, invocation).await?;
        Ok(Some(output.stdout.trim().to_string()))
    }
}

#[async_trait]
impl DownloadStrategy for VcsStrategy {
    fn kind(&self) -> StrategyKind {
        self.tool.kind()
    }

    fn cached_location(&self) -> PathBuf {
        self.location.clone()
    }

    async fn fetch(&self, force: bool) -> Result<PathBuf> {
        let _guard = self.ctx.cache.lock(&self.location).await;

        if force || (self.location.exists() && !self.is_checked_out()) {
            self.ctx.cache.clear(&self.location)?;
        }

        if self.is_checked_out() {
            info!("Updating {}", self.location.display());
            self.run_all(self.tool.update_commands(), &self.location).await?;
        } else {
            self.checkout().await?;
        }
        Ok(self.location.clone())
    }

    async fn source_modified_time(&self) -> Result<Option<DateTime<Utc>>> {
        let stamp = match self.tool {
            VcsTool::Subversion => {
                self.query(&["info", "--show-item", "last-changed-date"]).await?
            }
            VcsTool::Mercurial => {
                self.query(&["log", "-r", ".", "--template", "{date|rfc3339date}"])
                    .await?
            }
            _ => None,
        };

        if let Some(parsed) = stamp
            .as_deref()
            .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        {
            return Ok(Some(parsed.with_timezone(&Utc)));
        }

        let location = self.location.clone();
        let newest = tokio::task::spawn_blocking(move || newest_mtime(&location))
            .await
            .map_err(|e| std::io::Error::other(e.to_string()))?;
        Ok(newest)
    }

    async fn last_commit(&self) -> Result<Option<String>> {
        match self.tool {
            VcsTool::Subversion => self.query(&["info", "--show-item", "revision"]).await,
            VcsTool::Mercurial => self.query(&["id", "-i"]).await,
            VcsTool::Bazaar => self.query(&["revno"]).await,
            VcsTool::Cvs | VcsTool::Fossil => Ok(None),
        }
    }
}
