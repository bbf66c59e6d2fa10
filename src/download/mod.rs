//! Download strategies.
//!
//! A dependent's source URL (optionally with an explicit `using` identifier)
//! selects one [`Strategy`]. Every strategy owns exactly one cache location,
//! `<cache-root>/<name>--<cache_tag>`, and implements [`DownloadStrategy`].

pub mod curl;
pub mod vcs;

pub use curl::CurlStrategy;
pub use vcs::{GitStrategy, VcsStrategy, VcsTool};

use crate::cache::CacheStore;
use crate::command::{CommandOutput, CommandRunner, Invocation};
use crate::dependent::Dependent;
use crate::error::{HopperError, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use indicatif::MultiProgress;
use rayon::prelude::*;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use walkdir::WalkDir;

/// Concrete strategy family selected by [`detect`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StrategyKind {
    Curl,
    Git,
    Subversion,
    Mercurial,
    Bazaar,
    Cvs,
    Fossil,
}

impl StrategyKind {
    /// Suffix of the cache location; distinct per kind.
    pub fn cache_tag(&self) -> &'static str {
        match self {
            StrategyKind::Curl => "curl",
            StrategyKind::Git => "git",
            StrategyKind::Subversion => "svn",
            StrategyKind::Mercurial => "hg",
            StrategyKind::Bazaar => "bzr",
            StrategyKind::Cvs => "cvs",
            StrategyKind::Fossil => "fossil",
        }
    }

    pub fn is_vcs(&self) -> bool {
        !matches!(self, StrategyKind::Curl)
    }
}

impl fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.cache_tag())
    }
}

/// Identifiers accepted in a source's `using` field
const USING_IDS: &[(&str, StrategyKind)] = &[
    ("curl", StrategyKind::Curl),
    ("nounzip", StrategyKind::Curl),
    ("post", StrategyKind::Curl),
    ("git", StrategyKind::Git),
    ("svn", StrategyKind::Subversion),
    ("hg", StrategyKind::Mercurial),
    ("bzr", StrategyKind::Bazaar),
    ("cvs", StrategyKind::Cvs),
    ("fossil", StrategyKind::Fossil),
];

/// Pick a strategy for a source.
///
/// An explicit `using` identifier wins; otherwise the URL is matched against
/// known VCS schemes and anything unrecognised is fetched with curl.
pub fn detect(url: &str, using: Option<&str>) -> Result<StrategyKind> {
    match using {
        Some(id) => strategy_for_id(id),
        None => Ok(detect_from_url(url)),
    }
}

fn strategy_for_id(id: &str) -> Result<StrategyKind> {
    USING_IDS
        .iter()
        .find(|(name, _)| *name == id)
        .map(|(_, kind)| *kind)
        .ok_or_else(|| HopperError::UnsupportedStrategy {
            name: id.to_string(),
            suggestion: USING_IDS
                .iter()
                .map(|(name, _)| (strsim::levenshtein(id, name), *name))
                .filter(|(distance, _)| *distance <= 2)
                .min_by_key(|(distance, _)| *distance)
                .map(|(_, name)| name.to_string()),
        })
}

pub fn detect_from_url(url: &str) -> StrategyKind {
    let lower = url.to_ascii_lowercase();
    let is_http = lower.starts_with("http://") || lower.starts_with("https://");

    if (is_http && lower.ends_with(".git")) || lower.starts_with("git://") {
        StrategyKind::Git
    } else if lower.starts_with("svn://")
        || lower.starts_with("svn+http://")
        || lower.starts_with("http://svn.")
        || lower.starts_with("https://svn.")
    {
        StrategyKind::Subversion
    } else if lower.starts_with("cvs://") {
        StrategyKind::Cvs
    } else if lower.starts_with("hg://") {
        StrategyKind::Mercurial
    } else if lower.starts_with("bzr://") {
        StrategyKind::Bazaar
    } else if lower.starts_with("fossil://") {
        StrategyKind::Fossil
    } else {
        StrategyKind::Curl
    }
}

/// One element of a command line passed through [`expand_safe_args`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SafeArg {
    Arg(String),
    /// Tool-specific quiet switch overriding the default `-q`
    QuietFlag(String),
}

impl From<&str> for SafeArg {
    fn from(s: &str) -> Self {
        SafeArg::Arg(s.to_string())
    }
}

impl From<String> for SafeArg {
    fn from(s: String) -> Self {
        SafeArg::Arg(s)
    }
}

/// Add a quiet switch to a full command line (program first).
///
/// An explicit [`SafeArg::QuietFlag`] is kept in place, or dropped when
/// `verbose`. Without one, `-q` goes in after the subcommand (index 2).
pub fn expand_safe_args(args: &[SafeArg], verbose: bool) -> Vec<String> {
    let has_override = args.iter().any(|a| matches!(a, SafeArg::QuietFlag(_)));

    let mut expanded: Vec<String> = args
        .iter()
        .filter_map(|arg| match arg {
            SafeArg::Arg(s) => Some(s.clone()),
            SafeArg::QuietFlag(flag) if !verbose => Some(flag.clone()),
            SafeArg::QuietFlag(_) => None,
        })
        .collect();

    if !has_override && !verbose {
        let at = expanded.len().min(2);
        expanded.insert(at, "-q".to_string());
    }
    expanded
}

/// Shared collaborators for every strategy instance
#[derive(Clone)]
pub struct FetchContext {
    pub cache: CacheStore,
    pub runner: Arc<dyn CommandRunner>,
    pub client: reqwest::Client,
    pub progress: Option<MultiProgress>,
    pub verbose: bool,
}

impl FetchContext {
    pub fn new(cache: CacheStore, runner: Arc<dyn CommandRunner>) -> Self {
        Self {
            cache,
            runner,
            client: reqwest::Client::new(),
            progress: None,
            verbose: false,
        }
    }

    pub fn with_progress(mut self, progress: MultiProgress) -> Self {
        self.progress = Some(progress);
        self
    }

    pub fn verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    /// Run a fetch-side command; failures and timeouts become `FetchFailed`.
    pub(crate) async fn run_fetch_command(
        &self,
        dependent: &str,
        invocation: Invocation,
    ) -> Result<CommandOutput> {
        let output = match self.runner.run(&invocation).await {
            Ok(output) => output,
            Err(HopperError::CommandTimeout { command, seconds }) => {
                return Err(HopperError::FetchFailed {
                    dependent: dependent.to_string(),
                    reason: format!("{} timed out after {}s", command, seconds),
                    transient: true,
                });
            }
            Err(e) => return Err(e),
        };

        if !output.success() {
            return Err(HopperError::FetchFailed {
                dependent: dependent.to_string(),
                reason: format!("{} failed: {}", invocation.program, output.combined()),
                transient: false,
            });
        }
        Ok(output)
    }
}

/// Turn an expanded argument vector into an invocation.
pub(crate) fn invocation_from(args: Vec<String>) -> Invocation {
    let mut iter = args.into_iter();
    let program = iter.next().unwrap_or_default();
    Invocation::new(program).args(iter)
}

#[async_trait]
pub trait DownloadStrategy: Send + Sync {
    fn kind(&self) -> StrategyKind;

    fn cache_tag(&self) -> &'static str {
        self.kind().cache_tag()
    }

    /// `<cache-root>/<name>--<cache_tag>`
    fn cached_location(&self) -> PathBuf;

    /// Fetch into the cache location and return the fetched artifact path.
    async fn fetch(&self, force: bool) -> Result<PathBuf>;

    /// When the fetched source last changed; `None` before the first fetch.
    async fn source_modified_time(&self) -> Result<Option<DateTime<Utc>>>;

    /// Identifier of the checked-out revision, for VCS strategies.
    async fn last_commit(&self) -> Result<Option<String>> {
        Ok(None)
    }
}

/// The closed set of strategies
pub enum Strategy {
    Curl(CurlStrategy),
    Git(GitStrategy),
    Vcs(VcsStrategy),
}

impl Strategy {
    /// Detect and build the strategy for a dependent's source.
    pub fn for_dependent(dependent: &Dependent, ctx: &FetchContext) -> Result<Self> {
        let source = dependent.source.as_ref().ok_or_else(|| {
            HopperError::InvalidArgument(format!("{} has no source url", dependent.name))
        })?;

        let kind = detect(&source.url, source.using.as_deref())?;
        let location = ctx.cache.location(&dependent.name, kind.cache_tag());

        Ok(match kind {
            StrategyKind::Curl => Strategy::Curl(CurlStrategy::new(
                &dependent.name,
                &source.url,
                source.sha256.clone(),
                location,
                ctx.clone(),
            )),
            StrategyKind::Git => {
                Strategy::Git(GitStrategy::new(&dependent.name, &source.url, location, ctx.clone()))
            }
            StrategyKind::Subversion => Strategy::Vcs(VcsStrategy::new(
                VcsTool::Subversion,
                &dependent.name,
                &source.url,
                location,
                ctx.clone(),
            )),
            StrategyKind::Mercurial => Strategy::Vcs(VcsStrategy::new(
                VcsTool::Mercurial,
                &dependent.name,
                &source.url,
                location,
                ctx.clone(),
            )),
            StrategyKind::Bazaar => Strategy::Vcs(VcsStrategy::new(
                VcsTool::Bazaar,
                &dependent.name,
                &source.url,
                location,
                ctx.clone(),
            )),
            StrategyKind::Cvs => Strategy::Vcs(VcsStrategy::new(
                VcsTool::Cvs,
                &dependent.name,
                &source.url,
                location,
                ctx.clone(),
            )),
            StrategyKind::Fossil => Strategy::Vcs(VcsStrategy::new(
                VcsTool::Fossil,
                &dependent.name,
                &source.url,
                location,
                ctx.clone(),
            )),
        })
    }

    fn inner(&self) -> &dyn DownloadStrategy {
        match self {
            Strategy::Curl(s) => s,
            Strategy::Git(s) => s,
            Strategy::Vcs(s) => s,
        }
    }
}

impl fmt::Debug for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Strategy")
            .field("kind", &self.kind())
            .field("cached_location", &self.cached_location())
            .finish()
    }
}

#[async_trait]
impl DownloadStrategy for Strategy {
    fn kind(&self) -> StrategyKind {
        self.inner().kind()
    }

    fn cached_location(&self) -> PathBuf {
        self.inner().cached_location()
    }

    async fn fetch(&self, force: bool) -> Result<PathBuf> {
        self.inner().fetch(force).await
    }

    async fn source_modified_time(&self) -> Result<Option<DateTime<Utc>>> {
        self.inner().source_modified_time().await
    }

    async fn last_commit(&self) -> Result<Option<String>> {
        self.inner().last_commit().await
    }
}

/// Newest mtime among regular files under `root`.
///
/// Symlinks are followed; dangling ones are skipped. VCS metadata
/// directories are not descended.
pub fn newest_mtime(root: &Path) -> Option<DateTime<Utc>> {
    let candidates: Vec<PathBuf> = WalkDir::new(root)
        .into_iter()
        .filter_entry(|e| !vcs::is_vcs_metadata(e))
        .filter_map(|e| e.ok())
        .filter(|e| !e.file_type().is_dir())
        .map(|e| e.into_path())
        .collect();

    candidates
        .par_iter()
        .filter_map(|path| std::fs::metadata(path).ok())
        .filter(|m| m.is_file())
        .filter_map(|m| m.modified().ok())
        .max()
        .map(DateTime::<Utc>::from)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_detect_explicit_using() {
        assert_eq!(detect("https://x/y.tgz", Some("nounzip")).unwrap(), StrategyKind::Curl);
        assert_eq!(detect("https://x/y.tgz", Some("git")).unwrap(), StrategyKind::Git);
        assert_eq!(detect("https://x/y", Some("fossil")).unwrap(), StrategyKind::Fossil);
    }

    #[test]
    fn test_detect_unknown_using_suggests() {
        match detect("https://x/y", Some("gti")) {
            Err(HopperError::UnsupportedStrategy { name, suggestion }) => {
                assert_eq!(name, "gti");
                assert_eq!(suggestion.as_deref(), Some("git"));
            }
            other => panic!("unexpected: {:?}", other.map(|k| k.to_string())),
        }
    }

    #[test]
    fn test_detect_from_url_table() {
        let cases = [
            ("https://github.com/foo/bar.git", StrategyKind::Git),
            ("git://example.com/foo/bar", StrategyKind::Git),
            ("svn://example.com/trunk", StrategyKind::Subversion),
            ("svn+http://example.com/trunk", StrategyKind::Subversion),
            ("https://svn.example.com/trunk", StrategyKind::Subversion),
            ("cvs://:pserver:anon@cvs.example.com:/cvsroot:foo", StrategyKind::Cvs),
            ("hg://https://example.com/foo", StrategyKind::Mercurial),
            ("bzr://https://example.com/foo", StrategyKind::Bazaar),
            ("fossil://https://example.com/foo", StrategyKind::Fossil),
            ("https://example.com/foo-1.0.tar.gz", StrategyKind::Curl),
            ("https://example.com/foo.git/archive.zip", StrategyKind::Curl),
        ];
        for (url, expected) in cases {
            assert_eq!(detect_from_url(url), expected, "{}", url);
        }
    }

    #[test]
    fn test_cache_tags_are_distinct() {
        let kinds = [
            StrategyKind::Curl,
            StrategyKind::Git,
            StrategyKind::Subversion,
            StrategyKind::Mercurial,
            StrategyKind::Bazaar,
            StrategyKind::Cvs,
            StrategyKind::Fossil,
        ];
        let tags: std::collections::HashSet<_> = kinds.iter().map(|k| k.cache_tag()).collect();
        assert_eq!(tags.len(), kinds.len());
    }

    #[test]
    fn test_expand_safe_args_default_quiet() {
        let args: Vec<SafeArg> = vec!["git".into(), "pull".into(), "origin".into()];
        assert_eq!(expand_safe_args(&args, false), ["git", "pull", "-q", "origin"]);
        assert_eq!(expand_safe_args(&args, true), ["git", "pull", "origin"]);
        assert_eq!(args.len(), 3);
    }

    #[test]
    fn test_expand_safe_args_override() {
        let args = vec![
            SafeArg::from("cvs"),
            SafeArg::QuietFlag("-Q".into()),
            SafeArg::from("up"),
        ];
        assert_eq!(expand_safe_args(&args, false), ["cvs", "-Q", "up"]);
        assert_eq!(expand_safe_args(&args, true), ["cvs", "up"]);
        assert_eq!(args[1], SafeArg::QuietFlag("-Q".into()));
    }

    #[test]
    fn test_newest_mtime_skips_dangling_symlinks() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a"), b"a").unwrap();
        std::os::unix::fs::symlink(dir.path().join("missing"), dir.path().join("dangling"))
            .unwrap();

        let newest = newest_mtime(dir.path()).unwrap();
        let expected: DateTime<Utc> = std::fs::metadata(dir.path().join("a"))
            .unwrap()
            .modified()
            .unwrap()
            .into();
        assert_eq!(newest, expected);
    }

    #[test]
    fn test_newest_mtime_empty_dir() {
        let dir = tempfile::tempdir().unwrap();
        assert!(newest_mtime(dir.path()).is_none());
    }
}
