//! Install, uninstall and fetch orchestration.
//!
//! # Install
//!
//! 1. Every requested root is expanded with the resolver; the union keeps
//!    first-seen order and every root follows its own dependencies. Deferred
//!    edges are reported and left out. Fatal requirements that do not hold
//!    fail their owner.
//! 2. A strategy is detected for every member that needs fetching, before
//!    anything touches the network.
//! 3. Members are layered: a member's level is one more than the highest
//!    level among its in-batch dependencies, counting only edges the policy
//!    keeps. Within a level fetch and verify run concurrently (`jobs` at a
//!    time), then staging happens in insertion order, so a dependency is
//!    always staged before its dependents.
//!
//! Failures are recorded per dependent. Anything downstream of a failure is
//! skipped, unrelated members carry on, and completed installs stay in place.
//! Only malformed requests (`InvalidArgument`, `UnsupportedStrategy`) abort
//! the batch.
//!
//! # Uninstall
//!
//! The same [`UninstallPlan`] is computed for dry and real runs; a real run
//! then deletes exactly the planned paths, tolerating ones that have already
//! gone.

use crate::cache::CacheStore;
use crate::catalog::Catalog;
use crate::command::CommandRunner;
use crate::config::Config;
use crate::dependent::{Dependency, Dependent};
use crate::download::{DownloadStrategy, FetchContext, Strategy, StrategyKind};
use crate::error::{HopperError, Result};
use crate::gpg::{GpgState, GpgVerifier};
use crate::metadata::MetadataStore;
use crate::quarantine::{AttributeStore, Quarantine};
use crate::receipt::{InstallReceipt, RuntimeDependency};
use crate::requirement::RequirementChecker;
use crate::resolver::{Decision, EdgeKind, Policy, ResolvedEdge, Resolver};
use crate::{stage, symlink};
use futures::stream::{self, StreamExt};
use indicatif::MultiProgress;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

#[derive(Debug, Clone)]
pub struct InstallOptions {
    /// Link `bin/` entries into the prefix
    pub binaries: bool,
    /// Reinstall and refetch even when already present
    pub force: bool,
    pub verbose: bool,
    pub dry_run: bool,
    pub include_build: bool,
    pub include_test: bool,
    pub include_optional: bool,
    pub skip_recommended: bool,
    /// Concurrent fetches per level; the configured default when `None`
    pub jobs: Option<usize>,
}

impl Default for InstallOptions {
    fn default() -> Self {
        Self {
            binaries: true,
            force: false,
            verbose: false,
            dry_run: false,
            include_build: false,
            include_test: false,
            include_optional: false,
            skip_recommended: false,
            jobs: None,
        }
    }
}

impl InstallOptions {
    pub fn policy(&self) -> Policy {
        Policy::from_flags(
            self.include_build,
            self.include_test,
            self.include_optional,
            self.skip_recommended,
        )
    }
}

#[derive(Debug, Clone)]
pub struct UninstallOptions {
    pub binaries: bool,
    pub force: bool,
    pub verbose: bool,
    pub dry_run: bool,
}

impl Default for UninstallOptions {
    fn default() -> Self {
        Self {
            binaries: true,
            force: false,
            verbose: false,
            dry_run: false,
        }
    }
}

/// Everything an uninstall of one dependent deletes
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UninstallPlan {
    pub links: Vec<PathBuf>,
    pub metadata: Option<PathBuf>,
    pub staged: Vec<PathBuf>,
    pub dependent_dir: Option<PathBuf>,
}

impl UninstallPlan {
    /// Paths in deletion order
    pub fn paths(&self) -> Vec<&Path> {
        self.links
            .iter()
            .map(PathBuf::as_path)
            .chain(self.metadata.as_deref())
            .chain(self.staged.iter().map(PathBuf::as_path))
            .chain(self.dependent_dir.as_deref())
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.paths().is_empty()
    }
}

#[derive(Debug)]
pub enum Outcome {
    Installed { version: String, path: PathBuf, linked: usize },
    AlreadyInstalled { version: String },
    WouldInstall { version: String, strategy: StrategyKind },
    Fetched { path: PathBuf, verified: bool },
    Uninstalled(UninstallPlan),
    WouldUninstall(UninstallPlan),
    /// Lives in a tap that is not available locally
    Deferred { tap: Option<String> },
    Skipped { reason: String },
    Failed(HopperError),
}

impl Outcome {
    pub fn is_failure(&self) -> bool {
        matches!(self, Outcome::Failed(_))
    }
}

#[derive(Debug)]
pub struct BatchEntry {
    pub name: String,
    pub outcome: Outcome,
}

/// Per-dependent results of one batch
#[derive(Debug, Default)]
pub struct BatchReport {
    pub entries: Vec<BatchEntry>,
}

impl BatchReport {
    fn push(&mut self, name: &str, outcome: Outcome) {
        self.entries.push(BatchEntry {
            name: name.to_string(),
            outcome,
        });
    }

    pub fn has_failures(&self) -> bool {
        self.entries.iter().any(|e| e.outcome.is_failure())
    }

    pub fn failures(&self) -> impl Iterator<Item = (&str, &HopperError)> {
        self.entries.iter().filter_map(|e| match &e.outcome {
            Outcome::Failed(err) => Some((e.name.as_str(), err)),
            _ => None,
        })
    }

    pub fn get(&self, name: &str) -> Option<&Outcome> {
        self.entries
            .iter()
            .find(|e| e.name == name)
            .map(|e| &e.outcome)
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Outcome::Installed { version, linked, .. } => {
                write!(f, "installed {} ({} links)", version, linked)
            }
            Outcome::AlreadyInstalled { version } => write!(f, "{} already installed", version),
            Outcome::WouldInstall { version, strategy } => {
                write!(f, "would install {} via {}", version, strategy)
            }
            Outcome::Fetched { path, verified } => {
                write!(f, "fetched {}", path.display())?;
                if *verified {
                    write!(f, " (signature verified)")?;
                }
                Ok(())
            }
            Outcome::Uninstalled(plan) => write!(f, "removed {} paths", plan.paths().len()),
            Outcome::WouldUninstall(plan) => write!(f, "would remove {} paths", plan.paths().len()),
            Outcome::Deferred { tap } => match tap {
                Some(tap) => write!(f, "deferred (tap {} not available)", tap),
                None => write!(f, "deferred"),
            },
            Outcome::Skipped { reason } => write!(f, "skipped: {}", reason),
            Outcome::Failed(err) => write!(f, "{}", err),
        }
    }
}

/// Result of fetch + verify for one dependent
struct Fetched {
    strategy: Strategy,
    artifact: PathBuf,
    verified: bool,
}

pub struct Installer {
    config: Config,
    catalog: Catalog,
    resolver: Resolver,
    runner: Arc<dyn CommandRunner>,
    quarantine: Quarantine,
    metadata: MetadataStore,
    cache: CacheStore,
    requirements: RequirementChecker,
    progress: Option<MultiProgress>,
}

impl Installer {
    pub fn new(
        config: Config,
        catalog: Catalog,
        runner: Arc<dyn CommandRunner>,
        attributes: Arc<dyn AttributeStore>,
    ) -> Self {
        Self {
            metadata: MetadataStore::from_config(&config),
            cache: CacheStore::new(config.cache_root.clone()),
            requirements: RequirementChecker::new(runner.clone()),
            quarantine: Quarantine::new(attributes),
            resolver: Resolver::new(),
            runner,
            catalog,
            config,
            progress: None,
        }
    }

    /// Show download progress bars
    pub fn with_progress(mut self, progress: MultiProgress) -> Self {
        self.progress = Some(progress);
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    pub fn cache(&self) -> &CacheStore {
        &self.cache
    }

    /// Expand one dependent (the `deps` command).
    pub fn deps(&self, name: &str, kind: EdgeKind, policy: &Policy) -> Result<Vec<ResolvedEdge>> {
        let root = self.catalog.require(name)?;
        self.resolver.expand(&self.catalog, kind, policy, root)
    }

    /// Staged version directories of `name`, sorted
    pub fn installed_versions(&self, name: &str) -> Result<Vec<PathBuf>> {
        let dir = self.config.dependent_dir(name);
        if !dir.is_dir() {
            return Ok(Vec::new());
        }
        let mut versions: Vec<PathBuf> = std::fs::read_dir(&dir)?
            .filter_map(|e| e.ok())
            .filter(|e| {
                let name = e.file_name().to_string_lossy().into_owned();
                !name.starts_with('.') && !name.ends_with(".incomplete")
            })
            .map(|e| e.path())
            .filter(|p| p.is_dir() && !p.is_symlink())
            .collect();
        versions.sort();
        Ok(versions)
    }

    pub fn is_installed(&self, name: &str) -> Result<bool> {
        Ok(!self.installed_versions(name)?.is_empty())
    }

    fn fetch_context(&self, verbose: bool) -> FetchContext {
        let ctx = FetchContext::new(self.cache.clone(), self.runner.clone()).verbose(verbose);
        match &self.progress {
            Some(mp) => ctx.with_progress(mp.clone()),
            None => ctx,
        }
    }

    // ------------------------------------------------------------------
    // uninstall

    /// Compute what uninstalling `name` would delete. Read-only.
    pub fn plan_uninstall(&self, name: &str, binaries: bool) -> Result<UninstallPlan> {
        let dependent_dir = self.config.dependent_dir(name);
        let staged = self.installed_versions(name)?;

        let mut links = Vec::new();
        if binaries {
            links = symlink::links_into(&self.config.bin_dir, &dependent_dir)?;
            for version in &staged {
                if let Ok(receipt) = InstallReceipt::read(version) {
                    for link in receipt.linked_files {
                        if symlink::points_into(&link, &dependent_dir) && !links.contains(&link) {
                            links.push(link);
                        }
                    }
                }
            }
            links.sort();
        }

        let metadata = Some(self.metadata.root(name)).filter(|p| p.exists());
        let dependent_dir = Some(dependent_dir).filter(|p| p.exists());

        Ok(UninstallPlan {
            links,
            metadata,
            staged,
            dependent_dir,
        })
    }

    pub fn uninstall(&self, names: &[String], options: &UninstallOptions) -> Result<BatchReport> {
        let mut report = BatchReport::default();

        for name in names {
            let outcome = match self.uninstall_one(name, options) {
                Ok(outcome) => outcome,
                Err(e) if e.aborts_batch() => return Err(e),
                Err(e) => Outcome::Failed(e),
            };
            report.push(name, outcome);
        }

        Ok(report)
    }

    fn uninstall_one(&self, name: &str, options: &UninstallOptions) -> Result<Outcome> {
        if !options.force && !self.is_installed(name)? {
            return Err(HopperError::NotInstalled(name.to_string()));
        }

        let plan = self.plan_uninstall(name, options.binaries)?;
        for path in plan.paths() {
            info!("Uninstall {}: {}", name, path.display());
        }

        if options.dry_run {
            return Ok(Outcome::WouldUninstall(plan));
        }

        for path in plan.paths() {
            debug!("Removing {}", path.display());
            remove_path(path)?;
        }
        Ok(Outcome::Uninstalled(plan))
    }

    // ------------------------------------------------------------------
    // fetch

    /// Detect, fetch and verify without staging.
    pub async fn fetch(&self, names: &[String], force: bool, verbose: bool) -> Result<BatchReport> {
        let ctx = self.fetch_context(verbose);
        let mut report = BatchReport::default();

        let mut jobs = Vec::new();
        for name in names {
            match self.catalog.require(name) {
                Ok(dependent) => jobs.push((dependent, Strategy::for_dependent(dependent, &ctx)?)),
                Err(e) => report.push(name, Outcome::Failed(e)),
            }
        }

        let mut results: Vec<(&Dependent, Result<Fetched>)> = stream::iter(jobs)
            .map(|(dependent, strategy)| async move {
                (dependent, self.fetch_and_verify(dependent, strategy, force).await)
            })
            .buffer_unordered(self.config.jobs.max(1))
            .collect()
            .await;
        results.sort_by_key(|(dependent, _)| names.iter().position(|n| *n == dependent.name));

        for (dependent, result) in results {
            match result {
                Ok(fetched) => report.push(
                    &dependent.name,
                    Outcome::Fetched {
                        path: fetched.artifact,
                        verified: fetched.verified,
                    },
                ),
                Err(e) if e.aborts_batch() => return Err(e),
                Err(e) => report.push(&dependent.name, Outcome::Failed(e)),
            }
        }
        Ok(report)
    }

    async fn fetch_and_verify(
        &self,
        dependent: &Dependent,
        strategy: Strategy,
        force: bool,
    ) -> Result<Fetched> {
        let artifact = strategy.fetch(force).await?;

        let mut verifier = GpgVerifier::new(
            dependent,
            &artifact,
            self.metadata.clone(),
            self.runner.clone(),
            force,
        );
        let verified = verifier.verify().await? == GpgState::Verified;

        Ok(Fetched {
            strategy,
            artifact,
            verified,
        })
    }

    // ------------------------------------------------------------------
    // install

    pub async fn install(&self, names: &[String], options: &InstallOptions) -> Result<BatchReport> {
        let policy = options.policy();
        let mut report = BatchReport::default();

        let mut members: Vec<&Dependent> = Vec::new();
        let mut seen: HashSet<String> = HashSet::new();
        let mut deferred: HashSet<String> = HashSet::new();
        let mut failed: HashSet<String> = HashSet::new();
        let mut edges: HashMap<String, Vec<&Dependency>> = HashMap::new();
        let requested: HashSet<&str> = names.iter().map(String::as_str).collect();

        // 1. resolve
        for name in names {
            let root = match self.catalog.require(name) {
                Ok(root) => root,
                Err(e) => {
                    report.push(name, Outcome::Failed(e));
                    failed.insert(name.clone());
                    continue;
                }
            };

            let expanded = match self.resolver.expand_dependencies(&self.catalog, &policy, root) {
                Ok(expanded) => expanded,
                Err(e) if e.aborts_batch() => return Err(e),
                Err(e) => {
                    report.push(name, Outcome::Failed(e));
                    failed.insert(root.name.clone());
                    continue;
                }
            };

            for dep in expanded.iter() {
                if dep.deferred {
                    if deferred.insert(dep.name.clone()) {
                        warn!("Skipping {}: tap not available", dep.name);
                        report.push(&dep.name, Outcome::Deferred { tap: dep.tap.clone() });
                    }
                    continue;
                }
                let dependent = match self.catalog.require(&dep.name) {
                    Ok(dependent) => dependent,
                    Err(e) => {
                        if seen.insert(dep.name.clone()) {
                            failed.insert(dep.name.clone());
                            report.push(&dep.name, Outcome::Failed(e));
                        }
                        continue;
                    }
                };
                record_kept_edges(&mut edges, &policy, root, dependent);
                if seen.insert(dep.name.clone()) {
                    members.push(dependent);
                }
            }
            record_kept_edges(&mut edges, &policy, root, root);
            if seen.insert(root.name.clone()) {
                members.push(root);
            }

            self.check_requirements(root, &policy, &mut report, &mut failed)
                .await?;
        }

        let member_names: HashSet<&str> = members.iter().map(|m| m.name.as_str()).collect();
        // (name, runtime) for every kept edge that stays inside the batch
        let in_batch_edges = |m: &Dependent| -> Vec<(String, bool)> {
            edges
                .get(&m.name)
                .into_iter()
                .flatten()
                .filter(|d| member_names.contains(d.name.as_str()))
                .map(|d| (d.name.clone(), !d.tags.is_build() && !d.tags.is_test()))
                .collect()
        };
        let in_batch_deps = |m: &Dependent| -> Vec<String> {
            in_batch_edges(m).into_iter().map(|(name, _)| name).collect()
        };
        let runtime_deps = |m: &Dependent| -> Vec<String> {
            in_batch_edges(m)
                .into_iter()
                .filter_map(|(name, runtime)| runtime.then_some(name))
                .collect()
        };

        // 2. detect strategies before any fetch
        let ctx = self.fetch_context(options.verbose);
        let mut strategies: HashMap<String, Strategy> = HashMap::new();
        for member in &members {
            if !failed.contains(&member.name) && self.needs_install(member, options.force) {
                strategies.insert(member.name.clone(), Strategy::for_dependent(member, &ctx)?);
            }
        }

        // 3. level by level
        let levels = layer(&members, &in_batch_deps);
        let jobs = options.jobs.unwrap_or(self.config.jobs).max(1);

        for level in levels {
            let mut ready: Vec<(&Dependent, Strategy)> = Vec::new();

            for member in level {
                if failed.contains(&member.name) {
                    if report.get(&member.name).is_none() {
                        report.push(&member.name, Outcome::Skipped {
                            reason: "earlier failure".to_string(),
                        });
                    }
                    continue;
                }

                if let Some(blocker) = in_batch_deps(member).into_iter().find(|d| failed.contains(d)) {
                    warn!("Skipping {}: dependency {} failed", member.name, blocker);
                    report.push(&member.name, Outcome::Skipped {
                        reason: format!("dependency {} failed", blocker),
                    });
                    failed.insert(member.name.clone());
                    continue;
                }

                let version = member.version.as_dir_name().to_string();
                let Some(strategy) = strategies.remove(&member.name) else {
                    report.push(&member.name, Outcome::AlreadyInstalled { version });
                    continue;
                };

                if options.dry_run {
                    report.push(&member.name, Outcome::WouldInstall {
                        version,
                        strategy: strategy.kind(),
                    });
                } else {
                    ready.push((member, strategy));
                }
            }

            let order: Vec<&Dependent> = ready.iter().map(|(m, _)| *m).collect();
            let mut fetched: Vec<(usize, Result<Fetched>)> = stream::iter(ready.into_iter().enumerate())
                .map(|(idx, (member, strategy))| async move {
                    (idx, self.fetch_and_verify(member, strategy, options.force).await)
                })
                .buffer_unordered(jobs)
                .collect()
                .await;
            fetched.sort_by_key(|(idx, _)| *idx);

            // staging stays sequential and in level order
            for (idx, result) in fetched {
                let member = order[idx];
                let outcome = match result {
                    Ok(fetched) => {
                        let runtime = runtime_deps(member);
                        let on_request = requested.contains(member.name.as_str());
                        self.stage_one(member, fetched, &runtime, on_request, options)
                            .await
                    }
                    Err(e) => Err(e),
                };

                match outcome {
                    Ok(outcome) => report.push(&member.name, outcome),
                    Err(e) if e.aborts_batch() => return Err(e),
                    Err(e) => {
                        warn!("{} failed: {}", member.name, e);
                        failed.insert(member.name.clone());
                        report.push(&member.name, Outcome::Failed(e));
                    }
                }
            }
        }

        Ok(report)
    }

    fn needs_install(&self, member: &Dependent, force: bool) -> bool {
        let staged = self
            .config
            .staged_path(&member.name, member.version.as_dir_name());
        force || !InstallReceipt::exists(&staged)
    }

    async fn check_requirements(
        &self,
        root: &Dependent,
        policy: &Policy,
        report: &mut BatchReport,
        failed: &mut HashSet<String>,
    ) -> Result<()> {
        let requirements = match self.resolver.expand_requirements(&self.catalog, policy, root) {
            Ok(requirements) => requirements,
            Err(e) if e.aborts_batch() => return Err(e),
            Err(e) => {
                report.push(&root.name, Outcome::Failed(e));
                failed.insert(root.name.clone());
                return Ok(());
            }
        };

        for resolved in requirements.iter() {
            if failed.contains(&resolved.owner) {
                continue;
            }
            match self.requirements.check(&resolved.owner, &resolved.requirement).await {
                Ok(()) => {}
                Err(e) if !resolved.requirement.fatal => {
                    warn!("{}", e);
                }
                Err(e) if e.aborts_batch() => return Err(e),
                Err(e) => {
                    failed.insert(resolved.owner.clone());
                    report.push(&resolved.owner, Outcome::Failed(e));
                }
            }
        }
        Ok(())
    }

    async fn stage_one(
        &self,
        member: &Dependent,
        fetched: Fetched,
        runtime: &[String],
        on_request: bool,
        options: &InstallOptions,
    ) -> Result<Outcome> {
        let version = member.version.as_dir_name().to_string();
        let staged = self.config.staged_path(&member.name, &version);
        info!("Staging {} {}", member.name, version);
        stage::stage(&fetched.artifact, &staged)?;

        let kind = fetched.strategy.kind();
        let quarantined = self.config.quarantine && kind == StrategyKind::Curl;
        if quarantined {
            self.quarantine.quarantine_download(&fetched.artifact).await?;
        }

        let linked = if options.binaries {
            let dependent_dir = self.config.dependent_dir(&member.name);
            symlink::unlink_other_versions(&self.config.bin_dir, &dependent_dir, &staged)?;
            symlink::link_binaries(&staged, &self.config.bin_dir)?
        } else {
            Vec::new()
        };

        let mut receipt = InstallReceipt::new(
            &member.name,
            &version,
            kind.cache_tag(),
            &fetched.strategy.cached_location(),
            on_request,
        )
        .with_source_modified_time(fetched.strategy.source_modified_time().await?);
        receipt.tap = member.tap.clone();
        receipt.last_commit = fetched.strategy.last_commit().await?;
        receipt.linked_files = linked.clone();
        receipt.quarantined = quarantined;
        receipt.signature_verified = fetched.verified;
        receipt.runtime_dependencies = runtime
            .iter()
            .filter_map(|name| self.catalog.get(name))
            .map(|dep| RuntimeDependency {
                full_name: dep.full_name(),
                version: dep.version.to_string(),
            })
            .collect();
        receipt.write(&staged)?;

        Ok(Outcome::Installed {
            version,
            path: staged,
            linked: linked.len(),
        })
    }
}

/// Add the edges of `member` that `policy` keeps when expanding `root`.
fn record_kept_edges<'a>(
    edges: &mut HashMap<String, Vec<&'a Dependency>>,
    policy: &Policy,
    root: &Dependent,
    member: &'a Dependent,
) {
    let kept = edges.entry(member.name.clone()).or_default();
    for dep in &member.dependencies {
        if dep.name == member.name || kept.iter().any(|k| k.name == dep.name) {
            continue;
        }
        let decision = policy.decide(root, member, &dep.name, &dep.tags, Some(dep.name.as_str()));
        if decision != Decision::Prune {
            kept.push(dep);
        }
    }
}

/// Group members into levels; each member sits one level above its deepest
/// in-batch dependency. Order within a level follows `members`.
fn layer<'a, F>(members: &[&'a Dependent], deps_of: &F) -> Vec<Vec<&'a Dependent>>
where
    F: Fn(&Dependent) -> Vec<String>,
{
    let by_name: HashMap<&str, &Dependent> =
        members.iter().map(|m| (m.name.as_str(), *m)).collect();
    let mut levels: HashMap<String, usize> = HashMap::new();

    fn level_of<F: Fn(&Dependent) -> Vec<String>>(
        member: &Dependent,
        by_name: &HashMap<&str, &Dependent>,
        deps_of: &F,
        levels: &mut HashMap<String, usize>,
        visiting: &mut Vec<String>,
    ) -> usize {
        if let Some(level) = levels.get(&member.name) {
            return *level;
        }
        visiting.push(member.name.clone());
        let candidates: Vec<&Dependent> = deps_of(member)
            .iter()
            .filter(|d| !visiting.contains(d))
            .filter_map(|d| by_name.get(d.as_str()))
            .copied()
            .collect();
        let level = candidates
            .into_iter()
            .map(|dep| 1 + level_of(dep, by_name, deps_of, levels, visiting))
            .max()
            .unwrap_or(0);
        visiting.pop();
        levels.insert(member.name.clone(), level);
        level
    }

    let mut grouped: Vec<Vec<&'a Dependent>> = Vec::new();
    for member in members {
        let level = level_of(member, &by_name, deps_of, &mut levels, &mut Vec::new());
        if grouped.len() <= level {
            grouped.resize_with(level + 1, Vec::new);
        }
        grouped[level].push(*member);
    }
    grouped
}

fn remove_path(path: &Path) -> Result<()> {
    let metadata = match path.symlink_metadata() {
        Ok(m) => m,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(e.into()),
    };
    let result = if metadata.is_dir() {
        std::fs::remove_dir_all(path)
    } else {
        std::fs::remove_file(path)
    };
    match result {
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        other => Ok(other?),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dependent::Dependency;

    #[test]
    fn test_layering() {
        let a = Dependent::new("a", "1").depends_on(Dependency::new("b"));
        let b = Dependent::new("b", "1").depends_on(Dependency::new("c"));
        let c = Dependent::new("c", "1");
        let d = Dependent::new("d", "1");
        let members = vec![&c, &b, &d, &a];
        let names: HashSet<&str> = members.iter().map(|m| m.name.as_str()).collect();
        let deps_of = |m: &Dependent| -> Vec<String> {
            m.dependencies
                .iter()
                .map(|d| d.name.clone())
                .filter(|n| names.contains(n.as_str()))
                .collect()
        };

        let levels = layer(&members, &deps_of);
        let names: Vec<Vec<&str>> = levels
            .iter()
            .map(|l| l.iter().map(|m| m.name.as_str()).collect())
            .collect();
        assert_eq!(names, vec![vec!["c", "d"], vec!["b"], vec!["a"]]);
    }

    #[test]
    fn test_layering_tolerates_cycles() {
        let a = Dependent::new("a", "1").depends_on(Dependency::new("b"));
        let b = Dependent::new("b", "1").depends_on(Dependency::new("a"));
        let members = vec![&b, &a];
        let deps_of = |m: &Dependent| -> Vec<String> {
            m.dependencies.iter().map(|d| d.name.clone()).collect()
        };

        let levels = layer(&members, &deps_of);
        assert_eq!(levels.iter().map(Vec::len).sum::<usize>(), 2);
    }

    #[test]
    fn test_plan_paths_order() {
        let plan = UninstallPlan {
            links: vec![PathBuf::from("/p/bin/foo")],
            metadata: Some(PathBuf::from("/p/Cellar/foo/.metadata")),
            staged: vec![PathBuf::from("/p/Cellar/foo/1.0")],
            dependent_dir: Some(PathBuf::from("/p/Cellar/foo")),
        };
        assert_eq!(
            plan.paths(),
            vec![
                Path::new("/p/bin/foo"),
                Path::new("/p/Cellar/foo/.metadata"),
                Path::new("/p/Cellar/foo/1.0"),
                Path::new("/p/Cellar/foo"),
            ]
        );
        assert!(UninstallPlan::default().is_empty());
    }

    #[test]
    fn test_remove_path_tolerates_absence() {
        let dir = tempfile::tempdir().unwrap();
        remove_path(&dir.path().join("nope")).unwrap();
        let file = dir.path().join("f");
        std::fs::write(&file, b"x").unwrap();
        remove_path(&file).unwrap();
        assert!(!file.exists());
    }
}
