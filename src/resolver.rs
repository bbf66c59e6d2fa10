//! Recursive dependency expansion with tag policies.
//!
//! # Algorithm
//!
//! Expansion is a depth-first walk from the root. For every direct edge of the
//! dependent being visited, the [`Policy`] yields a [`Decision`]:
//!
//! - `Prune`: the edge is dropped and its subtree is not visited
//! - `Deferred`: the edge is kept but its subtree is not visited (the target
//!   lives in a tap that is not available locally)
//! - `Keep`: the target is expanded first, then the edge itself is emitted
//!
//! Because children are emitted before their parent, the output is already in
//! install order. Repeated targets are merged into one entry at the position of
//! their first occurrence, with their tags combined.
//!
//! # Memoization
//!
//! Results are memoized per (policy key, dependent) for the lifetime of the
//! [`Resolver`]. The policy key mirrors the classic
//! `recursive_includes_<includes>_<ignores>` form and additionally pins the
//! root when the answer depends on it (root-only test edges, skipped
//! recursive build dependents).

use crate::catalog::Catalog;
use crate::dependent::{Dependable, Dependency, Dependent, Requirement, Tag, TagPredicate, TagSet};
use crate::error::{HopperError, Result};
use moka::sync::Cache;
use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;
use tracing::debug;

const MEMO_CAPACITY: u64 = 10_000;

/// Which kind of edge to expand
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EdgeKind {
    Dependency,
    Requirement,
}

impl FromStr for EdgeKind {
    type Err = HopperError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "dependency" | "dependencies" => Ok(EdgeKind::Dependency),
            "requirement" | "requirements" => Ok(EdgeKind::Requirement),
            other => Err(HopperError::InvalidArgument(format!(
                "Invalid edge kind: {}",
                other
            ))),
        }
    }
}

/// Include/ignore configuration for one resolution call
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Policy {
    includes: Vec<TagPredicate>,
    ignores: Vec<TagPredicate>,
    skip_recursive_build_dependents: bool,
    used: Vec<String>,
}

impl Policy {
    pub fn new(includes: Vec<TagPredicate>, ignores: Vec<TagPredicate>) -> Self {
        Self {
            includes,
            ignores,
            ..Default::default()
        }
    }

    /// Build from predicate strings such as `"build?"`.
    pub fn parse(includes: &[&str], ignores: &[&str]) -> Result<Self> {
        let includes = includes
            .iter()
            .map(|s| s.parse())
            .collect::<Result<Vec<_>>>()?;
        let ignores = ignores
            .iter()
            .map(|s| s.parse())
            .collect::<Result<Vec<_>>>()?;
        Ok(Self::new(includes, ignores))
    }

    /// Command-line style construction: anything not included is ignored,
    /// except `recommended?` which is only ignored on request.
    pub fn from_flags(
        include_build: bool,
        include_test: bool,
        include_optional: bool,
        skip_recommended: bool,
    ) -> Self {
        let mut includes = Vec::new();
        let mut ignores = Vec::new();

        for (flag, predicate) in [
            (include_build, TagPredicate::Build),
            (include_test, TagPredicate::Test),
            (include_optional, TagPredicate::Optional),
        ] {
            if flag {
                includes.push(predicate);
            } else {
                ignores.push(predicate);
            }
        }

        if skip_recommended {
            ignores.push(TagPredicate::Recommended);
        }

        Self::new(includes, ignores)
    }

    /// Prune build edges except direct build edges of the root onto `used`.
    pub fn skip_recursive_build_dependents(mut self, used: Vec<String>) -> Self {
        self.skip_recursive_build_dependents = true;
        self.used = used;
        self
    }

    pub fn includes(&self) -> &[TagPredicate] {
        &self.includes
    }

    pub fn ignores(&self) -> &[TagPredicate] {
        &self.ignores
    }

    fn includes_predicate(&self, predicate: TagPredicate) -> bool {
        self.includes.contains(&predicate)
    }

    fn ignores_predicate(&self, predicate: TagPredicate) -> bool {
        self.ignores.contains(&predicate)
    }

    /// Memo key for expansions rooted at `root`
    pub fn cache_key(&self, root: &Dependent) -> String {
        let join = |preds: &[TagPredicate]| {
            preds
                .iter()
                .map(TagPredicate::as_str)
                .collect::<Vec<_>>()
                .join("_")
        };

        let mut key = format!(
            "recursive_includes_{}_{}",
            join(&self.includes),
            join(&self.ignores)
        );
        if self.includes_predicate(TagPredicate::Test) {
            key.push('_');
            key.push_str(&root.full_name());
        }
        if self.skip_recursive_build_dependents {
            key.push_str(&format!(
                "_{}_no_recursive_build_{}",
                root.full_name(),
                self.used.join("_")
            ));
        }
        key
    }

    /// Tag-based verdict for one edge of `dependent`.
    ///
    /// `option` is the name matched against the dependent's `with`/`without`
    /// build options; `target` is the dependent the edge points at, if any.
    pub fn decide(
        &self,
        root: &Dependent,
        dependent: &Dependent,
        option: &str,
        tags: &TagSet,
        target: Option<&str>,
    ) -> Decision {
        if tags.is_recommended()
            && (self.ignores_predicate(TagPredicate::Recommended)
                || dependent.build.without(option))
        {
            return Decision::Prune;
        }

        if tags.is_optional()
            && !self.includes_predicate(TagPredicate::Optional)
            && !dependent.build.with(option)
        {
            return Decision::Prune;
        }

        if tags.is_build() || tags.is_test() {
            let from_root = dependent.name == root.name;
            let keep = (tags.is_test() && self.includes_predicate(TagPredicate::Test) && from_root)
                || (tags.is_build() && self.includes_predicate(TagPredicate::Build));
            if !keep {
                return Decision::Prune;
            }

            if self.skip_recursive_build_dependents && tags.is_build() {
                let used = target.is_some_and(|t| self.used.iter().any(|u| u == t));
                if !(from_root && used) {
                    return Decision::Prune;
                }
            }
        }

        Decision::Keep
    }
}

/// Per-edge traversal verdict
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Keep,
    Prune,
    /// Keep the edge, do not descend into it
    Deferred,
}

/// A dependency edge in an expansion result
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedDependency {
    pub name: String,
    pub tap: Option<String>,
    pub tags: TagSet,
    /// Target's tap is not available; its own dependencies were not expanded
    pub deferred: bool,
}

impl ResolvedDependency {
    fn from_edge(dep: &Dependency, deferred: bool) -> Self {
        Self {
            name: dep.name.clone(),
            tap: dep.tap.clone(),
            tags: dep.tags.clone(),
            deferred,
        }
    }
}

impl Dependable for ResolvedDependency {
    fn tags(&self) -> &TagSet {
        &self.tags
    }
}

/// A requirement edge together with the dependent that declared it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedRequirement {
    pub owner: String,
    pub requirement: Requirement,
}

impl Dependable for ResolvedRequirement {
    fn tags(&self) -> &TagSet {
        &self.requirement.tags
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResolvedEdge {
    Dependency(ResolvedDependency),
    Requirement(ResolvedRequirement),
}

type DependencyMemo = Cache<String, Arc<Vec<ResolvedDependency>>>;
type RequirementMemo = Cache<String, Arc<Vec<ResolvedRequirement>>>;

/// Expands dependents against a catalog, memoizing results
#[derive(Clone)]
pub struct Resolver {
    dependencies: DependencyMemo,
    requirements: RequirementMemo,
}

impl Default for Resolver {
    fn default() -> Self {
        Self::new()
    }
}

impl Resolver {
    pub fn new() -> Self {
        Self {
            dependencies: Cache::new(MEMO_CAPACITY),
            requirements: Cache::new(MEMO_CAPACITY),
        }
    }

    /// Drop every memoized expansion
    pub fn clear(&self) {
        self.dependencies.invalidate_all();
        self.requirements.invalidate_all();
    }

    /// Expand `root` for the given edge kind.
    pub fn expand(
        &self,
        catalog: &Catalog,
        kind: EdgeKind,
        policy: &Policy,
        root: &Dependent,
    ) -> Result<Vec<ResolvedEdge>> {
        Ok(match kind {
            EdgeKind::Dependency => self
                .expand_dependencies(catalog, policy, root)?
                .iter()
                .cloned()
                .map(ResolvedEdge::Dependency)
                .collect(),
            EdgeKind::Requirement => self
                .expand_requirements(catalog, policy, root)?
                .iter()
                .cloned()
                .map(ResolvedEdge::Requirement)
                .collect(),
        })
    }

    /// Recursive dependencies of `root`, dependencies before dependents.
    pub fn expand_dependencies(
        &self,
        catalog: &Catalog,
        policy: &Policy,
        root: &Dependent,
    ) -> Result<Arc<Vec<ResolvedDependency>>> {
        let mut expander = Expander {
            catalog,
            policy,
            root,
            key: policy.cache_key(root),
            memo: &self.dependencies,
            stack: Vec::new(),
        };
        expander.expand(root)
    }

    /// Requirements of `root` and of every non-deferred dependency the
    /// policy keeps.
    pub fn expand_requirements(
        &self,
        catalog: &Catalog,
        policy: &Policy,
        root: &Dependent,
    ) -> Result<Arc<Vec<ResolvedRequirement>>> {
        let memo_key = format!("{}::{}", policy.cache_key(root), root.full_name());
        if let Some(hit) = self.requirements.get(&memo_key) {
            return Ok(hit);
        }

        let dependencies = self.expand_dependencies(catalog, policy, root)?;
        let mut owners = vec![root];
        for dep in dependencies.iter().filter(|d| !d.deferred) {
            owners.push(catalog.require(&dep.name)?);
        }

        let mut expanded: Vec<ResolvedRequirement> = Vec::new();
        for owner in owners {
            for req in &owner.requirements {
                let decision = policy.decide(root, owner, req.option_name(), &req.tags, None);
                if decision == Decision::Prune {
                    continue;
                }
                if expanded.iter().any(|r| r.requirement.check == req.check) {
                    continue;
                }
                expanded.push(ResolvedRequirement {
                    owner: owner.name.clone(),
                    requirement: req.clone(),
                });
            }
        }

        Ok(self
            .requirements
            .entry(memo_key)
            .or_insert(Arc::new(expanded))
            .into_value())
    }
}

struct Expander<'a> {
    catalog: &'a Catalog,
    policy: &'a Policy,
    root: &'a Dependent,
    key: String,
    memo: &'a DependencyMemo,
    /// Dependents currently being expanded; breaks cycles
    stack: Vec<String>,
}

impl<'a> Expander<'a> {
    fn expand(&mut self, dependent: &'a Dependent) -> Result<Arc<Vec<ResolvedDependency>>> {
        let memo_key = format!("{}::{}", self.key, dependent.full_name());
        if let Some(hit) = self.memo.get(&memo_key) {
            debug!("Resolution cache hit for {}", dependent.name);
            return Ok(hit);
        }

        self.stack.push(dependent.name.clone());
        let expanded = self.expand_edges(dependent);
        self.stack.pop();

        let merged = Arc::new(merge_repeats(expanded?));
        Ok(self.memo.entry(memo_key).or_insert(merged).into_value())
    }

    fn expand_edges(&mut self, dependent: &'a Dependent) -> Result<Vec<ResolvedDependency>> {
        let catalog = self.catalog;
        let mut expanded = Vec::new();

        for dep in &dependent.dependencies {
            if dep.name == dependent.name {
                continue;
            }

            match self.decide(dependent, dep) {
                Decision::Prune => {}
                Decision::Deferred => {
                    debug!(
                        "Deferring {} -> {}: tap {} not available",
                        dependent.name,
                        dep.name,
                        dep.tap.as_deref().unwrap_or_default()
                    );
                    expanded.push(ResolvedDependency::from_edge(dep, true));
                }
                Decision::Keep => {
                    if self.stack.contains(&dep.name) {
                        continue;
                    }
                    let target = catalog.require(&dep.name)?;
                    expanded.extend(self.expand(target)?.iter().cloned());
                    expanded.push(ResolvedDependency::from_edge(dep, false));
                }
            }
        }

        Ok(expanded)
    }

    fn decide(&self, dependent: &Dependent, dep: &Dependency) -> Decision {
        let decision = self
            .policy
            .decide(self.root, dependent, &dep.name, &dep.tags, Some(dep.name.as_str()));

        if decision == Decision::Keep
            && dep
                .tap
                .as_deref()
                .is_some_and(|tap| !self.catalog.tap_installed(tap))
        {
            return Decision::Deferred;
        }
        decision
    }
}

/// Collapse repeated targets into their first position, combining tags.
///
/// Necessity: required if any occurrence is required, else recommended if any
/// is, else optional. `build` survives only when every occurrence is build
/// only; `test` survives when any occurrence has it.
fn merge_repeats(all: Vec<ResolvedDependency>) -> Vec<ResolvedDependency> {
    let mut order: Vec<String> = Vec::new();
    let mut grouped: HashMap<String, Vec<ResolvedDependency>> = HashMap::new();
    for dep in all {
        if !grouped.contains_key(&dep.name) {
            order.push(dep.name.clone());
        }
        grouped.entry(dep.name.clone()).or_default().push(dep);
    }

    order
        .into_iter()
        .filter_map(|name| grouped.remove(&name))
        .map(|deps| {
            let first = &deps[0];
            let mut tags = Vec::new();

            if !deps.iter().any(|d| d.tags.is_required()) {
                if deps.iter().any(|d| d.tags.is_recommended()) {
                    tags.push(Tag::Recommended);
                } else {
                    tags.push(Tag::Optional);
                }
            }

            if deps.iter().all(|d| d.tags.is_build()) {
                tags.push(Tag::Build);
            }
            if deps.iter().any(|d| d.tags.is_test()) {
                tags.push(Tag::Test);
            }

            ResolvedDependency {
                name: first.name.clone(),
                tap: first.tap.clone(),
                tags: TagSet::new(tags),
                deferred: deps.iter().all(|d| d.deferred),
            }
        })
        .collect()
}

/// Stable filter: drop candidates matching any ignore predicate unless they
/// also match an include predicate.
pub fn reject_ignored<T, I>(candidates: I, ignores: &[TagPredicate], includes: &[TagPredicate]) -> Vec<T>
where
    I: IntoIterator<Item = T>,
    T: Dependable,
{
    candidates
        .into_iter()
        .filter(|dep| {
            let tags = dep.tags();
            if !ignores.iter().any(|p| p.matches(tags)) {
                return true;
            }
            includes.iter().any(|p| p.matches(tags))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dependent::RequirementCheck;

    fn names(deps: &[ResolvedDependency]) -> Vec<&str> {
        deps.iter().map(|d| d.name.as_str()).collect()
    }

    #[test]
    fn test_edge_kind_parsing() {
        assert_eq!("dependency".parse::<EdgeKind>().unwrap(), EdgeKind::Dependency);
        assert_eq!("requirement".parse::<EdgeKind>().unwrap(), EdgeKind::Requirement);
        assert!(matches!(
            "resource".parse::<EdgeKind>(),
            Err(HopperError::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_from_flags_mapping() {
        let policy = Policy::from_flags(true, false, false, true);
        assert_eq!(policy.includes(), &[TagPredicate::Build]);
        assert_eq!(
            policy.ignores(),
            &[
                TagPredicate::Test,
                TagPredicate::Optional,
                TagPredicate::Recommended
            ]
        );

        let policy = Policy::from_flags(false, false, false, false);
        assert!(!policy.ignores().contains(&TagPredicate::Recommended));
    }

    #[test]
    fn test_cache_key_composition() {
        let root = Dependent::new("a", "1.0");

        let plain = Policy::parse(&["build?"], &["optional?"]).unwrap();
        assert_eq!(plain.cache_key(&root), "recursive_includes_build?_optional?");

        let test = Policy::parse(&["test?"], &[]).unwrap();
        assert_eq!(test.cache_key(&root), "recursive_includes_test?__a");

        let skip = Policy::parse(&["build?"], &[])
            .unwrap()
            .skip_recursive_build_dependents(vec!["b".into(), "c".into()]);
        assert_eq!(
            skip.cache_key(&root),
            "recursive_includes_build?__a_no_recursive_build_b_c"
        );
    }

    #[test]
    fn test_optional_pruned_unless_with() {
        let policy = Policy::parse(&[], &["optional?"]).unwrap();
        let mut root = Dependent::new("a", "1.0");
        let optional = TagSet::new([Tag::Optional]);

        assert_eq!(
            policy.decide(&root, &root, "c", &optional, Some("c")),
            Decision::Prune
        );

        root.build.with.push("c".into());
        assert_eq!(
            policy.decide(&root, &root, "c", &optional, Some("c")),
            Decision::Keep
        );
    }

    #[test]
    fn test_recommended_pruned_when_ignored_or_without() {
        let root = Dependent::new("a", "1.0");
        let recommended = TagSet::new([Tag::Recommended]);

        let keep = Policy::default();
        assert_eq!(
            keep.decide(&root, &root, "r", &recommended, Some("r")),
            Decision::Keep
        );

        let skip = Policy::from_flags(false, false, false, true);
        assert_eq!(
            skip.decide(&root, &root, "r", &recommended, Some("r")),
            Decision::Prune
        );

        let mut without = Dependent::new("a", "1.0");
        without.build.without.push("r".into());
        assert_eq!(
            keep.decide(&without, &without, "r", &recommended, Some("r")),
            Decision::Prune
        );
    }

    #[test]
    fn test_skip_recursive_build_keeps_only_root_edges_onto_used() {
        let root = Dependent::new("a", "1.0");
        let other = Dependent::new("b", "1.0");
        let build = TagSet::new([Tag::Build]);
        let policy = Policy::parse(&["build?"], &[])
            .unwrap()
            .skip_recursive_build_dependents(vec!["cmake".into()]);

        assert_eq!(
            policy.decide(&root, &root, "cmake", &build, Some("cmake")),
            Decision::Keep
        );
        assert_eq!(
            policy.decide(&root, &root, "ninja", &build, Some("ninja")),
            Decision::Prune
        );
        assert_eq!(
            policy.decide(&root, &other, "cmake", &build, Some("cmake")),
            Decision::Prune
        );
    }

    #[test]
    fn test_merge_repeats_tags() {
        let edge = |tags: &[Tag]| ResolvedDependency {
            name: "x".into(),
            tap: None,
            tags: TagSet::new(tags.iter().copied()),
            deferred: false,
        };

        let merged = merge_repeats(vec![edge(&[Tag::Build]), edge(&[])]);
        assert_eq!(merged.len(), 1);
        assert!(merged[0].tags.is_empty());

        let merged = merge_repeats(vec![edge(&[Tag::Build]), edge(&[Tag::Build, Tag::Test])]);
        assert!(merged[0].tags.is_build());
        assert!(merged[0].tags.is_test());

        let merged = merge_repeats(vec![edge(&[Tag::Optional]), edge(&[Tag::Recommended])]);
        assert_eq!(merged[0].tags, TagSet::new([Tag::Recommended]));
    }

    #[test]
    fn test_expand_orders_dependencies_first() {
        let catalog = Catalog::new([
            Dependent::new("a", "1.0")
                .depends_on(Dependency::new("b"))
                .depends_on(Dependency::new("c")),
            Dependent::new("b", "1.0").depends_on(Dependency::new("c")),
            Dependent::new("c", "1.0"),
        ]);
        let resolver = Resolver::new();
        let root = catalog.get("a").unwrap();

        let deps = resolver
            .expand_dependencies(&catalog, &Policy::default(), root)
            .unwrap();
        assert_eq!(names(&deps), vec!["c", "b"]);
    }

    #[test]
    fn test_expand_breaks_cycles() {
        let catalog = Catalog::new([
            Dependent::new("a", "1.0").depends_on(Dependency::new("b")),
            Dependent::new("b", "1.0").depends_on(Dependency::new("a")),
        ]);
        let deps = Resolver::new()
            .expand_dependencies(&catalog, &Policy::default(), catalog.get("a").unwrap())
            .unwrap();
        assert_eq!(names(&deps), vec!["b"]);
    }

    #[test]
    fn test_requirements_collected_from_kept_dependencies() {
        let catalog = Catalog::new([
            Dependent::new("a", "1.0")
                .depends_on(Dependency::new("b"))
                .depends_on(Dependency::new("tool").tagged([Tag::Build]))
                .requires(Requirement::new(RequirementCheck::Arch {
                    arch: "arm64".into(),
                })),
            Dependent::new("b", "1.0").requires(Requirement::new(RequirementCheck::MinimumMacos {
                version: "13".into(),
            })),
            Dependent::new("tool", "1.0").requires(Requirement::new(RequirementCheck::Binary {
                name: "make".into(),
            })),
        ]);

        let reqs = Resolver::new()
            .expand_requirements(&catalog, &Policy::default(), catalog.get("a").unwrap())
            .unwrap();
        let owners: Vec<&str> = reqs.iter().map(|r| r.owner.as_str()).collect();
        assert_eq!(owners, vec!["a", "b"]);
    }

    #[test]
    fn test_reject_ignored_keeps_included_overlap() {
        let deps = vec![
            Dependency::new("a"),
            Dependency::new("b").tagged([Tag::Build]),
            Dependency::new("c").tagged([Tag::Build, Tag::Test]),
            Dependency::new("d").tagged([Tag::Optional]),
        ];
        let kept = reject_ignored(
            &deps,
            &[TagPredicate::Build, TagPredicate::Optional],
            &[TagPredicate::Test],
        );
        let kept: Vec<&str> = kept.iter().map(|d| d.name.as_str()).collect();
        assert_eq!(kept, vec!["a", "c"]);
    }
}
