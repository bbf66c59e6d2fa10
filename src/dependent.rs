//! Installable units and the edges between them.
//!
//! A [`Dependent`] is anything that can be installed (formula or cask). Its
//! [`Dependency`] and [`Requirement`] edges carry a [`TagSet`]; an empty set
//! means a normal runtime edge. These records are produced elsewhere (the DSL
//! is out of scope) and reach this crate through the JSON catalog.

use crate::error::{HopperError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tag {
    Build,
    Test,
    Optional,
    Recommended,
}

impl Tag {
    pub fn as_str(&self) -> &'static str {
        match self {
            Tag::Build => "build",
            Tag::Test => "test",
            Tag::Optional => "optional",
            Tag::Recommended => "recommended",
        }
    }
}

/// Ordered, duplicate-free set of tags
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "Vec<Tag>", into = "Vec<Tag>")]
pub struct TagSet(Vec<Tag>);

impl TagSet {
    pub fn new<I: IntoIterator<Item = Tag>>(tags: I) -> Self {
        let mut set = Vec::new();
        for tag in tags {
            if !set.contains(&tag) {
                set.push(tag);
            }
        }
        Self(set)
    }

    pub fn contains(&self, tag: Tag) -> bool {
        self.0.contains(&tag)
    }

    pub fn is_build(&self) -> bool {
        self.contains(Tag::Build)
    }

    pub fn is_test(&self) -> bool {
        self.contains(Tag::Test)
    }

    pub fn is_optional(&self) -> bool {
        self.contains(Tag::Optional)
    }

    pub fn is_recommended(&self) -> bool {
        self.contains(Tag::Recommended)
    }

    /// Neither optional nor recommended
    pub fn is_required(&self) -> bool {
        !self.is_optional() && !self.is_recommended()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = Tag> + '_ {
        self.0.iter().copied()
    }
}

impl From<Vec<Tag>> for TagSet {
    fn from(tags: Vec<Tag>) -> Self {
        Self::new(tags)
    }
}

impl From<TagSet> for Vec<Tag> {
    fn from(set: TagSet) -> Self {
        set.0
    }
}

impl fmt::Display for TagSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.is_empty() {
            return write!(f, "normal");
        }
        let names: Vec<&str> = self.0.iter().map(Tag::as_str).collect();
        write!(f, "{}", names.join(", "))
    }
}

/// A `build?`-style question asked of an edge's tags
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TagPredicate {
    Build,
    Test,
    Optional,
    Recommended,
}

impl TagPredicate {
    pub fn as_str(&self) -> &'static str {
        match self {
            TagPredicate::Build => "build?",
            TagPredicate::Test => "test?",
            TagPredicate::Optional => "optional?",
            TagPredicate::Recommended => "recommended?",
        }
    }

    pub fn matches(&self, tags: &TagSet) -> bool {
        match self {
            TagPredicate::Build => tags.is_build(),
            TagPredicate::Test => tags.is_test(),
            TagPredicate::Optional => tags.is_optional(),
            TagPredicate::Recommended => tags.is_recommended(),
        }
    }
}

impl FromStr for TagPredicate {
    type Err = HopperError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "build?" => Ok(TagPredicate::Build),
            "test?" => Ok(TagPredicate::Test),
            "optional?" => Ok(TagPredicate::Optional),
            "recommended?" => Ok(TagPredicate::Recommended),
            other => Err(HopperError::InvalidArgument(format!(
                "unknown tag predicate: {}",
                other
            ))),
        }
    }
}

impl fmt::Display for TagPredicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Anything carrying tags that policies can filter on
pub trait Dependable {
    fn tags(&self) -> &TagSet;
}

/// Edge to another dependent
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dependency {
    pub name: String,
    /// Tap the target lives in; `None` means a core dependent
    #[serde(default)]
    pub tap: Option<String>,
    #[serde(default)]
    pub tags: TagSet,
}

impl Dependency {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            tap: None,
            tags: TagSet::default(),
        }
    }

    pub fn tagged<I: IntoIterator<Item = Tag>>(mut self, tags: I) -> Self {
        self.tags = TagSet::new(tags);
        self
    }

    pub fn from_tap(mut self, tap: impl Into<String>) -> Self {
        self.tap = Some(tap.into());
        self
    }
}

impl<T: Dependable> Dependable for &T {
    fn tags(&self) -> &TagSet {
        (**self).tags()
    }
}

impl Dependable for Dependency {
    fn tags(&self) -> &TagSet {
        &self.tags
    }
}

/// What a requirement checks for
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RequirementCheck {
    /// macOS at or above a release number, e.g. `"13"` or `"10.15"`
    MinimumMacos { version: String },
    /// CPU architecture as reported by the platform (`arm64`, `x86_64`)
    Arch { arch: String },
    /// Executable that must be on `PATH`
    Binary { name: String },
}

/// Edge to an environment precondition
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Requirement {
    #[serde(flatten)]
    pub check: RequirementCheck,
    #[serde(default)]
    pub tags: TagSet,
    #[serde(default = "default_fatal")]
    pub fatal: bool,
}

fn default_fatal() -> bool {
    true
}

impl Requirement {
    pub fn new(check: RequirementCheck) -> Self {
        Self {
            check,
            tags: TagSet::default(),
            fatal: true,
        }
    }

    pub fn tagged<I: IntoIterator<Item = Tag>>(mut self, tags: I) -> Self {
        self.tags = TagSet::new(tags);
        self
    }

    /// Name matched against `with`/`without` build options
    pub fn option_name(&self) -> &str {
        match &self.check {
            RequirementCheck::MinimumMacos { .. } => "macos",
            RequirementCheck::Arch { .. } => "arch",
            RequirementCheck::Binary { name } => name,
        }
    }
}

impl Dependable for Requirement {
    fn tags(&self) -> &TagSet {
        &self.tags
    }
}

impl fmt::Display for Requirement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.check {
            RequirementCheck::MinimumMacos { version } => write!(f, "macOS >= {}", version),
            RequirementCheck::Arch { arch } => write!(f, "arch {}", arch),
            RequirementCheck::Binary { name } => write!(f, "{} on PATH", name),
        }
    }
}

/// Concrete version string, or a floating "always latest" version
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Version {
    Concrete(String),
    Latest,
}

impl Version {
    pub fn is_concrete(&self) -> bool {
        matches!(self, Version::Concrete(_))
    }

    /// Directory name used for staging and metadata
    pub fn as_dir_name(&self) -> &str {
        match self {
            Version::Concrete(v) => v,
            Version::Latest => "latest",
        }
    }
}

impl From<String> for Version {
    fn from(s: String) -> Self {
        match s.as_str() {
            "latest" | ":latest" => Version::Latest,
            _ => Version::Concrete(s),
        }
    }
}

impl From<&str> for Version {
    fn from(s: &str) -> Self {
        Version::from(s.to_string())
    }
}

impl From<Version> for String {
    fn from(v: Version) -> Self {
        v.as_dir_name().to_string()
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_dir_name())
    }
}

/// `with`/`without` switches the dependent was built with
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildOptions {
    #[serde(default)]
    pub with: Vec<String>,
    #[serde(default)]
    pub without: Vec<String>,
}

impl BuildOptions {
    pub fn with(&self, option: &str) -> bool {
        self.with.iter().any(|n| n == option)
    }

    pub fn without(&self, option: &str) -> bool {
        self.without.iter().any(|n| n == option)
    }
}

/// Where the artifact comes from
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Source {
    pub url: String,
    /// Explicit strategy identifier (`git`, `curl`, `svn`, ...)
    #[serde(default)]
    pub using: Option<String>,
    #[serde(default)]
    pub sha256: Option<String>,
}

/// Signing metadata; exactly one of `key_id`/`key_url` is expected
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GpgSpec {
    pub signature: String,
    #[serde(default)]
    pub key_id: Option<String>,
    #[serde(default)]
    pub key_url: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DependentKind {
    #[default]
    Formula,
    Cask,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dependent {
    pub name: String,
    #[serde(default)]
    pub tap: Option<String>,
    #[serde(default)]
    pub kind: DependentKind,
    pub version: Version,
    #[serde(default)]
    pub dependencies: Vec<Dependency>,
    #[serde(default)]
    pub requirements: Vec<Requirement>,
    #[serde(default)]
    pub build: BuildOptions,
    #[serde(default)]
    pub source: Option<Source>,
    #[serde(default)]
    pub gpg: Option<GpgSpec>,
}

impl Dependent {
    pub fn new(name: impl Into<String>, version: impl Into<Version>) -> Self {
        Self {
            name: name.into(),
            tap: None,
            kind: DependentKind::Formula,
            version: version.into(),
            dependencies: Vec::new(),
            requirements: Vec::new(),
            build: BuildOptions::default(),
            source: None,
            gpg: None,
        }
    }

    pub fn depends_on(mut self, dep: Dependency) -> Self {
        self.dependencies.push(dep);
        self
    }

    pub fn requires(mut self, req: Requirement) -> Self {
        self.requirements.push(req);
        self
    }

    pub fn with_source(mut self, url: impl Into<String>) -> Self {
        self.source = Some(Source {
            url: url.into(),
            using: None,
            sha256: None,
        });
        self
    }

    /// `tap/name`, or just the name for core dependents
    pub fn full_name(&self) -> String {
        match &self.tap {
            Some(tap) => format!("{}/{}", tap, self.name),
            None => self.name.clone(),
        }
    }
}

impl fmt::Display for Dependent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}
