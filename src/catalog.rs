//! Dependent catalog loaded from JSON.
//!
//! The catalog is the hand-off point from whatever produced the dependent
//! records. It also knows which taps are available locally so the resolver
//! can defer edges into taps it cannot see.
//!
//! ```json
//! {
//!   "taps": ["acme/extras"],
//!   "dependents": [{"name": "wget", "version": "1.21.4", "dependencies": []}]
//! }
//! ```

use crate::dependent::Dependent;
use crate::error::{HopperError, Result};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::path::Path;

const SUGGESTION_THRESHOLD: f64 = 0.85;

#[derive(Debug, Default, Serialize, Deserialize)]
struct CatalogFile {
    #[serde(default)]
    taps: Vec<String>,
    #[serde(default)]
    dependents: Vec<Dependent>,
}

#[derive(Debug, Clone, Default)]
pub struct Catalog {
    dependents: Vec<Dependent>,
    index: HashMap<String, usize>,
    taps: HashSet<String>,
}

impl Catalog {
    pub fn new<I: IntoIterator<Item = Dependent>>(dependents: I) -> Self {
        let mut catalog = Self::default();
        for dependent in dependents {
            catalog.insert(dependent);
        }
        catalog
    }

    /// Read a catalog file
    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let file: CatalogFile = serde_json::from_str(&contents)?;
        let mut catalog = Self::new(file.dependents);
        catalog.taps.extend(file.taps);
        Ok(catalog)
    }

    /// Add or replace a dependent; both `name` and `tap/name` resolve to it.
    pub fn insert(&mut self, dependent: Dependent) {
        let full_name = dependent.full_name();
        let idx = match self.index.get(&dependent.name) {
            Some(&idx) => {
                self.dependents[idx] = dependent;
                idx
            }
            None => {
                self.index.insert(dependent.name.clone(), self.dependents.len());
                self.dependents.push(dependent);
                self.dependents.len() - 1
            }
        };
        self.index.insert(full_name, idx);
    }

    pub fn add_tap(&mut self, tap: impl Into<String>) {
        self.taps.insert(tap.into());
    }

    pub fn tap_installed(&self, tap: &str) -> bool {
        self.taps.contains(tap)
    }

    pub fn get(&self, name: &str) -> Option<&Dependent> {
        self.index.get(name).map(|&idx| &self.dependents[idx])
    }

    /// Look up a dependent, suggesting the closest name on a miss.
    pub fn require(&self, name: &str) -> Result<&Dependent> {
        self.get(name).ok_or_else(|| HopperError::DependentNotFound {
            name: name.to_string(),
            suggestion: self.suggest(name),
        })
    }

    fn suggest(&self, name: &str) -> Option<String> {
        self.dependents
            .iter()
            .map(|d| (strsim::jaro_winkler(name, &d.name), &d.name))
            .filter(|(score, _)| *score >= SUGGESTION_THRESHOLD)
            .max_by(|a, b| a.0.total_cmp(&b.0))
            .map(|(_, n)| n.clone())
    }

    pub fn iter(&self) -> impl Iterator<Item = &Dependent> {
        self.dependents.iter()
    }

    pub fn len(&self) -> usize {
        self.dependents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.dependents.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lookup_by_name_and_full_name() {
        let mut dep = Dependent::new("widget", "1.0");
        dep.tap = Some("acme/extras".into());
        let catalog = Catalog::new([dep]);

        assert!(catalog.get("widget").is_some());
        assert!(catalog.get("acme/extras/widget").is_some());
        assert_eq!(catalog.len(), 1);
    }

    #[test]
    fn test_require_suggests_close_name() {
        let catalog = Catalog::new([Dependent::new("ripgrep", "14.1.0")]);
        match catalog.require("ripgrp") {
            Err(HopperError::DependentNotFound { suggestion, .. }) => {
                assert_eq!(suggestion.as_deref(), Some("ripgrep"));
            }
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("catalog.json");
        std::fs::write(
            &path,
            r#"{"taps": ["acme/extras"], "dependents": [{"name": "jq", "version": "1.7.1"}]}"#,
        )
        .unwrap();

        let catalog = Catalog::load(&path).unwrap();
        assert!(catalog.tap_installed("acme/extras"));
        assert_eq!(catalog.require("jq").unwrap().version.to_string(), "1.7.1");
    }
}
