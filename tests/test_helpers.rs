// Test helpers for isolated testing
// Provides throwaway prefixes and a fake command runner so nothing on the
// host system is touched

#![allow(dead_code)]

use async_trait::async_trait;
use flate2::Compression;
use flate2::write::GzEncoder;
use hopper::command::{CommandOutput, CommandRunner, Invocation};
use hopper::{Catalog, Config};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

/// Isolated test environment using temporary directories
/// Automatically cleaned up when dropped (RAII pattern)
///
/// # Example
/// ```ignore
/// let env = TestEnvironment::new();
/// let config = env.config();
/// // Use env.prefix, env.cellar, etc.
/// ```
pub struct TestEnvironment {
    pub temp_dir: TempDir,
    pub prefix: PathBuf,
    pub cellar: PathBuf,
    pub cache: PathBuf,
    pub bin: PathBuf,
    /// Scratch space for source artifacts served over file://
    pub sources: PathBuf,
}

impl TestEnvironment {
    /// Create a new isolated test environment
    ///
    /// - temp/
    ///   - Cellar/     (staged installs)
    ///   - bin/        (links to executables)
    ///   - cache/      (downloads)
    ///   - sources/    (fixtures)
    pub fn new() -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let prefix = temp_dir.path().to_path_buf();
        let cellar = prefix.join("Cellar");
        let cache = prefix.join("cache");
        let bin = prefix.join("bin");
        let sources = prefix.join("sources");

        std::fs::create_dir_all(&cellar).unwrap();
        std::fs::create_dir_all(&cache).unwrap();
        std::fs::create_dir_all(&bin).unwrap();
        std::fs::create_dir_all(&sources).unwrap();

        Self {
            temp_dir,
            prefix,
            cellar,
            cache,
            bin,
            sources,
        }
    }

    /// Configuration rooted in this environment, quarantine off
    pub fn config(&self) -> Config {
        let mut config = Config::with_prefix(&self.prefix);
        config.quarantine = false;
        config.jobs = 2;
        config
    }

    /// Write a gzipped tarball holding `<top>/bin/<exe>` for each executable
    pub fn tarball(&self, file_name: &str, top: &str, executables: &[&str]) -> PathBuf {
        let path = self.sources.join(file_name);
        let file = std::fs::File::create(&path).unwrap();
        let mut builder = tar::Builder::new(GzEncoder::new(file, Compression::default()));

        for exe in executables {
            let data = format!("#!/bin/sh\necho {}\n", exe);
            let mut header = tar::Header::new_gnu();
            header.set_size(data.len() as u64);
            header.set_mode(0o755);
            header.set_cksum();
            builder
                .append_data(&mut header, format!("{}/bin/{}", top, exe), data.as_bytes())
                .unwrap();
        }
        builder.into_inner().unwrap().finish().unwrap();
        path
    }

    pub fn file_url(path: &Path) -> String {
        format!("file://{}", path.display())
    }
}

impl Default for TestEnvironment {
    fn default() -> Self {
        Self::new()
    }
}

pub fn catalog<I: IntoIterator<Item = hopper::Dependent>>(dependents: I) -> Catalog {
    Catalog::new(dependents)
}

type Handler = Box<dyn Fn(&Invocation) -> CommandOutput + Send + Sync>;

/// Fake command runner
///
/// Records every invocation. Responses come from the first rule whose
/// program and leading arguments match; anything else succeeds silently.
/// `which` only finds programs registered with [`ScriptedRunner::with_program`].
#[derive(Default)]
pub struct ScriptedRunner {
    calls: Mutex<Vec<Invocation>>,
    rules: Vec<(String, Vec<String>, Handler)>,
    programs: HashSet<String>,
}

impl ScriptedRunner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_program(mut self, program: &str) -> Self {
        self.programs.insert(program.to_string());
        self
    }

    /// Answer `program <prefix...>` with `handler`
    pub fn on<F>(mut self, program: &str, prefix: &[&str], handler: F) -> Self
    where
        F: Fn(&Invocation) -> CommandOutput + Send + Sync + 'static,
    {
        self.rules.push((
            program.to_string(),
            prefix.iter().map(|s| s.to_string()).collect(),
            Box::new(handler),
        ));
        self
    }

    /// Answer `program <prefix...>` with a fixed exit status and stdout
    pub fn respond(self, program: &str, prefix: &[&str], status: i32, stdout: &str) -> Self {
        let stdout = stdout.to_string();
        self.on(program, prefix, move |_| CommandOutput {
            status,
            stdout: stdout.clone(),
            stderr: if status == 0 { String::new() } else { "failed".to_string() },
        })
    }

    pub fn calls(&self) -> Vec<Invocation> {
        self.calls.lock().unwrap().clone()
    }

    pub fn calls_to(&self, program: &str) -> Vec<Invocation> {
        self.calls()
            .into_iter()
            .filter(|c| c.program == program)
            .collect()
    }

    pub fn into_arc(self) -> Arc<Self> {
        Arc::new(self)
    }
}

#[async_trait]
impl CommandRunner for ScriptedRunner {
    async fn run(&self, invocation: &Invocation) -> hopper::Result<CommandOutput> {
        self.calls.lock().unwrap().push(invocation.clone());

        let output = self
            .rules
            .iter()
            .find(|(program, prefix, _)| {
                *program == invocation.program && invocation.args.starts_with(prefix)
            })
            .map(|(_, _, handler)| handler(invocation))
            .unwrap_or_default();
        Ok(output)
    }

    async fn which(&self, program: &str) -> Option<PathBuf> {
        self.programs
            .contains(program)
            .then(|| PathBuf::from("/usr/bin").join(program))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_environment_creates_directories() {
        let env = TestEnvironment::new();

        assert!(env.cellar.exists());
        assert!(env.cache.exists());
        assert!(env.bin.exists());
        assert!(env.sources.exists());
    }

    #[test]
    fn test_environment_cleanup() {
        let cellar_path = {
            let env = TestEnvironment::new();
            env.cellar.clone()
        };

        // After env is dropped, temp directory should be cleaned up
        assert!(!cellar_path.exists());
    }

    #[test]
    fn test_config_points_into_environment() {
        let env = TestEnvironment::new();
        let config = env.config();
        assert_eq!(config.install_root, env.cellar);
        assert_eq!(config.bin_dir, env.bin);
        assert!(!config.quarantine);
    }

    #[tokio::test]
    async fn test_scripted_runner_records_and_matches() {
        let runner = ScriptedRunner::new()
            .with_program("git")
            .respond("git", &["rev-parse"], 0, "abc123\n");

        let out = runner
            .run(&Invocation::new("git").args(["rev-parse", "HEAD"]))
            .await
            .unwrap();
        assert_eq!(out.stdout, "abc123\n");

        let other = runner.run(&Invocation::new("svn")).await.unwrap();
        assert!(other.success());

        assert_eq!(runner.calls().len(), 2);
        assert!(runner.which("git").await.is_some());
        assert!(runner.which("gpg").await.is_none());
    }
}
