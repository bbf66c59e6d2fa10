//! GPG signature verification for downloaded artifacts.
//!
//! Signatures are cached as `signature.asc` in the dependent's `gpg`
//! metadata subdirectory. For a concrete version the most recent `gpg`
//! directory is reused, so the signature is only downloaded on first use or
//! when a refresh is forced. Floating (`latest`) versions always get a fresh
//! timestamped directory.

use crate::cache::CacheStore;
use crate::command::{CommandOutput, CommandRunner, Invocation};
use crate::dependent::{Dependent, GpgSpec};
use crate::download::curl;
use crate::error::{HopperError, Result};
use crate::metadata::{MetadataStore, Timestamp};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::OnceCell;
use tracing::{debug, info};

pub const SIGNATURE_FILE: &str = "signature.asc";

/// Progress of one verification attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GpgState {
    /// Nothing has happened yet
    Pending,
    /// No signing metadata, or no `gpg` binary
    NotApplicable,
    SignatureRetrieved,
    KeyImported,
    Verified,
    Failed,
}

/// `gpg` arguments that import the declared signing key
pub fn key_import_args(name: &str, spec: &GpgSpec) -> Result<Vec<String>> {
    match (&spec.key_id, &spec.key_url) {
        (Some(id), None) => Ok(vec!["--recv-keys".to_string(), id.clone()]),
        (None, Some(url)) => Ok(vec!["--fetch-key".to_string(), url.clone()]),
        (Some(_), Some(_)) => Err(HopperError::InvalidArgument(format!(
            "{} declares both key_id and key_url",
            name
        ))),
        (None, None) => Err(HopperError::InvalidArgument(format!(
            "{} declares neither key_id nor key_url",
            name
        ))),
    }
}

pub struct GpgVerifier {
    dependent: Dependent,
    downloaded_path: PathBuf,
    metadata: MetadataStore,
    runner: Arc<dyn CommandRunner>,
    client: reqwest::Client,
    force: bool,
    signature: Option<PathBuf>,
    state: GpgState,
    available: OnceCell<bool>,
}

impl GpgVerifier {
    pub fn new(
        dependent: &Dependent,
        downloaded_path: impl Into<PathBuf>,
        metadata: MetadataStore,
        runner: Arc<dyn CommandRunner>,
        force: bool,
    ) -> Self {
        Self {
            dependent: dependent.clone(),
            downloaded_path: downloaded_path.into(),
            metadata,
            runner,
            client: reqwest::Client::new(),
            force,
            signature: None,
            state: GpgState::Pending,
            available: OnceCell::new(),
        }
    }

    pub fn with_client(mut self, client: reqwest::Client) -> Self {
        self.client = client;
        self
    }

    pub fn state(&self) -> GpgState {
        self.state
    }

    pub fn signature(&self) -> Option<&Path> {
        self.signature.as_deref()
    }

    fn spec(&self) -> Result<&GpgSpec> {
        self.dependent.gpg.as_ref().ok_or_else(|| {
            HopperError::InvalidArgument(format!("{} has no gpg stanza", self.dependent.name))
        })
    }

    /// Signing metadata declared and `gpg` on `PATH`; probed once.
    pub async fn available(&self) -> bool {
        *self
            .available
            .get_or_init(|| async {
                self.dependent.gpg.is_some() && self.runner.which("gpg").await.is_some()
            })
            .await
    }

    /// Locate, and download if needed, the detached signature.
    pub async fn retrieve_signature(&mut self, force: bool) -> Result<PathBuf> {
        let spec = self.spec()?.clone();
        let name = self.dependent.name.clone();
        let version = self.dependent.version.clone();

        let cached = if version.is_concrete() {
            self.metadata
                .subdir(&name, &version, "gpg", Timestamp::Latest, false)?
                .filter(|dir| dir.is_dir())
        } else {
            None
        };

        let dir = match &cached {
            Some(dir) => dir.clone(),
            None => self
                .metadata
                .subdir(&name, &version, "gpg", Timestamp::Now, true)?
                .ok_or_else(|| std::io::Error::other("metadata directory not created"))?,
        };
        let sig_path = dir.join(SIGNATURE_FILE);

        if cached.is_none() || !sig_path.exists() || force {
            info!("Fetching GPG signature for {}", name);
            let incomplete = CacheStore::incomplete_path(&sig_path);
            if let Err(e) = curl::transfer(&self.client, &name, &spec.signature, &incomplete, None).await
            {
                let _ = std::fs::remove_file(&incomplete);
                return Err(e);
            }
            CacheStore::commit(&incomplete, &sig_path)?;
        } else {
            debug!("Using cached signature {}", sig_path.display());
        }

        self.signature = Some(sig_path.clone());
        self.state = GpgState::SignatureRetrieved;
        Ok(sig_path)
    }

    async fn run_gpg(&self, args: Vec<String>) -> Result<CommandOutput> {
        self.runner.run(&Invocation::new("gpg").args(args)).await
    }

    /// Import the signing key from a keyserver (`key_id`) or URL (`key_url`).
    pub async fn import_key(&mut self) -> Result<()> {
        let spec = self.spec()?.clone();
        let args = key_import_args(&self.dependent.name, &spec)?;
        let key = spec.key_id.or(spec.key_url).unwrap_or_default();

        let output = match self.run_gpg(args).await {
            Ok(output) if output.success() => output,
            Ok(output) => {
                self.state = GpgState::Failed;
                return Err(HopperError::KeyImportFailed {
                    dependent: self.dependent.name.clone(),
                    key,
                    output: output.combined(),
                });
            }
            Err(HopperError::CommandTimeout { command, seconds }) => {
                self.state = GpgState::Failed;
                return Err(HopperError::KeyImportFailed {
                    dependent: self.dependent.name.clone(),
                    key,
                    output: format!("{} timed out after {}s", command, seconds),
                });
            }
            Err(e) => {
                self.state = GpgState::Failed;
                return Err(e);
            }
        };

        debug!("Imported key for {}: {}", self.dependent.name, output.combined());
        self.state = GpgState::KeyImported;
        Ok(())
    }

    /// Check the artifact against its signature.
    ///
    /// Returns `NotApplicable` without running anything when the dependent
    /// has no signing metadata or `gpg` is not installed.
    pub async fn verify(&mut self) -> Result<GpgState> {
        if !self.available().await {
            self.state = GpgState::NotApplicable;
            return Ok(self.state);
        }

        let signature = match &self.signature {
            Some(sig) => sig.clone(),
            None => self.retrieve_signature(self.force).await?,
        };

        self.import_key().await?;

        info!("Verifying GPG signature for {}", self.dependent.name);
        let args = vec![
            "--verify".to_string(),
            signature.to_string_lossy().into_owned(),
            self.downloaded_path.to_string_lossy().into_owned(),
        ];

        let failure = |output: String| HopperError::SignatureVerificationFailed {
            dependent: self.dependent.name.clone(),
            artifact: self.downloaded_path.clone(),
            signature: signature.clone(),
            output,
        };

        let result = match self.run_gpg(args).await {
            Ok(output) if output.success() => Ok(()),
            Ok(output) => Err(failure(output.combined())),
            Err(HopperError::CommandTimeout { command, seconds }) => Err(failure(format!(
                "{} timed out after {}s",
                command, seconds
            ))),
            Err(e) => Err(e),
        };

        match result {
            Ok(()) => {
                self.state = GpgState::Verified;
                Ok(self.state)
            }
            Err(e) => {
                self.state = GpgState::Failed;
                Err(e)
            }
        }
    }
}
