//! Plain file transfer over HTTP(S), with `file://` sources copied locally.

use super::{DownloadStrategy, FetchContext, StrategyKind, newest_mtime};
use crate::cache::CacheStore;
use crate::error::{HopperError, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};

pub struct CurlStrategy {
    name: String,
    url: String,
    sha256: Option<String>,
    location: PathBuf,
    ctx: FetchContext,
}

impl CurlStrategy {
    pub fn new(
        name: &str,
        url: &str,
        sha256: Option<String>,
        location: PathBuf,
        ctx: FetchContext,
    ) -> Self {
        Self {
            name: name.to_string(),
            url: url.to_string(),
            sha256,
            location,
            ctx,
        }
    }

    /// File the artifact is saved as inside the cache location
    pub fn artifact_path(&self) -> PathBuf {
        self.location.join(basename(&self.url, &self.name))
    }

    async fn is_reusable(&self, path: &Path) -> Result<bool> {
        if !path.is_file() {
            return Ok(false);
        }
        match &self.sha256 {
            Some(expected) => Ok(sha256_file(path).await? == expected.to_ascii_lowercase()),
            None => Ok(true),
        }
    }

    /// One transfer into the `.incomplete` path plus checksum; retried once
    /// on transient failure.
    async fn download(&self, destination: &Path) -> Result<()> {
        let incomplete = CacheStore::incomplete_path(destination);

        let progress = self.ctx.progress.as_ref();
        let client = &self.ctx.client;

        let mut result = transfer(client, &self.name, &self.url, &incomplete, progress).await;
        if let Err(e) = &result {
            if e.is_transient() {
                warn!("Retrying {} after transient error: {}", self.name, e);
                result = transfer(client, &self.name, &self.url, &incomplete, progress).await;
            }
        }
        if let Err(e) = result {
            let _ = fs::remove_file(&incomplete).await;
            return Err(e);
        }

        if let Some(expected) = &self.sha256 {
            let actual = sha256_file(&incomplete).await?;
            if actual != expected.to_ascii_lowercase() {
                fs::remove_file(&incomplete).await?;
                return Err(HopperError::ChecksumMismatch {
                    dependent: self.name.clone(),
                    expected: expected.clone(),
                    actual,
                });
            }
        }

        CacheStore::commit(&incomplete, destination)
    }
}

#[async_trait]
impl DownloadStrategy for CurlStrategy {
    fn kind(&self) -> StrategyKind {
        StrategyKind::Curl
    }

    fn cached_location(&self) -> PathBuf {
        self.location.clone()
    }

    async fn fetch(&self, force: bool) -> Result<PathBuf> {
        let _guard = self.ctx.cache.lock(&self.location).await;
        fs::create_dir_all(&self.location).await?;

        let artifact = self.artifact_path();
        if !force && self.is_reusable(&artifact).await? {
            debug!("Already downloaded: {}", artifact.display());
            return Ok(artifact);
        }

        self.download(&artifact).await?;
        Ok(artifact)
    }

    async fn source_modified_time(&self) -> Result<Option<DateTime<Utc>>> {
        let location = self.location.clone();
        let newest = tokio::task::spawn_blocking(move || newest_mtime(&location))
            .await
            .map_err(|e| std::io::Error::other(e.to_string()))?;
        Ok(newest)
    }
}

/// Copy or download `url` to `destination`.
///
/// `file://` URLs are copied. HTTP 5xx responses and connect/timeout errors
/// are reported as transient.
pub async fn transfer(
    client: &reqwest::Client,
    name: &str,
    url: &str,
    destination: &Path,
    progress: Option<&MultiProgress>,
) -> Result<()> {
    let transport_error = |e: reqwest::Error| HopperError::FetchFailed {
        dependent: name.to_string(),
        reason: e.to_string(),
        transient: e.is_timeout() || e.is_connect(),
    };

    if let Some(local) = url.strip_prefix("file://") {
        debug!("Copying {} from {}", name, local);
        fs::copy(local, destination)
            .await
            .map_err(|e| HopperError::FetchFailed {
                dependent: name.to_string(),
                reason: format!("{}: {}", local, e),
                transient: false,
            })?;
        return Ok(());
    }

    debug!("Downloading {} from {}", name, url);
    let mut response = client.get(url).send().await.map_err(transport_error)?;

    let status = response.status();
    if !status.is_success() {
        return Err(HopperError::FetchFailed {
            dependent: name.to_string(),
            reason: format!("HTTP {} for {}", status, url),
            transient: status.is_server_error(),
        });
    }

    let pb = progress.map(|mp| progress_bar(mp, name, response.content_length()));

    let mut file = fs::File::create(destination).await?;
    let mut downloaded: u64 = 0;

    while let Some(chunk) = response.chunk().await.map_err(transport_error)? {
        file.write_all(&chunk).await?;
        downloaded += chunk.len() as u64;
        if let Some(pb) = &pb {
            pb.set_position(downloaded);
        }
    }

    file.flush().await?;

    if let Some(pb) = &pb {
        pb.finish_with_message(format!("✓ {}", name));
    }
    Ok(())
}

fn progress_bar(mp: &MultiProgress, name: &str, total: Option<u64>) -> ProgressBar {
    let pb = mp.add(ProgressBar::new(total.unwrap_or(0)));
    if let Ok(style) = ProgressStyle::default_bar()
        .template("{msg} [{bar:40.cyan/blue}] {bytes}/{total_bytes} ({bytes_per_sec}, {eta})")
    {
        pb.set_style(style.progress_chars("#>-"));
    }
    pb.set_message(format!("⬇ {}", name));
    pb
}

/// Last path segment of a URL without query or fragment.
pub fn basename(url: &str, fallback: &str) -> String {
    let path = url.split(['?', '#']).next().unwrap_or(url);
    let path = path.split_once("://").map(|(_, rest)| rest).unwrap_or(path);
    match path.trim_end_matches('/').rsplit_once('/') {
        Some((_, name)) if !name.is_empty() => name.to_string(),
        _ => fallback.to_string(),
    }
}

/// Lowercase hex SHA-256 of a file
pub async fn sha256_file(path: &Path) -> Result<String> {
    use sha2::{Digest, Sha256};
    use tokio::io::AsyncReadExt;

    let mut file = fs::File::open(path).await?;
    let mut hasher = Sha256::new();
    let mut buffer = vec![0; 8192];

    loop {
        let n = file.read(&mut buffer).await?;
        if n == 0 {
            break;
        }
        hasher.update(&buffer[..n]);
    }

    Ok(format!("{:x}", hasher.finalize()))
}
