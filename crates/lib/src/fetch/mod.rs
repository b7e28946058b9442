//! Resource acquisition with bounded retry.
//!
//! Downloads stream into a `.part` file next to the destination and are
//! renamed into place only once complete, so a file at the destination path
//! is always a finished download. A present destination is treated as a
//! cache hit; when the descriptor carries a SHA-256 the cached file is
//! verified first.

pub mod transport;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

use crate::consts::{DEFAULT_BACKOFF_MS, DEFAULT_MAX_ATTEMPTS};
use crate::status::{DownloadProgress, Reporter, Status, emit};
use crate::util::hash::{digests_match, hash_file};

pub use transport::{Body, ReqwestTransport, Transport};

#[derive(Debug, Error)]
pub enum FetchError {
  /// The request could not be sent or the body could not be read.
  #[error("request to {url} failed: {message}")]
  Request { url: String, message: String },

  /// The server answered with a non-success status.
  #[error("HTTP {status} from {url}")]
  Status { url: String, status: u16 },

  /// Downloaded content does not match the configured digest.
  #[error("hash mismatch for {name}: expected {expected}, got {actual}")]
  HashMismatch {
    name: String,
    expected: String,
    actual: String,
  },

  #[error("io error on {path}: {source}")]
  Io {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },

  /// The destination's parent directory does not exist.
  #[error("destination directory does not exist: {0}")]
  MissingParent(PathBuf),

  /// Every attempt failed.
  #[error("download of {name} failed after {attempts} attempt(s): {last}")]
  Exhausted {
    name: String,
    attempts: u32,
    #[source]
    last: Box<FetchError>,
  },
}

impl FetchError {
  fn io(path: &Path, source: std::io::Error) -> Self {
    FetchError::Io {
      path: path.to_path_buf(),
      source,
    }
  }
}

/// A named remote resource and where it lands locally.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResourceDescriptor {
  pub name: String,
  pub url: String,
  pub destination: PathBuf,
  /// Expected digest of the download, when known.
  pub sha256: Option<String>,
}

impl ResourceDescriptor {
  /// Describe a resource stored in `dir` under a name derived from its URL.
  pub fn new(name: impl Into<String>, url: impl Into<String>, dir: &Path, sha256: Option<String>) -> Self {
    let url = url.into();
    Self {
      name: name.into(),
      destination: dir.join(url_to_filename(&url)),
      url,
      sha256,
    }
  }
}

/// Retry settings as they appear in configuration files.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrySettings {
  pub max_attempts: u32,
  pub backoff_ms: u64,
  pub timeout_secs: u64,
}

impl Default for RetrySettings {
  fn default() -> Self {
    Self {
      max_attempts: DEFAULT_MAX_ATTEMPTS,
      backoff_ms: DEFAULT_BACKOFF_MS,
      timeout_secs: crate::consts::DEFAULT_REQUEST_TIMEOUT_SECS,
    }
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
  pub max_attempts: u32,
  pub backoff: Duration,
}

impl Default for RetryPolicy {
  fn default() -> Self {
    Self::from(&RetrySettings::default())
  }
}

impl From<&RetrySettings> for RetryPolicy {
  fn from(settings: &RetrySettings) -> Self {
    Self {
      max_attempts: settings.max_attempts.max(1),
      backoff: Duration::from_millis(settings.backoff_ms),
    }
  }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchOutcome {
  /// The destination already existed; no network access happened.
  Cached { path: PathBuf },
  Downloaded { path: PathBuf, bytes: u64, attempts: u32 },
}

impl FetchOutcome {
  pub fn path(&self) -> &Path {
    match self {
      FetchOutcome::Cached { path } | FetchOutcome::Downloaded { path, .. } => path,
    }
  }

  pub fn is_cached(&self) -> bool {
    matches!(self, FetchOutcome::Cached { .. })
  }
}

pub struct Fetcher {
  transport: Arc<dyn Transport>,
  policy: RetryPolicy,
}

impl Fetcher {
  pub fn new(transport: Arc<dyn Transport>, policy: RetryPolicy) -> Self {
    Self { transport, policy }
  }

  /// Fetch one resource, retrying transient failures.
  ///
  /// Returns `FetchError::Exhausted` once `max_attempts` attempts failed.
  /// Neither the destination nor its `.part` file survives a failed attempt.
  pub async fn fetch(
    &self,
    descriptor: &ResourceDescriptor,
    reporter: &dyn Reporter,
  ) -> Result<FetchOutcome, FetchError> {
    let dest = &descriptor.destination;
    let file_name = display_name(dest);

    match dest.parent() {
      Some(parent) if !parent.as_os_str().is_empty() && !parent.is_dir() => {
        return Err(FetchError::MissingParent(parent.to_path_buf()));
      }
      _ => {}
    }

    if self.cached(descriptor).await? {
      info!(name = %descriptor.name, path = ?dest, "using cached file");
      emit(reporter, Status::Info, &format!("File already present: {}", dest.display()));
      return Ok(FetchOutcome::Cached { path: dest.clone() });
    }

    let max = self.policy.max_attempts;
    let mut last_error = None;

    for attempt in 1..=max {
      emit(
        reporter,
        Status::Progress,
        &format!("Downloading {}... ({}/{})", file_name, attempt, max),
      );

      match self.download_once(descriptor, attempt, reporter).await {
        Ok(bytes) => {
          info!(name = %descriptor.name, path = ?dest, bytes, attempt, "download complete");
          emit(reporter, Status::Success, &format!("Download of {} complete", file_name));
          return Ok(FetchOutcome::Downloaded {
            path: dest.clone(),
            bytes,
            attempts: attempt,
          });
        }
        Err(e) => {
          warn!(url = %descriptor.url, attempt, error = %e, "download attempt failed");
          last_error = Some(e);
          if attempt < max && !self.policy.backoff.is_zero() {
            tokio::time::sleep(self.policy.backoff).await;
          }
        }
      }
    }

    emit(
      reporter,
      Status::Error,
      &format!("Download of {} failed after {} attempt(s)", file_name, max),
    );

    Err(FetchError::Exhausted {
      name: descriptor.name.clone(),
      attempts: max,
      last: Box::new(last_error.unwrap_or_else(|| FetchError::Request {
        url: descriptor.url.clone(),
        message: "no attempt was made".to_string(),
      })),
    })
  }

  /// Whether the destination can be reused without touching the network.
  async fn cached(&self, descriptor: &ResourceDescriptor) -> Result<bool, FetchError> {
    let dest = &descriptor.destination;
    if !dest.exists() {
      return Ok(false);
    }

    let Some(expected) = &descriptor.sha256 else {
      return Ok(true);
    };

    debug!(path = ?dest, "checking cached file");
    let path = dest.clone();
    let actual = tokio::task::spawn_blocking(move || hash_file(&path))
      .await
      .map_err(|e| FetchError::io(dest, std::io::Error::other(e)))?;

    match actual {
      Ok(actual) if actual.matches(expected) => Ok(true),
      Ok(actual) => {
        warn!(
          path = ?dest,
          expected = %expected,
          actual = %actual,
          "cached file hash mismatch, re-downloading"
        );
        fs::remove_file(dest).await.map_err(|e| FetchError::io(dest, e))?;
        Ok(false)
      }
      Err(e) => {
        warn!(path = ?dest, error = %e, "cached file unreadable, re-downloading");
        fs::remove_file(dest).await.map_err(|e| FetchError::io(dest, e))?;
        Ok(false)
      }
    }
  }

  async fn download_once(
    &self,
    descriptor: &ResourceDescriptor,
    attempt: u32,
    reporter: &dyn Reporter,
  ) -> Result<u64, FetchError> {
    let part = part_path(&descriptor.destination);
    let result = self.stream_to(descriptor, &part, attempt, reporter).await;

    match result {
      Ok(bytes) => {
        fs::rename(&part, &descriptor.destination)
          .await
          .map_err(|e| FetchError::io(&descriptor.destination, e))?;
        Ok(bytes)
      }
      Err(e) => {
        if let Err(remove_err) = fs::remove_file(&part).await
          && remove_err.kind() != std::io::ErrorKind::NotFound
        {
          warn!(path = ?part, error = %remove_err, "failed to remove partial download");
        }
        Err(e)
      }
    }
  }

  async fn stream_to(
    &self,
    descriptor: &ResourceDescriptor,
    part: &Path,
    attempt: u32,
    reporter: &dyn Reporter,
  ) -> Result<u64, FetchError> {
    let mut body = self.transport.get(&descriptor.url).await?;
    let total = body.content_length().filter(|len| *len > 0);

    let mut file = fs::File::create(part).await.map_err(|e| FetchError::io(part, e))?;
    let mut hasher = Sha256::new();
    let mut downloaded = 0u64;

    while let Some(chunk) = body.chunk().await? {
      file.write_all(&chunk).await.map_err(|e| FetchError::io(part, e))?;
      hasher.update(&chunk);
      downloaded += chunk.len() as u64;

      if let Some(total) = total {
        reporter.download_progress(&DownloadProgress {
          name: descriptor.name.clone(),
          downloaded,
          total,
          attempt,
          max_attempts: self.policy.max_attempts,
        });
      }
    }

    file.flush().await.map_err(|e| FetchError::io(part, e))?;
    file.sync_all().await.map_err(|e| FetchError::io(part, e))?;
    drop(file);

    if let Some(expected) = &descriptor.sha256 {
      let actual = hex::encode(hasher.finalize());
      if !digests_match(&actual, expected) {
        return Err(FetchError::HashMismatch {
          name: descriptor.name.clone(),
          expected: expected.clone(),
          actual,
        });
      }
    }

    Ok(downloaded)
  }
}

/// Path of the in-progress download for `dest`.
pub fn part_path(dest: &Path) -> PathBuf {
  let mut name = dest.file_name().map(|n| n.to_os_string()).unwrap_or_default();
  name.push(".part");
  dest.with_file_name(name)
}

fn display_name(path: &Path) -> String {
  path
    .file_name()
    .map(|n| n.to_string_lossy().to_string())
    .unwrap_or_else(|| path.display().to_string())
}

/// Convert a URL to a safe filename.
///
/// Takes the last path component and sanitizes it. Falls back to hash of URL
/// if no suitable filename can be extracted.
pub fn url_to_filename(url: &str) -> String {
  if let Some(filename) = url.rsplit('/').next() {
    let filename = filename.split('?').next().unwrap_or(filename);

    // Sanitize: only allow alphanumeric, dash, underscore, dot
    let sanitized: String = filename
      .chars()
      .map(|c| {
        if c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.' {
          c
        } else {
          '_'
        }
      })
      .collect();

    if !sanitized.is_empty() && sanitized != "." && sanitized != ".." {
      return sanitized;
    }
  }

  let mut hasher = Sha256::new();
  hasher.update(url.as_bytes());
  format!("download_{}", &hex::encode(hasher.finalize())[..16])
}
