//! Human-readable status lines emitted by every pipeline stage.
//!
//! The library never prints. Stages hand status lines to a [`Reporter`]
//! supplied by the caller, and the same line is logged through `tracing`
//! so the structured log captures every transition.

use std::fmt;

use serde::Serialize;
use tracing::{debug, error, info, warn};

/// Kind of a status line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
  Progress,
  Success,
  Warning,
  Error,
  Info,
}

impl Status {
  pub fn as_str(&self) -> &'static str {
    match self {
      Status::Progress => "progress",
      Status::Success => "success",
      Status::Warning => "warning",
      Status::Error => "error",
      Status::Info => "info",
    }
  }
}

impl fmt::Display for Status {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}", self.as_str())
  }
}

/// Incremental download progress, only reported when the size is known.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DownloadProgress {
  pub name: String,
  pub downloaded: u64,
  pub total: u64,
  pub attempt: u32,
  pub max_attempts: u32,
}

impl DownloadProgress {
  pub fn percent(&self) -> f64 {
    if self.total == 0 {
      return 0.0;
    }
    (self.downloaded as f64 / self.total as f64) * 100.0
  }
}

/// Sink for status lines and download progress.
pub trait Reporter: Send + Sync {
  fn status(&self, status: Status, message: &str);

  fn download_progress(&self, _progress: &DownloadProgress) {}
}

/// Reporter that discards everything. Tracing still records the lines.
#[derive(Debug, Default, Clone, Copy)]
pub struct SilentReporter;

impl Reporter for SilentReporter {
  fn status(&self, _status: Status, _message: &str) {}
}

/// Log a status line and forward it to the reporter.
pub fn emit(reporter: &dyn Reporter, status: Status, message: &str) {
  match status {
    Status::Progress => debug!(status = %status, "{}", message),
    Status::Success | Status::Info => info!(status = %status, "{}", message),
    Status::Warning => warn!(status = %status, "{}", message),
    Status::Error => error!(status = %status, "{}", message),
  }
  reporter.status(status, message);
}
