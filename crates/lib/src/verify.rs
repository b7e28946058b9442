//! Checksum verification of build outputs against known-good digests.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

use crate::consts::EXPECTED_CHECKSUMS;
use crate::status::{Reporter, Status, emit};
use crate::util::hash::{digests_match, hash_file};

/// Raised when a verification run does not fully match.
#[derive(Debug, Error)]
#[error("integrity check failed for {}", .failed.join(", "))]
pub struct VerifyError {
  pub failed: Vec<String>,
}

/// Expected output file name to expected SHA-256 (hex).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChecksumRegistry(BTreeMap<String, String>);

impl Default for ChecksumRegistry {
  fn default() -> Self {
    Self(
      EXPECTED_CHECKSUMS
        .iter()
        .map(|(name, digest)| (name.to_string(), digest.to_string()))
        .collect(),
    )
  }
}

impl ChecksumRegistry {
  pub fn new(entries: BTreeMap<String, String>) -> Self {
    Self(entries)
  }

  pub fn names(&self) -> Vec<String> {
    self.0.keys().cloned().collect()
  }

  pub fn expected(&self, name: &str) -> Option<&str> {
    self.0.get(name).map(String::as_str)
  }

  pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
    self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
  }

  pub fn len(&self) -> usize {
    self.0.len()
  }

  pub fn is_empty(&self) -> bool {
    self.0.is_empty()
  }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum VerifyStatus {
  Match { digest: String },
  Mismatch { expected: String, actual: String },
  Missing,
  Unreadable { message: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileVerification {
  pub name: String,
  pub path: PathBuf,
  #[serde(flatten)]
  pub status: VerifyStatus,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct VerificationReport {
  pub files: Vec<FileVerification>,
}

impl VerificationReport {
  /// True only if every registry entry matched.
  pub fn is_success(&self) -> bool {
    self
      .files
      .iter()
      .all(|f| matches!(f.status, VerifyStatus::Match { .. }))
  }

  pub fn failures(&self) -> Vec<&FileVerification> {
    self
      .files
      .iter()
      .filter(|f| !matches!(f.status, VerifyStatus::Match { .. }))
      .collect()
  }

  pub fn into_result(self) -> Result<Self, VerifyError> {
    if self.is_success() {
      Ok(self)
    } else {
      Err(VerifyError {
        failed: self.failures().iter().map(|f| f.name.clone()).collect(),
      })
    }
  }
}

/// Check every registry entry under `dir`. Never stops at the first failure.
pub fn verify_all(registry: &ChecksumRegistry, dir: &Path, reporter: &dyn Reporter) -> VerificationReport {
  let mut report = VerificationReport::default();

  for (name, expected) in registry.iter() {
    let path = dir.join(name);

    let status = if !path.is_file() {
      emit(reporter, Status::Error, &format!("File {} not found!", name));
      VerifyStatus::Missing
    } else {
      match hash_file(&path) {
        Ok(actual) if digests_match(actual.as_str(), expected) => {
          emit(reporter, Status::Success, &format!("Verification of {}: checksum correct", name));
          VerifyStatus::Match { digest: actual.0 }
        }
        Ok(actual) => {
          emit(reporter, Status::Error, &format!("Verification of {}: checksum mismatch!", name));
          emit(reporter, Status::Info, &format!("  Expected: {}", expected));
          emit(reporter, Status::Info, &format!("  Actual:   {}", actual));
          VerifyStatus::Mismatch {
            expected: expected.to_string(),
            actual: actual.0,
          }
        }
        Err(e) => {
          warn!(path = ?path, error = %e, "failed to hash file");
          emit(reporter, Status::Error, &format!("Could not read {}: {}", name, e.source));
          VerifyStatus::Unreadable {
            message: e.source.to_string(),
          }
        }
      }
    };

    debug!(file = %name, status = ?status, "verified");
    report.files.push(FileVerification {
      name: name.to_string(),
      path,
      status,
    });
  }

  report
}
