//! Hashing utilities for download and artifact verification.
//!
//! This module provides:
//! - `ContentHash`: a full 64-character SHA-256 digest
//! - `hash_file()`: streamed single-file hashing
//! - `hash_bytes()`: arbitrary byte hashing
//! - `digests_match()`: case-insensitive digest comparison

use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::consts::HASH_CHUNK_SIZE;

/// A full 64-character SHA-256 hash of file contents.
///
/// # Format
///
/// The hash is a lowercase hexadecimal string (64 characters).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ContentHash(pub String);

impl ContentHash {
  pub fn as_str(&self) -> &str {
    &self.0
  }

  /// Compare against an expected hex digest, ignoring case.
  pub fn matches(&self, expected: &str) -> bool {
    digests_match(&self.0, expected)
  }
}

impl std::fmt::Display for ContentHash {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    write!(f, "{}", self.0)
  }
}

/// Error while reading a file for hashing.
#[derive(Debug, thiserror::Error)]
#[error("failed to read file {path}: {source}")]
pub struct HashError {
  pub path: PathBuf,
  #[source]
  pub source: std::io::Error,
}

/// Hash a file's contents.
///
/// Reads in fixed-size chunks, never buffering the whole file.
pub fn hash_file(path: &Path) -> Result<ContentHash, HashError> {
  let mut file = fs::File::open(path).map_err(|e| HashError {
    path: path.to_path_buf(),
    source: e,
  })?;

  let mut hasher = Sha256::new();
  let mut buffer = [0u8; HASH_CHUNK_SIZE];

  loop {
    let bytes_read = file.read(&mut buffer).map_err(|e| HashError {
      path: path.to_path_buf(),
      source: e,
    })?;
    if bytes_read == 0 {
      break;
    }
    hasher.update(&buffer[..bytes_read]);
  }

  Ok(ContentHash(hex::encode(hasher.finalize())))
}

/// Hash arbitrary bytes.
pub fn hash_bytes(data: &[u8]) -> ContentHash {
  let mut hasher = Sha256::new();
  hasher.update(data);
  ContentHash(hex::encode(hasher.finalize()))
}

/// Byte-for-byte digest comparison, case-insensitive over the hex alphabet.
pub fn digests_match(actual: &str, expected: &str) -> bool {
  actual.trim().eq_ignore_ascii_case(expected.trim())
}
