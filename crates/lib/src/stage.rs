//! Archive extraction through an external 7-Zip compatible tool.
//!
//! Extraction failures are never retried: a corrupt archive, a missing tool
//! or a full disk will not fix itself between attempts.

use std::path::{Path, PathBuf};

use serde::Serialize;
use thiserror::Error;
use tokio::process::Command;
use tracing::{debug, info};
use walkdir::WalkDir;

use crate::consts::SEVEN_ZIP_ENV;
use crate::status::{Reporter, Status, emit};

#[derive(Debug, Error)]
pub enum StageError {
  #[error("extraction tool not found (searched: {})", display_paths(.searched))]
  ToolNotFound { searched: Vec<PathBuf> },

  #[error("failed to start {tool}: {source}")]
  Spawn {
    tool: PathBuf,
    #[source]
    source: std::io::Error,
  },

  #[error("extraction of {archive} failed with exit code {code:?}: {stderr}")]
  ExtractFailed {
    archive: PathBuf,
    code: Option<i32>,
    stdout: String,
    stderr: String,
  },

  #[error("expected directory missing after extraction: {0}")]
  MissingDirectory(PathBuf),

  #[error("failed to copy {from} to {to}: {source}")]
  Copy {
    from: PathBuf,
    to: PathBuf,
    #[source]
    source: std::io::Error,
  },
}

fn display_paths(paths: &[PathBuf]) -> String {
  if paths.is_empty() {
    return "PATH".to_string();
  }
  paths.iter().map(|p| p.display().to_string()).collect::<Vec<_>>().join(", ")
}

/// What to do with one archive.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StagingAction {
  /// Extract into `scratch`, then replace `destination` with a copy of
  /// `scratch/top_level`.
  Promote {
    scratch: PathBuf,
    top_level: String,
    destination: PathBuf,
  },
  /// Extract directly into `into` and require `expect` afterwards.
  InPlace { into: PathBuf, expect: PathBuf },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StagingStep {
  pub resource: String,
  pub archive: PathBuf,
  pub action: StagingAction,
}

impl StagingStep {
  /// Directory that holds the staged content once the step succeeded.
  pub fn staged_dir(&self) -> &Path {
    match &self.action {
      StagingAction::Promote { destination, .. } => destination,
      StagingAction::InPlace { expect, .. } => expect,
    }
  }
}

#[derive(Debug, Clone)]
pub struct Extractor {
  tool: PathBuf,
}

impl Extractor {
  pub fn new(tool: impl Into<PathBuf>) -> Self {
    Self { tool: tool.into() }
  }

  pub fn tool(&self) -> &Path {
    &self.tool
  }

  /// Extract `archive` into `target`, overwriting existing files.
  ///
  /// Succeeds only on a zero exit status with `target` present afterwards.
  pub async fn extract(&self, archive: &Path, target: &Path) -> Result<(), StageError> {
    let mut output_flag = std::ffi::OsString::from("-o");
    output_flag.push(target.as_os_str());

    debug!(tool = ?self.tool, archive = ?archive, target = ?target, "spawning extractor");

    let output = Command::new(&self.tool)
      .arg("x")
      .arg(archive)
      .arg(output_flag)
      .arg("-y")
      .kill_on_drop(true)
      .output()
      .await
      .map_err(|e| StageError::Spawn {
        tool: self.tool.clone(),
        source: e,
      })?;

    if !output.status.success() {
      let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
      let stdout = String::from_utf8_lossy(&output.stdout).trim().to_string();
      if !stdout.is_empty() {
        debug!(stdout = %stdout, "extractor stdout");
      }
      return Err(StageError::ExtractFailed {
        archive: archive.to_path_buf(),
        code: output.status.code(),
        stdout,
        stderr,
      });
    }

    if !target.is_dir() {
      return Err(StageError::MissingDirectory(target.to_path_buf()));
    }

    Ok(())
  }

  /// Run one staging step and return the staged directory.
  pub async fn stage(&self, step: &StagingStep, reporter: &dyn Reporter) -> Result<PathBuf, StageError> {
    let archive_name = step
      .archive
      .file_name()
      .map(|n| n.to_string_lossy().to_string())
      .unwrap_or_else(|| step.resource.clone());

    emit(reporter, Status::Progress, &format!("Extracting {}...", archive_name));

    let staged = match &step.action {
      StagingAction::Promote {
        scratch,
        top_level,
        destination,
      } => {
        create_dir(scratch)?;
        self.extract(&step.archive, scratch).await?;

        let extracted = scratch.join(top_level);
        if !extracted.is_dir() {
          return Err(StageError::MissingDirectory(extracted));
        }

        replace_dir(&extracted, destination).await?;
        destination.clone()
      }
      StagingAction::InPlace { into, expect } => {
        create_dir(into)?;
        self.extract(&step.archive, into).await?;

        if !expect.is_dir() {
          return Err(StageError::MissingDirectory(expect.clone()));
        }
        expect.clone()
      }
    };

    info!(resource = %step.resource, staged = ?staged, "archive staged");
    emit(reporter, Status::Success, &format!("Extraction of {} complete", archive_name));
    Ok(staged)
  }
}

fn create_dir(dir: &Path) -> Result<(), StageError> {
  std::fs::create_dir_all(dir).map_err(|e| StageError::Copy {
    from: dir.to_path_buf(),
    to: dir.to_path_buf(),
    source: e,
  })
}

/// Replace `dst` with a recursive copy of `src`.
async fn replace_dir(src: &Path, dst: &Path) -> Result<(), StageError> {
  let src = src.to_path_buf();
  let dst = dst.to_path_buf();

  tokio::task::spawn_blocking(move || {
    if dst.exists() {
      std::fs::remove_dir_all(&dst).map_err(|e| StageError::Copy {
        from: src.clone(),
        to: dst.clone(),
        source: e,
      })?;
    }
    copy_dir_all(&src, &dst)
  })
  .await
  .map_err(|e| StageError::Copy {
    from: PathBuf::new(),
    to: PathBuf::new(),
    source: std::io::Error::other(e),
  })?
}

/// Copy a directory recursively.
fn copy_dir_all(src: &Path, dst: &Path) -> Result<(), StageError> {
  let copy_err = |from: &Path, to: &Path, source: std::io::Error| StageError::Copy {
    from: from.to_path_buf(),
    to: to.to_path_buf(),
    source,
  };

  for entry in WalkDir::new(src) {
    let entry = entry.map_err(|e| copy_err(src, dst, std::io::Error::other(e)))?;
    let rel = entry.path().strip_prefix(src).unwrap_or(entry.path());
    let target = dst.join(rel);

    if entry.file_type().is_dir() {
      std::fs::create_dir_all(&target).map_err(|e| copy_err(entry.path(), &target, e))?;
    } else {
      if let Some(parent) = target.parent() {
        std::fs::create_dir_all(parent).map_err(|e| copy_err(entry.path(), parent, e))?;
      }
      std::fs::copy(entry.path(), &target).map_err(|e| copy_err(entry.path(), &target, e))?;
    }
  }

  Ok(())
}

/// Find the extraction tool.
///
/// Search order: explicit path, `OHOOK_SEVEN_ZIP`, the 7-Zip registry key
/// (64-bit view, then 32-bit) on Windows, `7z`/`7za` on `PATH`, then the
/// standard install locations on Windows.
pub fn locate_extractor(explicit: Option<&Path>) -> Result<PathBuf, StageError> {
  if let Some(path) = explicit {
    return if path.is_file() {
      Ok(path.to_path_buf())
    } else {
      Err(StageError::ToolNotFound {
        searched: vec![path.to_path_buf()],
      })
    };
  }

  let mut searched = Vec::new();

  if let Some(path) = std::env::var_os(SEVEN_ZIP_ENV).filter(|v| !v.is_empty()) {
    let path = PathBuf::from(path);
    if path.is_file() {
      return Ok(path);
    }
    searched.push(path);
  }

  if let Some(path) = first_file(registry_locations(), &mut searched) {
    return Ok(path);
  }

  for name in ["7z", "7za"] {
    if let Ok(path) = which::which(name) {
      return Ok(path);
    }
  }

  if let Some(path) = first_file(install_locations(), &mut searched) {
    return Ok(path);
  }

  Err(StageError::ToolNotFound { searched })
}

/// First candidate that is an existing file. Misses are added to `searched`.
fn first_file(candidates: Vec<PathBuf>, searched: &mut Vec<PathBuf>) -> Option<PathBuf> {
  for candidate in candidates {
    if candidate.is_file() {
      return Some(candidate);
    }
    searched.push(candidate);
  }
  None
}

/// `7z.exe` under every `HKLM\SOFTWARE\7-Zip` `Path` value, 64-bit view first.
#[cfg(windows)]
fn registry_locations() -> Vec<PathBuf> {
  use std::ffi::c_void;

  use windows_sys::Win32::Foundation::ERROR_SUCCESS;
  use windows_sys::Win32::System::Registry::{
    HKEY_LOCAL_MACHINE, RRF_RT_REG_SZ, RRF_SUBKEY_WOW6432KEY, RRF_SUBKEY_WOW6464KEY, RegGetValueW,
  };

  let subkey: Vec<u16> = "SOFTWARE\\7-Zip".encode_utf16().chain(Some(0)).collect();
  let value: Vec<u16> = "Path".encode_utf16().chain(Some(0)).collect();
  let mut found = Vec::new();

  for view in [RRF_SUBKEY_WOW6464KEY, RRF_SUBKEY_WOW6432KEY] {
    let mut buf = vec![0u16; 1024];
    let mut size = (buf.len() * std::mem::size_of::<u16>()) as u32;

    // SAFETY: both names are NUL-terminated, `buf` is writable for `size`
    // bytes and RegGetValueW writes at most that many.
    let status = unsafe {
      RegGetValueW(
        HKEY_LOCAL_MACHINE,
        subkey.as_ptr(),
        value.as_ptr(),
        RRF_RT_REG_SZ | view,
        std::ptr::null_mut(),
        buf.as_mut_ptr() as *mut c_void,
        &mut size,
      )
    };
    if status != ERROR_SUCCESS {
      debug!(view, status, "7-Zip registry value not found");
      continue;
    }

    let end = buf.iter().position(|c| *c == 0).unwrap_or(buf.len());
    let dir = PathBuf::from(String::from_utf16_lossy(&buf[..end]));
    let candidate = dir.join("7z.exe");
    if !found.contains(&candidate) {
      found.push(candidate);
    }
  }

  found
}

#[cfg(not(windows))]
fn registry_locations() -> Vec<PathBuf> {
  Vec::new()
}

#[cfg(windows)]
fn install_locations() -> Vec<PathBuf> {
  ["ProgramFiles", "ProgramFiles(x86)"]
    .iter()
    .filter_map(|var| std::env::var_os(var))
    .map(|dir| PathBuf::from(dir).join("7-Zip").join("7z.exe"))
    .collect()
}

#[cfg(not(windows))]
fn install_locations() -> Vec<PathBuf> {
  Vec::new()
}
