//! The fixed directory tree the pipeline works in.

use std::path::{Path, PathBuf};

use serde::Serialize;
use thiserror::Error;
use tracing::debug;

use crate::consts::{
  COMPILERS_DIR_NAME, LOG_FILE_NAME, MINGW32_DIR_NAME, MINGW64_DIR_NAME, OUTPUT_DIR_NAME, SOURCE_DIR_NAME,
  TEMP_DIR_NAME,
};

#[derive(Debug, Error)]
#[error("failed to create directory {path}: {source}")]
pub struct LayoutError {
  pub path: PathBuf,
  #[source]
  pub source: std::io::Error,
}

/// Well-known paths owned by the pipeline plus the indirection targets the
/// external build expects under the link root.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DirectoryLayout {
  pub root: PathBuf,
  pub source: PathBuf,
  pub compilers: PathBuf,
  pub mingw32: PathBuf,
  pub mingw64: PathBuf,
  pub temp: PathBuf,
  pub output: PathBuf,
  pub log_file: PathBuf,
  pub link_root: PathBuf,
}

impl DirectoryLayout {
  pub fn new(root: impl Into<PathBuf>, link_root: impl Into<PathBuf>) -> Self {
    let root = root.into();
    let compilers = root.join(COMPILERS_DIR_NAME);
    Self {
      source: root.join(SOURCE_DIR_NAME),
      mingw32: compilers.join(MINGW32_DIR_NAME),
      mingw64: compilers.join(MINGW64_DIR_NAME),
      compilers,
      temp: root.join(TEMP_DIR_NAME),
      output: root.join(OUTPUT_DIR_NAME),
      log_file: root.join(LOG_FILE_NAME),
      link_root: link_root.into(),
      root,
    }
  }

  /// Directories owned by the pipeline, parents first.
  pub fn owned_dirs(&self) -> [&Path; 7] {
    [
      &self.root,
      &self.source,
      &self.compilers,
      &self.mingw32,
      &self.mingw64,
      &self.temp,
      &self.output,
    ]
  }

  /// Fixed path of the 64-bit toolchain indirection.
  pub fn mingw64_link(&self) -> PathBuf {
    self.link_root.join(MINGW64_DIR_NAME)
  }

  /// Fixed path of the 32-bit toolchain indirection.
  pub fn mingw32_link(&self) -> PathBuf {
    self.link_root.join(MINGW32_DIR_NAME)
  }

  /// Fixed path of the source indirection, also the build's working directory.
  pub fn source_link(&self) -> PathBuf {
    self.link_root.join(SOURCE_DIR_NAME)
  }

  /// Create every owned directory. Idempotent.
  ///
  /// Link paths are never created here; they belong to the linker.
  pub fn ensure(&self) -> Result<(), LayoutError> {
    for dir in self.owned_dirs() {
      std::fs::create_dir_all(dir).map_err(|e| LayoutError {
        path: dir.to_path_buf(),
        source: e,
      })?;
      debug!(path = ?dir, "directory ensured");
    }
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use tempfile::TempDir;

  #[test]
  fn layout_paths_follow_root() {
    let layout = DirectoryLayout::new("/base", "/links");
    assert_eq!(layout.source, PathBuf::from("/base/ohook"));
    assert_eq!(layout.mingw32, PathBuf::from("/base/Compiladores/mingw32"));
    assert_eq!(layout.mingw64, PathBuf::from("/base/Compiladores/mingw64"));
    assert_eq!(layout.temp, PathBuf::from("/base/Temp"));
    assert_eq!(layout.output, PathBuf::from("/base/Output"));
    assert_eq!(layout.log_file, PathBuf::from("/base/ohook_compiler.log"));
    assert_eq!(layout.source_link(), PathBuf::from("/links/ohook"));
    assert_eq!(layout.mingw64_link(), PathBuf::from("/links/mingw64"));
  }

  #[test]
  fn ensure_is_idempotent() {
    let temp = TempDir::new().unwrap();
    let layout = DirectoryLayout::new(temp.path().join("root"), temp.path().join("links"));

    layout.ensure().unwrap();
    std::fs::write(layout.output.join("keep.txt"), "x").unwrap();
    layout.ensure().unwrap();

    for dir in layout.owned_dirs() {
      assert!(dir.is_dir(), "{} should exist", dir.display());
    }
    assert!(layout.output.join("keep.txt").exists());
  }

  #[test]
  fn ensure_does_not_create_links() {
    let temp = TempDir::new().unwrap();
    let layout = DirectoryLayout::new(temp.path().join("root"), temp.path().join("links"));

    layout.ensure().unwrap();

    assert!(!layout.source_link().exists());
    assert!(!layout.mingw32_link().exists());
  }

  #[test]
  fn ensure_reports_failing_path() {
    let temp = TempDir::new().unwrap();
    let blocker = temp.path().join("root");
    std::fs::write(&blocker, "not a directory").unwrap();
    let layout = DirectoryLayout::new(&blocker, temp.path());

    let err = layout.ensure().unwrap_err();
    assert_eq!(err.path, blocker);
  }
}
