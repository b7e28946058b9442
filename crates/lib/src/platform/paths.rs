//! Default filesystem locations.
//!
//! The upstream build hardcodes absolute paths directly under the system
//! drive, so both the main root and the link root default to it. Either can
//! be redirected through environment variables.

use std::path::PathBuf;

use crate::consts::{APP_NAME, LINK_ROOT_ENV, ROOT_ENV};

/// Returns the root of the system drive (e.g. `C:\`).
#[cfg(windows)]
pub fn system_drive() -> PathBuf {
  let drive = std::env::var("SYSTEMDRIVE").unwrap_or_else(|_| "C:".to_string());
  PathBuf::from(format!("{}\\", drive))
}

/// Returns the filesystem root.
#[cfg(not(windows))]
pub fn system_drive() -> PathBuf {
  PathBuf::from("/")
}

/// Returns the main root directory holding sources, toolchains and outputs.
///
/// `OHOOK_ROOT` takes precedence over the system drive default.
pub fn root_dir() -> PathBuf {
  std::env::var_os(ROOT_ENV)
    .filter(|v| !v.is_empty())
    .map(PathBuf::from)
    .unwrap_or_else(|| system_drive().join(APP_NAME))
}

/// Returns the directory under which the build's fixed indirections live.
///
/// `OHOOK_LINK_ROOT` takes precedence over the system drive default.
pub fn link_root() -> PathBuf {
  std::env::var_os(LINK_ROOT_ENV)
    .filter(|v| !v.is_empty())
    .map(PathBuf::from)
    .unwrap_or_else(system_drive)
}

#[cfg(test)]
mod tests {
  use super::*;
  use serial_test::serial;

  #[test]
  #[serial]
  fn root_env_takes_precedence() {
    temp_env::with_var(ROOT_ENV, Some("/custom/root"), || {
      assert_eq!(root_dir(), PathBuf::from("/custom/root"));
    });
  }

  #[test]
  #[serial]
  fn root_falls_back_to_system_drive() {
    temp_env::with_var(ROOT_ENV, None::<&str>, || {
      assert_eq!(root_dir(), system_drive().join(APP_NAME));
    });
  }

  #[test]
  #[serial]
  fn empty_link_root_env_is_ignored() {
    temp_env::with_var(LINK_ROOT_ENV, Some(""), || {
      assert_eq!(link_root(), system_drive());
    });
  }

  #[test]
  #[serial]
  fn link_root_env_takes_precedence() {
    temp_env::with_var(LINK_ROOT_ENV, Some("/links"), || {
      assert_eq!(link_root(), PathBuf::from("/links"));
    });
  }
}
