mod build;
mod clean;
mod restore_clock;
mod show;
mod verify;

use std::path::PathBuf;

use anyhow::{Context, Result};

use ohook_lib::config::{BuildConfig, BuildPlan};

pub use build::cmd_build;
pub use clean::cmd_clean;
pub use restore_clock::cmd_restore_clock;
pub use show::cmd_show;
pub use verify::cmd_verify;

/// Options shared by every command.
pub struct GlobalArgs {
  pub verbose: bool,
  pub config: Option<PathBuf>,
  pub root: Option<PathBuf>,
  pub link_root: Option<PathBuf>,
}

/// Flags specific to `build`.
#[derive(Default)]
pub struct BuildOverrides {
  pub max_attempts: Option<u32>,
  pub keep_temp: bool,
  pub no_elevation_check: bool,
}

/// Load the config file (if any) and apply command-line overrides.
///
/// Precedence: flags, then config file, then `OHOOK_*` variables, then
/// built-in defaults.
pub fn load_config(global: &GlobalArgs, overrides: &BuildOverrides) -> Result<BuildConfig> {
  let mut config = BuildConfig::load_or_default(global.config.as_deref()).context("Failed to load configuration")?;

  if let Some(root) = &global.root {
    config.root = Some(absolute(root));
  }
  if let Some(link_root) = &global.link_root {
    config.link_root = Some(absolute(link_root));
  }
  if let Some(max_attempts) = overrides.max_attempts {
    config.retry.max_attempts = max_attempts;
  }
  if overrides.keep_temp {
    config.keep_temp = true;
  }
  if overrides.no_elevation_check {
    config.require_elevation = false;
  }

  Ok(config)
}

pub fn load_plan(global: &GlobalArgs, overrides: &BuildOverrides) -> Result<BuildPlan> {
  load_config(global, overrides)?
    .plan()
    .context("Invalid configuration")
}

fn absolute(path: &std::path::Path) -> PathBuf {
  std::path::absolute(path).unwrap_or_else(|_| path.to_path_buf())
}
