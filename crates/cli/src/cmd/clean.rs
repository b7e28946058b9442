use std::sync::Arc;

use anyhow::Result;
use tracing::warn;

use ohook_lib::link::{EnvironmentLinker, NativeLinker};
use ohook_lib::status::Status;

use super::{BuildOverrides, GlobalArgs, load_plan};
use crate::logging;
use crate::output::{ConsoleReporter, print_status};

/// Remove the build links and the temporary directory.
///
/// Downloads and the output directory are kept.
pub fn cmd_clean(global: &GlobalArgs) -> Result<i32> {
  let plan = load_plan(global, &BuildOverrides::default())?;
  logging::init(global.verbose, None);

  let reporter = ConsoleReporter::default();
  let linker = EnvironmentLinker::new(plan.links.clone(), Arc::new(NativeLinker));
  let mut warnings = 0;

  for warning in linker.teardown(&reporter) {
    print_status(Status::Warning, &format!("{}: {}", warning.link.display(), warning.message));
    warnings += 1;
  }

  if plan.layout.temp.exists() {
    match std::fs::remove_dir_all(&plan.layout.temp) {
      Ok(()) => print_status(Status::Success, &format!("Removed {}", plan.layout.temp.display())),
      Err(e) => {
        warn!(path = ?plan.layout.temp, error = %e, "failed to remove temp directory");
        print_status(Status::Warning, &format!("Could not remove {}: {}", plan.layout.temp.display(), e));
        warnings += 1;
      }
    }
  }

  if warnings == 0 {
    print_status(Status::Success, "Environment clean");
  }
  Ok(0)
}
