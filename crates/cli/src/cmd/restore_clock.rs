use anyhow::{Context, Result};

use ohook_lib::clock::{SystemTimeAuthority, TimeAuthority};
use ohook_lib::status::Status;

use super::GlobalArgs;
use crate::logging;
use crate::output::print_status;

/// Resynchronize the system clock, for use after an aborted build.
pub fn cmd_restore_clock(global: &GlobalArgs) -> Result<i32> {
  logging::init(global.verbose, None);
  print_status(Status::Progress, "Resynchronizing system clock...");

  let rt = tokio::runtime::Runtime::new().context("Failed to create async runtime")?;
  let failures = rt.block_on(SystemTimeAuthority::new().unpin());

  if failures.is_empty() {
    print_status(Status::Success, "Clock resynchronized");
  } else {
    for failure in &failures {
      print_status(Status::Warning, &failure.to_string());
    }
    print_status(Status::Warning, "Clock may still be off; resync it manually");
  }
  Ok(0)
}
