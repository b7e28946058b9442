use std::path::PathBuf;

use anyhow::Result;

use ohook_lib::error::FailureKind;
use ohook_lib::status::{SilentReporter, Status};
use ohook_lib::verify::{VerifyStatus, verify_all};

use super::{BuildOverrides, GlobalArgs, load_plan};
use crate::logging;
use crate::output::{ConsoleReporter, OutputFormat, print_field, print_json, print_status, short_digest};

/// Check the DLL checksums in `dir` (the output directory by default).
pub fn cmd_verify(global: &GlobalArgs, dir: Option<PathBuf>, output: OutputFormat) -> Result<i32> {
  logging::init(global.verbose, None);
  let plan = load_plan(global, &BuildOverrides::default())?;
  let dir = dir.unwrap_or_else(|| plan.layout.output.clone());

  let report = if output.is_json() {
    verify_all(&plan.checksums, &dir, &SilentReporter)
  } else {
    verify_all(&plan.checksums, &dir, &ConsoleReporter::default())
  };

  if output.is_json() {
    print_json(&report)?;
  } else {
    println!();
    for file in &report.files {
      let value = match &file.status {
        VerifyStatus::Match { .. } => "ok".to_string(),
        VerifyStatus::Mismatch { actual, .. } => format!("mismatch ({})", short_digest(actual)),
        VerifyStatus::Missing => "missing".to_string(),
        VerifyStatus::Unreadable { message } => format!("unreadable ({})", message),
      };
      print_field(&file.name, &value);
    }
    if report.is_success() {
      print_status(Status::Success, &format!("All {} files match", report.files.len()));
    } else {
      print_status(
        Status::Error,
        &format!("{} of {} files failed verification", report.failures().len(), report.files.len()),
      );
    }
  }

  if report.is_success() {
    Ok(0)
  } else {
    Ok(FailureKind::Integrity.exit_code())
  }
}
