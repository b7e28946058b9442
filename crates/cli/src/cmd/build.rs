//! Implementation of the `ohook-build build` command.
//!
//! Runs the full pipeline against the real network, filesystem and system
//! clock, then prints a summary.

use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use tracing::{info, warn};

use ohook_lib::clock::{SystemTimeAuthority, TimeAuthority};
use ohook_lib::config::BuildPlan;
use ohook_lib::error::FailureKind;
use ohook_lib::fetch::ReqwestTransport;
use ohook_lib::link::{EnvironmentLinker, NativeLinker};
use ohook_lib::pipeline::{Pipeline, PipelineDeps, PipelineReport};
use ohook_lib::platform::is_elevated;
use ohook_lib::status::Status;

use super::{BuildOverrides, GlobalArgs, load_plan};
use crate::logging;
use crate::output::{
  ConsoleReporter, format_elapsed, format_size, print_banner, print_field, print_rule, print_status, short_digest,
};

enum Outcome {
  Finished(Box<PipelineReport>),
  Interrupted,
}

/// Execute the build command and return the process exit code.
pub fn cmd_build(global: &GlobalArgs, overrides: &BuildOverrides) -> Result<i32> {
  let plan = load_plan(global, overrides)?;
  logging::init(global.verbose, Some(&plan.layout.log_file));
  info!(version = env!("CARGO_PKG_VERSION"), "starting sppc DLL build");

  print_banner("AUTOMATED SPPC.DLL BUILDER (OHOOK 0.5)");

  let reporter = Arc::new(ConsoleReporter::default());
  let transport = ReqwestTransport::new(Duration::from_secs(plan.retry.timeout_secs))
    .context("Failed to create HTTP client")?;
  let time = Arc::new(SystemTimeAuthority::new());

  let deps = PipelineDeps {
    transport: Arc::new(transport),
    time: time.clone(),
    linker: Arc::new(NativeLinker),
    reporter: reporter.clone(),
    elevated: is_elevated(),
  };

  let rt = tokio::runtime::Runtime::new().context("Failed to create async runtime")?;
  let started = Instant::now();
  let pipeline = Pipeline::new(plan.clone(), deps);

  let outcome = rt.block_on(async {
    tokio::select! {
      report = pipeline.run() => Outcome::Finished(Box::new(report)),
      _ = tokio::signal::ctrl_c() => Outcome::Interrupted,
    }
  });

  match outcome {
    Outcome::Finished(report) => {
      print_summary(&plan, &report, started.elapsed());
      Ok(report.exit_code())
    }
    Outcome::Interrupted => {
      println!();
      print_status(Status::Warning, "Operation cancelled by user");
      warn!("build interrupted");
      rt.block_on(restore_after_interrupt(&plan, time.as_ref(), reporter.as_ref()));
      Ok(FailureKind::Interrupted.exit_code())
    }
  }
}

/// Undo host changes after the pipeline future was dropped mid-run.
async fn restore_after_interrupt(plan: &BuildPlan, time: &dyn TimeAuthority, reporter: &ConsoleReporter) {
  for failure in time.unpin().await {
    print_status(Status::Warning, &failure.to_string());
  }
  let linker = EnvironmentLinker::new(plan.links.clone(), Arc::new(NativeLinker));
  for warning in linker.teardown(reporter) {
    print_status(Status::Warning, &format!("{}: {}", warning.link.display(), warning.message));
  }
}

fn print_summary(plan: &BuildPlan, report: &PipelineReport, elapsed: Duration) {
  println!();
  print_rule();

  if report.is_success() {
    print_status(Status::Success, &format!("Build verified in {}", format_elapsed(elapsed)));
    for artifact in &report.artifacts {
      print_field(
        &artifact.name,
        &format!("{} ({})", short_digest(&artifact.digest), format_size(artifact.size)),
      );
    }
    print_status(Status::Info, &format!("Output: {}", plan.layout.output.display()));
  } else {
    let kind = report.failure_kind().unwrap_or(FailureKind::Internal);
    print_status(Status::Error, &format!("Build did not complete ({})", kind));
    if let Some(failure) = report.state.failure() {
      print_field("Stage", failure.stage.as_str());
      print_field("Reason", &failure.message);
    }
    print_status(Status::Info, &format!("Log file: {}", plan.layout.log_file.display()));
  }

  if let Some(clock) = &report.clock {
    print_field(
      "Clock pins",
      &format!("{} ({} failed)", clock.pin_attempts, clock.pin_failures),
    );
  }

  for warning in &report.warnings {
    print_status(Status::Warning, &format!("{}: {}", warning.action, warning.message));
  }

  print_rule();
}
