//! End-to-end orchestration of one reproducible build.
//!
//! Stages run strictly in order. Whatever happens, the clock is restored and
//! the links are torn down exactly once before [`Pipeline::run`] returns, and
//! problems during that teardown are reported as warnings without replacing
//! the failure that ended the run.

pub mod cleanup;
pub mod state;

use std::path::PathBuf;
use std::sync::Arc;

use serde::Serialize;
use thiserror::Error;
use tracing::{error, info, warn};

use crate::clock::{ClockController, ClockError, ClockReport, TimeAuthority};
use crate::config::BuildPlan;
use crate::error::FailureKind;
use crate::fetch::{FetchError, Fetcher, RetryPolicy, Transport};
use crate::invoke::{BuildArtifact, BuildError, CompilerInvoker};
use crate::layout::LayoutError;
use crate::link::{DirLinker, EnvironmentLinker, LinkError};
use crate::stage::{Extractor, StageError, locate_extractor};
use crate::status::{Reporter, Status, emit};
use crate::verify::{VerificationReport, VerifyError, verify_all};

pub use cleanup::{CleanupAction, CleanupStack, CleanupWarning};
pub use state::{FailureRecord, PipelineStage, PipelineState, TransitionError};

/// Underlying cause of a failed stage.
#[derive(Debug, Error)]
pub enum StageFailure {
  #[error("administrator privileges are required")]
  NotElevated,

  #[error(transparent)]
  Layout(#[from] LayoutError),

  #[error(transparent)]
  Fetch(#[from] FetchError),

  #[error(transparent)]
  Stage(#[from] StageError),

  #[error(transparent)]
  Link(#[from] LinkError),

  #[error(transparent)]
  Clock(#[from] ClockError),

  #[error(transparent)]
  Build(#[from] BuildError),

  #[error(transparent)]
  Verify(#[from] VerifyError),

  #[error("failed to copy {name} to the output directory: {source}")]
  Collect {
    name: String,
    #[source]
    source: std::io::Error,
  },

  #[error(transparent)]
  Transition(#[from] TransitionError),
}

impl StageFailure {
  pub fn kind(&self) -> FailureKind {
    match self {
      StageFailure::NotElevated => FailureKind::NotElevated,
      StageFailure::Layout(_) => FailureKind::Staging,
      StageFailure::Fetch(_) => FailureKind::Acquisition,
      StageFailure::Stage(StageError::ToolNotFound { .. }) => FailureKind::MissingTool,
      StageFailure::Stage(_) | StageFailure::Link(_) | StageFailure::Clock(_) => FailureKind::Staging,
      StageFailure::Build(BuildError::ToolMissing(_)) => FailureKind::MissingTool,
      StageFailure::Build(_) => FailureKind::Build,
      StageFailure::Verify(_) => FailureKind::Integrity,
      StageFailure::Collect { .. } | StageFailure::Transition(_) => FailureKind::Internal,
    }
  }
}

#[derive(Debug, Error)]
#[error("{stage} failed: {source}")]
pub struct PipelineError {
  pub stage: PipelineStage,
  pub kind: FailureKind,
  #[source]
  pub source: StageFailure,
}

impl PipelineError {
  fn at(stage: PipelineStage, source: impl Into<StageFailure>) -> Self {
    let source = source.into();
    Self {
      stage,
      kind: source.kind(),
      source,
    }
  }
}

/// External collaborators of a run.
pub struct PipelineDeps {
  pub transport: Arc<dyn Transport>,
  pub time: Arc<dyn TimeAuthority>,
  pub linker: Arc<dyn DirLinker>,
  pub reporter: Arc<dyn Reporter>,
  /// Whether the process holds administrator rights.
  pub elevated: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FetchedResource {
  pub name: String,
  pub path: PathBuf,
  pub cached: bool,
}

#[derive(Debug, Default, Serialize)]
pub struct PipelineReport {
  pub state: PipelineState,
  pub fetched: Vec<FetchedResource>,
  pub artifacts: Vec<BuildArtifact>,
  pub verification: Option<VerificationReport>,
  pub clock: Option<ClockReport>,
  pub collected: Vec<PathBuf>,
  pub warnings: Vec<CleanupWarning>,
  #[serde(skip)]
  pub error: Option<PipelineError>,
}

impl PipelineReport {
  pub fn is_success(&self) -> bool {
    self.state.stage() == PipelineStage::Done
  }

  pub fn failure_kind(&self) -> Option<FailureKind> {
    self.state.failure().map(|f| f.kind)
  }

  pub fn exit_code(&self) -> i32 {
    match (self.is_success(), self.failure_kind()) {
      (true, _) => 0,
      (false, Some(kind)) => kind.exit_code(),
      (false, None) => FailureKind::Internal.exit_code(),
    }
  }

  fn warn(&mut self, action: &str, message: impl Into<String>) {
    self.warnings.push(CleanupWarning {
      action: action.to_string(),
      message: message.into(),
    });
  }
}

pub struct Pipeline {
  plan: BuildPlan,
  deps: PipelineDeps,
  linker: EnvironmentLinker,
}

impl Pipeline {
  pub fn new(plan: BuildPlan, deps: PipelineDeps) -> Self {
    let linker = EnvironmentLinker::new(plan.links.clone(), deps.linker.clone());
    Self { plan, deps, linker }
  }

  pub fn plan(&self) -> &BuildPlan {
    &self.plan
  }

  /// Run every stage and the final teardown.
  ///
  /// Dropping the returned future cancels the background pinning task but
  /// does not restore the host clock; callers that abort a run must restore
  /// time and remove links themselves.
  pub async fn run(self) -> PipelineReport {
    let reporter = self.deps.reporter.clone();
    let mut report = PipelineReport::default();
    let mut cleanup = CleanupStack::new();

    let result = self.execute(&mut report, &mut cleanup).await;

    let succeeded = match result {
      Ok(()) => match report.state.advance(PipelineStage::CleaningUp) {
        Ok(()) => true,
        Err(e) => {
          let stage = report.state.stage();
          self.record_failure(&mut report, PipelineError::at(stage, e));
          false
        }
      },
      Err(err) => {
        self.record_failure(&mut report, err);
        false
      }
    };

    let outcome = cleanup.unwind(&self.linker, reporter.as_ref()).await;
    if outcome.clock.is_some() {
      report.clock = outcome.clock;
    }
    report.warnings.extend(outcome.warnings);

    if succeeded {
      if let Err(e) = report.state.advance(PipelineStage::Done) {
        self.record_failure(&mut report, PipelineError::at(PipelineStage::CleaningUp, e));
      } else {
        info!(output = ?self.plan.layout.output, "build completed");
        emit(reporter.as_ref(), Status::Success, "Process completed successfully!");
        emit(
          reporter.as_ref(),
          Status::Info,
          &format!("DLL files saved to: {}", self.plan.layout.output.display()),
        );
      }
    }

    report
  }

  fn record_failure(&self, report: &mut PipelineReport, err: PipelineError) {
    error!(stage = %err.stage, kind = %err.kind, error = %err, "pipeline failed");
    emit(self.deps.reporter.as_ref(), Status::Error, &err.to_string());
    if let Err(e) = report.state.fail(err.kind, err.to_string()) {
      warn!(error = %e, "failure recorded after a terminal stage");
    }
    report.error = Some(err);
  }

  async fn execute(&self, report: &mut PipelineReport, cleanup: &mut CleanupStack) -> Result<(), PipelineError> {
    let plan = &self.plan;
    let reporter = self.deps.reporter.as_ref();

    // Init
    plan.layout.ensure().map_err(|e| PipelineError::at(PipelineStage::Init, e))?;
    info!(root = ?plan.layout.root, link_root = ?plan.layout.link_root, "starting build");

    if plan.require_elevation && !self.deps.elevated {
      emit(reporter, Status::Info, "Please run again as administrator");
      return Err(PipelineError::at(PipelineStage::Init, StageFailure::NotElevated));
    }

    let extractor = match locate_extractor(plan.extractor.as_deref()) {
      Ok(path) => {
        info!(extractor = ?path, "extractor found");
        Extractor::new(path)
      }
      Err(e) => {
        emit(reporter, Status::Info, "Install 7-Zip and run again: https://www.7-zip.org/download.html");
        return Err(PipelineError::at(PipelineStage::Init, e));
      }
    };

    advance(report, PipelineStage::Fetching)?;
    let fetcher = Fetcher::new(self.deps.transport.clone(), RetryPolicy::from(&plan.retry));
    for resource in &plan.resources {
      let outcome = fetcher
        .fetch(resource, reporter)
        .await
        .map_err(|e| PipelineError::at(PipelineStage::Fetching, e))?;
      report.fetched.push(FetchedResource {
        name: resource.name.clone(),
        path: outcome.path().to_path_buf(),
        cached: outcome.is_cached(),
      });
    }

    advance(report, PipelineStage::Extracting)?;
    for step in &plan.staging {
      extractor
        .stage(step, reporter)
        .await
        .map_err(|e| PipelineError::at(PipelineStage::Extracting, e))?;
    }

    advance(report, PipelineStage::Linking)?;
    cleanup.push(CleanupAction::TeardownLinks);
    self
      .linker
      .establish(reporter)
      .map_err(|e| PipelineError::at(PipelineStage::Linking, e))?;

    advance(report, PipelineStage::ClockPinned)?;
    let controller = ClockController::new(self.deps.time.clone(), plan.clock.clone());
    match controller.start(reporter).await {
      Ok(pinned) => cleanup.push(CleanupAction::StopClock(pinned)),
      Err(e) => {
        // Nothing is pinning, but the time zone or clock may already differ.
        report.state.set_clock_pinned(false);
        for failure in self.deps.time.unpin().await {
          report.warn("restore_clock", failure.to_string());
        }
        return Err(PipelineError::at(PipelineStage::ClockPinned, e));
      }
    }

    advance(report, PipelineStage::Building)?;
    let invoker = CompilerInvoker::new(plan.build_tool.clone(), plan.checksums.names());
    let built = invoker.build(&plan.build_dir, reporter).await;

    if let Some(pinned) = cleanup.take_clock() {
      let clock = pinned.stop(reporter).await;
      for warning in &clock.warnings {
        report.warn("stop_clock", warning.clone());
      }
      report.clock = Some(clock);
    }
    report.state.set_clock_pinned(false);

    report.artifacts = built.map_err(|e| PipelineError::at(PipelineStage::Building, e))?;
    advance(report, PipelineStage::ClockRestored)?;

    advance(report, PipelineStage::Verifying)?;
    let verification = verify_all(&plan.checksums, &plan.build_dir, reporter);
    report.verification = Some(verification.clone());
    if let Err(e) = verification.into_result() {
      emit(
        reporter,
        Status::Error,
        "Checksum verification failed! The compiled files are not identical to the expected ones.",
      );
      return Err(PipelineError::at(PipelineStage::Verifying, e));
    }

    advance(report, PipelineStage::Collecting)?;
    for name in plan.checksums.names() {
      let from = plan.build_dir.join(&name);
      let to = plan.layout.output.join(&name);
      let collect_err = |source: std::io::Error| {
        PipelineError::at(
          PipelineStage::Collecting,
          StageFailure::Collect {
            name: name.clone(),
            source,
          },
        )
      };

      tokio::fs::copy(&from, &to).await.map_err(collect_err)?;
      if !to.is_file() {
        return Err(collect_err(std::io::Error::new(
          std::io::ErrorKind::NotFound,
          "copy missing after collection",
        )));
      }
      emit(
        reporter,
        Status::Success,
        &format!("File {} copied to {}", name, plan.layout.output.display()),
      );
      report.collected.push(to);
    }

    if !plan.keep_temp {
      cleanup.push(CleanupAction::RemoveDir(plan.layout.temp.clone()));
    }

    Ok(())
  }
}

fn advance(report: &mut PipelineReport, next: PipelineStage) -> Result<(), PipelineError> {
  let current = report.state.stage();
  report
    .state
    .advance(next)
    .map_err(|e| PipelineError::at(current, e))
}
