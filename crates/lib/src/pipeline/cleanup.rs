//! Deferred cleanup, unwound in reverse registration order.

use std::path::PathBuf;

use serde::Serialize;
use tracing::{debug, warn};

use crate::clock::{ClockReport, PinnedClock};
use crate::link::EnvironmentLinker;
use crate::status::{Reporter, Status, emit};

/// A cleanup problem. Reported, never escalated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CleanupWarning {
  pub action: String,
  pub message: String,
}

pub enum CleanupAction {
  /// Stop pinning and resynchronize the host clock.
  StopClock(PinnedClock),
  TeardownLinks,
  RemoveDir(PathBuf),
}

impl CleanupAction {
  pub fn name(&self) -> &'static str {
    match self {
      CleanupAction::StopClock(_) => "stop_clock",
      CleanupAction::TeardownLinks => "teardown_links",
      CleanupAction::RemoveDir(_) => "remove_dir",
    }
  }
}

#[derive(Debug, Default)]
pub struct CleanupOutcome {
  /// Present only if a pinned clock was still pending.
  pub clock: Option<ClockReport>,
  pub warnings: Vec<CleanupWarning>,
}

#[derive(Default)]
pub struct CleanupStack {
  actions: Vec<CleanupAction>,
}

impl CleanupStack {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn push(&mut self, action: CleanupAction) {
    debug!(action = action.name(), "cleanup registered");
    self.actions.push(action);
  }

  pub fn len(&self) -> usize {
    self.actions.len()
  }

  pub fn is_empty(&self) -> bool {
    self.actions.is_empty()
  }

  /// Take the pending clock guard out of the stack so it can be stopped early.
  pub fn take_clock(&mut self) -> Option<PinnedClock> {
    let index = self
      .actions
      .iter()
      .rposition(|a| matches!(a, CleanupAction::StopClock(_)))?;
    match self.actions.remove(index) {
      CleanupAction::StopClock(clock) => Some(clock),
      _ => None,
    }
  }

  /// Run every action, last registered first. A failing action does not
  /// stop the ones after it.
  pub async fn unwind(mut self, linker: &EnvironmentLinker, reporter: &dyn Reporter) -> CleanupOutcome {
    let mut outcome = CleanupOutcome::default();

    while let Some(action) = self.actions.pop() {
      let name = action.name();
      debug!(action = name, "running cleanup");

      match action {
        CleanupAction::StopClock(clock) => {
          let report = clock.stop(reporter).await;
          outcome.warnings.extend(report.warnings.iter().map(|w| CleanupWarning {
            action: name.to_string(),
            message: w.clone(),
          }));
          outcome.clock = Some(report);
        }
        CleanupAction::TeardownLinks => {
          outcome
            .warnings
            .extend(linker.teardown(reporter).into_iter().map(|w| CleanupWarning {
              action: name.to_string(),
              message: format!("{}: {}", w.link.display(), w.message),
            }));
        }
        CleanupAction::RemoveDir(dir) => {
          if !dir.exists() {
            continue;
          }
          emit(reporter, Status::Progress, "Cleaning up temporary files...");
          match tokio::fs::remove_dir_all(&dir).await {
            Ok(()) => emit(reporter, Status::Success, "Cleanup complete"),
            Err(e) => {
              warn!(path = ?dir, error = %e, "failed to remove directory");
              outcome.warnings.push(CleanupWarning {
                action: name.to_string(),
                message: format!("{}: {}", dir.display(), e),
              });
            }
          }
        }
      }
    }

    outcome
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::clock::{ClockController, ClockSettings};
  use crate::link::{LinkSpec, NativeLinker};
  use crate::status::SilentReporter;
  use crate::util::testutil::FakeTimeAuthority;
  use std::sync::Arc;
  use tempfile::TempDir;

  fn linker_for(temp: &TempDir) -> EnvironmentLinker {
    let target = temp.path().join("target");
    std::fs::create_dir_all(&target).unwrap();
    EnvironmentLinker::new(
      vec![LinkSpec {
        link: temp.path().join("link"),
        target,
      }],
      Arc::new(NativeLinker),
    )
  }

  #[tokio::test]
  async fn empty_stack_is_noop() {
    let temp = TempDir::new().unwrap();
    let outcome = CleanupStack::new().unwind(&linker_for(&temp), &SilentReporter).await;
    assert!(outcome.warnings.is_empty());
    assert!(outcome.clock.is_none());
  }

  #[tokio::test]
  async fn unwinds_links_and_dirs() {
    let temp = TempDir::new().unwrap();
    let linker = linker_for(&temp);
    linker.establish(&SilentReporter).unwrap();
    let scratch = temp.path().join("Temp");
    std::fs::create_dir_all(scratch.join("nested")).unwrap();

    let mut stack = CleanupStack::new();
    stack.push(CleanupAction::TeardownLinks);
    stack.push(CleanupAction::RemoveDir(scratch.clone()));
    let outcome = stack.unwind(&linker, &SilentReporter).await;

    assert!(outcome.warnings.is_empty());
    assert!(!scratch.exists());
    assert!(std::fs::symlink_metadata(temp.path().join("link")).is_err());
    assert!(temp.path().join("target").is_dir());
  }

  #[tokio::test]
  async fn missing_dir_is_not_a_warning() {
    let temp = TempDir::new().unwrap();
    let mut stack = CleanupStack::new();
    stack.push(CleanupAction::RemoveDir(temp.path().join("gone")));

    let outcome = stack.unwind(&linker_for(&temp), &SilentReporter).await;

    assert!(outcome.warnings.is_empty());
  }

  #[tokio::test]
  async fn take_clock_removes_guard_from_stack() {
    let temp = TempDir::new().unwrap();
    let authority = Arc::new(FakeTimeAuthority::default());
    let controller = ClockController::new(
      authority.clone(),
      ClockSettings {
        interval_ms: 1,
        settle_ms: 0,
        ..Default::default()
      },
    );
    let mut stack = CleanupStack::new();
    stack.push(CleanupAction::TeardownLinks);
    stack.push(CleanupAction::StopClock(controller.start(&SilentReporter).await.unwrap()));

    let clock = stack.take_clock().unwrap();
    assert_eq!(stack.len(), 1);
    assert!(stack.take_clock().is_none());

    clock.stop(&SilentReporter).await;
    let outcome = stack.unwind(&linker_for(&temp), &SilentReporter).await;

    assert_eq!(authority.unpins(), 1);
    assert!(outcome.clock.is_none());
  }

  #[tokio::test]
  async fn pending_clock_is_stopped_on_unwind() {
    let temp = TempDir::new().unwrap();
    let authority = Arc::new(FakeTimeAuthority::default());
    let controller = ClockController::new(
      authority.clone(),
      ClockSettings {
        interval_ms: 1,
        settle_ms: 0,
        ..Default::default()
      },
    );
    let mut stack = CleanupStack::new();
    stack.push(CleanupAction::StopClock(controller.start(&SilentReporter).await.unwrap()));

    let outcome = stack.unwind(&linker_for(&temp), &SilentReporter).await;

    assert_eq!(authority.unpins(), 1);
    assert!(outcome.clock.is_some());
  }
}
