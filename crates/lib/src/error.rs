//! Failure classification shared by the pipeline and the command line.

use std::fmt;

use serde::Serialize;

/// Broad category of a failed run. Each maps to a distinct exit code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
  /// Unexpected error in the orchestrator itself.
  Internal,
  NotElevated,
  MissingTool,
  /// Download failed after every retry.
  Acquisition,
  /// Extraction, linking or clock pinning failed.
  Staging,
  Build,
  Integrity,
  Interrupted,
}

impl FailureKind {
  pub fn exit_code(self) -> i32 {
    match self {
      FailureKind::Internal => 1,
      FailureKind::NotElevated => 2,
      FailureKind::MissingTool => 3,
      FailureKind::Acquisition => 4,
      FailureKind::Staging => 5,
      FailureKind::Build => 6,
      FailureKind::Integrity => 7,
      FailureKind::Interrupted => 130,
    }
  }

  pub fn as_str(self) -> &'static str {
    match self {
      FailureKind::Internal => "internal",
      FailureKind::NotElevated => "not_elevated",
      FailureKind::MissingTool => "missing_tool",
      FailureKind::Acquisition => "acquisition",
      FailureKind::Staging => "staging",
      FailureKind::Build => "build",
      FailureKind::Integrity => "integrity",
      FailureKind::Interrupted => "interrupted",
    }
  }
}

impl fmt::Display for FailureKind {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::collections::HashSet;

  #[test]
  fn exit_codes_are_distinct_and_non_zero() {
    let kinds = [
      FailureKind::Internal,
      FailureKind::NotElevated,
      FailureKind::MissingTool,
      FailureKind::Acquisition,
      FailureKind::Staging,
      FailureKind::Build,
      FailureKind::Integrity,
      FailureKind::Interrupted,
    ];
    let codes: HashSet<i32> = kinds.iter().map(|k| k.exit_code()).collect();
    assert_eq!(codes.len(), kinds.len());
    assert!(!codes.contains(&0));
  }

  #[test]
  fn integrity_and_interrupt_codes() {
    assert_eq!(FailureKind::Integrity.exit_code(), 7);
    assert_eq!(FailureKind::Interrupted.exit_code(), 130);
  }
}
