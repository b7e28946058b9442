//! Pipeline stages and the transitions allowed between them.

use std::fmt;

use serde::Serialize;
use thiserror::Error;

use crate::error::FailureKind;

/// Discrete stages of one run, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineStage {
  /// Layout, privilege and tool checks.
  Init,
  Fetching,
  Extracting,
  Linking,
  ClockPinned,
  Building,
  ClockRestored,
  Verifying,
  Collecting,
  CleaningUp,
  Done,
  Failed,
}

impl PipelineStage {
  pub fn as_str(&self) -> &'static str {
    match self {
      PipelineStage::Init => "init",
      PipelineStage::Fetching => "fetching",
      PipelineStage::Extracting => "extracting",
      PipelineStage::Linking => "linking",
      PipelineStage::ClockPinned => "clock_pinned",
      PipelineStage::Building => "building",
      PipelineStage::ClockRestored => "clock_restored",
      PipelineStage::Verifying => "verifying",
      PipelineStage::Collecting => "collecting",
      PipelineStage::CleaningUp => "cleaning_up",
      PipelineStage::Done => "done",
      PipelineStage::Failed => "failed",
    }
  }

  /// The stage that follows on success, if any.
  pub fn next(&self) -> Option<PipelineStage> {
    match self {
      PipelineStage::Init => Some(PipelineStage::Fetching),
      PipelineStage::Fetching => Some(PipelineStage::Extracting),
      PipelineStage::Extracting => Some(PipelineStage::Linking),
      PipelineStage::Linking => Some(PipelineStage::ClockPinned),
      PipelineStage::ClockPinned => Some(PipelineStage::Building),
      PipelineStage::Building => Some(PipelineStage::ClockRestored),
      PipelineStage::ClockRestored => Some(PipelineStage::Verifying),
      PipelineStage::Verifying => Some(PipelineStage::Collecting),
      PipelineStage::Collecting => Some(PipelineStage::CleaningUp),
      PipelineStage::CleaningUp => Some(PipelineStage::Done),
      PipelineStage::Done | PipelineStage::Failed => None,
    }
  }

  pub fn is_terminal(&self) -> bool {
    matches!(self, PipelineStage::Done | PipelineStage::Failed)
  }

  /// Successor on success, or `Failed` from any non-terminal stage.
  pub fn can_transition_to(&self, next: PipelineStage) -> bool {
    if self.is_terminal() {
      return false;
    }
    next == PipelineStage::Failed || self.next() == Some(next)
  }
}

impl fmt::Display for PipelineStage {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("invalid stage transition: {from} -> {to}")]
pub struct TransitionError {
  pub from: PipelineStage,
  pub to: PipelineStage,
}

/// The failure that ended a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FailureRecord {
  pub stage: PipelineStage,
  pub kind: FailureKind,
  pub message: String,
}

/// Progress of one run. Only the orchestrator mutates it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PipelineState {
  stage: PipelineStage,
  completed: Vec<PipelineStage>,
  clock_pinned: bool,
  failure: Option<FailureRecord>,
}

impl Default for PipelineState {
  fn default() -> Self {
    Self::new()
  }
}

impl PipelineState {
  pub fn new() -> Self {
    Self {
      stage: PipelineStage::Init,
      completed: Vec::new(),
      clock_pinned: false,
      failure: None,
    }
  }

  pub fn stage(&self) -> PipelineStage {
    self.stage
  }

  pub fn completed(&self) -> &[PipelineStage] {
    &self.completed
  }

  pub fn clock_pinned(&self) -> bool {
    self.clock_pinned
  }

  pub fn failure(&self) -> Option<&FailureRecord> {
    self.failure.as_ref()
  }

  /// Move to the next stage, recording the current one as completed.
  pub fn advance(&mut self, next: PipelineStage) -> Result<(), TransitionError> {
    if next == PipelineStage::Failed || !self.stage.can_transition_to(next) {
      return Err(TransitionError {
        from: self.stage,
        to: next,
      });
    }
    self.completed.push(self.stage);
    self.stage = next;
    if next == PipelineStage::ClockPinned {
      self.clock_pinned = true;
    } else if next == PipelineStage::ClockRestored {
      self.clock_pinned = false;
    }
    Ok(())
  }

  pub fn set_clock_pinned(&mut self, pinned: bool) {
    self.clock_pinned = pinned;
  }

  /// Enter the absorbing `Failed` stage. The first failure wins.
  pub fn fail(&mut self, kind: FailureKind, message: impl Into<String>) -> Result<(), TransitionError> {
    if !self.stage.can_transition_to(PipelineStage::Failed) {
      return Err(TransitionError {
        from: self.stage,
        to: PipelineStage::Failed,
      });
    }
    self.failure = Some(FailureRecord {
      stage: self.stage,
      kind,
      message: message.into(),
    });
    self.stage = PipelineStage::Failed;
    Ok(())
  }
}
