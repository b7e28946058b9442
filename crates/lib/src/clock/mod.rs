//! Deterministic wall-clock pinning around the build.
//!
//! The toolchain embeds timestamps in its output, so the host clock is held at
//! a fixed instant for the whole compile. Pinning is a process-wide (in fact
//! host-wide) side effect performed through a [`TimeAuthority`]; the
//! [`ClockController`] drives it and hands back a [`PinnedClock`] guard that
//! must be stopped exactly once.

mod system;

pub use system::SystemTimeAuthority;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::consts::{
  DEFAULT_DRIFT_TOLERANCE_SECS, DEFAULT_PIN_INTERVAL_MS, DEFAULT_SETTLE_MS, PINNED_EPOCH_SECS, PINNED_TIMEZONE,
};
use crate::status::{Reporter, Status, emit};

#[derive(Debug, Error)]
pub enum ClockError {
  #[error("failed to set time zone to {zone}: {message}")]
  Timezone { zone: String, message: String },

  #[error("failed to set system clock to {instant}: {message}")]
  Pin { instant: DateTime<Utc>, message: String },

  #[error("time resync step `{step}` failed: {message}")]
  Resync { step: String, message: String },

  #[error("pinning task did not shut down cleanly: {0}")]
  Task(String),
}

/// Host clock operations. Every call affects the whole machine.
#[async_trait]
pub trait TimeAuthority: Send + Sync {
  async fn set_timezone(&self, zone: &str) -> Result<(), ClockError>;

  async fn pin(&self, instant: DateTime<Utc>) -> Result<(), ClockError>;

  fn now(&self) -> DateTime<Utc>;

  /// Return the host to synchronized time. Runs every step even when earlier
  /// ones fail and returns the failures.
  async fn unpin(&self) -> Vec<ClockError>;
}

pub fn pinned_instant() -> DateTime<Utc> {
  DateTime::<Utc>::from_timestamp(PINNED_EPOCH_SECS, 0).unwrap_or_default()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClockSettings {
  pub target: DateTime<Utc>,
  pub timezone: String,
  pub interval_ms: u64,
  pub settle_ms: u64,
  pub drift_tolerance_secs: u64,
}

impl Default for ClockSettings {
  fn default() -> Self {
    Self {
      target: pinned_instant(),
      timezone: PINNED_TIMEZONE.to_string(),
      interval_ms: DEFAULT_PIN_INTERVAL_MS,
      settle_ms: DEFAULT_SETTLE_MS,
      drift_tolerance_secs: DEFAULT_DRIFT_TOLERANCE_SECS,
    }
  }
}

/// Counters returned by the background pinning task.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PinStats {
  pub attempts: u64,
  pub failures: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ClockReport {
  pub pin_attempts: u64,
  pub pin_failures: u64,
  pub warnings: Vec<String>,
}

pub struct ClockController {
  authority: Arc<dyn TimeAuthority>,
  settings: ClockSettings,
}

impl ClockController {
  pub fn new(authority: Arc<dyn TimeAuthority>, settings: ClockSettings) -> Self {
    Self { authority, settings }
  }

  pub fn settings(&self) -> &ClockSettings {
    &self.settings
  }

  /// Set the time zone, pin the clock and keep it pinned in the background.
  ///
  /// Only a time zone failure is an error. A rejected pin is counted and left
  /// to the drift check. On error nothing is left running, but the host may
  /// already have been touched; callers are expected to restore time.
  pub async fn start(&self, reporter: &dyn Reporter) -> Result<PinnedClock, ClockError> {
    let settings = &self.settings;

    emit(
      reporter,
      Status::Progress,
      &format!("Setting time zone to {}...", settings.timezone),
    );
    self.authority.set_timezone(&settings.timezone).await?;
    emit(reporter, Status::Success, &format!("Time zone set to {}", settings.timezone));

    emit(
      reporter,
      Status::Progress,
      &format!("Pinning system clock to {}...", settings.target.format("%Y-%m-%d %H:%M UTC")),
    );
    let mut warnings = Vec::new();
    let mut initial_failures = 0;
    if let Err(e) = self.authority.pin(settings.target).await {
      warn!(error = %e, "initial pin failed");
      initial_failures = 1;
      warnings.push(e.to_string());
    }

    let token = CancellationToken::new();
    let handle = tokio::spawn(pin_loop(
      self.authority.clone(),
      settings.target,
      Duration::from_millis(settings.interval_ms),
      token.clone(),
    ));
    info!(target_instant = %settings.target, interval_ms = settings.interval_ms, "clock pinning started");

    let mut guard = PinnedClock {
      authority: self.authority.clone(),
      token,
      handle: Some(handle),
      initial_failures,
      warnings,
    };

    tokio::time::sleep(Duration::from_millis(settings.settle_ms)).await;

    let observed = self.authority.now();
    let drift = (observed - settings.target).num_seconds().unsigned_abs();
    if drift > settings.drift_tolerance_secs {
      let message = format!("Clock not pinned as expected: host reports {}", observed);
      emit(reporter, Status::Warning, &message);
      guard.warnings.push(message);
    } else {
      emit(reporter, Status::Success, "System clock pinned");
    }

    Ok(guard)
  }
}

async fn pin_loop(
  authority: Arc<dyn TimeAuthority>,
  target: DateTime<Utc>,
  interval: Duration,
  token: CancellationToken,
) -> PinStats {
  let mut stats = PinStats::default();
  debug!("pinning task started");

  loop {
    tokio::select! {
      _ = token.cancelled() => break,
      _ = tokio::time::sleep(interval) => {
        stats.attempts += 1;
        if let Err(e) = authority.pin(target).await {
          stats.failures += 1;
          debug!(error = %e, "pin attempt failed");
        }
      }
    }
  }

  debug!(attempts = stats.attempts, failures = stats.failures, "pinning task stopped");
  stats
}

/// Live pinning session. Call [`PinnedClock::stop`] to end it.
pub struct PinnedClock {
  authority: Arc<dyn TimeAuthority>,
  token: CancellationToken,
  handle: Option<JoinHandle<PinStats>>,
  initial_failures: u64,
  warnings: Vec<String>,
}

impl PinnedClock {
  /// Stop the pinning task, wait for it to exit, then resynchronize time.
  pub async fn stop(mut self, reporter: &dyn Reporter) -> ClockReport {
    self.token.cancel();

    let mut report = ClockReport {
      pin_attempts: 1,
      pin_failures: self.initial_failures,
      warnings: std::mem::take(&mut self.warnings),
    };

    if let Some(handle) = self.handle.take() {
      match handle.await {
        Ok(stats) => {
          report.pin_attempts += stats.attempts;
          report.pin_failures += stats.failures;
        }
        Err(e) => {
          let err = ClockError::Task(e.to_string());
          warn!(error = %err, "pinning task join failed");
          report.warnings.push(err.to_string());
        }
      }
    }

    emit(reporter, Status::Progress, "Restoring system date and time...");
    let failures = self.authority.unpin().await;
    if failures.is_empty() {
      emit(reporter, Status::Success, "System date and time restored");
    } else {
      for failure in failures {
        emit(reporter, Status::Warning, &failure.to_string());
        report.warnings.push(failure.to_string());
      }
      emit(reporter, Status::Warning, "Date and time may need to be adjusted manually");
    }

    report
  }
}

impl Drop for PinnedClock {
  fn drop(&mut self) {
    if self.handle.is_some() {
      self.token.cancel();
      warn!("pinned clock dropped without being stopped; system time was not restored");
    }
  }
}
