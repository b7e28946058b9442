//! [`TimeAuthority`] backed by the host's own time utilities.

use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::process::Command;
use tracing::{debug, trace};

use super::{ClockError, TimeAuthority};
use crate::consts::DEFAULT_RESYNC_PAUSE_MS;

/// Mutates the real system clock. Requires elevated privileges.
#[derive(Debug, Clone)]
pub struct SystemTimeAuthority {
  resync_pause: Duration,
}

impl Default for SystemTimeAuthority {
  fn default() -> Self {
    Self {
      resync_pause: Duration::from_millis(DEFAULT_RESYNC_PAUSE_MS),
    }
  }
}

impl SystemTimeAuthority {
  pub fn new() -> Self {
    Self::default()
  }

  /// Resync steps run in order by [`TimeAuthority::unpin`].
  pub fn resync_steps() -> Vec<(&'static str, Vec<&'static str>)> {
    #[cfg(windows)]
    {
      vec![
        ("w32tm", vec!["/resync", "/force"]),
        ("net", vec!["stop", "w32time"]),
        ("net", vec!["start", "w32time"]),
        ("w32tm", vec!["/resync", "/force"]),
      ]
    }
    #[cfg(not(windows))]
    {
      vec![("timedatectl", vec!["set-ntp", "true"])]
    }
  }
}

/// Run a utility to completion, mapping any failure to a message.
async fn run_quiet(program: &str, args: &[&str]) -> Result<(), String> {
  trace!(program, ?args, "running time utility");
  let output = Command::new(program)
    .args(args)
    .stdin(Stdio::null())
    .output()
    .await
    .map_err(|e| format!("failed to spawn {}: {}", program, e))?;

  if output.status.success() {
    Ok(())
  } else {
    let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
    Err(format!("exit code {:?}: {}", output.status.code(), stderr))
  }
}

#[cfg(windows)]
fn timezone_command(zone: &str) -> (&'static str, Vec<String>) {
  (
    "powershell",
    vec![
      "-NoProfile".to_string(),
      "-Command".to_string(),
      format!("Set-TimeZone -Id '{}'", zone),
    ],
  )
}

#[cfg(not(windows))]
fn timezone_command(zone: &str) -> (&'static str, Vec<String>) {
  ("timedatectl", vec!["set-timezone".to_string(), zone.to_string()])
}

// The time zone is already UTC when pinning, so local and UTC agree.
#[cfg(windows)]
fn pin_command(instant: DateTime<Utc>) -> (&'static str, Vec<String>) {
  (
    "powershell",
    vec![
      "-NoProfile".to_string(),
      "-Command".to_string(),
      format!("Set-Date '{}'", instant.format("%Y/%m/%d %H:%M:%S")),
    ],
  )
}

#[cfg(not(windows))]
fn pin_command(instant: DateTime<Utc>) -> (&'static str, Vec<String>) {
  (
    "date",
    vec![
      "-u".to_string(),
      "-s".to_string(),
      instant.format("%Y-%m-%d %H:%M:%S").to_string(),
    ],
  )
}

#[async_trait]
impl TimeAuthority for SystemTimeAuthority {
  async fn set_timezone(&self, zone: &str) -> Result<(), ClockError> {
    let (program, args) = timezone_command(zone);
    let args: Vec<&str> = args.iter().map(String::as_str).collect();
    run_quiet(program, &args).await.map_err(|message| ClockError::Timezone {
      zone: zone.to_string(),
      message,
    })?;
    debug!(zone, "time zone set");
    Ok(())
  }

  async fn pin(&self, instant: DateTime<Utc>) -> Result<(), ClockError> {
    let (program, args) = pin_command(instant);
    let args: Vec<&str> = args.iter().map(String::as_str).collect();
    run_quiet(program, &args)
      .await
      .map_err(|message| ClockError::Pin { instant, message })
  }

  fn now(&self) -> DateTime<Utc> {
    Utc::now()
  }

  async fn unpin(&self) -> Vec<ClockError> {
    let mut failures = Vec::new();

    for (program, args) in Self::resync_steps() {
      if let Err(message) = run_quiet(program, &args).await {
        failures.push(ClockError::Resync {
          step: format!("{} {}", program, args.join(" ")),
          message,
        });
      }
      tokio::time::sleep(self.resync_pause).await;
    }

    failures
  }
}
