//! Test doubles for the pipeline's external collaborators.
//!
//! Network, host clock and subprocess tools are all replaced here so tests
//! run offline and never touch the real system time.

use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::clock::{ClockError, TimeAuthority};
use crate::fetch::FetchError;
use crate::fetch::transport::{Body, Transport};
use crate::status::{DownloadProgress, Reporter, Status};

const FAKE_CHUNK: usize = 4096;

/// One scripted reply of a [`FakeTransport`].
#[derive(Debug, Clone)]
pub enum FakeResponse {
  Ok(Vec<u8>),
  /// Yields the bytes, then a mid-stream failure.
  Truncated(Vec<u8>),
  Status(u16),
  Fail(String),
}

/// Serves scripted responses per URL.
///
/// Queued responses (`respond`) are consumed first, one per request; after
/// that the always-on body (`serve`) is used. Unscripted URLs fail.
#[derive(Default)]
pub struct FakeTransport {
  queued: Mutex<HashMap<String, VecDeque<FakeResponse>>>,
  served: HashMap<String, Vec<u8>>,
  calls: AtomicUsize,
}

impl FakeTransport {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn serve(mut self, url: &str, body: Vec<u8>) -> Self {
    self.served.insert(url.to_string(), body);
    self
  }

  pub fn respond(self, url: &str, response: FakeResponse) -> Self {
    self
      .queued
      .lock()
      .unwrap()
      .entry(url.to_string())
      .or_default()
      .push_back(response);
    self
  }

  pub fn calls(&self) -> usize {
    self.calls.load(Ordering::SeqCst)
  }
}

#[async_trait]
impl Transport for FakeTransport {
  async fn get(&self, url: &str) -> Result<Box<dyn Body>, FetchError> {
    self.calls.fetch_add(1, Ordering::SeqCst);

    let queued = self.queued.lock().unwrap().get_mut(url).and_then(VecDeque::pop_front);
    let response = match queued {
      Some(response) => response,
      None => match self.served.get(url) {
        Some(body) => FakeResponse::Ok(body.clone()),
        None => FakeResponse::Fail(format!("no scripted response for {}", url)),
      },
    };

    match response {
      FakeResponse::Ok(data) => Ok(Box::new(FakeBody::new(url, data, false))),
      FakeResponse::Truncated(data) => Ok(Box::new(FakeBody::new(url, data, true))),
      FakeResponse::Status(status) => Err(FetchError::Status {
        url: url.to_string(),
        status,
      }),
      FakeResponse::Fail(message) => Err(FetchError::Request {
        url: url.to_string(),
        message,
      }),
    }
  }
}

struct FakeBody {
  url: String,
  chunks: VecDeque<Vec<u8>>,
  length: u64,
  truncated: bool,
}

impl FakeBody {
  fn new(url: &str, data: Vec<u8>, truncated: bool) -> Self {
    let length = if truncated { data.len() as u64 * 2 } else { data.len() as u64 };
    Self {
      url: url.to_string(),
      chunks: data.chunks(FAKE_CHUNK).map(<[u8]>::to_vec).collect(),
      length,
      truncated,
    }
  }
}

#[async_trait]
impl Body for FakeBody {
  fn content_length(&self) -> Option<u64> {
    Some(self.length)
  }

  async fn chunk(&mut self) -> Result<Option<Vec<u8>>, FetchError> {
    match self.chunks.pop_front() {
      Some(chunk) => Ok(Some(chunk)),
      None if self.truncated => Err(FetchError::Request {
        url: self.url.clone(),
        message: "connection closed before message completed".to_string(),
      }),
      None => Ok(None),
    }
  }
}

/// Captures every status line and progress update.
#[derive(Default)]
pub struct RecordingReporter {
  statuses: Mutex<Vec<(Status, String)>>,
  progress: Mutex<Vec<DownloadProgress>>,
}

impl RecordingReporter {
  pub fn statuses(&self) -> Vec<(Status, String)> {
    self.statuses.lock().unwrap().clone()
  }

  pub fn progress(&self) -> Vec<DownloadProgress> {
    self.progress.lock().unwrap().clone()
  }
}

impl Reporter for RecordingReporter {
  fn status(&self, status: Status, message: &str) {
    self.statuses.lock().unwrap().push((status, message.to_string()));
  }

  fn download_progress(&self, progress: &DownloadProgress) {
    self.progress.lock().unwrap().push(progress.clone());
  }
}

/// Records clock calls instead of changing the host time.
#[derive(Default)]
pub struct FakeTimeAuthority {
  pub fail_timezone: bool,
  pub fail_pin: bool,
  pub fail_unpin: bool,
  /// Keep reporting real time, as if pinning had no effect.
  pub ignore_pins: bool,
  timezones: Mutex<Vec<String>>,
  pinned: Mutex<Option<DateTime<Utc>>>,
  pins: AtomicUsize,
  unpins: AtomicUsize,
}

impl FakeTimeAuthority {
  /// Rejects every time zone change.
  pub fn failing_timezone() -> Self {
    Self {
      fail_timezone: true,
      ..Default::default()
    }
  }

  /// Rejects every pin, leaving the clock untouched.
  pub fn failing_pin() -> Self {
    Self {
      fail_pin: true,
      ..Default::default()
    }
  }

  /// Every resync step reports an error.
  pub fn failing_unpin() -> Self {
    Self {
      fail_unpin: true,
      ..Default::default()
    }
  }

  /// Accepts pins but keeps reporting real time.
  pub fn ignoring_pins() -> Self {
    Self {
      ignore_pins: true,
      ..Default::default()
    }
  }

  pub fn timezones(&self) -> Vec<String> {
    self.timezones.lock().unwrap().clone()
  }

  pub fn pins(&self) -> usize {
    self.pins.load(Ordering::SeqCst)
  }

  pub fn unpins(&self) -> usize {
    self.unpins.load(Ordering::SeqCst)
  }

  pub fn is_pinned(&self) -> bool {
    self.pinned.lock().unwrap().is_some()
  }
}

#[async_trait]
impl TimeAuthority for FakeTimeAuthority {
  async fn set_timezone(&self, zone: &str) -> Result<(), ClockError> {
    if self.fail_timezone {
      return Err(ClockError::Timezone {
        zone: zone.to_string(),
        message: "access denied".to_string(),
      });
    }
    self.timezones.lock().unwrap().push(zone.to_string());
    Ok(())
  }

  async fn pin(&self, instant: DateTime<Utc>) -> Result<(), ClockError> {
    self.pins.fetch_add(1, Ordering::SeqCst);
    if self.fail_pin {
      return Err(ClockError::Pin {
        instant,
        message: "access denied".to_string(),
      });
    }
    if !self.ignore_pins {
      *self.pinned.lock().unwrap() = Some(instant);
    }
    Ok(())
  }

  fn now(&self) -> DateTime<Utc> {
    self.pinned.lock().unwrap().unwrap_or_else(Utc::now)
  }

  async fn unpin(&self) -> Vec<ClockError> {
    self.unpins.fetch_add(1, Ordering::SeqCst);
    *self.pinned.lock().unwrap() = None;
    if self.fail_unpin {
      return vec![ClockError::Resync {
        step: "w32tm /resync /force".to_string(),
        message: "service not running".to_string(),
      }];
    }
    Vec::new()
  }
}

/// Write an executable shell script standing in for an external tool.
#[cfg(unix)]
pub fn write_script(dir: &Path, name: &str, body: &str) -> PathBuf {
  use std::os::unix::fs::PermissionsExt;

  let path = dir.join(name);
  std::fs::write(&path, format!("#!/bin/sh\n{}\n", body)).unwrap();
  std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
  path
}
