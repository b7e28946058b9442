//! Tracing setup: a console layer plus an optional JSON log file.

use std::fs::OpenOptions;
use std::path::Path;
use std::sync::Mutex;

use tracing::Level;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer, fmt};

/// Install the global subscriber.
///
/// The console layer honors `RUST_LOG` and otherwise logs errors only (debug
/// with `verbose`); status lines already cover the rest. When `log_file` is
/// given, every event at debug or above is also appended there as JSON
/// lines. A log file that cannot be opened only costs the file layer.
pub fn init(verbose: bool, log_file: Option<&Path>) {
  let default_level = if verbose { Level::DEBUG } else { Level::ERROR };
  let console_filter =
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level.as_str()));

  let console = fmt::layer()
    .with_writer(std::io::stderr)
    .with_target(false)
    .without_time()
    .with_filter(console_filter);

  let mut open_error = None;
  let file_layer = log_file.and_then(|path| match open_append(path) {
    Ok(file) => Some(
      fmt::layer()
        .json()
        .with_writer(Mutex::new(file))
        .with_filter(EnvFilter::new("debug")),
    ),
    Err(e) => {
      open_error = Some((path.to_path_buf(), e));
      None
    }
  });

  tracing_subscriber::registry()
    .with(console)
    .with(file_layer)
    .try_init()
    .ok();

  if let Some((path, error)) = open_error {
    tracing::warn!(path = ?path, error = %error, "could not open log file; logging to console only");
  }
}

fn open_append(path: &Path) -> std::io::Result<std::fs::File> {
  if let Some(parent) = path.parent() {
    std::fs::create_dir_all(parent)?;
  }
  OpenOptions::new().create(true).append(true).open(path)
}
