//! Terminal rendering for status lines, the build summary and JSON output.
//!
//! Progress, success and info lines go to stdout; warnings and errors go to
//! stderr so they survive `> build.txt`.

use std::io::Write;
use std::sync::Mutex;
use std::time::Duration;

use anyhow::Context;
use clap::ValueEnum;
use owo_colors::{OwoColorize, Stream};

use ohook_lib::status::{DownloadProgress, Reporter, Status};

const RULE_WIDTH: usize = 60;
const FIELD_WIDTH: usize = 12;

#[derive(Debug, Clone, Copy, Default, ValueEnum)]
pub enum OutputFormat {
  #[default]
  Text,
  Json,
}

impl OutputFormat {
  pub fn is_json(self) -> bool {
    matches!(self, OutputFormat::Json)
  }
}

fn symbol(status: Status) -> &'static str {
  match status {
    Status::Progress => "→",
    Status::Success => "✓",
    Status::Warning => "⚠",
    Status::Error => "✗",
    Status::Info => "•",
  }
}

pub fn print_status(status: Status, message: &str) {
  let mark = symbol(status);
  match status {
    Status::Progress => println!("{} {}", mark.if_supports_color(Stream::Stdout, |s| s.cyan()), message),
    Status::Success => println!("{} {}", mark.if_supports_color(Stream::Stdout, |s| s.green()), message),
    Status::Info => println!("{} {}", mark.if_supports_color(Stream::Stdout, |s| s.blue()), message),
    Status::Warning => eprintln!(
      "{} {}",
      mark.if_supports_color(Stream::Stderr, |s| s.yellow()),
      message.if_supports_color(Stream::Stderr, |s| s.yellow())
    ),
    Status::Error => eprintln!(
      "{} {}",
      mark.if_supports_color(Stream::Stderr, |s| s.red()),
      message.if_supports_color(Stream::Stderr, |s| s.red())
    ),
  }
}

/// Indented `label value` row, labels padded to a common column.
pub fn print_field(label: &str, value: &str) {
  let label = format!("{:<width$}", label, width = FIELD_WIDTH);
  println!("  {} {}", label.if_supports_color(Stream::Stdout, |s| s.dimmed()), value);
}

pub fn print_section(title: &str) {
  println!("{}", title.if_supports_color(Stream::Stdout, |s| s.bold()));
}

pub fn print_rule() {
  println!("{}", "-".repeat(RULE_WIDTH));
}

pub fn print_banner(title: &str) {
  let rule = "=".repeat(RULE_WIDTH);
  println!();
  println!("{}", rule);
  println!("{}", title.if_supports_color(Stream::Stdout, |s| s.bold()));
  println!("{}", rule);
  println!();
}

pub fn print_json<T: serde::Serialize>(value: &T) -> anyhow::Result<()> {
  let json = serde_json::to_string_pretty(value).context("Failed to serialize to JSON")?;
  println!("{}", json);
  Ok(())
}

/// `09865ea5…7acdab02` style abbreviation of a hex digest.
pub fn short_digest(digest: &str) -> String {
  if digest.len() <= 17 || !digest.is_ascii() {
    return digest.to_string();
  }
  format!("{}…{}", &digest[..8], &digest[digest.len() - 8..])
}

/// Size in binary units: toolchain archives run to tens of MiB, DLLs to KiB.
pub fn format_size(bytes: u64) -> String {
  const UNITS: [&str; 3] = ["KiB", "MiB", "GiB"];

  if bytes < 1024 {
    return format!("{} B", bytes);
  }
  let mut value = bytes as f64 / 1024.0;
  let mut unit = 0;
  while value >= 1024.0 && unit < UNITS.len() - 1 {
    value /= 1024.0;
    unit += 1;
  }
  format!("{:.1} {}", value, UNITS[unit])
}

pub fn format_elapsed(elapsed: Duration) -> String {
  let secs = elapsed.as_secs();
  if secs >= 60 {
    format!("{}m {:02}s", secs / 60, secs % 60)
  } else {
    format!("{}.{}s", secs, elapsed.subsec_millis() / 100)
  }
}

fn progress_line(progress: &DownloadProgress) -> String {
  format!(
    "  {} {:>5.1}%  {} of {}  (attempt {}/{})",
    progress.name,
    progress.percent(),
    format_size(progress.downloaded),
    format_size(progress.total),
    progress.attempt,
    progress.max_attempts
  )
}

/// Prints pipeline status lines to the terminal.
#[derive(Default)]
pub struct ConsoleReporter {
  // Whether a progress line is currently open on stderr.
  progress_open: Mutex<bool>,
}

impl ConsoleReporter {
  fn close_progress(&self) {
    if let Ok(mut open) = self.progress_open.lock()
      && *open
    {
      eprintln!();
      *open = false;
    }
  }
}

impl Reporter for ConsoleReporter {
  fn status(&self, status: Status, message: &str) {
    self.close_progress();
    print_status(status, message);
  }

  fn download_progress(&self, progress: &DownloadProgress) {
    let mut stderr = std::io::stderr();
    let _ = write!(stderr, "\r{}", progress_line(progress));
    let _ = stderr.flush();

    if let Ok(mut open) = self.progress_open.lock() {
      *open = progress.downloaded < progress.total;
      if !*open {
        let _ = writeln!(stderr);
      }
    }
  }
}
