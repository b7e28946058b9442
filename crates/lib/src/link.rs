//! Directory indirections at the paths the upstream build hardcodes.
//!
//! Setup is idempotent: a path that already exists is left as it is. This
//! has a known hazard. A link left behind by an earlier run keeps pointing
//! wherever it pointed then, and the build will read that content. The
//! linker reports the current target of such a link but never rewrites it.
//!
//! Teardown is best-effort and never fails; problems come back as warnings.

use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::status::{Reporter, Status, emit};

#[derive(Debug, Error)]
#[error("failed to link {link} -> {target}: {source}")]
pub struct LinkError {
  pub link: PathBuf,
  pub target: PathBuf,
  #[source]
  pub source: io::Error,
}

/// A cleanup problem that is reported but never escalated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LinkWarning {
  pub link: PathBuf,
  pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LinkSpec {
  /// Fixed path the external build reads from.
  pub link: PathBuf,
  /// Staged directory the link redirects to.
  pub target: PathBuf,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct LinkReport {
  pub created: Vec<PathBuf>,
  /// Paths that already existed and were left untouched.
  pub skipped: Vec<PathBuf>,
}

/// Filesystem primitive for directory links.
pub trait DirLinker: Send + Sync {
  fn create(&self, target: &Path, link: &Path) -> io::Result<()>;

  /// Current target of a link, if `link` is one.
  fn read_target(&self, link: &Path) -> Option<PathBuf>;

  /// Remove the link entry itself, never the content behind it.
  fn remove(&self, link: &Path) -> io::Result<()>;
}

/// Junctions on Windows, symlinks elsewhere.
#[derive(Debug, Default, Clone, Copy)]
pub struct NativeLinker;

impl DirLinker for NativeLinker {
  #[cfg(windows)]
  fn create(&self, target: &Path, link: &Path) -> io::Result<()> {
    // Junctions need an absolute, resolved target.
    let target = dunce::canonicalize(target)?;
    junction::create(&target, link)
  }

  #[cfg(unix)]
  fn create(&self, target: &Path, link: &Path) -> io::Result<()> {
    std::os::unix::fs::symlink(target, link)
  }

  #[cfg(windows)]
  fn read_target(&self, link: &Path) -> Option<PathBuf> {
    if let Ok(target) = std::fs::read_link(link) {
      return Some(target);
    }
    junction::get_target(link).ok()
  }

  #[cfg(unix)]
  fn read_target(&self, link: &Path) -> Option<PathBuf> {
    std::fs::read_link(link).ok()
  }

  #[cfg(windows)]
  fn remove(&self, link: &Path) -> io::Result<()> {
    // A junction or directory symlink is removed like an empty directory,
    // which also refuses to delete a real directory with content.
    std::fs::remove_dir(link)
  }

  #[cfg(unix)]
  fn remove(&self, link: &Path) -> io::Result<()> {
    let metadata = std::fs::symlink_metadata(link)?;
    if metadata.file_type().is_symlink() {
      std::fs::remove_file(link)
    } else {
      std::fs::remove_dir(link)
    }
  }
}

/// True if anything, including a dangling link, occupies `path`.
fn occupied(path: &Path) -> bool {
  std::fs::symlink_metadata(path).is_ok()
}

pub struct EnvironmentLinker {
  links: Vec<LinkSpec>,
  linker: Arc<dyn DirLinker>,
}

impl EnvironmentLinker {
  pub fn new(links: Vec<LinkSpec>, linker: Arc<dyn DirLinker>) -> Self {
    Self { links, linker }
  }

  pub fn links(&self) -> &[LinkSpec] {
    &self.links
  }

  /// Create every missing indirection.
  pub fn establish(&self, reporter: &dyn Reporter) -> Result<LinkReport, LinkError> {
    let mut report = LinkReport::default();

    for spec in &self.links {
      if occupied(&spec.link) {
        match self.linker.read_target(&spec.link) {
          Some(current) if current != spec.target => {
            warn!(
              link = ?spec.link,
              current = ?current,
              expected = ?spec.target,
              "existing link points elsewhere; leaving it in place"
            );
            emit(
              reporter,
              Status::Warning,
              &format!(
                "{} already points to {} (expected {}); the build will use that content",
                spec.link.display(),
                current.display(),
                spec.target.display()
              ),
            );
          }
          Some(_) => debug!(link = ?spec.link, "link already in place"),
          None => {
            warn!(link = ?spec.link, "path already exists and is not a link; leaving it in place");
            emit(
              reporter,
              Status::Warning,
              &format!("{} already exists and is not a link; leaving it in place", spec.link.display()),
            );
          }
        }
        report.skipped.push(spec.link.clone());
        continue;
      }

      emit(
        reporter,
        Status::Progress,
        &format!("Linking {} -> {}", spec.link.display(), spec.target.display()),
      );

      self.linker.create(&spec.target, &spec.link).map_err(|e| LinkError {
        link: spec.link.clone(),
        target: spec.target.clone(),
        source: e,
      })?;

      info!(link = ?spec.link, target = ?spec.target, "link created");
      emit(reporter, Status::Success, &format!("Link {} created", spec.link.display()));
      report.created.push(spec.link.clone());
    }

    Ok(report)
  }

  /// Remove every indirection that is present. Never fails.
  pub fn teardown(&self, reporter: &dyn Reporter) -> Vec<LinkWarning> {
    let mut warnings = Vec::new();

    for spec in &self.links {
      if !occupied(&spec.link) {
        continue;
      }

      emit(reporter, Status::Progress, &format!("Removing link {}...", spec.link.display()));

      if let Err(e) = self.linker.remove(&spec.link) {
        warn!(link = ?spec.link, error = %e, "failed to remove link");
        warnings.push(LinkWarning {
          link: spec.link.clone(),
          message: e.to_string(),
        });
      }
    }

    warnings
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::status::SilentReporter;
  use crate::util::testutil::RecordingReporter;
  use std::sync::Mutex;
  use tempfile::TempDir;

  /// Records calls and optionally fails removal.
  #[derive(Default)]
  struct RecordingLinker {
    created: Mutex<Vec<PathBuf>>,
    fail_remove: bool,
  }

  impl DirLinker for RecordingLinker {
    fn create(&self, target: &Path, link: &Path) -> io::Result<()> {
      self.created.lock().unwrap().push(link.to_path_buf());
      NativeLinker.create(target, link)
    }

    fn read_target(&self, link: &Path) -> Option<PathBuf> {
      NativeLinker.read_target(link)
    }

    fn remove(&self, link: &Path) -> io::Result<()> {
      if self.fail_remove {
        return Err(io::Error::new(io::ErrorKind::PermissionDenied, "access denied"));
      }
      NativeLinker.remove(link)
    }
  }

  fn specs(temp: &Path) -> Vec<LinkSpec> {
    ["mingw64", "mingw32", "ohook"]
      .iter()
      .map(|name| {
        let target = temp.join("staged").join(name);
        std::fs::create_dir_all(&target).unwrap();
        LinkSpec {
          link: temp.join("links").join(name),
          target,
        }
      })
      .collect()
  }

  #[test]
  fn establish_creates_missing_links() {
    let temp = TempDir::new().unwrap();
    std::fs::create_dir_all(temp.path().join("links")).unwrap();
    let linker = EnvironmentLinker::new(specs(temp.path()), Arc::new(NativeLinker));

    let report = linker.establish(&SilentReporter).unwrap();

    assert_eq!(report.created.len(), 3);
    assert!(report.skipped.is_empty());
    for spec in linker.links() {
      assert_eq!(NativeLinker.read_target(&spec.link).as_deref(), Some(spec.target.as_path()));
    }
  }

  #[test]
  fn establish_is_noop_when_links_exist() {
    let temp = TempDir::new().unwrap();
    let links = specs(temp.path());
    for spec in &links {
      std::fs::create_dir_all(&spec.link).unwrap();
    }
    let recording = Arc::new(RecordingLinker::default());
    let linker = EnvironmentLinker::new(links, recording.clone());

    let report = linker.establish(&SilentReporter).unwrap();

    assert!(report.created.is_empty());
    assert_eq!(report.skipped.len(), 3);
    assert!(recording.created.lock().unwrap().is_empty());
  }

  #[cfg(unix)]
  #[test]
  fn stale_link_is_left_untouched() {
    let temp = TempDir::new().unwrap();
    std::fs::create_dir_all(temp.path().join("links")).unwrap();
    let links = specs(temp.path());
    let stale = temp.path().join("old-run");
    std::fs::create_dir_all(&stale).unwrap();
    std::os::unix::fs::symlink(&stale, &links[0].link).unwrap();
    let linker = EnvironmentLinker::new(links, Arc::new(NativeLinker));
    let reporter = RecordingReporter::default();

    let report = linker.establish(&reporter).unwrap();

    assert_eq!(report.skipped, vec![linker.links()[0].link.clone()]);
    assert_eq!(NativeLinker.read_target(&linker.links()[0].link), Some(stale.clone()));
    let warnings: Vec<String> = reporter
      .statuses()
      .into_iter()
      .filter(|(status, _)| *status == Status::Warning)
      .map(|(_, message)| message)
      .collect();
    assert_eq!(warnings.len(), 1);
    assert!(warnings[0].contains(&stale.display().to_string()));
  }

  #[test]
  fn foreign_directory_at_link_path_is_reported() {
    let temp = TempDir::new().unwrap();
    let links = specs(temp.path());
    std::fs::create_dir_all(&links[2].link).unwrap();
    let linker = EnvironmentLinker::new(links, Arc::new(RecordingLinker::default()));
    let reporter = RecordingReporter::default();

    linker.establish(&reporter).unwrap();

    assert!(
      reporter
        .statuses()
        .iter()
        .any(|(status, message)| *status == Status::Warning && message.contains("is not a link"))
    );
  }

  #[test]
  fn establish_failure_names_link() {
    let temp = TempDir::new().unwrap();
    // Parent of the link paths is missing, so creation fails.
    let linker = EnvironmentLinker::new(specs(temp.path()), Arc::new(NativeLinker));

    let err = linker.establish(&SilentReporter).unwrap_err();
    assert_eq!(err.link, temp.path().join("links").join("mingw64"));
  }

  #[test]
  fn teardown_without_links_is_silent() {
    let temp = TempDir::new().unwrap();
    let linker = EnvironmentLinker::new(specs(temp.path()), Arc::new(NativeLinker));

    let warnings = linker.teardown(&SilentReporter);

    assert!(warnings.is_empty());
  }

  #[test]
  fn teardown_removes_links_but_not_content() {
    let temp = TempDir::new().unwrap();
    std::fs::create_dir_all(temp.path().join("links")).unwrap();
    let linker = EnvironmentLinker::new(specs(temp.path()), Arc::new(NativeLinker));
    linker.establish(&SilentReporter).unwrap();
    std::fs::write(linker.links()[2].target.join("Makefile"), "all:").unwrap();

    let warnings = linker.teardown(&SilentReporter);

    assert!(warnings.is_empty());
    for spec in linker.links() {
      assert!(!occupied(&spec.link));
      assert!(spec.target.is_dir());
    }
    assert!(linker.links()[2].target.join("Makefile").exists());
  }

  #[test]
  fn teardown_collects_failures_as_warnings() {
    let temp = TempDir::new().unwrap();
    std::fs::create_dir_all(temp.path().join("links")).unwrap();
    let links = specs(temp.path());
    for spec in &links {
      std::fs::create_dir_all(&spec.link).unwrap();
    }
    let linker = EnvironmentLinker::new(
      links,
      Arc::new(RecordingLinker {
        fail_remove: true,
        ..Default::default()
      }),
    );

    let warnings = linker.teardown(&SilentReporter);

    assert_eq!(warnings.len(), 3);
    assert!(warnings[0].message.contains("access denied"));
  }

  #[test]
  fn teardown_refuses_to_delete_real_directory_content() {
    let temp = TempDir::new().unwrap();
    let links = specs(temp.path());
    std::fs::create_dir_all(&links[0].link).unwrap();
    std::fs::write(links[0].link.join("important.txt"), "keep").unwrap();
    let linker = EnvironmentLinker::new(links, Arc::new(NativeLinker));

    let warnings = linker.teardown(&SilentReporter);

    assert_eq!(warnings.len(), 1);
    assert!(linker.links()[0].link.join("important.txt").exists());
  }
}
