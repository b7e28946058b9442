//! Runs the upstream build tool and collects what it produced.

use std::path::{Path, PathBuf};

use serde::Serialize;
use thiserror::Error;
use tokio::process::Command;
use tracing::{debug, error, info};

use crate::status::{Reporter, Status, emit};
use crate::util::hash::{HashError, hash_file};

#[derive(Debug, Error)]
pub enum BuildError {
  #[error("build directory not found: {0}")]
  SourceMissing(PathBuf),

  #[error("build tool not found: {0}")]
  ToolMissing(PathBuf),

  #[error("failed to start build tool {tool}: {source}")]
  Spawn {
    tool: PathBuf,
    #[source]
    source: std::io::Error,
  },

  #[error("build failed with exit code {code:?}: {stderr}")]
  Failed {
    code: Option<i32>,
    stdout: String,
    stderr: String,
  },

  #[error("build finished but {name} was not produced")]
  ArtifactMissing { name: String, stdout: String, stderr: String },

  #[error("build produced an empty {name}")]
  ArtifactEmpty { name: String },

  #[error(transparent)]
  Hash(#[from] HashError),
}

/// One file produced by the build.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BuildArtifact {
  pub name: String,
  pub path: PathBuf,
  pub size: u64,
  pub digest: String,
}

#[derive(Debug, Clone)]
pub struct CompilerInvoker {
  tool: PathBuf,
  expected: Vec<String>,
}

impl CompilerInvoker {
  pub fn new(tool: impl Into<PathBuf>, expected: Vec<String>) -> Self {
    Self {
      tool: tool.into(),
      expected,
    }
  }

  pub fn tool(&self) -> &Path {
    &self.tool
  }

  /// Run the build tool inside `source_dir` and return the expected outputs.
  ///
  /// The working directory is set on the child only.
  pub async fn build(&self, source_dir: &Path, reporter: &dyn Reporter) -> Result<Vec<BuildArtifact>, BuildError> {
    if !source_dir.is_dir() {
      emit(reporter, Status::Error, &format!("Directory {} not found", source_dir.display()));
      return Err(BuildError::SourceMissing(source_dir.to_path_buf()));
    }
    if !self.tool.is_file() {
      emit(reporter, Status::Error, &format!("Compiler not found: {}", self.tool.display()));
      return Err(BuildError::ToolMissing(self.tool.clone()));
    }

    emit(reporter, Status::Progress, "Compiling sppc DLLs...");
    info!(tool = ?self.tool, cwd = ?source_dir, "starting build");

    let output = Command::new(&self.tool)
      .current_dir(source_dir)
      .kill_on_drop(true)
      .output()
      .await
      .map_err(|e| BuildError::Spawn {
        tool: self.tool.clone(),
        source: e,
      })?;

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    debug!(stdout = %stdout.trim(), stderr = %stderr.trim(), "build output");

    if !output.status.success() {
      error!(code = ?output.status.code(), stderr = %stderr.trim(), "build failed");
      emit(reporter, Status::Error, &format!("Build failed: {}", stderr.trim()));
      return Err(BuildError::Failed {
        code: output.status.code(),
        stdout,
        stderr,
      });
    }

    let mut artifacts = Vec::with_capacity(self.expected.len());
    for name in &self.expected {
      let path = source_dir.join(name);
      let size = match std::fs::metadata(&path) {
        Ok(metadata) if metadata.is_file() => metadata.len(),
        _ => {
          error!(artifact = %name, stdout = %stdout.trim(), stderr = %stderr.trim(), "artifact not produced");
          emit(reporter, Status::Error, "The DLL files were not created by the build");
          return Err(BuildError::ArtifactMissing {
            name: name.clone(),
            stdout,
            stderr,
          });
        }
      };

      if size == 0 {
        emit(reporter, Status::Error, &format!("{} was created but is empty", name));
        return Err(BuildError::ArtifactEmpty { name: name.clone() });
      }

      info!(artifact = %name, size, "artifact built");
      let digest = hash_file(&path)?;
      artifacts.push(BuildArtifact {
        name: name.clone(),
        path,
        size,
        digest: digest.0,
      });
    }

    emit(reporter, Status::Success, "Compilation finished");
    Ok(artifacts)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::status::SilentReporter;
  use tempfile::TempDir;

  fn expected() -> Vec<String> {
    vec!["sppc32.dll".to_string(), "sppc64.dll".to_string()]
  }

  #[tokio::test]
  async fn missing_source_dir() {
    let temp = TempDir::new().unwrap();
    let invoker = CompilerInvoker::new(temp.path().join("make"), expected());

    let err = invoker.build(&temp.path().join("ohook"), &SilentReporter).await.unwrap_err();
    assert!(matches!(err, BuildError::SourceMissing(_)));
  }

  #[tokio::test]
  async fn missing_tool() {
    let temp = TempDir::new().unwrap();
    let invoker = CompilerInvoker::new(temp.path().join("mingw32-make.exe"), expected());

    let err = invoker.build(temp.path(), &SilentReporter).await.unwrap_err();
    assert!(matches!(err, BuildError::ToolMissing(_)));
  }

  #[cfg(unix)]
  mod unix {
    use super::*;
    use crate::util::hash::hash_bytes;
    use crate::util::testutil::write_script;

    #[tokio::test]
    async fn runs_in_source_dir_and_hashes_outputs() {
      let temp = TempDir::new().unwrap();
      let source = temp.path().join("ohook");
      std::fs::create_dir(&source).unwrap();
      let tool = write_script(
        temp.path(),
        "make",
        "printf 32 > sppc32.dll\nprintf 64 > sppc64.dll",
      );

      let artifacts = CompilerInvoker::new(tool, expected())
        .build(&source, &SilentReporter)
        .await
        .unwrap();

      assert_eq!(artifacts.len(), 2);
      assert_eq!(artifacts[0].path, source.join("sppc32.dll"));
      assert_eq!(artifacts[0].size, 2);
      assert_eq!(artifacts[0].digest, hash_bytes(b"32").0);
      assert_eq!(artifacts[1].digest, hash_bytes(b"64").0);
    }

    #[tokio::test]
    async fn non_zero_exit_carries_output() {
      let temp = TempDir::new().unwrap();
      let tool = write_script(temp.path(), "make", "echo compiling\necho 'undefined reference' >&2\nexit 2");

      let err = CompilerInvoker::new(tool, expected())
        .build(temp.path(), &SilentReporter)
        .await
        .unwrap_err();

      match err {
        BuildError::Failed { code, stdout, stderr } => {
          assert_eq!(code, Some(2));
          assert!(stdout.contains("compiling"));
          assert!(stderr.contains("undefined reference"));
        }
        other => panic!("unexpected error: {other}"),
      }
    }

    #[tokio::test]
    async fn missing_artifact_is_failure() {
      let temp = TempDir::new().unwrap();
      let tool = write_script(temp.path(), "make", "printf 32 > sppc32.dll");

      let err = CompilerInvoker::new(tool, expected())
        .build(temp.path(), &SilentReporter)
        .await
        .unwrap_err();

      assert!(matches!(err, BuildError::ArtifactMissing { ref name, .. } if name == "sppc64.dll"));
    }

    #[tokio::test]
    async fn empty_artifact_is_failure() {
      let temp = TempDir::new().unwrap();
      let tool = write_script(temp.path(), "make", "printf 32 > sppc32.dll\n: > sppc64.dll");

      let err = CompilerInvoker::new(tool, expected())
        .build(temp.path(), &SilentReporter)
        .await
        .unwrap_err();

      assert!(matches!(err, BuildError::ArtifactEmpty { ref name } if name == "sppc64.dll"));
    }

    #[tokio::test]
    async fn abandoned_build_kills_the_tool() {
      let temp = TempDir::new().unwrap();
      let marker = temp.path().join("finished");
      let tool = write_script(
        temp.path(),
        "make",
        &format!("sleep 1\ntouch {}", marker.display()),
      );
      let invoker = CompilerInvoker::new(tool, expected());

      let result = tokio::time::timeout(
        std::time::Duration::from_millis(200),
        invoker.build(temp.path(), &SilentReporter),
      )
      .await;
      assert!(result.is_err());

      tokio::time::sleep(std::time::Duration::from_millis(1500)).await;
      assert!(!marker.exists());
    }
  }
}
