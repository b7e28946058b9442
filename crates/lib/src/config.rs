//! Build configuration and its resolution into a concrete plan.
//!
//! Every field has a default, so an empty JSON object (or no file at all)
//! describes the stock ohook 0.5 build. Paths left unset fall back to the
//! platform defaults, which honor `OHOOK_ROOT` and `OHOOK_LINK_ROOT`.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::clock::ClockSettings;
use crate::consts::{
  BUILD_TOOL_RELATIVE, MINGW32_DIR_NAME, MINGW32_URL, MINGW64_DIR_NAME, MINGW64_URL, OHOOK_URL, SOURCE_ARCHIVE_ROOT,
};
use crate::fetch::{ResourceDescriptor, RetrySettings};
use crate::layout::DirectoryLayout;
use crate::link::LinkSpec;
use crate::platform::paths;
use crate::stage::{StagingAction, StagingStep};
use crate::verify::ChecksumRegistry;

#[derive(Debug, Error)]
pub enum ConfigError {
  #[error("failed to read config {path}: {source}")]
  Read {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },

  #[error("failed to parse config {path}: {source}")]
  Parse {
    path: PathBuf,
    #[source]
    source: serde_json::Error,
  },

  #[error("invalid config: {0}")]
  Invalid(String),
}

/// A directory of the layout, as named in configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LayoutDir {
  Source,
  Compilers,
  Temp,
  Output,
}

impl LayoutDir {
  pub fn resolve(self, layout: &DirectoryLayout) -> PathBuf {
    match self {
      LayoutDir::Source => layout.source.clone(),
      LayoutDir::Compilers => layout.compilers.clone(),
      LayoutDir::Temp => layout.temp.clone(),
      LayoutDir::Output => layout.output.clone(),
    }
  }
}

/// How a downloaded archive is placed into the layout.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum UnpackRule {
  /// Extract to scratch and promote the archive's `top_level` directory.
  Promote { top_level: String, destination: LayoutDir },
  /// Extract straight into a layout directory and expect `expect` inside it.
  InPlace { into: LayoutDir, expect: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceSpec {
  pub name: String,
  pub url: String,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub sha256: Option<String>,
  pub unpack: UnpackRule,
}

/// Default resource set: source snapshot plus both toolchains.
pub fn default_resources() -> Vec<ResourceSpec> {
  vec![
    ResourceSpec {
      name: "ohook".to_string(),
      url: OHOOK_URL.to_string(),
      sha256: None,
      unpack: UnpackRule::Promote {
        top_level: SOURCE_ARCHIVE_ROOT.to_string(),
        destination: LayoutDir::Source,
      },
    },
    ResourceSpec {
      name: "mingw32".to_string(),
      url: MINGW32_URL.to_string(),
      sha256: None,
      unpack: UnpackRule::InPlace {
        into: LayoutDir::Compilers,
        expect: MINGW32_DIR_NAME.to_string(),
      },
    },
    ResourceSpec {
      name: "mingw64".to_string(),
      url: MINGW64_URL.to_string(),
      sha256: None,
      unpack: UnpackRule::InPlace {
        into: LayoutDir::Compilers,
        expect: MINGW64_DIR_NAME.to_string(),
      },
    },
  ]
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolSettings {
  /// Explicit extractor path. Unset means search.
  pub extractor: Option<PathBuf>,
  /// Build tool path. Unset means `<link_root>/mingw64/bin/mingw32-make.exe`.
  pub build_tool: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BuildConfig {
  pub root: Option<PathBuf>,
  pub link_root: Option<PathBuf>,
  pub resources: Vec<ResourceSpec>,
  pub checksums: ChecksumRegistry,
  pub retry: RetrySettings,
  pub clock: ClockSettings,
  pub tools: ToolSettings,
  /// Keep the scratch directory after a successful run.
  pub keep_temp: bool,
  pub require_elevation: bool,
}

impl Default for BuildConfig {
  fn default() -> Self {
    Self {
      root: None,
      link_root: None,
      resources: default_resources(),
      checksums: ChecksumRegistry::default(),
      retry: RetrySettings::default(),
      clock: ClockSettings::default(),
      tools: ToolSettings::default(),
      keep_temp: false,
      require_elevation: true,
    }
  }
}

impl BuildConfig {
  /// Load a JSON config file; missing fields take their defaults.
  pub fn load(path: &Path) -> Result<Self, ConfigError> {
    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Read {
      path: path.to_path_buf(),
      source: e,
    })?;
    let config = serde_json::from_str(&content).map_err(|e| ConfigError::Parse {
      path: path.to_path_buf(),
      source: e,
    })?;
    debug!(path = ?path, "config loaded");
    Ok(config)
  }

  /// Load `path` if given, defaults otherwise.
  pub fn load_or_default(path: Option<&Path>) -> Result<Self, ConfigError> {
    match path {
      Some(path) => Self::load(path),
      None => Ok(Self::default()),
    }
  }

  pub fn validate(&self) -> Result<(), ConfigError> {
    if self.resources.is_empty() {
      return Err(ConfigError::Invalid("no resources configured".to_string()));
    }
    if self.checksums.is_empty() {
      return Err(ConfigError::Invalid("checksum registry is empty".to_string()));
    }

    let mut seen = HashSet::new();
    for resource in &self.resources {
      if !seen.insert(resource.name.as_str()) {
        return Err(ConfigError::Invalid(format!("duplicate resource name: {}", resource.name)));
      }
      if let Some(digest) = &resource.sha256
        && !is_sha256_hex(digest)
      {
        return Err(ConfigError::Invalid(format!(
          "resource {} has a malformed sha256: {}",
          resource.name, digest
        )));
      }
    }

    for (name, digest) in self.checksums.iter() {
      if !is_sha256_hex(digest) {
        return Err(ConfigError::Invalid(format!("checksum for {} is malformed: {}", name, digest)));
      }
    }

    Ok(())
  }

  /// Resolve every path and derived setting.
  pub fn plan(&self) -> Result<BuildPlan, ConfigError> {
    self.validate()?;

    let root = self.root.clone().unwrap_or_else(paths::root_dir);
    let link_root = self.link_root.clone().unwrap_or_else(paths::link_root);
    let layout = DirectoryLayout::new(root, link_root);

    let resources: Vec<ResourceDescriptor> = self
      .resources
      .iter()
      .map(|r| ResourceDescriptor::new(&r.name, &r.url, &layout.temp, r.sha256.clone()))
      .collect();

    let staging = self
      .resources
      .iter()
      .zip(&resources)
      .map(|(spec, descriptor)| StagingStep {
        resource: spec.name.clone(),
        archive: descriptor.destination.clone(),
        action: match &spec.unpack {
          UnpackRule::Promote { top_level, destination } => StagingAction::Promote {
            scratch: layout.temp.join(format!("{}-extract", spec.name)),
            top_level: top_level.clone(),
            destination: destination.resolve(&layout),
          },
          UnpackRule::InPlace { into, expect } => {
            let into = into.resolve(&layout);
            StagingAction::InPlace {
              expect: into.join(expect),
              into,
            }
          }
        },
      })
      .collect();

    let links = vec![
      LinkSpec {
        link: layout.mingw64_link(),
        target: layout.mingw64.clone(),
      },
      LinkSpec {
        link: layout.mingw32_link(),
        target: layout.mingw32.clone(),
      },
      LinkSpec {
        link: layout.source_link(),
        target: layout.source.clone(),
      },
    ];

    let build_tool = self
      .tools
      .build_tool
      .clone()
      .unwrap_or_else(|| layout.link_root.join(BUILD_TOOL_RELATIVE));

    Ok(BuildPlan {
      build_dir: layout.source_link(),
      layout,
      resources,
      staging,
      links,
      build_tool,
      extractor: self.tools.extractor.clone(),
      checksums: self.checksums.clone(),
      retry: self.retry.clone(),
      clock: self.clock.clone(),
      keep_temp: self.keep_temp,
      require_elevation: self.require_elevation,
    })
  }
}

fn is_sha256_hex(value: &str) -> bool {
  let value = value.trim();
  value.len() == 64 && value.chars().all(|c| c.is_ascii_hexdigit())
}

/// Fully resolved inputs of one pipeline run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BuildPlan {
  pub layout: DirectoryLayout,
  pub resources: Vec<ResourceDescriptor>,
  pub staging: Vec<StagingStep>,
  pub links: Vec<LinkSpec>,
  /// Working directory of the build, reached through the source link.
  pub build_dir: PathBuf,
  pub build_tool: PathBuf,
  pub extractor: Option<PathBuf>,
  pub checksums: ChecksumRegistry,
  pub retry: RetrySettings,
  pub clock: ClockSettings,
  pub keep_temp: bool,
  pub require_elevation: bool,
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::consts::{LINK_ROOT_ENV, ROOT_ENV};
  use serial_test::serial;
  use tempfile::TempDir;

  fn config_at(root: &str, link_root: &str) -> BuildConfig {
    BuildConfig {
      root: Some(PathBuf::from(root)),
      link_root: Some(PathBuf::from(link_root)),
      ..Default::default()
    }
  }

  #[test]
  fn empty_object_is_default() {
    let config: BuildConfig = serde_json::from_str("{}").unwrap();
    assert_eq!(config, BuildConfig::default());
    assert!(config.require_elevation);
    assert_eq!(config.resources.len(), 3);
  }

  #[test]
  fn partial_config_keeps_other_defaults() {
    let config: BuildConfig = serde_json::from_str(r#"{"keep_temp": true, "retry": {"max_attempts": 5}}"#).unwrap();
    assert!(config.keep_temp);
    assert_eq!(config.retry.max_attempts, 5);
    assert_eq!(config.retry.backoff_ms, crate::consts::DEFAULT_BACKOFF_MS);
    assert_eq!(config.checksums, ChecksumRegistry::default());
  }

  #[test]
  fn unpack_rule_is_tagged() {
    let rule: UnpackRule = serde_json::from_str(r#"{"kind": "in_place", "into": "compilers", "expect": "mingw64"}"#).unwrap();
    assert_eq!(
      rule,
      UnpackRule::InPlace {
        into: LayoutDir::Compilers,
        expect: "mingw64".to_string()
      }
    );
  }

  #[test]
  fn load_reads_file() {
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("ohook.json");
    std::fs::write(&path, r#"{"root": "/srv/ohook", "require_elevation": false}"#).unwrap();

    let config = BuildConfig::load(&path).unwrap();

    assert_eq!(config.root, Some(PathBuf::from("/srv/ohook")));
    assert!(!config.require_elevation);
  }

  #[test]
  fn load_reports_parse_errors_with_path() {
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("broken.json");
    std::fs::write(&path, "{ not json").unwrap();

    let err = BuildConfig::load(&path).unwrap_err();

    assert!(matches!(err, ConfigError::Parse { path: ref p, .. } if p == &path));
  }

  #[test]
  fn load_missing_file_is_read_error() {
    let err = BuildConfig::load(Path::new("/nonexistent/ohook.json")).unwrap_err();
    assert!(matches!(err, ConfigError::Read { .. }));
  }

  #[test]
  fn plan_resolves_default_layout() {
    let plan = config_at("/base", "/links").plan().unwrap();

    assert_eq!(plan.layout.root, PathBuf::from("/base"));
    assert_eq!(plan.build_dir, PathBuf::from("/links/ohook"));
    assert_eq!(
      plan.build_tool,
      PathBuf::from("/links").join("mingw64/bin/mingw32-make.exe")
    );
    assert_eq!(plan.resources[0].destination, PathBuf::from("/base/Temp/0.5.zip"));
    assert_eq!(plan.links.len(), 3);
    assert_eq!(plan.links[2].target, PathBuf::from("/base/ohook"));
  }

  #[test]
  fn plan_builds_staging_steps() {
    let plan = config_at("/base", "/links").plan().unwrap();

    assert_eq!(
      plan.staging[0].action,
      StagingAction::Promote {
        scratch: PathBuf::from("/base/Temp/ohook-extract"),
        top_level: "ohook-0.5".to_string(),
        destination: PathBuf::from("/base/ohook"),
      }
    );
    assert_eq!(
      plan.staging[2].action,
      StagingAction::InPlace {
        into: PathBuf::from("/base/Compiladores"),
        expect: PathBuf::from("/base/Compiladores/mingw64"),
      }
    );
    assert_eq!(plan.staging[2].archive, plan.resources[2].destination);
  }

  #[test]
  #[serial]
  fn plan_falls_back_to_env_roots() {
    temp_env::with_vars(
      [(ROOT_ENV, Some("/env/root")), (LINK_ROOT_ENV, Some("/env/links"))],
      || {
        let plan = BuildConfig::default().plan().unwrap();
        assert_eq!(plan.layout.root, PathBuf::from("/env/root"));
        assert_eq!(plan.layout.link_root, PathBuf::from("/env/links"));
      },
    );
  }

  #[test]
  #[serial]
  fn explicit_root_beats_env() {
    temp_env::with_var(ROOT_ENV, Some("/env/root"), || {
      let plan = config_at("/explicit", "/links").plan().unwrap();
      assert_eq!(plan.layout.root, PathBuf::from("/explicit"));
    });
  }

  #[test]
  fn validate_rejects_duplicate_names() {
    let mut config = BuildConfig::default();
    config.resources.push(config.resources[0].clone());

    let err = config.validate().unwrap_err();
    assert!(err.to_string().contains("duplicate resource name: ohook"));
  }

  #[test]
  fn validate_rejects_malformed_digest() {
    let mut config = BuildConfig::default();
    config.resources[0].sha256 = Some("abc".to_string());

    assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
  }

  #[test]
  fn validate_rejects_empty_registry() {
    let config = BuildConfig {
      checksums: ChecksumRegistry::new(Default::default()),
      ..Default::default()
    };
    assert!(config.validate().is_err());
  }

  #[test]
  fn default_config_is_valid() {
    assert!(BuildConfig::default().validate().is_ok());
  }
}
