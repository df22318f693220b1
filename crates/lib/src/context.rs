//! Deployment context document.
//!
//! The surrounding deployment process hands over a JSON document (usually
//! `context.json`) describing the platform, the service and its stack
//! configuration. Only the fields the build phase needs are read; everything
//! else, credentials included, is ignored.

use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Deserializer, Serialize};
use thiserror::Error;
use tracing::debug;

pub const DEFAULT_CONTEXT_FILE: &str = "context.json";

/// Names the platform in every deployed function's environment.
pub const PLATFORM_ENV_VAR: &str = "EXOBASE_PLATFORM";
/// Names the service in every deployed function's environment.
pub const SERVICE_ENV_VAR: &str = "EXOBASE_SERVICE";

#[derive(Debug, Error)]
pub enum ContextError {
  #[error("failed to read deployment context {path}: {source}")]
  Read {
    path: PathBuf,
    #[source]
    source: io::Error,
  },

  #[error("invalid deployment context {path}: {source}")]
  Parse {
    path: PathBuf,
    #[source]
    source: serde_json::Error,
  },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeploymentContext {
  pub platform: Platform,
  pub service: Service,
  pub deployment: Deployment,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Platform {
  pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Service {
  pub name: String,
  #[serde(default)]
  pub domain: Option<Domain>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Domain {
  /// Fully qualified domain the service is published under.
  pub fqd: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Deployment {
  pub config: DeploymentConfig,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeploymentConfig {
  #[serde(default)]
  pub stack: StackConfig,
  #[serde(default)]
  pub environment_variables: Vec<EnvironmentVariable>,
}

/// Stack settings. `timeout` and `memory` arrive as numbers or numeric strings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StackConfig {
  #[serde(default, deserialize_with = "number_or_string")]
  pub timeout: Option<u64>,
  #[serde(default, deserialize_with = "number_or_string")]
  pub memory: Option<u64>,
  #[serde(default)]
  pub build_command: Option<String>,
  #[serde(default)]
  pub install_command: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvironmentVariable {
  pub name: String,
  pub value: String,
}

impl DeploymentContext {
  pub fn load(path: &Path) -> Result<Self, ContextError> {
    let content = fs::read_to_string(path).map_err(|source| ContextError::Read {
      path: path.to_path_buf(),
      source,
    })?;

    let context: Self = serde_json::from_str(&content).map_err(|source| ContextError::Parse {
      path: path.to_path_buf(),
      source,
    })?;

    debug!(
      path = %path.display(),
      platform = %context.platform.name,
      service = %context.service.name,
      "loaded deployment context"
    );
    Ok(context)
  }

  pub fn stack(&self) -> &StackConfig {
    &self.deployment.config.stack
  }

  pub fn domain_fqd(&self) -> Option<&str> {
    self.service.domain.as_ref().map(|d| d.fqd.as_str())
  }

  /// Environment every deployed function receives: the configured variables
  /// plus the platform and service identity, which cannot be overridden.
  pub fn function_environment(&self) -> BTreeMap<String, String> {
    let mut env = self.environment();
    env.insert(PLATFORM_ENV_VAR.to_string(), self.platform.name.clone());
    env.insert(SERVICE_ENV_VAR.to_string(), self.service.name.clone());
    env
  }

  /// Configured environment variables by name; a repeated name keeps its last value.
  pub fn environment(&self) -> BTreeMap<String, String> {
    self
      .deployment
      .config
      .environment_variables
      .iter()
      .map(|ev| (ev.name.clone(), ev.value.clone()))
      .collect()
  }
}

fn number_or_string<'de, D>(deserializer: D) -> Result<Option<u64>, D::Error>
where
  D: Deserializer<'de>,
{
  #[derive(Deserialize)]
  #[serde(untagged)]
  enum Raw {
    Number(u64),
    Text(String),
  }

  match Option::<Raw>::deserialize(deserializer)? {
    None => Ok(None),
    Some(Raw::Number(n)) => Ok(Some(n)),
    Some(Raw::Text(s)) => s
      .trim()
      .parse()
      .map(Some)
      .map_err(|_| serde::de::Error::custom(format!("expected a number, got '{}'", s))),
  }
}
