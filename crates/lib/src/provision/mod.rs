//! Hand-off to the provisioner.
//!
//! Provisioning cloud resources is not done here. A [`Provisioner`] receives
//! the inventory and artifact manifest of a finished build and turns them into
//! live endpoints. [`HandoffProvisioner`] is the implementation shipped with
//! the CLI: it writes the request as a deploy plan for an external tool.

use std::collections::BTreeMap;
use std::future::Future;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;

use crate::discover::{FunctionInventory, ModuleFunction, dash_case};
use crate::package::ArtifactManifest;
use crate::util::hash::ContentHash;

pub const DEFAULT_RUNTIME: &str = "nodejs20.x";
pub const DEFAULT_PLAN_FILE: &str = "deploy-plan.json";

#[derive(Debug, Error)]
pub enum ProvisionError {
  #[error("{function} has no packaged artifact")]
  MissingArtifact { function: String },

  #[error("failed to write deploy plan {path}: {source}")]
  Write {
    path: PathBuf,
    #[source]
    source: io::Error,
  },

  #[error("failed to serialize deploy plan: {0}")]
  Serialize(#[from] serde_json::Error),

  #[error("{first} and {second} both map to resource name {resource}")]
  DuplicateResource {
    resource: String,
    first: String,
    second: String,
  },
}

/// Everything a provisioner needs to publish one service.
#[derive(Debug, Clone)]
pub struct ProvisionRequest {
  pub service: String,
  pub inventory: FunctionInventory,
  pub artifacts: ArtifactManifest,
  pub runtime: String,
  /// Seconds.
  pub timeout: Option<u64>,
  /// Megabytes.
  pub memory: Option<u64>,
  pub environment: BTreeMap<String, String>,
  pub domain: Option<String>,
}

/// One function as the provisioner should publish it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Endpoint {
  pub module: String,
  pub function: String,
  pub resource: String,
  pub handler: String,
  pub archive: PathBuf,
  pub sha256: ContentHash,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProvisionOutcome {
  pub url: Option<String>,
}

pub trait Provisioner {
  fn provision(&self, request: &ProvisionRequest)
  -> impl Future<Output = Result<ProvisionOutcome, ProvisionError>> + Send;
}

impl ProvisionRequest {
  pub fn new(service: impl Into<String>, inventory: FunctionInventory, artifacts: ArtifactManifest) -> Self {
    Self {
      service: service.into(),
      inventory,
      artifacts,
      runtime: DEFAULT_RUNTIME.to_string(),
      timeout: None,
      memory: None,
      environment: BTreeMap::new(),
      domain: None,
    }
  }

  /// Resource name prefix for the service.
  pub fn service_resource(&self) -> String {
    dash_case(&self.service)
  }

  pub fn handler_for(&self, function: &ModuleFunction) -> String {
    function.handler_name()
  }

  /// Resolve every inventory function to its endpoint, failing on the first
  /// function without an artifact or whose resource name is already taken.
  pub fn endpoints(&self) -> Result<Vec<Endpoint>, ProvisionError> {
    let prefix = self.service_resource();
    let mut owners: BTreeMap<String, &ModuleFunction> = BTreeMap::new();
    let mut endpoints = Vec::with_capacity(self.inventory.len());

    for function in &self.inventory {
      let artifact = self
        .artifacts
        .artifact_for(function)
        .ok_or_else(|| ProvisionError::MissingArtifact {
          function: function.to_string(),
        })?;

      let resource = format!("{}-{}", prefix, function.resource_name());
      if let Some(first) = owners.insert(resource.clone(), function) {
        return Err(ProvisionError::DuplicateResource {
          resource,
          first: first.to_string(),
          second: function.to_string(),
        });
      }

      endpoints.push(Endpoint {
        module: function.module.clone(),
        function: function.function.clone(),
        resource,
        handler: self.handler_for(function),
        archive: artifact.archive.clone(),
        sha256: artifact.sha256.clone(),
      });
    }

    Ok(endpoints)
  }
}

/// The public URL of a service: its domain when one is configured, otherwise
/// whatever the provisioner reported.
pub fn resolve_url(domain: Option<&str>, reported: Option<&str>) -> Option<String> {
  domain.or(reported).map(str::to_string)
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeployPlan {
  pub service: String,
  pub runtime: String,
  pub timeout: Option<u64>,
  pub memory: Option<u64>,
  pub environment: BTreeMap<String, String>,
  pub domain: Option<String>,
  pub endpoints: Vec<Endpoint>,
}

/// Writes the request to a deploy plan file for an external provisioner.
#[derive(Debug, Clone)]
pub struct HandoffProvisioner {
  plan_path: PathBuf,
}

impl HandoffProvisioner {
  pub fn new(plan_path: impl Into<PathBuf>) -> Self {
    Self {
      plan_path: plan_path.into(),
    }
  }

  pub fn plan_path(&self) -> &Path {
    &self.plan_path
  }

  pub fn plan(request: &ProvisionRequest) -> Result<DeployPlan, ProvisionError> {
    Ok(DeployPlan {
      service: request.service_resource(),
      runtime: request.runtime.clone(),
      timeout: request.timeout,
      memory: request.memory,
      environment: request.environment.clone(),
      domain: request.domain.clone(),
      endpoints: request.endpoints()?,
    })
  }

  fn write_plan(&self, plan: &DeployPlan) -> Result<(), ProvisionError> {
    let write_err = |source| ProvisionError::Write {
      path: self.plan_path.clone(),
      source,
    };

    let dir = match self.plan_path.parent() {
      Some(dir) if !dir.as_os_str().is_empty() => dir,
      _ => Path::new("."),
    };
    std::fs::create_dir_all(dir).map_err(write_err)?;

    let mut temp = tempfile::NamedTempFile::new_in(dir).map_err(write_err)?;
    serde_json::to_writer_pretty(temp.as_file_mut(), plan)?;
    temp.write_all(b"\n").map_err(write_err)?;
    temp.persist(&self.plan_path).map_err(|e| write_err(e.error))?;
    Ok(())
  }
}

impl Provisioner for HandoffProvisioner {
  async fn provision(&self, request: &ProvisionRequest) -> Result<ProvisionOutcome, ProvisionError> {
    let plan = Self::plan(request)?;
    self.write_plan(&plan)?;

    info!(
      plan = %self.plan_path.display(),
      service = %plan.service,
      endpoints = plan.endpoints.len(),
      "deploy plan written"
    );

    Ok(ProvisionOutcome {
      url: resolve_url(request.domain.as_deref(), None),
    })
  }
}
