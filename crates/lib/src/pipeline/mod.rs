//! End-to-end build phase.
//!
//! [`run`] discovers the function inventory, builds it through the operation
//! cache and packages every function that built. Deciding whether a partial
//! result is deployable is left to the caller.
//!
//! Only a fully successful build is recorded in the cache. A build with
//! failures is still packaged for the functions that did build, but the next
//! run rebuilds from scratch.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::build::{self, BuildConfig, BuildError, BuildFailure, BuildReport};
use crate::cache::{CacheError, CacheStatus, CacheStore, CacheStoreError};
use crate::consts::{BUILD_CACHE_KEY, DEFAULT_SOURCE_EXT};
use crate::discover::{self, DiscoveryError, Exclusions, FunctionInventory, ModuleFunction};
use crate::package::{ArtifactManifest, pack_artifact};

pub const DEFAULT_SOURCE_ROOT: &str = "source";

#[derive(Debug, Error)]
pub enum PipelineError {
  #[error(transparent)]
  Discovery(#[from] DiscoveryError),

  #[error(transparent)]
  Build(BuildError),

  #[error(transparent)]
  Cache(#[from] CacheStoreError),

  #[error("pipeline cancelled")]
  Cancelled,
}

#[derive(Debug, Clone)]
pub struct PipelineConfig {
  pub source_root: PathBuf,
  /// Source file extension, with or without the leading dot.
  pub extension: String,
  pub exclusions: Exclusions,
  pub build: BuildConfig,
  /// Cache key the build result is recorded under.
  pub cache_key: String,
}

impl Default for PipelineConfig {
  fn default() -> Self {
    Self {
      source_root: PathBuf::from(DEFAULT_SOURCE_ROOT),
      extension: DEFAULT_SOURCE_EXT.to_string(),
      exclusions: Exclusions::default(),
      build: BuildConfig::default(),
      cache_key: BUILD_CACHE_KEY.to_string(),
    }
  }
}

/// A function whose bundle could not be archived.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackagingFailure {
  pub function: ModuleFunction,
  pub diagnostic: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineResult {
  pub inventory: FunctionInventory,
  pub artifacts: ArtifactManifest,
  pub build_failures: Vec<BuildFailure>,
  pub packaging_failures: Vec<PackagingFailure>,
  /// The build step was replayed from the cache.
  pub from_cache: bool,
}

impl PipelineResult {
  /// Every discovered function was built and packaged.
  pub fn is_complete(&self) -> bool {
    self.build_failures.is_empty() && self.packaging_failures.is_empty() && self.artifacts.len() == self.inventory.len()
  }

  pub fn failure_count(&self) -> usize {
    self.build_failures.len() + self.packaging_failures.len()
  }

  /// The functions that have an artifact, in inventory order.
  pub fn deployable(&self) -> FunctionInventory {
    FunctionInventory::new(
      self
        .inventory
        .iter()
        .filter(|f| self.artifacts.artifact_for(f).is_some())
        .cloned()
        .collect(),
    )
  }
}

/// Why the cached build step did not record a result.
enum BuildStepError {
  Build(BuildError),
  Incomplete(BuildReport),
}

pub async fn run(
  config: &PipelineConfig,
  cache: &CacheStore,
  cancel: &CancellationToken,
) -> Result<PipelineResult, PipelineError> {
  let source_root = &config.source_root;

  let inventory = discover::discover(source_root, &config.extension, &config.exclusions)?;
  info!(
    functions = inventory.len(),
    source = %source_root.display(),
    "discovered functions"
  );

  let step = cache
    .run_once_with_status(&config.cache_key, || async {
      let report = build::build(&inventory, source_root, &config.build, cancel)
        .await
        .map_err(BuildStepError::Build)?;
      if report.is_success() {
        Ok(report)
      } else {
        Err(BuildStepError::Incomplete(report))
      }
    })
    .await;

  let (report, status) = match step {
    Ok(done) => done,
    Err(CacheError::Operation(BuildStepError::Incomplete(report))) => {
      warn!(
        key = %config.cache_key,
        failed = report.failures.len(),
        "build incomplete, result not cached"
      );
      (report, CacheStatus::Executed)
    }
    Err(CacheError::Operation(BuildStepError::Build(BuildError::Cancelled))) => return Err(PipelineError::Cancelled),
    Err(CacheError::Operation(BuildStepError::Build(e))) => {
      error!(error = %e, "build failed");
      return Err(PipelineError::Build(e));
    }
    Err(CacheError::Store(e)) => return Err(PipelineError::Cache(e)),
  };

  if cancel.is_cancelled() {
    return Err(PipelineError::Cancelled);
  }

  let mut artifacts = ArtifactManifest::default();
  let mut packaging_failures = Vec::new();
  for compiled in &report.built {
    match pack_artifact(&compiled.function, &compiled.output) {
      Ok(artifact) => artifacts.push(artifact),
      Err(e) => {
        error!(function = %compiled.function, error = %e, "packaging failed");
        packaging_failures.push(PackagingFailure {
          function: compiled.function.clone(),
          diagnostic: e.to_string(),
        });
      }
    }
  }

  let from_cache = status == CacheStatus::Replayed;
  info!(
    artifacts = artifacts.len(),
    build_failures = report.failures.len(),
    packaging_failures = packaging_failures.len(),
    from_cache,
    "pipeline finished"
  );

  Ok(PipelineResult {
    inventory,
    artifacts,
    build_failures: report.failures,
    packaging_failures,
    from_cache,
  })
}
