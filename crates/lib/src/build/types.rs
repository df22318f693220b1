use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::discover::ModuleFunction;
use crate::template::{self, FUNCTION_PLACEHOLDERS, TemplateError};
use crate::tool::ToolError;

pub const DEFAULT_COMPILE_COMMAND: &str =
  "npx esbuild $${entry} --bundle --platform=$${platform} --outfile=$${outfile}";

pub const DEFAULT_MINIFY_COMMAND: &str = "npx terser $${outfile} --compress --mangle --output $${outfile}";

pub const DEFAULT_PLATFORM: &str = "node";

/// How the source tree is turned into compiled bundles.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BuildStrategy {
  /// One shell pipeline for the whole tree (e.g. `yarn && yarn build`).
  /// Its own multi-entry bundling is trusted to write every function's output.
  Batch { command: String },

  /// One compiler invocation per function, each with that function's source
  /// as the only entry point.
  PerFunction(PerFunctionConfig),
}

impl Default for BuildStrategy {
  fn default() -> Self {
    BuildStrategy::PerFunction(PerFunctionConfig::default())
  }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PerFunctionConfig {
  /// Compile template; see [`crate::template`] for placeholders.
  pub compile: String,
  /// Run on the compiled bundle after a successful compile.
  pub minify: Option<String>,
  /// Runtime platform profile passed as `$${platform}`.
  pub platform: String,
}

impl Default for PerFunctionConfig {
  fn default() -> Self {
    Self {
      compile: DEFAULT_COMPILE_COMMAND.to_string(),
      minify: Some(DEFAULT_MINIFY_COMMAND.to_string()),
      platform: DEFAULT_PLATFORM.to_string(),
    }
  }
}

/// Configuration for the build step.
#[derive(Debug, Clone)]
pub struct BuildConfig {
  pub strategy: BuildStrategy,

  /// Dependency install run once in the source root before building.
  pub install: Option<String>,

  /// Maximum number of functions compiled at the same time.
  pub parallelism: usize,

  /// Per tool invocation.
  pub tool_timeout: Option<Duration>,

  /// Extra variables for every tool.
  pub env: BTreeMap<String, String>,

  /// Shell override for tool scripts.
  pub shell: Option<String>,

  /// Prefix tool scripts with `nvm use`.
  pub use_nvm: bool,
}

impl Default for BuildConfig {
  fn default() -> Self {
    Self {
      strategy: BuildStrategy::default(),
      install: None,
      parallelism: num_cpus(),
      tool_timeout: None,
      env: BTreeMap::new(),
      shell: None,
      use_nvm: false,
    }
  }
}

impl BuildConfig {
  /// Reject malformed command templates before any tool starts.
  pub fn validate(&self) -> Result<(), BuildError> {
    if let BuildStrategy::PerFunction(cfg) = &self.strategy {
      template::validate(&cfg.compile, FUNCTION_PLACEHOLDERS)?;
      if let Some(minify) = &cfg.minify {
        template::validate(minify, FUNCTION_PLACEHOLDERS)?;
      }
    }
    Ok(())
  }
}

fn num_cpus() -> usize {
  std::thread::available_parallelism().map(|p| p.get()).unwrap_or(4)
}

/// A function whose bundle was written.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompiledFunction {
  pub function: ModuleFunction,
  pub output: PathBuf,
}

/// One function that could not be built while the others carried on.
///
/// A failure that aborts the whole build is a [`BuildError`] instead.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildFailure {
  pub function: ModuleFunction,
  /// Raw diagnostic output of the failing tool.
  pub diagnostic: String,
  /// True when the tool could not be started (e.g. missing compiler),
  /// false when it ran and reported failure.
  pub invocation_failed: bool,
}

impl std::fmt::Display for BuildFailure {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    let kind = if self.invocation_failed {
      "could not start build tool"
    } else {
      "build failed"
    };
    write!(f, "{}: {}\n{}", self.function, kind, self.diagnostic)
  }
}

/// Outcome of the build step: what was compiled and what failed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildReport {
  pub built: Vec<CompiledFunction>,
  pub failures: Vec<BuildFailure>,
}

impl BuildReport {
  pub fn is_success(&self) -> bool {
    self.failures.is_empty()
  }

  pub fn total(&self) -> usize {
    self.built.len() + self.failures.len()
  }
}

/// Errors that abort the build step as a whole.
#[derive(Debug, Error)]
pub enum BuildError {
  #[error("dependency install failed: {0}")]
  Install(#[source] ToolError),

  #[error("batch build failed: {0}")]
  Batch(#[source] ToolError),

  #[error("invalid build command template: {0}")]
  Template(#[from] TemplateError),

  #[error("build cancelled")]
  Cancelled,
}
