//! Build orchestration.
//!
//! Turns a [`FunctionInventory`] into compiled bundles at
//! `<root>/build/modules/<module>/<function>.js`, using one of two
//! strategies:
//!
//! - **Batch**: one declared shell pipeline for the whole tree. Any failure is
//!   fatal to the build.
//! - **Per-function**: one compiler invocation per function plus an optional
//!   minify pass. Failures are isolated and collected in the [`BuildReport`].
//!
//! An empty inventory is always a successful no-op.
//!
//! # Submodules
//!
//! - [`execute`] - concurrent per-function execution

mod execute;
mod types;

use std::path::Path;

use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::discover::FunctionInventory;
use crate::tool::{ToolCommand, ToolError, run_tool};

pub use types::*;

/// Build every function in `inventory`.
///
/// Returns `Err` only for failures that abort the whole build: a failed
/// install or batch command, an invalid command template, or cancellation.
/// Per-function failures are reported in [`BuildReport::failures`].
pub async fn build(
  inventory: &FunctionInventory,
  source_root: &Path,
  config: &BuildConfig,
  cancel: &CancellationToken,
) -> Result<BuildReport, BuildError> {
  config.validate()?;

  if inventory.is_empty() {
    info!("no functions to build");
    return Ok(BuildReport::default());
  }

  if let Some(install) = &config.install {
    let cmd = tool_command("install", install, source_root, config);
    run_tool(&cmd, cancel).await.map_err(|e| fatal(e, BuildError::Install))?;
  }

  match &config.strategy {
    BuildStrategy::Batch { command } => build_batch(inventory, source_root, command, config, cancel).await,
    BuildStrategy::PerFunction(per_function) => {
      execute::build_functions(inventory, source_root, per_function, config, cancel).await
    }
  }
}

async fn build_batch(
  inventory: &FunctionInventory,
  source_root: &Path,
  command: &str,
  config: &BuildConfig,
  cancel: &CancellationToken,
) -> Result<BuildReport, BuildError> {
  info!(functions = inventory.len(), cmd = %command, "running batch build");

  let cmd = tool_command("batch build", command, source_root, config);
  run_tool(&cmd, cancel).await.map_err(|e| fatal(e, BuildError::Batch))?;

  let built = inventory
    .iter()
    .map(|function| CompiledFunction {
      function: function.clone(),
      output: function.compiled_path(source_root),
    })
    .collect();

  Ok(BuildReport {
    built,
    failures: Vec::new(),
  })
}

fn tool_command(label: &str, script: &str, source_root: &Path, config: &BuildConfig) -> ToolCommand {
  ToolCommand::new(label, script, source_root)
    .with_env(&config.env)
    .with_timeout(config.tool_timeout)
    .with_shell(config.shell.as_deref())
    .with_nvm(config.use_nvm)
}

fn fatal(err: ToolError, wrap: fn(ToolError) -> BuildError) -> BuildError {
  if err.is_cancelled() { BuildError::Cancelled } else { wrap(err) }
}
