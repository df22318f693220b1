//! Per-function build execution.
//!
//! Each function is compiled by its own tool invocation and then minified.
//! Functions run concurrently up to the configured parallelism; a failure is
//! recorded against its function and never stops the others.

use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::discover::{FunctionInventory, ModuleFunction};
use crate::template::{self, Segment, Vars};
use crate::tool::{ToolCommand, ToolError, run_tool};

use super::types::{BuildConfig, BuildError, BuildFailure, BuildReport, CompiledFunction, PerFunctionConfig};

/// Why a single function did not produce a bundle.
enum Outcome {
  Failed(BuildFailure),
  Cancelled,
}

/// Parsed templates and settings shared by every function task.
struct FunctionJob {
  source_root: PathBuf,
  compile: Vec<Segment>,
  minify: Option<Vec<Segment>>,
  platform: String,
  config: BuildConfig,
}

pub(super) async fn build_functions(
  inventory: &FunctionInventory,
  source_root: &Path,
  per_function: &PerFunctionConfig,
  config: &BuildConfig,
  cancel: &CancellationToken,
) -> Result<BuildReport, BuildError> {
  let job = Arc::new(FunctionJob {
    source_root: source_root.to_path_buf(),
    compile: template::parse(&per_function.compile)?,
    minify: per_function.minify.as_deref().map(template::parse).transpose()?,
    platform: per_function.platform.clone(),
    config: config.clone(),
  });

  let parallelism = config.parallelism.max(1);
  info!(functions = inventory.len(), parallelism, "building functions");

  let semaphore = Arc::new(Semaphore::new(parallelism));
  let mut join_set = JoinSet::new();
  let mut in_flight: HashMap<tokio::task::Id, ModuleFunction> = HashMap::new();

  for function in inventory {
    let job = job.clone();
    let semaphore = semaphore.clone();
    let cancel = cancel.clone();
    let task_function = function.clone();

    let handle = join_set.spawn(async move {
      let Ok(_permit) = semaphore.acquire().await else {
        return Err(Outcome::Cancelled);
      };
      build_one(&task_function, &job, &cancel).await
    });
    in_flight.insert(handle.id(), function.clone());
  }

  let mut report = BuildReport::default();
  let mut cancelled = false;

  while let Some(joined) = join_set.join_next_with_id().await {
    match joined {
      Ok((id, Ok(compiled))) => {
        in_flight.remove(&id);
        info!(function = %compiled.function, "function built");
        report.built.push(compiled);
      }
      Ok((id, Err(Outcome::Failed(failure)))) => {
        in_flight.remove(&id);
        error!(function = %failure.function, "function build failed");
        report.failures.push(failure);
      }
      Ok((id, Err(Outcome::Cancelled))) => {
        in_flight.remove(&id);
        cancelled = true;
      }
      Err(join_error) => {
        let Some(function) = in_flight.remove(&join_error.id()) else {
          error!(error = %join_error, "unknown build task failed");
          continue;
        };
        error!(function = %function, error = %join_error, "build task panicked");
        report.failures.push(BuildFailure {
          function,
          diagnostic: format!("build task panicked: {}", join_error),
          invocation_failed: true,
        });
      }
    }
  }

  if cancelled || cancel.is_cancelled() {
    warn!("build cancelled, removing partial outputs");
    for function in inventory {
      remove_if_exists(&function.compiled_path(source_root)).await;
    }
    return Err(BuildError::Cancelled);
  }

  report.built.sort_by(|a, b| a.function.cmp(&b.function));
  report.failures.sort_by(|a, b| a.function.cmp(&b.function));

  info!(
    built = report.built.len(),
    failed = report.failures.len(),
    "function builds complete"
  );

  Ok(report)
}

async fn build_one(
  function: &ModuleFunction,
  job: &FunctionJob,
  cancel: &CancellationToken,
) -> Result<CompiledFunction, Outcome> {
  let outdir = function.output_dir(&job.source_root);
  let outfile = function.compiled_path(&job.source_root);
  let archive = function.archive_path(&job.source_root);

  tokio::fs::create_dir_all(&outdir)
    .await
    .map_err(|e| io_failure(function, &outdir, e))?;

  for stale in [&outfile, &archive] {
    match tokio::fs::remove_file(stale).await {
      Ok(()) => debug!(function = %function, path = ?stale, "removed stale output"),
      Err(e) if e.kind() == io::ErrorKind::NotFound => {}
      Err(e) => return Err(io_failure(function, stale, e)),
    }
  }

  let vars = Vars::new()
    .set("entry", function.source.to_string_lossy())
    .set("outfile", outfile.to_string_lossy())
    .set("outdir", outdir.to_string_lossy())
    .set("module", function.module.as_str())
    .set("function", function.function.as_str())
    .set("platform", job.platform.as_str())
    .set("source", job.source_root.to_string_lossy());

  run_step(function, "compile", &job.compile, &vars, job, cancel).await?;

  if !outfile.is_file() {
    return Err(Outcome::Failed(BuildFailure {
      function: function.clone(),
      diagnostic: format!(
        "compiler exited successfully but wrote no bundle at {}",
        outfile.display()
      ),
      invocation_failed: false,
    }));
  }

  if let Some(minify) = &job.minify {
    run_step(function, "minify", minify, &vars, job, cancel).await?;
  }

  Ok(CompiledFunction {
    function: function.clone(),
    output: outfile,
  })
}

async fn run_step(
  function: &ModuleFunction,
  step: &str,
  segments: &[Segment],
  vars: &Vars,
  job: &FunctionJob,
  cancel: &CancellationToken,
) -> Result<(), Outcome> {
  let script = template::render_shell(segments, vars).map_err(|e| {
    Outcome::Failed(BuildFailure {
      function: function.clone(),
      diagnostic: e.to_string(),
      invocation_failed: true,
    })
  })?;

  let cmd = ToolCommand::new(format!("{} {}", step, function), script, &job.source_root)
    .with_env(&job.config.env)
    .with_timeout(job.config.tool_timeout)
    .with_shell(job.config.shell.as_deref())
    .with_nvm(job.config.use_nvm);

  run_tool(&cmd, cancel)
    .await
    .map(|_| ())
    .map_err(|e| tool_failure(function, e))
}

fn tool_failure(function: &ModuleFunction, err: ToolError) -> Outcome {
  if err.is_cancelled() {
    return Outcome::Cancelled;
  }
  Outcome::Failed(BuildFailure {
    function: function.clone(),
    diagnostic: err.diagnostic(),
    invocation_failed: err.is_spawn_failure(),
  })
}

fn io_failure(function: &ModuleFunction, path: &Path, err: io::Error) -> Outcome {
  Outcome::Failed(BuildFailure {
    function: function.clone(),
    diagnostic: format!("{}: {}", path.display(), err),
    invocation_failed: true,
  })
}

async fn remove_if_exists(path: &Path) {
  match tokio::fs::remove_file(path).await {
    Ok(()) => debug!(path = ?path, "removed partial output"),
    Err(e) if e.kind() == io::ErrorKind::NotFound => {}
    Err(e) => warn!(path = ?path, error = %e, "failed to remove partial output"),
  }
}
