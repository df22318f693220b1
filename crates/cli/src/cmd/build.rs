//! Implementation of the `fnpack build` command.
//!
//! Runs the full build phase (discover, build through the cache, package) and
//! reports every artifact and failure.

use std::time::{Duration, Instant};

use anyhow::{Context, Result, bail};

use fnpack_lib::context::DeploymentContext;
use fnpack_lib::pipeline::{self, PipelineResult};

use crate::cmd::args::BuildArgs;
use crate::cmd::run_cancellable;
use crate::output::{
  OutputFormat, format_elapsed, print_diagnostic, print_error, print_info, print_json, print_stat, print_success,
  print_warning, symbols,
};

pub fn cmd_build(args: &BuildArgs, output: OutputFormat) -> Result<()> {
  let start = Instant::now();
  let context = args.load_context()?;
  let result = run_pipeline(args, context.as_ref(), "build")?;

  if output.is_json() {
    print_json(&result)?;
  } else {
    print_report(&result, start.elapsed());
  }

  check_outcome(&result, args.allow_partial)
}

/// Resolve configuration and run the pipeline.
pub(crate) fn run_pipeline(
  args: &BuildArgs,
  context: Option<&DeploymentContext>,
  command: &str,
) -> Result<PipelineResult> {
  let config = args.pipeline_config(context)?;
  let cache = args.cache_store(command);

  run_cancellable(args.overall_timeout(), |cancel| async move {
    pipeline::run(&config, &cache, &cancel).await
  })?
  .context("Build failed")
}

pub(crate) fn print_report(result: &PipelineResult, elapsed: Duration) {
  for artifact in result.artifacts.iter() {
    print_success(&format!(
      "{} {} {} ({} bytes, sha256 {})",
      artifact.function,
      symbols::ARROW,
      artifact.archive.display(),
      artifact.size,
      artifact.sha256.short()
    ));
  }

  for failure in &result.build_failures {
    let what = if failure.invocation_failed {
      "could not run the build tool"
    } else {
      "failed to build"
    };
    print_error(&format!("{} {}", failure.function, what));
    print_diagnostic(&failure.diagnostic);
  }

  for failure in &result.packaging_failures {
    print_error(&format!("{} failed to package", failure.function));
    print_diagnostic(&failure.diagnostic);
  }

  println!();
  if result.from_cache {
    print_info("Build replayed from cache");
  }
  print_stat("Functions", &result.inventory.len().to_string());
  print_stat("Packaged", &result.artifacts.len().to_string());
  print_stat("Failed", &result.failure_count().to_string());
  print_stat("Duration", &format_elapsed(elapsed));
}

/// Exit policy: any failure fails the command unless partial results are
/// allowed and at least one artifact exists.
pub(crate) fn check_outcome(result: &PipelineResult, allow_partial: bool) -> Result<()> {
  if result.is_complete() {
    return Ok(());
  }

  if allow_partial && !result.artifacts.is_empty() {
    print_warning(&format!(
      "Continuing with {} of {} functions",
      result.artifacts.len(),
      result.inventory.len()
    ));
    return Ok(());
  }

  bail!(
    "{} of {} functions failed",
    result.failure_count(),
    result.inventory.len()
  )
}
