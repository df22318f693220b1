//! Implementation of the `fnpack deploy` command.
//!
//! Builds and packages the functions, then hands the artifact manifest to the
//! provisioner as a deploy plan.

use std::path::PathBuf;
use std::time::Instant;

use anyhow::{Context, Result, bail};
use clap::Args;
use serde::Serialize;

use fnpack_lib::context::{DEFAULT_CONTEXT_FILE, DeploymentContext};
use fnpack_lib::pipeline::PipelineResult;
use fnpack_lib::provision::{
  DEFAULT_PLAN_FILE, DEFAULT_RUNTIME, HandoffProvisioner, ProvisionRequest, Provisioner,
};

use crate::cmd::args::BuildArgs;
use crate::cmd::build::{check_outcome, print_report, run_pipeline};
use crate::output::{OutputFormat, print_json, print_stat, print_success};

#[derive(Debug, Clone, Args)]
pub struct DeployArgs {
  #[command(flatten)]
  pub build: BuildArgs,

  /// Where the deploy plan is written
  #[arg(long, env = "FNPACK_PLAN", default_value = DEFAULT_PLAN_FILE)]
  pub plan: PathBuf,

  /// Function runtime identifier
  #[arg(long, env = "FNPACK_RUNTIME", default_value = DEFAULT_RUNTIME)]
  pub runtime: String,

  /// Service name [default: from the deployment context]
  #[arg(long, env = "FNPACK_SERVICE")]
  pub service: Option<String>,
}

#[derive(Serialize)]
struct DeployOutput<'a> {
  build: &'a PipelineResult,
  plan: PathBuf,
  url: Option<String>,
}

pub fn cmd_deploy(args: &DeployArgs, output: OutputFormat) -> Result<()> {
  let start = Instant::now();

  let context_path = args
    .build
    .context
    .clone()
    .unwrap_or_else(|| PathBuf::from(DEFAULT_CONTEXT_FILE));
  let context = DeploymentContext::load(&context_path)
    .with_context(|| format!("Failed to load deployment context {}", context_path.display()))?;

  let result = run_pipeline(&args.build, Some(&context), "deploy")?;
  if !output.is_json() {
    print_report(&result, start.elapsed());
  }
  check_outcome(&result, args.build.allow_partial)?;

  let deployable = result.deployable();
  if deployable.is_empty() {
    bail!("No functions to deploy");
  }

  let stack = context.stack();
  let mut request = ProvisionRequest::new(
    args.service.clone().unwrap_or_else(|| context.service.name.clone()),
    deployable,
    result.artifacts.clone(),
  );
  request.runtime = args.runtime.clone();
  request.timeout = stack.timeout;
  request.memory = stack.memory;
  request.environment = context.function_environment();
  request.domain = context.domain_fqd().map(str::to_string);

  let provisioner = HandoffProvisioner::new(&args.plan);
  let rt = tokio::runtime::Runtime::new().context("Failed to create async runtime")?;
  let outcome = rt
    .block_on(provisioner.provision(&request))
    .context("Provisioning failed")?;

  if output.is_json() {
    print_json(&DeployOutput {
      build: &result,
      plan: provisioner.plan_path().to_path_buf(),
      url: outcome.url,
    })?;
  } else {
    println!();
    print_success(&format!("Deploy plan written to {}", provisioner.plan_path().display()));
    print_stat("Endpoints", &request.inventory.len().to_string());
    if let Some(url) = &outcome.url {
      print_stat("URL", url);
    }
  }

  Ok(())
}
