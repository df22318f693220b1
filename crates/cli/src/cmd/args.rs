//! Arguments shared by several subcommands and their resolution into library
//! configuration.
//!
//! Precedence: command-line flag (or its `FNPACK_*` variable), then the stack
//! section of the deployment context, then built-in defaults.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Args, ValueEnum};

use fnpack_lib::build::{
  BuildConfig, BuildStrategy, DEFAULT_COMPILE_COMMAND, DEFAULT_MINIFY_COMMAND, DEFAULT_PLATFORM, PerFunctionConfig,
};
use fnpack_lib::cache::CacheStore;
use fnpack_lib::consts::{BUILD_CACHE_KEY, DEFAULT_CACHE_FILE, DEFAULT_SOURCE_EXT};
use fnpack_lib::context::DeploymentContext;
use fnpack_lib::discover::Exclusions;
use fnpack_lib::pipeline::{DEFAULT_SOURCE_ROOT, PipelineConfig};

#[derive(Debug, Clone, Args)]
pub struct SourceArgs {
  /// Source tree laid out as <module>/<function>.<ext>
  #[arg(short, long, env = "FNPACK_SOURCE", default_value = DEFAULT_SOURCE_ROOT)]
  pub source: PathBuf,

  /// Function source extension
  #[arg(long, env = "FNPACK_EXT", default_value = DEFAULT_SOURCE_EXT)]
  pub ext: String,

  /// Directory prefixes that are not modules (replaces the default set)
  #[arg(long = "exclude", env = "FNPACK_EXCLUDE", value_delimiter = ',')]
  pub exclude: Vec<String>,
}

impl SourceArgs {
  pub fn source_root(&self) -> PathBuf {
    dunce::canonicalize(&self.source).unwrap_or_else(|_| self.source.clone())
  }

  pub fn exclusions(&self) -> Exclusions {
    if self.exclude.is_empty() {
      Exclusions::default()
    } else {
      Exclusions::new(self.exclude.iter().cloned())
    }
  }
}

#[derive(Debug, Clone, Args)]
pub struct CacheArgs {
  /// Operation cache store
  #[arg(long = "cache", env = "FNPACK_CACHE", default_value = DEFAULT_CACHE_FILE)]
  pub path: PathBuf,
}

impl CacheArgs {
  pub fn store(&self, command: &str) -> CacheStore {
    CacheStore::new(&self.path).with_command(format!("fnpack {}", command))
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum StrategyArg {
  PerFunction,
  Batch,
}

#[derive(Debug, Clone, Args)]
pub struct BuildArgs {
  #[command(flatten)]
  pub source: SourceArgs,

  #[command(flatten)]
  pub cache: CacheArgs,

  /// Deployment context supplying stack defaults
  #[arg(long, env = "FNPACK_CONTEXT")]
  pub context: Option<PathBuf>,

  /// Build strategy [default: batch when a build command is configured]
  #[arg(long, value_enum, env = "FNPACK_STRATEGY")]
  pub strategy: Option<StrategyArg>,

  /// Shell pipeline for the batch strategy
  #[arg(long, env = "FNPACK_BUILD_COMMAND")]
  pub build_command: Option<String>,

  /// Dependency install command run before building
  #[arg(long, env = "FNPACK_INSTALL_COMMAND")]
  pub install_command: Option<String>,

  /// Per-function compile template
  #[arg(long, env = "FNPACK_COMPILE")]
  pub compile: Option<String>,

  /// Per-function minify template
  #[arg(long, env = "FNPACK_MINIFY", conflicts_with = "no_minify")]
  pub minify: Option<String>,

  /// Skip the minify step
  #[arg(long)]
  pub no_minify: bool,

  /// Runtime platform passed to the compiler
  #[arg(long, env = "FNPACK_PLATFORM", default_value = DEFAULT_PLATFORM)]
  pub platform: String,

  /// Functions compiled concurrently [default: available CPUs]
  #[arg(short, long, env = "FNPACK_JOBS", value_parser = clap::value_parser!(u16).range(1..))]
  pub jobs: Option<u16>,

  /// Limit for each tool invocation (e.g. 90s, 5m)
  #[arg(long, env = "FNPACK_TOOL_TIMEOUT")]
  pub tool_timeout: Option<humantime::Duration>,

  /// Limit for the whole run; cancels in-flight tools when reached
  #[arg(long, env = "FNPACK_TIMEOUT")]
  pub timeout: Option<humantime::Duration>,

  /// Shell used to run tool scripts
  #[arg(long, env = "FNPACK_SHELL")]
  pub shell: Option<String>,

  /// Extra environment for tools, KEY=VALUE
  #[arg(short = 'e', long = "env", value_parser = parse_key_val)]
  pub env: Vec<(String, String)>,

  /// Activate the project's node version through nvm (also enabled by USE_NVM)
  #[arg(long)]
  pub use_nvm: bool,

  /// Cache key for the build result
  #[arg(long, env = "FNPACK_CACHE_KEY", default_value = BUILD_CACHE_KEY)]
  pub cache_key: String,

  /// Always build, neither replaying nor recording results
  #[arg(long)]
  pub no_cache: bool,

  /// Succeed when at least one function was packaged
  #[arg(long)]
  pub allow_partial: bool,
}

impl BuildArgs {
  pub fn load_context(&self) -> Result<Option<DeploymentContext>> {
    self
      .context
      .as_deref()
      .map(|path| {
        DeploymentContext::load(path).with_context(|| format!("Failed to load deployment context {}", path.display()))
      })
      .transpose()
  }

  pub fn overall_timeout(&self) -> Option<Duration> {
    self.timeout.map(Into::into)
  }

  pub fn cache_store(&self, command: &str) -> CacheStore {
    self.cache.store(command).with_enabled(!self.no_cache)
  }

  fn per_function(&self) -> BuildStrategy {
    BuildStrategy::PerFunction(PerFunctionConfig {
      compile: self.compile.clone().unwrap_or_else(|| DEFAULT_COMPILE_COMMAND.to_string()),
      minify: if self.no_minify {
        None
      } else {
        Some(self.minify.clone().unwrap_or_else(|| DEFAULT_MINIFY_COMMAND.to_string()))
      },
      platform: self.platform.clone(),
    })
  }

  pub fn pipeline_config(&self, context: Option<&DeploymentContext>) -> Result<PipelineConfig> {
    let stack = context.map(|c| c.stack());
    let build_command = self
      .build_command
      .clone()
      .or_else(|| stack.and_then(|s| s.build_command.clone()));
    let install = self
      .install_command
      .clone()
      .or_else(|| stack.and_then(|s| s.install_command.clone()));

    let strategy = match self.strategy {
      Some(StrategyArg::Batch) => BuildStrategy::Batch {
        command: build_command
          .context("Batch strategy needs --build-command or a buildCommand in the deployment context")?,
      },
      Some(StrategyArg::PerFunction) => self.per_function(),
      None => match build_command {
        Some(command) if self.compile.is_none() => BuildStrategy::Batch { command },
        _ => self.per_function(),
      },
    };

    let defaults = BuildConfig::default();
    let build = BuildConfig {
      strategy,
      install,
      parallelism: self.jobs.map(usize::from).unwrap_or(defaults.parallelism),
      tool_timeout: self.tool_timeout.map(Into::into),
      env: self.env.iter().cloned().collect::<BTreeMap<_, _>>(),
      shell: self.shell.clone(),
      use_nvm: self.use_nvm || nvm_requested(),
    };

    Ok(PipelineConfig {
      source_root: self.source.source_root(),
      extension: self.source.ext.clone(),
      exclusions: self.source.exclusions(),
      build,
      cache_key: self.cache_key.clone(),
    })
  }
}

fn nvm_requested() -> bool {
  std::env::var_os("USE_NVM").is_some_and(|v| !v.is_empty())
}

fn parse_key_val(s: &str) -> Result<(String, String), String> {
  let (key, value) = s.split_once('=').ok_or_else(|| format!("expected KEY=VALUE, got '{}'", s))?;
  if key.is_empty() {
    return Err(format!("empty variable name in '{}'", s));
  }
  Ok((key.to_string(), value.to_string()))
}

#[cfg(test)]
mod tests {
  use super::*;
  use clap::Parser;

  #[derive(Parser)]
  struct Harness {
    #[command(flatten)]
    build: BuildArgs,
  }

  fn parse(args: &[&str]) -> BuildArgs {
    let mut argv = vec!["fnpack"];
    argv.extend_from_slice(args);
    Harness::parse_from(argv).build
  }

  fn context(stack: &str) -> DeploymentContext {
    serde_json::from_str(&format!(
      r#"{{"platform":{{"name":"p"}},"service":{{"name":"s"}},"deployment":{{"config":{{"stack":{}}}}}}}"#,
      stack
    ))
    .unwrap()
  }

  #[test]
  fn defaults_to_per_function() {
    let config = parse(&[]).pipeline_config(None).unwrap();

    match config.build.strategy {
      BuildStrategy::PerFunction(cfg) => {
        assert_eq!(cfg.compile, DEFAULT_COMPILE_COMMAND);
        assert_eq!(cfg.minify.as_deref(), Some(DEFAULT_MINIFY_COMMAND));
        assert_eq!(cfg.platform, "node");
      }
      other => panic!("unexpected strategy: {other:?}"),
    }
    assert_eq!(config.cache_key, "build");
    assert_eq!(config.extension, "ts");
  }

  #[test]
  fn context_build_command_selects_batch() {
    let ctx = context(r#"{"buildCommand":"yarn build","installCommand":"yarn"}"#);
    let config = parse(&[]).pipeline_config(Some(&ctx)).unwrap();

    assert_eq!(
      config.build.strategy,
      BuildStrategy::Batch {
        command: "yarn build".to_string()
      }
    );
    assert_eq!(config.build.install.as_deref(), Some("yarn"));
  }

  #[test]
  fn flags_override_context() {
    let ctx = context(r#"{"buildCommand":"yarn build","installCommand":"yarn"}"#);
    let config = parse(&["--strategy", "per-function", "--install-command", "npm ci", "--no-minify"])
      .pipeline_config(Some(&ctx))
      .unwrap();

    match config.build.strategy {
      BuildStrategy::PerFunction(cfg) => assert!(cfg.minify.is_none()),
      other => panic!("unexpected strategy: {other:?}"),
    }
    assert_eq!(config.build.install.as_deref(), Some("npm ci"));
  }

  #[test]
  fn explicit_compile_wins_over_context_build_command() {
    let ctx = context(r#"{"buildCommand":"yarn build"}"#);
    let config = parse(&["--compile", "cp $${entry} $${outfile}"])
      .pipeline_config(Some(&ctx))
      .unwrap();

    assert!(matches!(config.build.strategy, BuildStrategy::PerFunction(_)));
  }

  #[test]
  fn batch_without_command_is_rejected() {
    let err = parse(&["--strategy", "batch"]).pipeline_config(None).unwrap_err();
    assert!(err.to_string().contains("--build-command"));
  }

  #[test]
  fn tool_settings_are_forwarded() {
    let config = parse(&[
      "-j",
      "3",
      "--tool-timeout",
      "90s",
      "-e",
      "NODE_ENV=production",
      "--exclude",
      "build,vendor",
    ])
    .pipeline_config(None)
    .unwrap();

    assert_eq!(config.build.parallelism, 3);
    assert_eq!(config.build.tool_timeout, Some(Duration::from_secs(90)));
    assert_eq!(
      config.build.env.get("NODE_ENV").map(String::as_str),
      Some("production")
    );
    assert!(config.exclusions.is_excluded("vendor"));
    assert!(!config.exclusions.is_excluded("node_modules"));
  }

  #[test]
  #[serial_test::serial]
  fn use_nvm_environment_enables_nvm() {
    temp_env::with_var("USE_NVM", Some("1"), || {
      let config = parse(&[]).pipeline_config(None).unwrap();
      assert!(config.build.use_nvm);
    });
    temp_env::with_var("USE_NVM", None::<&str>, || {
      let config = parse(&[]).pipeline_config(None).unwrap();
      assert!(!config.build.use_nvm);
    });
  }

  #[test]
  fn key_val_parsing() {
    assert_eq!(parse_key_val("A=b=c").unwrap(), ("A".to_string(), "b=c".to_string()));
    assert!(parse_key_val("novalue").is_err());
    assert!(parse_key_val("=x").is_err());
  }
}
