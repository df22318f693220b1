mod cmd;
mod output;

use anyhow::Result;
use clap::{ArgAction, Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use cmd::{BuildArgs, CacheArgs, DeployArgs, SourceArgs};
use output::OutputFormat;

/// fnpack - build and package functions for deployment
#[derive(Parser)]
#[command(name = "fnpack")]
#[command(author, version, about, long_about = None)]
struct Cli {
  /// Increase log verbosity (-v info, -vv debug)
  #[arg(short, long, action = ArgAction::Count, global = true)]
  verbose: u8,

  /// Output format
  #[arg(long, value_enum, default_value_t, global = true)]
  output: OutputFormat,

  #[command(subcommand)]
  command: Commands,
}

#[derive(Subcommand)]
enum Commands {
  /// List the functions in the source tree
  Discover(SourceArgs),

  /// Build and package every function
  Build(BuildArgs),

  /// Build, package and write the deploy plan
  Deploy(DeployArgs),

  /// Inspect or reset the operation cache
  Cache {
    #[command(subcommand)]
    command: CacheCommands,
  },
}

#[derive(Subcommand)]
enum CacheCommands {
  /// Print recorded results
  Show(CacheArgs),

  /// Forget recorded results
  Clear {
    #[command(flatten)]
    cache: CacheArgs,

    /// Only forget this key
    #[arg(long)]
    key: Option<String>,
  },
}

fn main() -> Result<()> {
  let cli = Cli::parse();
  init_tracing(cli.verbose);

  match &cli.command {
    Commands::Discover(args) => cmd::cmd_discover(args, cli.output),
    Commands::Build(args) => cmd::cmd_build(args, cli.output),
    Commands::Deploy(args) => cmd::cmd_deploy(args, cli.output),
    Commands::Cache { command } => match command {
      CacheCommands::Show(args) => cmd::cmd_cache_show(args, cli.output),
      CacheCommands::Clear { cache, key } => cmd::cmd_cache_clear(cache, key.as_deref()),
    },
  }
}

fn init_tracing(verbose: u8) {
  let default = match verbose {
    0 => "warn",
    1 => "info",
    _ => "debug",
  };
  let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

  tracing_subscriber::fmt()
    .with_env_filter(filter)
    .with_writer(std::io::stderr)
    .without_time()
    .init();
}
