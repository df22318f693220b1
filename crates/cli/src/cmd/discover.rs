//! Implementation of the `fnpack discover` command.

use anyhow::{Context, Result};

use fnpack_lib::discover::discover;

use crate::cmd::args::SourceArgs;
use crate::output::{OutputFormat, print_info, print_json, print_stat};

/// List the functions found under the source root.
pub fn cmd_discover(args: &SourceArgs, output: OutputFormat) -> Result<()> {
  let root = args.source_root();
  let inventory = discover(&root, &args.ext, &args.exclusions())
    .with_context(|| format!("Failed to discover functions in {}", root.display()))?;

  if output.is_json() {
    return print_json(&inventory);
  }

  if inventory.is_empty() {
    print_info(&format!("No functions found in {}", root.display()));
    return Ok(());
  }

  for function in &inventory {
    println!("  {}  {}", function, function.source.display());
  }
  println!();
  print_stat("Modules", &inventory.modules().len().to_string());
  print_stat("Functions", &inventory.len().to_string());

  Ok(())
}
