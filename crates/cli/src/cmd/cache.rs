//! Implementation of the `fnpack cache` subcommands.

use anyhow::{Context, Result};
use owo_colors::{OwoColorize, Stream};

use crate::cmd::args::CacheArgs;
use crate::output::{OutputFormat, print_info, print_json, print_success};

/// Print every recorded operation result.
pub fn cmd_cache_show(args: &CacheArgs, output: OutputFormat) -> Result<()> {
  let store = args.store("cache show");
  let entries = store.load();

  if output.is_json() {
    return print_json(&entries);
  }

  if entries.is_empty() {
    print_info(&format!("Cache {} is empty", store.path().display()));
    return Ok(());
  }

  for (key, value) in &entries {
    println!("{}", key.if_supports_color(Stream::Stdout, |s| s.bold()));
    let pretty = serde_json::to_string_pretty(value).context("Failed to format cache entry")?;
    for line in pretty.lines() {
      println!("  {}", line);
    }
  }

  Ok(())
}

/// Forget one key, or the whole store.
pub fn cmd_cache_clear(args: &CacheArgs, key: Option<&str>) -> Result<()> {
  let store = args.store("cache clear");

  match key {
    Some(key) => {
      let removed = store
        .remove(key)
        .with_context(|| format!("Failed to update cache {}", store.path().display()))?;
      if removed {
        print_success(&format!("Removed '{}' from {}", key, store.path().display()));
      } else {
        print_info(&format!("'{}' is not cached", key));
      }
    }
    None => {
      store
        .clear()
        .with_context(|| format!("Failed to clear cache {}", store.path().display()))?;
      print_success(&format!("Cleared {}", store.path().display()));
    }
  }

  Ok(())
}
