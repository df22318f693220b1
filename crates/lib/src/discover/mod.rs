//! Function discovery.
//!
//! Builds a [`FunctionInventory`] from the source layout
//! `<root>/<module>/<function>.<ext>`. Every immediate subdirectory of the
//! root is a module unless its name starts with an excluded prefix; every
//! regular file inside it with the configured extension is a function.
//!
//! Discovery only reads the file system.

mod types;

use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::{debug, info};
use walkdir::WalkDir;

use crate::consts::DEFAULT_EXCLUDED_PREFIXES;

pub use types::{FunctionInventory, ModuleFunction, dash_case};

#[derive(Debug, Error)]
pub enum DiscoveryError {
  #[error("source root does not exist: {0}")]
  NotFound(PathBuf),

  #[error("source root is not a directory: {0}")]
  NotADirectory(PathBuf),

  #[error("failed to read {path}: {message}")]
  Read { path: PathBuf, message: String },

  #[error("source extension is empty")]
  EmptyExtension,
}

/// Directory name prefixes skipped when enumerating modules.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Exclusions(Vec<String>);

impl Exclusions {
  pub fn new<I, S>(prefixes: I) -> Self
  where
    I: IntoIterator<Item = S>,
    S: Into<String>,
  {
    Self(prefixes.into_iter().map(Into::into).collect())
  }

  pub fn is_excluded(&self, name: &str) -> bool {
    self.0.iter().any(|prefix| name.starts_with(prefix.as_str()))
  }

  pub fn prefixes(&self) -> &[String] {
    &self.0
  }
}

impl Default for Exclusions {
  fn default() -> Self {
    Self::new(DEFAULT_EXCLUDED_PREFIXES.iter().copied())
  }
}

/// Discover all functions under `source_root`.
///
/// `extension` may be given with or without its leading dot (`ts` or `.ts`).
/// Entries are visited in file-name order, so the same tree always yields the
/// same sequence.
pub fn discover(
  source_root: &Path,
  extension: &str,
  exclusions: &Exclusions,
) -> Result<FunctionInventory, DiscoveryError> {
  let extension = extension.trim_start_matches('.');
  if extension.is_empty() {
    return Err(DiscoveryError::EmptyExtension);
  }

  if !source_root.exists() {
    return Err(DiscoveryError::NotFound(source_root.to_path_buf()));
  }
  if !source_root.is_dir() {
    return Err(DiscoveryError::NotADirectory(source_root.to_path_buf()));
  }

  let suffix = format!(".{}", extension);
  let mut functions = Vec::new();

  for module_dir in immediate_children(source_root)? {
    if !module_dir.file_type().is_dir() {
      continue;
    }
    let Some(module) = module_dir.file_name().to_str() else {
      debug!(path = ?module_dir.path(), "skipping non-UTF-8 directory name");
      continue;
    };
    if exclusions.is_excluded(module) {
      debug!(module, "skipping excluded directory");
      continue;
    }

    for entry in immediate_children(module_dir.path())? {
      if !entry.file_type().is_file() {
        continue;
      }
      let Some(file_name) = entry.file_name().to_str() else {
        continue;
      };
      let Some(function) = file_name.strip_suffix(&suffix) else {
        continue;
      };
      if function.is_empty() {
        continue;
      }

      debug!(module, function, "discovered function");
      functions.push(ModuleFunction::new(module, function, entry.path()));
    }
  }

  info!(
    root = %source_root.display(),
    functions = functions.len(),
    "discovery complete"
  );

  Ok(FunctionInventory::new(functions))
}

fn immediate_children(dir: &Path) -> Result<Vec<walkdir::DirEntry>, DiscoveryError> {
  WalkDir::new(dir)
    .min_depth(1)
    .max_depth(1)
    .sort_by_file_name()
    .into_iter()
    .map(|entry| {
      entry.map_err(|e| DiscoveryError::Read {
        path: e.path().map(Path::to_path_buf).unwrap_or_else(|| dir.to_path_buf()),
        message: e.to_string(),
      })
    })
    .collect()
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::collections::BTreeSet;
  use std::fs;
  use tempfile::TempDir;

  fn touch(root: &Path, rel: &str) {
    let path = root.join(rel);
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, "export default () => {}\n").unwrap();
  }

  fn pairs(inventory: &FunctionInventory) -> BTreeSet<(String, String)> {
    inventory
      .iter()
      .map(|f| (f.module.clone(), f.function.clone()))
      .collect()
  }

  fn set(items: &[(&str, &str)]) -> BTreeSet<(String, String)> {
    items.iter().map(|(m, f)| (m.to_string(), f.to_string())).collect()
  }

  #[test]
  fn discovers_functions_per_module() {
    let temp = TempDir::new().unwrap();
    touch(temp.path(), "api/ping.ts");
    touch(temp.path(), "api/broken.ts");
    touch(temp.path(), "users/create.ts");

    let inventory = discover(temp.path(), "ts", &Exclusions::default()).unwrap();

    assert_eq!(
      pairs(&inventory),
      set(&[("api", "ping"), ("api", "broken"), ("users", "create")])
    );
    let ping = inventory.get("api", "ping").unwrap();
    assert_eq!(ping.source, temp.path().join("api").join("ping.ts"));
  }

  #[test]
  fn ignores_other_extensions_and_root_files() {
    let temp = TempDir::new().unwrap();
    touch(temp.path(), "api/ping.ts");
    touch(temp.path(), "api/README.md");
    touch(temp.path(), "api/ping.test.js");
    touch(temp.path(), "index.ts");

    let inventory = discover(temp.path(), "ts", &Exclusions::default()).unwrap();

    assert_eq!(pairs(&inventory), set(&[("api", "ping")]));
  }

  #[test]
  fn strips_only_the_final_extension() {
    let temp = TempDir::new().unwrap();
    touch(temp.path(), "api/ping.handler.ts");

    let inventory = discover(temp.path(), ".ts", &Exclusions::default()).unwrap();

    assert_eq!(pairs(&inventory), set(&[("api", "ping.handler")]));
  }

  #[test]
  fn skips_excluded_directories() {
    let temp = TempDir::new().unwrap();
    touch(temp.path(), "api/ping.ts");
    touch(temp.path(), "build/modules/api/ping.ts");
    touch(temp.path(), "node_modules/lib/index.ts");
    touch(temp.path(), ".cache/stale.ts");

    let inventory = discover(temp.path(), "ts", &Exclusions::default()).unwrap();

    assert_eq!(pairs(&inventory), set(&[("api", "ping")]));
  }

  #[test]
  fn custom_exclusions_replace_defaults() {
    let temp = TempDir::new().unwrap();
    touch(temp.path(), "api/ping.ts");
    touch(temp.path(), "internal/secret.ts");
    touch(temp.path(), "build/tool.ts");

    let inventory = discover(temp.path(), "ts", &Exclusions::new(["internal"])).unwrap();

    assert_eq!(pairs(&inventory), set(&[("api", "ping"), ("build", "tool")]));
  }

  #[test]
  fn empty_module_contributes_nothing() {
    let temp = TempDir::new().unwrap();
    fs::create_dir_all(temp.path().join("empty")).unwrap();

    let inventory = discover(temp.path(), "ts", &Exclusions::default()).unwrap();

    assert!(inventory.is_empty());
  }

  #[test]
  fn missing_root_is_an_error() {
    let temp = TempDir::new().unwrap();
    let result = discover(&temp.path().join("nope"), "ts", &Exclusions::default());
    assert!(matches!(result, Err(DiscoveryError::NotFound(_))));
  }

  #[test]
  fn file_root_is_an_error() {
    let temp = TempDir::new().unwrap();
    touch(temp.path(), "file.ts");
    let result = discover(&temp.path().join("file.ts"), "ts", &Exclusions::default());
    assert!(matches!(result, Err(DiscoveryError::NotADirectory(_))));
  }

  #[test]
  fn empty_extension_is_rejected() {
    let temp = TempDir::new().unwrap();
    let result = discover(temp.path(), ".", &Exclusions::default());
    assert!(matches!(result, Err(DiscoveryError::EmptyExtension)));
  }

  #[test]
  fn repeated_discovery_is_stable() {
    let temp = TempDir::new().unwrap();
    for rel in ["b/two.ts", "a/one.ts", "b/one.ts", "c/three.ts"] {
      touch(temp.path(), rel);
    }

    let first = discover(temp.path(), "ts", &Exclusions::default()).unwrap();
    let second = discover(temp.path(), "ts", &Exclusions::default()).unwrap();

    assert_eq!(pairs(&first), pairs(&second));
    assert_eq!(first, second);
  }
}
