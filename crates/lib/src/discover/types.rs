use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::consts::{ARCHIVE_EXT, BUILD_DIR, COMPILED_EXT, MODULES_DIR};

/// A deployable function, identified by its module and function name.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ModuleFunction {
  pub module: String,
  pub function: String,
  /// Source file the function compiles from.
  pub source: PathBuf,
}

impl ModuleFunction {
  pub fn new(module: impl Into<String>, function: impl Into<String>, source: impl Into<PathBuf>) -> Self {
    Self {
      module: module.into(),
      function: function.into(),
      source: source.into(),
    }
  }

  /// Handler reference the hosting runtime invokes, e.g. `ping.default`.
  pub fn handler_name(&self) -> String {
    format!("{}.default", self.function)
  }

  /// Dash-cased resource name, e.g. `user-accounts-get-by-id`.
  ///
  /// Distinct functions can share one (`a-b/c` and `a/b-c`); provisioning
  /// rejects such a pair.
  pub fn resource_name(&self) -> String {
    format!("{}-{}", dash_case(&self.module), dash_case(&self.function))
  }

  /// Directory the compiled bundle and archive for this function live in.
  pub fn output_dir(&self, source_root: &Path) -> PathBuf {
    source_root.join(BUILD_DIR).join(MODULES_DIR).join(&self.module)
  }

  /// `<root>/build/modules/<module>/<function>.js`
  pub fn compiled_path(&self, source_root: &Path) -> PathBuf {
    self
      .output_dir(source_root)
      .join(format!("{}.{}", self.function, COMPILED_EXT))
  }

  /// `<root>/build/modules/<module>/<function>.zip`
  pub fn archive_path(&self, source_root: &Path) -> PathBuf {
    self
      .output_dir(source_root)
      .join(format!("{}.{}", self.function, ARCHIVE_EXT))
  }
}

impl std::fmt::Display for ModuleFunction {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    write!(f, "{}/{}", self.module, self.function)
  }
}

/// The functions found by one discovery pass over one source root.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FunctionInventory {
  functions: Vec<ModuleFunction>,
}

impl FunctionInventory {
  pub fn new(functions: Vec<ModuleFunction>) -> Self {
    Self { functions }
  }

  pub fn len(&self) -> usize {
    self.functions.len()
  }

  pub fn is_empty(&self) -> bool {
    self.functions.is_empty()
  }

  pub fn iter(&self) -> std::slice::Iter<'_, ModuleFunction> {
    self.functions.iter()
  }

  pub fn get(&self, module: &str, function: &str) -> Option<&ModuleFunction> {
    self
      .functions
      .iter()
      .find(|f| f.module == module && f.function == function)
  }

  /// Distinct module names, in inventory order.
  pub fn modules(&self) -> Vec<&str> {
    let mut modules: Vec<&str> = Vec::new();
    for f in &self.functions {
      if !modules.contains(&f.module.as_str()) {
        modules.push(&f.module);
      }
    }
    modules
  }
}

impl<'a> IntoIterator for &'a FunctionInventory {
  type Item = &'a ModuleFunction;
  type IntoIter = std::slice::Iter<'a, ModuleFunction>;

  fn into_iter(self) -> Self::IntoIter {
    self.functions.iter()
  }
}

/// Lowercase `name` and join its words with dashes (`fooBar baz` -> `foo-bar-baz`).
pub fn dash_case(name: &str) -> String {
  let mut out = String::with_capacity(name.len() + 4);
  let mut prev_lower = false;
  for ch in name.chars() {
    if ch.is_ascii_uppercase() {
      if prev_lower {
        out.push('-');
      }
      out.push(ch.to_ascii_lowercase());
      prev_lower = false;
    } else if ch == '_' || ch == ' ' || ch == '.' || ch == '-' {
      if !out.ends_with('-') && !out.is_empty() {
        out.push('-');
      }
      prev_lower = false;
    } else {
      out.push(ch);
      prev_lower = ch.is_ascii_lowercase() || ch.is_ascii_digit();
    }
  }
  out.trim_end_matches('-').to_string()
}

#[cfg(test)]
mod tests {
  use super::*;

  fn func(module: &str, function: &str) -> ModuleFunction {
    ModuleFunction::new(module, function, format!("/src/{}/{}.ts", module, function))
  }

  #[test]
  fn output_paths_follow_build_layout() {
    let f = func("api", "ping");
    let root = Path::new("/work/source");

    assert_eq!(f.compiled_path(root), PathBuf::from("/work/source/build/modules/api/ping.js"));
    assert_eq!(f.archive_path(root), PathBuf::from("/work/source/build/modules/api/ping.zip"));
  }

  #[test]
  fn handler_name_uses_default_export() {
    assert_eq!(func("api", "ping").handler_name(), "ping.default");
  }

  #[test]
  fn resource_name_is_dash_cased() {
    assert_eq!(func("userAccounts", "getById").resource_name(), "user-accounts-get-by-id");
    assert_eq!(func("api", "list_items").resource_name(), "api-list-items");
    assert_eq!(func("v2", "ping").resource_name(), "v2-ping");
  }

  #[test]
  fn display_is_module_slash_function() {
    assert_eq!(func("api", "ping").to_string(), "api/ping");
  }

  #[test]
  fn modules_are_distinct_in_order() {
    let inventory = FunctionInventory::new(vec![func("b", "x"), func("a", "y"), func("b", "z")]);
    assert_eq!(inventory.modules(), vec!["b", "a"]);
  }

  #[test]
  fn inventory_serializes_as_list() {
    let inventory = FunctionInventory::new(vec![func("api", "ping")]);
    let json = serde_json::to_value(&inventory).unwrap();
    assert!(json.is_array());
    assert_eq!(json[0]["module"], "api");
    assert_eq!(json[0]["function"], "ping");
  }
}
