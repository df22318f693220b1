//! Test utilities for fnpack-lib.
//!
//! Stand-in compile and minify commands built from POSIX shell tools, so
//! build tests run without a JavaScript toolchain.

use std::fs;
use std::path::Path;

use crate::build::{BuildConfig, BuildStrategy, PerFunctionConfig};

/// Marker that makes [`fake_compile`] report a syntax error.
pub const SYNTAX_ERROR: &str = "SYNTAX_ERROR";

/// "Compiles" by copying the entry to the bundle path, failing like a
/// compiler when the source contains [`SYNTAX_ERROR`].
pub fn fake_compile() -> String {
  format!(
    "if grep -q {marker} $${{entry}}; then echo $${{entry}}\"(1,5): error TS1005: ';' expected\" >&2; exit 1; fi; \
     cp $${{entry}} $${{outfile}}",
    marker = SYNTAX_ERROR
  )
}

/// "Minifies" by squeezing repeated spaces in place.
pub fn fake_minify() -> String {
  "tr -s ' ' < $${outfile} > $${outfile}.min && mv $${outfile}.min $${outfile}".to_string()
}

/// Per-function build config using the fake tools.
pub fn fake_build_config() -> BuildConfig {
  BuildConfig {
    strategy: BuildStrategy::PerFunction(PerFunctionConfig {
      compile: fake_compile(),
      minify: Some(fake_minify()),
      platform: "node".to_string(),
    }),
    parallelism: 2,
    ..Default::default()
  }
}

/// Write a source file under `root`, creating parent directories.
pub fn write_source(root: &Path, rel: &str, content: &str) {
  let path = root.join(rel);
  fs::create_dir_all(path.parent().unwrap()).unwrap();
  fs::write(path, content).unwrap();
}
