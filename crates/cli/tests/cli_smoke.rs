//! CLI smoke tests for fnpack.
//!
//! Builds use a `cp` stand-in for the bundler so they run without node.

use std::fs;
use std::path::Path;

use assert_cmd::Command;
use assert_cmd::cargo::cargo_bin_cmd;
use predicates::prelude::*;
use serial_test::serial;
use tempfile::TempDir;

const FAKE_COMPILE: &str = "grep -q BROKEN $${entry} && { echo $${entry}\": error TS1005\" >&2; exit 1; }; cp $${entry} $${outfile}";

const CONTEXT: &str = r#"{
  "platform": { "name": "acme" },
  "service": { "name": "Orders API", "domain": { "fqd": "orders.acme.dev" } },
  "deployment": {
    "config": {
      "stack": { "timeout": "30", "memory": 512 },
      "environmentVariables": [{ "name": "STAGE", "value": "prod" }]
    }
  }
}"#;

/// Get a Command for the fnpack binary, isolated from the caller's environment.
fn fnpack_cmd(dir: &Path) -> Command {
  let mut cmd = cargo_bin_cmd!("fnpack");
  cmd.current_dir(dir).env_remove("USE_NVM").env_remove("RUST_LOG");
  cmd
}

/// Create a temp working directory with `source/<rel>` files.
fn project(files: &[(&str, &str)]) -> TempDir {
  let temp = TempDir::new().unwrap();
  for (rel, content) in files {
    let path = temp.path().join("source").join(rel);
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, content).unwrap();
  }
  temp
}

fn build_cmd(dir: &Path) -> Command {
  let mut cmd = fnpack_cmd(dir);
  cmd.args(["build", "--compile", FAKE_COMPILE, "--no-minify"]);
  cmd
}

// =============================================================================
// Help & Version
// =============================================================================

#[test]
fn help_flag_works() {
  let temp = TempDir::new().unwrap();
  fnpack_cmd(temp.path())
    .arg("--help")
    .assert()
    .success()
    .stdout(predicate::str::contains("Usage"));
}

#[test]
fn version_flag_works() {
  let temp = TempDir::new().unwrap();
  fnpack_cmd(temp.path())
    .arg("--version")
    .assert()
    .success()
    .stdout(predicate::str::contains("fnpack"));
}

#[test]
fn subcommand_help_works() {
  let temp = TempDir::new().unwrap();
  for cmd in &["discover", "build", "deploy", "cache"] {
    fnpack_cmd(temp.path())
      .arg(cmd)
      .arg("--help")
      .assert()
      .success()
      .stdout(predicate::str::contains("Usage"));
  }
}

// =============================================================================
// discover
// =============================================================================

#[test]
fn discover_lists_functions() {
  let temp = project(&[("api/ping.ts", ""), ("api/listOrders.ts", ""), ("node_modules/x/y.ts", "")]);

  fnpack_cmd(temp.path())
    .arg("discover")
    .assert()
    .success()
    .stdout(predicate::str::contains("api/ping"))
    .stdout(predicate::str::contains("api/listOrders"))
    .stdout(predicate::str::contains("node_modules").not());
}

#[test]
fn discover_json_output() {
  let temp = project(&[("api/ping.ts", "")]);

  let out = fnpack_cmd(temp.path())
    .args(["--output", "json", "discover"])
    .assert()
    .success()
    .get_output()
    .stdout
    .clone();

  let value: serde_json::Value = serde_json::from_slice(&out).unwrap();
  assert_eq!(value[0]["module"], "api");
  assert_eq!(value[0]["function"], "ping");
}

#[test]
fn discover_missing_source_fails() {
  let temp = TempDir::new().unwrap();

  fnpack_cmd(temp.path())
    .args(["discover", "--source", "nope"])
    .assert()
    .failure()
    .stderr(predicate::str::contains("nope"));
}

// =============================================================================
// build
// =============================================================================

#[test]
#[cfg(unix)]
#[serial]
fn build_packages_every_function() {
  let temp = project(&[("api/ping.ts", "pong"), ("orders/list.ts", "list")]);

  build_cmd(temp.path())
    .assert()
    .success()
    .stdout(predicate::str::contains("api/ping"))
    .stdout(predicate::str::contains("Packaged: 2"));

  assert!(temp.path().join("source/build/modules/api/ping.zip").is_file());
  assert!(temp.path().join("source/build/modules/orders/list.zip").is_file());
  assert!(temp.path().join(".fnpack-cache.json").is_file());
}

#[test]
#[cfg(unix)]
#[serial]
fn second_build_replays_from_cache() {
  let temp = project(&[("api/ping.ts", "pong")]);

  build_cmd(temp.path()).assert().success();

  fnpack_cmd(temp.path())
    .args(["build", "--compile", "exit 1", "--no-minify"])
    .assert()
    .success()
    .stdout(predicate::str::contains("replayed from cache"));
}

#[test]
#[cfg(unix)]
#[serial]
fn failed_function_fails_the_build() {
  let temp = project(&[("api/ping.ts", "pong"), ("api/broken.ts", "BROKEN")]);

  build_cmd(temp.path())
    .assert()
    .failure()
    .stderr(predicate::str::contains("api/broken failed to build"))
    .stderr(predicate::str::contains("error TS1005"));

  assert!(temp.path().join("source/build/modules/api/ping.zip").is_file());
  assert!(!temp.path().join(".fnpack-cache.json").exists());
}

#[test]
#[cfg(unix)]
#[serial]
fn allow_partial_accepts_a_partial_build() {
  let temp = project(&[("api/ping.ts", "pong"), ("api/broken.ts", "BROKEN")]);

  build_cmd(temp.path())
    .arg("--allow-partial")
    .assert()
    .success()
    .stderr(predicate::str::contains("Continuing with 1 of 2 functions"));
}

#[test]
#[cfg(unix)]
#[serial]
fn failing_batch_command_is_fatal() {
  let temp = project(&[("api/ping.ts", "pong")]);

  fnpack_cmd(temp.path())
    .args(["build", "--strategy", "batch", "--build-command", "echo bundler exploded >&2; exit 2"])
    .assert()
    .failure()
    .stderr(predicate::str::contains("bundler exploded"));
}

#[test]
#[cfg(unix)]
#[serial]
fn build_json_output() {
  let temp = project(&[("api/ping.ts", "pong")]);

  let out = build_cmd(temp.path())
    .args(["--output", "json"])
    .assert()
    .success()
    .get_output()
    .stdout
    .clone();

  let value: serde_json::Value = serde_json::from_slice(&out).unwrap();
  assert_eq!(value["from_cache"], false);
  assert_eq!(value["artifacts"].as_array().unwrap().len(), 1);
  assert!(value["build_failures"].as_array().unwrap().is_empty());
}

// =============================================================================
// cache
// =============================================================================

#[test]
#[cfg(unix)]
#[serial]
fn cache_show_and_clear() {
  let temp = project(&[("api/ping.ts", "pong")]);
  build_cmd(temp.path()).assert().success();

  fnpack_cmd(temp.path())
    .args(["cache", "show"])
    .assert()
    .success()
    .stdout(predicate::str::contains("build"));

  fnpack_cmd(temp.path()).args(["cache", "clear"]).assert().success();
  assert!(!temp.path().join(".fnpack-cache.json").exists());

  fnpack_cmd(temp.path())
    .args(["cache", "show"])
    .assert()
    .success()
    .stdout(predicate::str::contains("is empty"));
}

#[test]
fn cache_clear_unknown_key() {
  let temp = TempDir::new().unwrap();

  fnpack_cmd(temp.path())
    .args(["cache", "clear", "--key", "build"])
    .assert()
    .success()
    .stdout(predicate::str::contains("not cached"));
}

// =============================================================================
// deploy
// =============================================================================

#[test]
#[cfg(unix)]
#[serial]
fn deploy_writes_plan() {
  let temp = project(&[("api/ping.ts", "pong")]);
  fs::write(temp.path().join("context.json"), CONTEXT).unwrap();

  fnpack_cmd(temp.path())
    .args(["deploy", "--compile", FAKE_COMPILE, "--no-minify"])
    .assert()
    .success()
    .stdout(predicate::str::contains("orders.acme.dev"));

  let plan: serde_json::Value =
    serde_json::from_str(&fs::read_to_string(temp.path().join("deploy-plan.json")).unwrap()).unwrap();
  assert_eq!(plan["service"], "orders-api");
  assert_eq!(plan["timeout"], 30);
  assert_eq!(plan["memory"], 512);
  assert_eq!(plan["environment"]["STAGE"], "prod");
  assert_eq!(plan["environment"]["EXOBASE_PLATFORM"], "acme");
  assert_eq!(plan["environment"]["EXOBASE_SERVICE"], "Orders API");
  assert_eq!(plan["endpoints"][0]["handler"], "ping.default");
  assert_eq!(plan["endpoints"][0]["resource"], "orders-api-api-ping");
}

#[test]
fn deploy_without_context_fails() {
  let temp = project(&[("api/ping.ts", "pong")]);

  fnpack_cmd(temp.path())
    .arg("deploy")
    .assert()
    .failure()
    .stderr(predicate::str::contains("context.json"));
}
