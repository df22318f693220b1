//! External tool invocation.
//!
//! Every subprocess the pipeline starts (dependency install, batch build,
//! per-function compile and minify) goes through [`run_tool`], so timeout and
//! cancellation behave the same everywhere.

use std::collections::BTreeMap;
use std::io;
use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, Command};
use tokio_util::sync::CancellationToken;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::consts::SOURCE_DATE_EPOCH;

/// Prefix that activates the project's pinned node version through nvm.
const NVM_PREFIX: &str = ". ~/.nvm/nvm.sh && nvm use && ";

/// A shell script to run, with its working directory and environment.
#[derive(Debug, Clone)]
pub struct ToolCommand {
  /// Short name used in logs and errors (e.g. `compile api/ping`).
  pub label: String,
  pub script: String,
  pub cwd: PathBuf,
  /// Added on top of the inherited process environment.
  pub env: BTreeMap<String, String>,
  pub timeout: Option<Duration>,
  /// Shell override; defaults to `/bin/sh` on Unix and PowerShell on Windows.
  pub shell: Option<String>,
}

impl ToolCommand {
  pub fn new(label: impl Into<String>, script: impl Into<String>, cwd: impl Into<PathBuf>) -> Self {
    Self {
      label: label.into(),
      script: script.into(),
      cwd: cwd.into(),
      env: BTreeMap::new(),
      timeout: None,
      shell: None,
    }
  }

  pub fn with_env(mut self, env: &BTreeMap<String, String>) -> Self {
    self.env.extend(env.iter().map(|(k, v)| (k.clone(), v.clone())));
    self
  }

  pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
    self.timeout = timeout;
    self
  }

  pub fn with_shell(mut self, shell: Option<&str>) -> Self {
    self.shell = shell.map(str::to_string);
    self
  }

  /// Run the script after `nvm use` when `enabled`.
  pub fn with_nvm(mut self, enabled: bool) -> Self {
    if enabled && !self.script.starts_with(NVM_PREFIX) {
      self.script = format!("{}{}", NVM_PREFIX, self.script);
    }
    self
  }
}

/// Captured result of a tool that exited successfully.
#[derive(Debug, Clone)]
pub struct ToolOutput {
  pub code: i32,
  pub stdout: String,
  pub stderr: String,
}

#[derive(Debug, Error)]
pub enum ToolError {
  /// The tool could not be started at all (missing shell, bad cwd, ...).
  #[error("{label}: failed to start {shell}: {source}")]
  Spawn {
    label: String,
    shell: String,
    #[source]
    source: io::Error,
  },

  /// The tool ran and reported failure.
  #[error("{label}: exited with code {code:?}\n{}", diagnostic_text(.stdout, .stderr))]
  Failed {
    label: String,
    code: Option<i32>,
    stdout: String,
    stderr: String,
  },

  #[error("{label}: timed out after {}s", .timeout.as_secs())]
  Timeout { label: String, timeout: Duration },

  #[error("{label}: cancelled")]
  Cancelled { label: String },

  #[error("{label}: failed waiting for process: {source}")]
  Wait {
    label: String,
    #[source]
    source: io::Error,
  },
}

impl ToolError {
  /// True when the tool never started, as opposed to running and failing.
  pub fn is_spawn_failure(&self) -> bool {
    matches!(self, ToolError::Spawn { .. })
  }

  pub fn is_cancelled(&self) -> bool {
    matches!(self, ToolError::Cancelled { .. })
  }

  /// Raw diagnostic text for user-facing failure reports.
  pub fn diagnostic(&self) -> String {
    match self {
      ToolError::Failed { code, stdout, stderr, .. } => {
        let text = diagnostic_text(stdout, stderr);
        match code {
          Some(code) => format!("exit code {}\n{}", code, text),
          None => format!("terminated by signal\n{}", text),
        }
      }
      other => other.to_string(),
    }
  }
}

fn diagnostic_text<'a>(stdout: &'a str, stderr: &'a str) -> &'a str {
  if stderr.trim().is_empty() { stdout.trim_end() } else { stderr.trim_end() }
}

enum Exit {
  Completed(io::Result<ExitStatus>),
  Timeout(Duration),
  Cancelled,
}

/// Run a tool to completion.
///
/// The process inherits the current environment plus
/// `SOURCE_DATE_EPOCH` and the command's own variables. On timeout or
/// cancellation the whole process group is killed and reaped before the
/// error is returned.
pub async fn run_tool(cmd: &ToolCommand, cancel: &CancellationToken) -> Result<ToolOutput, ToolError> {
  if cancel.is_cancelled() {
    return Err(ToolError::Cancelled {
      label: cmd.label.clone(),
    });
  }

  info!(tool = %cmd.label, cmd = %cmd.script, "running tool");

  let (shell, shell_args) = get_shell(cmd.shell.as_deref());

  let mut command = Command::new(&shell);
  command
    .args(&shell_args)
    .arg(&cmd.script)
    .current_dir(&cmd.cwd)
    .stdin(Stdio::null())
    .stdout(Stdio::piped())
    .stderr(Stdio::piped())
    .kill_on_drop(true)
    .env("SOURCE_DATE_EPOCH", SOURCE_DATE_EPOCH);

  for (key, value) in &cmd.env {
    command.env(key, value);
  }

  #[cfg(unix)]
  command.process_group(0);

  debug!(shell = %shell, cwd = ?cmd.cwd, "spawning process");

  let mut child = command.spawn().map_err(|source| ToolError::Spawn {
    label: cmd.label.clone(),
    shell: shell.clone(),
    source,
  })?;

  let stdout_task = tokio::spawn(read_pipe(child.stdout.take()));
  let stderr_task = tokio::spawn(read_pipe(child.stderr.take()));

  let exit = tokio::select! {
    status = child.wait() => Exit::Completed(status),
    _ = sleep_or_forever(cmd.timeout) => Exit::Timeout(cmd.timeout.unwrap_or_default()),
    _ = cancel.cancelled() => Exit::Cancelled,
  };

  let status = match exit {
    Exit::Completed(status) => status.map_err(|source| ToolError::Wait {
      label: cmd.label.clone(),
      source,
    })?,
    Exit::Timeout(timeout) => {
      warn!(tool = %cmd.label, timeout_secs = timeout.as_secs(), "tool timed out");
      terminate(&mut child, &cmd.label).await;
      stdout_task.abort();
      stderr_task.abort();
      return Err(ToolError::Timeout {
        label: cmd.label.clone(),
        timeout,
      });
    }
    Exit::Cancelled => {
      warn!(tool = %cmd.label, "tool cancelled");
      terminate(&mut child, &cmd.label).await;
      stdout_task.abort();
      stderr_task.abort();
      return Err(ToolError::Cancelled {
        label: cmd.label.clone(),
      });
    }
  };

  let stdout = String::from_utf8_lossy(&stdout_task.await.unwrap_or_default()).into_owned();
  let stderr = String::from_utf8_lossy(&stderr_task.await.unwrap_or_default()).into_owned();

  if !stdout.is_empty() {
    debug!(tool = %cmd.label, stdout = %stdout, "tool stdout");
  }
  if !stderr.is_empty() {
    debug!(tool = %cmd.label, stderr = %stderr, "tool stderr");
  }

  if !status.success() {
    return Err(ToolError::Failed {
      label: cmd.label.clone(),
      code: status.code(),
      stdout,
      stderr,
    });
  }

  Ok(ToolOutput {
    code: status.code().unwrap_or(0),
    stdout,
    stderr,
  })
}

async fn read_pipe<R: AsyncRead + Unpin>(pipe: Option<R>) -> Vec<u8> {
  let mut buf = Vec::new();
  if let Some(mut pipe) = pipe
    && let Err(e) = pipe.read_to_end(&mut buf).await
  {
    warn!(error = %e, "error reading tool output");
  }
  buf
}

async fn sleep_or_forever(timeout: Option<Duration>) {
  match timeout {
    Some(timeout) => tokio::time::sleep(timeout).await,
    None => std::future::pending().await,
  }
}

/// Kill the tool and everything it started, then reap it.
async fn terminate(child: &mut Child, label: &str) {
  #[cfg(unix)]
  if let Some(pid) = child.id().and_then(|id| rustix::process::Pid::from_raw(id as i32)) {
    if let Err(e) = rustix::process::kill_process_group(pid, rustix::process::Signal::KILL) {
      debug!(tool = %label, error = %e, "failed to signal process group");
    }
  }

  if let Err(e) = child.kill().await {
    debug!(tool = %label, error = %e, "failed to kill tool process");
  }
}

/// Get the shell command and arguments for the current platform.
///
/// An explicit override picks its argument style from the shell name;
/// otherwise `/bin/sh -c` (Unix) or PowerShell (Windows) is used so user
/// profiles are not sourced.
fn get_shell(override_shell: Option<&str>) -> (String, Vec<String>) {
  if let Some(shell) = override_shell {
    let args = if shell.contains("powershell") || shell.contains("pwsh") {
      vec![
        "-NoProfile".to_string(),
        "-ExecutionPolicy".to_string(),
        "Bypass".to_string(),
        "-Command".to_string(),
      ]
    } else if shell.contains("cmd") {
      vec!["/C".to_string()]
    } else {
      vec!["-c".to_string()]
    };
    return (shell.to_string(), args);
  }

  #[cfg(unix)]
  {
    ("/bin/sh".to_string(), vec!["-c".to_string()])
  }

  #[cfg(windows)]
  {
    (
      "powershell.exe".to_string(),
      vec![
        "-NoProfile".to_string(),
        "-ExecutionPolicy".to_string(),
        "Bypass".to_string(),
        "-Command".to_string(),
      ],
    )
  }
}
