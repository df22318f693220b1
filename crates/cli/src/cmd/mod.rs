mod args;
mod build;
mod cache;
mod deploy;
mod discover;

use std::future::Future;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio_util::sync::CancellationToken;
use tracing::warn;

pub use args::{BuildArgs, CacheArgs, SourceArgs};
pub use build::cmd_build;
pub use cache::{cmd_cache_clear, cmd_cache_show};
pub use deploy::{DeployArgs, cmd_deploy};
pub use discover::cmd_discover;

/// Drive `task` on a fresh runtime, cancelling its token on Ctrl-C or once
/// `timeout` elapses.
fn run_cancellable<F, Fut, T>(timeout: Option<Duration>, task: F) -> Result<T>
where
  F: FnOnce(CancellationToken) -> Fut,
  Fut: Future<Output = T>,
{
  let rt = tokio::runtime::Runtime::new().context("Failed to create async runtime")?;
  let cancel = CancellationToken::new();

  let value = rt.block_on(async {
    let watcher = cancel.clone();
    tokio::spawn(async move {
      let deadline = async {
        match timeout {
          Some(limit) => tokio::time::sleep(limit).await,
          None => std::future::pending().await,
        }
      };
      tokio::select! {
        _ = watcher.cancelled() => return,
        _ = until_interrupted(tokio::signal::ctrl_c()) => warn!("interrupted, cancelling"),
        _ = deadline => warn!(timeout = ?timeout, "run timed out, cancelling"),
      }
      watcher.cancel();
    });

    let value = task(cancel.clone()).await;
    cancel.cancel();
    value
  });

  Ok(value)
}

/// Resolves when `signal` fires. Never resolves if the listener could not be
/// installed.
async fn until_interrupted(signal: impl Future<Output = std::io::Result<()>>) {
  if let Err(e) = signal.await {
    warn!(error = %e, "cannot listen for Ctrl-C");
    std::future::pending::<()>().await;
  }
}
