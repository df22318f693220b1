//! Persisted operation cache.
//!
//! [`CacheStore::run_once`] runs a named operation at most once per cache
//! store: the first successful result is recorded under its key and replayed
//! on every later call without running the operation again. Failed
//! operations record nothing, so the next call retries.
//!
//! # Storage
//!
//! One pretty-printed JSON object mapping operation key to result, by
//! default `.fnpack-cache.json` in the working directory:
//!
//! ```text
//! {
//!   "build": { "built": [...], "failures": [] }
//! }
//! ```
//!
//! A missing or unreadable store is treated as empty and rewritten on the
//! next successful operation; it never fails the caller. Writes go to
//! `<store>.tmp` and are renamed into place.
//!
//! # Concurrency
//!
//! Only one pipeline may use a store at a time. [`CacheStore::run_once`]
//! holds an exclusive [`lock::CacheLock`] from the lookup through the
//! operation to the final write, so a second run in the same working
//! directory fails fast instead of racing.

pub mod lock;

use std::collections::BTreeMap;
use std::fs;
use std::future::Future;
use std::io;
use std::path::{Path, PathBuf};

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::consts::DEFAULT_CACHE_FILE;

use lock::{CacheLock, CacheLockError};

pub type CacheEntries = BTreeMap<String, Value>;

/// Why the store could not be read. Always recovered as an empty store.
#[derive(Debug, Error)]
pub enum CacheReadError {
  #[error("failed to read cache store {path}: {source}")]
  Read {
    path: PathBuf,
    #[source]
    source: io::Error,
  },

  #[error("cache store {path} is not a valid JSON object: {source}")]
  Parse {
    path: PathBuf,
    #[source]
    source: serde_json::Error,
  },
}

/// Store failures that must abort the caller.
#[derive(Debug, Error)]
pub enum CacheStoreError {
  #[error(transparent)]
  Lock(#[from] CacheLockError),

  #[error("failed to write cache store {path}: {source}")]
  Write {
    path: PathBuf,
    #[source]
    source: io::Error,
  },

  #[error("failed to serialize cache entry '{key}': {source}")]
  Serialize {
    key: String,
    #[source]
    source: serde_json::Error,
  },
}

#[derive(Debug, Error)]
pub enum CacheError<E> {
  /// The wrapped operation failed; nothing was recorded.
  #[error(transparent)]
  Operation(E),

  #[error(transparent)]
  Store(#[from] CacheStoreError),
}

/// Whether a result was computed now or replayed from the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheStatus {
  Replayed,
  Executed,
  /// Caching is disabled; the operation ran and nothing was recorded.
  Bypassed,
}

#[derive(Debug, Clone)]
pub struct CacheStore {
  path: PathBuf,
  enabled: bool,
  command: String,
}

impl CacheStore {
  pub fn new(path: impl Into<PathBuf>) -> Self {
    Self {
      path: path.into(),
      enabled: true,
      command: crate::consts::APP_NAME.to_string(),
    }
  }

  /// The default store inside `working_dir`.
  pub fn in_dir(working_dir: &Path) -> Self {
    Self::new(working_dir.join(DEFAULT_CACHE_FILE))
  }

  /// A store that never replays or records anything.
  pub fn disabled() -> Self {
    Self {
      enabled: false,
      ..Self::new(DEFAULT_CACHE_FILE)
    }
  }

  pub fn with_enabled(mut self, enabled: bool) -> Self {
    self.enabled = enabled;
    self
  }

  /// Command recorded in the lock file while an operation runs.
  pub fn with_command(mut self, command: impl Into<String>) -> Self {
    self.command = command.into();
    self
  }

  pub fn path(&self) -> &Path {
    &self.path
  }

  pub fn is_enabled(&self) -> bool {
    self.enabled
  }

  /// Read the store, reporting why it could not be read.
  pub fn try_load(&self) -> Result<CacheEntries, CacheReadError> {
    let content = match fs::read_to_string(&self.path) {
      Ok(content) => content,
      Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(CacheEntries::new()),
      Err(source) => {
        return Err(CacheReadError::Read {
          path: self.path.clone(),
          source,
        });
      }
    };

    serde_json::from_str(&content).map_err(|source| CacheReadError::Parse {
      path: self.path.clone(),
      source,
    })
  }

  /// Read the store, treating an unreadable store as empty.
  pub fn load(&self) -> CacheEntries {
    self.try_load().unwrap_or_else(|e| {
      warn!(error = %e, "ignoring unreadable cache store");
      CacheEntries::new()
    })
  }

  pub fn get(&self, key: &str) -> Option<Value> {
    self.load().remove(key)
  }

  /// Run `op` unless `key` already holds a result, returning the result.
  pub async fn run_once<T, E, F, Fut>(&self, key: &str, op: F) -> Result<T, CacheError<E>>
  where
    T: Serialize + DeserializeOwned,
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<T, E>>,
  {
    self.run_once_with_status(key, op).await.map(|(value, _)| value)
  }

  /// Like [`CacheStore::run_once`], also reporting whether `op` ran.
  pub async fn run_once_with_status<T, E, F, Fut>(&self, key: &str, op: F) -> Result<(T, CacheStatus), CacheError<E>>
  where
    T: Serialize + DeserializeOwned,
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<T, E>>,
  {
    if !self.enabled {
      debug!(key, "cache disabled, running operation");
      let value = op().await.map_err(CacheError::Operation)?;
      return Ok((value, CacheStatus::Bypassed));
    }

    let _lock = CacheLock::acquire(&self.path, &self.command).map_err(CacheStoreError::from)?;

    if let Some(stored) = self.load().remove(key) {
      match serde_json::from_value::<T>(stored) {
        Ok(value) => {
          info!(key, store = %self.path.display(), "replaying cached result");
          return Ok((value, CacheStatus::Replayed));
        }
        Err(e) => warn!(key, error = %e, "cached result has an unexpected shape, running again"),
      }
    }

    info!(key, "running operation");
    let value = op().await.map_err(CacheError::Operation)?;

    let serialized = serde_json::to_value(&value).map_err(|source| CacheStoreError::Serialize {
      key: key.to_string(),
      source,
    })?;

    let mut entries = self.load();
    entries.insert(key.to_string(), serialized);
    self.save(&entries)?;

    debug!(key, store = %self.path.display(), "recorded result");
    Ok((value, CacheStatus::Executed))
  }

  /// Forget one key. Returns whether it was present.
  pub fn remove(&self, key: &str) -> Result<bool, CacheStoreError> {
    let _lock = CacheLock::acquire(&self.path, &self.command)?;

    let mut entries = self.load();
    if entries.remove(key).is_none() {
      return Ok(false);
    }
    self.save(&entries)?;
    Ok(true)
  }

  /// Delete the store file.
  pub fn clear(&self) -> Result<(), CacheStoreError> {
    let _lock = CacheLock::acquire(&self.path, &self.command)?;

    match fs::remove_file(&self.path) {
      Ok(()) => Ok(()),
      Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
      Err(source) => Err(CacheStoreError::Write {
        path: self.path.clone(),
        source,
      }),
    }
  }

  fn temp_path(&self) -> PathBuf {
    let mut name = self.path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(".tmp");
    self.path.with_file_name(name)
  }

  fn save(&self, entries: &CacheEntries) -> Result<(), CacheStoreError> {
    let write_err = |source| CacheStoreError::Write {
      path: self.path.clone(),
      source,
    };

    if let Some(dir) = self.path.parent()
      && !dir.as_os_str().is_empty()
    {
      fs::create_dir_all(dir).map_err(write_err)?;
    }

    let content = serde_json::to_string_pretty(entries).map_err(|source| CacheStoreError::Serialize {
      key: "*".to_string(),
      source,
    })?;

    let temp_path = self.temp_path();
    fs::write(&temp_path, format!("{}\n", content)).map_err(write_err)?;
    fs::rename(&temp_path, &self.path).map_err(write_err)?;
    Ok(())
  }
}
