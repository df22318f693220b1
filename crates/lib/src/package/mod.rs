//! Function packaging.
//!
//! Each compiled bundle is archived on its own into
//! `build/modules/<module>/<function>.zip`, next to the bundle. The archive
//! holds exactly one entry, `<function>.js`; the build step is responsible for
//! making that bundle self-contained.
//!
//! Archives are written to a temporary file in the same directory and renamed
//! into place, so a failed or interrupted pack never leaves a partial archive
//! under the final name. Entry timestamps are fixed at the zip epoch, so the
//! same bundle always produces the same archive bytes.

use std::fs::File;
use std::io::{self, Read};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;
use thiserror::Error;
use tracing::{debug, info};
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, DateTime, ZipArchive, ZipWriter};

use crate::consts::{ARCHIVE_EXT, COMPILED_EXT};
use crate::discover::ModuleFunction;
use crate::util::hash::{ContentHash, hash_file};

#[derive(Debug, Error)]
pub enum PackagingError {
  #[error("{function}: compiled output missing at {path}; the build did not run or failed silently")]
  MissingOutput { function: String, path: PathBuf },

  #[error("{function}: failed to write archive {path}: {source}")]
  Archive {
    function: String,
    path: PathBuf,
    #[source]
    source: zip::result::ZipError,
  },

  #[error("{function}: io error at {path}: {source}")]
  Io {
    function: String,
    path: PathBuf,
    #[source]
    source: io::Error,
  },
}

/// A packaged, deployable function.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Artifact {
  pub function: ModuleFunction,
  pub archive: PathBuf,
  pub sha256: ContentHash,
  pub size: u64,
}

/// Every artifact produced by one pipeline run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ArtifactManifest {
  artifacts: Vec<Artifact>,
}

impl ArtifactManifest {
  pub fn new(artifacts: Vec<Artifact>) -> Self {
    Self { artifacts }
  }

  pub fn push(&mut self, artifact: Artifact) {
    self.artifacts.push(artifact);
  }

  /// Resolve a function to its archive.
  pub fn artifact_for(&self, function: &ModuleFunction) -> Option<&Artifact> {
    self
      .artifacts
      .iter()
      .find(|a| a.function.module == function.module && a.function.function == function.function)
  }

  pub fn len(&self) -> usize {
    self.artifacts.len()
  }

  pub fn is_empty(&self) -> bool {
    self.artifacts.is_empty()
  }

  pub fn iter(&self) -> std::slice::Iter<'_, Artifact> {
    self.artifacts.iter()
  }
}

/// Archive `compiled_output` into `<function>.zip` alongside it.
///
/// Re-packing the same bundle overwrites the previous archive.
pub fn pack(function: &ModuleFunction, compiled_output: &Path) -> Result<PathBuf, PackagingError> {
  let name = function.to_string();

  if !compiled_output.is_file() {
    return Err(PackagingError::MissingOutput {
      function: name,
      path: compiled_output.to_path_buf(),
    });
  }

  let dir = compiled_output.parent().unwrap_or_else(|| Path::new("."));
  let archive_path = dir.join(format!("{}.{}", function.function, ARCHIVE_EXT));
  let entry_name = format!("{}.{}", function.function, COMPILED_EXT);

  let io_err = |path: &Path, source: io::Error| PackagingError::Io {
    function: name.clone(),
    path: path.to_path_buf(),
    source,
  };
  let zip_err = |source: zip::result::ZipError| PackagingError::Archive {
    function: name.clone(),
    path: archive_path.clone(),
    source,
  };

  let mut input = File::open(compiled_output).map_err(|e| io_err(compiled_output, e))?;

  // Dropped (and deleted) on any early return.
  let mut temp = tempfile::Builder::new()
    .prefix(&format!(".{}.", function.function))
    .suffix(".zip.tmp")
    .tempfile_in(dir)
    .map_err(|e| io_err(dir, e))?;

  write_archive(&mut temp, &entry_name, &mut input).map_err(zip_err)?;

  temp.as_file().sync_all().map_err(|e| io_err(temp.path(), e))?;
  temp
    .persist(&archive_path)
    .map_err(|e| io_err(&archive_path, e.error))?;

  info!(function = %function, archive = %archive_path.display(), "function packaged");
  Ok(archive_path)
}

/// Pack and describe the result for the artifact manifest.
pub fn pack_artifact(function: &ModuleFunction, compiled_output: &Path) -> Result<Artifact, PackagingError> {
  let archive = pack(function, compiled_output)?;
  let io_err = |source: io::Error| PackagingError::Io {
    function: function.to_string(),
    path: archive.clone(),
    source,
  };

  let sha256 = hash_file(&archive).map_err(io_err)?;
  let size = std::fs::metadata(&archive).map_err(io_err)?.len();
  debug!(function = %function, sha256 = %sha256, size, "artifact hashed");

  Ok(Artifact {
    function: function.clone(),
    archive,
    sha256,
    size,
  })
}

fn write_archive(temp: &mut NamedTempFile, entry_name: &str, input: &mut File) -> zip::result::ZipResult<()> {
  let options = SimpleFileOptions::default()
    .compression_method(CompressionMethod::Deflated)
    .last_modified_time(DateTime::default())
    .unix_permissions(0o644);

  let mut writer = ZipWriter::new(temp.as_file_mut());
  writer.start_file(entry_name, options)?;
  io::copy(input, &mut writer)?;
  writer.finish()?;
  Ok(())
}

/// Read back the single entry of a function archive as `(name, bytes)`.
pub fn unpack_entry(archive_path: &Path) -> zip::result::ZipResult<(String, Vec<u8>)> {
  let file = File::open(archive_path)?;
  let mut archive = ZipArchive::new(file)?;
  if archive.len() != 1 {
    return Err(zip::result::ZipError::InvalidArchive(
      "function archive must contain exactly one entry".into(),
    ));
  }

  let mut entry = archive.by_index(0)?;
  let mut content = Vec::new();
  entry.read_to_end(&mut content)?;
  Ok((entry.name().to_string(), content))
}
