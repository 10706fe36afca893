//! On-disk archive cache.
//!
//! Archives fetched from the origin live at
//! `{cache_dir}/{author}/{project}/{version}.zip`, locally published ones under
//! `{cache_dir}/_local/`. Names never start with `_`, so the two trees cannot
//! collide. A cached archive is trusted as is: it is never fetched again nor
//! re-checked against the origin, and its hash is always computed over the
//! file's bytes.

use super::hash::ContentHash;
use super::origin::{ArchiveOrigin, OriginError};
use crate::catalog_store::PackageRef;
use crate::error::{ReplicationError, Result};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::NamedTempFile;
use tracing::{debug, info};

const LOCAL_DIR: &str = "_local";

#[derive(Debug, Clone)]
pub struct StoredArchive {
    pub bytes: Vec<u8>,
    pub content_hash: ContentHash,
    pub path: PathBuf,
    pub from_cache: bool,
}

#[derive(Clone)]
pub struct ContentStore {
    cache_dir: PathBuf,
    origin: Arc<dyn ArchiveOrigin>,
}

impl ContentStore {
    pub fn new(cache_dir: impl Into<PathBuf>, origin: Arc<dyn ArchiveOrigin>) -> Self {
        Self {
            cache_dir: cache_dir.into(),
            origin,
        }
    }

    /// Cache location of an archive served by the origin.
    pub fn archive_path(&self, package: &PackageRef) -> PathBuf {
        relative_path(&self.cache_dir, package)
    }

    /// Cache location of a locally published archive.
    pub fn local_archive_path(&self, package: &PackageRef) -> PathBuf {
        relative_path(&self.cache_dir.join(LOCAL_DIR), package)
    }

    /// Returns the archive of `package`, fetching it from the origin on a
    /// cache miss.
    pub async fn fetch(&self, package: &PackageRef) -> Result<StoredArchive> {
        let path = self.archive_path(package);
        if let Some(cached) = read_cached(package, &path).await? {
            debug!("Archive cache hit for {}", package);
            return Ok(cached);
        }

        let bytes = self
            .origin
            .fetch_archive(package)
            .await
            .map_err(|e| match e {
                OriginError::NotFound(_) => ReplicationError::ArtifactNotFound {
                    package: package.to_string(),
                },
                OriginError::Failed { .. } => ReplicationError::ArtifactFetchFailed {
                    package: package.to_string(),
                    reason: e.to_string(),
                },
            })?;

        persist(package, &path, &bytes).await?;
        info!("Cached archive for {} ({} bytes)", package, bytes.len());

        Ok(StoredArchive {
            content_hash: ContentHash::compute(&bytes),
            bytes,
            path,
            from_cache: false,
        })
    }

    /// Stores the archive of a locally published package.
    ///
    /// An archive already cached for the same local identity is left
    /// untouched and returned instead.
    pub async fn store(&self, package: &PackageRef, bytes: Vec<u8>) -> Result<StoredArchive> {
        let path = self.local_archive_path(package);
        if let Some(cached) = read_cached(package, &path).await? {
            return Ok(cached);
        }

        persist(package, &path, &bytes).await?;
        Ok(StoredArchive {
            content_hash: ContentHash::compute(&bytes),
            bytes,
            path,
            from_cache: false,
        })
    }
}

fn relative_path(root: &Path, package: &PackageRef) -> PathBuf {
    root.join(package.author())
        .join(package.project())
        .join(format!("{}.zip", package.version))
}

fn cache_failure(package: &PackageRef, path: &Path, err: std::io::Error) -> ReplicationError {
    ReplicationError::ArtifactFetchFailed {
        package: package.to_string(),
        reason: format!("archive cache {:?}: {}", path, err),
    }
}

async fn read_cached(package: &PackageRef, path: &Path) -> Result<Option<StoredArchive>> {
    match tokio::fs::read(path).await {
        Ok(bytes) => Ok(Some(StoredArchive {
            content_hash: ContentHash::compute(&bytes),
            bytes,
            path: path.to_path_buf(),
            from_cache: true,
        })),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
        Err(e) => Err(cache_failure(package, path, e)),
    }
}

/// Writes a uniquely named file next to the final path and renames it, so a
/// crash never leaves a truncated archive that would later be trusted as a
/// cache hit, and concurrent writers never share a temporary file.
async fn persist(package: &PackageRef, path: &Path, bytes: &[u8]) -> Result<()> {
    let parent = path
        .parent()
        .ok_or_else(|| cache_failure(package, path, ErrorKind::InvalidInput.into()))?
        .to_path_buf();
    tokio::fs::create_dir_all(&parent)
        .await
        .map_err(|e| cache_failure(package, &parent, e))?;

    let target = path.to_path_buf();
    let bytes = bytes.to_vec();
    let written = tokio::task::spawn_blocking(move || -> std::io::Result<()> {
        let mut partial = NamedTempFile::new_in(&parent)?;
        std::io::Write::write_all(&mut partial, &bytes)?;
        partial.persist(&target).map_err(|e| e.error)?;
        Ok(())
    })
    .await
    .map_err(|e| ReplicationError::ArtifactFetchFailed {
        package: package.to_string(),
        reason: format!("archive cache writer panicked: {}", e),
    })?;
    written.map_err(|e| cache_failure(package, path, e))
}
