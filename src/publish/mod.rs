//! Direct publication of a package archive into the local catalog.
//!
//! A locally published release never comes from an uplink: the archive is
//! handed over by the publisher, its documents are read from the archive
//! itself, and the catalog row has no owning uplink.

use crate::archive_reader::ArchiveReader;
use crate::catalog_store::{CatalogStore, CommitReceipt, NewPackage, NewRelease, PackageRef};
use crate::config::HashVerification;
use crate::content_store::{ContentHash, ContentStore};
use crate::error::ReplicationError;
use crate::metadata::{parse_docs, ProjectManifest};
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, warn};

const EMPTY_DOCS: &str = "[]";

#[derive(Debug, Error)]
pub enum PublishError {
    #[error("archive of {package} hashes to {actual}, expected {expected}")]
    HashMismatch {
        package: String,
        expected: String,
        actual: String,
    },

    #[error("publishing {0} requires an expected content hash")]
    MissingExpectedHash(String),

    #[error("{0} is not a 40 digit hex SHA-1")]
    InvalidExpectedHash(String),

    #[error("{package} is already cached as {cached}, the given archive hashes to {given}")]
    CachedArchiveConflict {
        package: String,
        cached: String,
        given: String,
    },

    #[error(transparent)]
    Replication(#[from] ReplicationError),
}

/// Documents of a release as found inside its archive.
struct ArchiveDocuments {
    manifest: ProjectManifest,
    manifest_json: String,
    readme_text: String,
    docs_json: String,
}

fn read_documents(bytes: &[u8], package: &PackageRef) -> Result<ArchiveDocuments, PublishError> {
    let incomplete = |reason: String| ReplicationError::MetadataIncomplete {
        package: package.to_string(),
        reason,
    };

    let mut reader = ArchiveReader::open(bytes, package)?;
    let manifest_json = reader.read_manifest()?;
    let readme_text = reader.read_file("README.md")?.unwrap_or_default();
    let docs_json = reader
        .read_file("docs.json")?
        .unwrap_or_else(|| EMPTY_DOCS.to_string());

    let manifest = ProjectManifest::parse(&manifest_json).map_err(incomplete)?;
    parse_docs(&docs_json).map_err(incomplete)?;

    Ok(ArchiveDocuments {
        manifest,
        manifest_json,
        readme_text,
        docs_json,
    })
}

#[derive(Clone)]
pub struct LocalPublisher {
    content: ContentStore,
    catalog: Arc<dyn CatalogStore>,
    verification: HashVerification,
}

impl LocalPublisher {
    pub fn new(
        content: ContentStore,
        catalog: Arc<dyn CatalogStore>,
        verification: HashVerification,
    ) -> Self {
        Self {
            content,
            catalog,
            verification,
        }
    }

    fn check_hash(
        &self,
        package: &PackageRef,
        actual: &ContentHash,
        expected: Option<&str>,
    ) -> Result<(), PublishError> {
        let expected = match (self.verification, expected) {
            (HashVerification::Disabled, _) => return Ok(()),
            (HashVerification::IfProvided, None) => return Ok(()),
            (HashVerification::Required, None) => {
                return Err(PublishError::MissingExpectedHash(package.to_string()))
            }
            (_, Some(expected)) => ContentHash::from_hex(expected)
                .ok_or_else(|| PublishError::InvalidExpectedHash(expected.to_string()))?,
        };

        if &expected != actual {
            return Err(PublishError::HashMismatch {
                package: package.to_string(),
                expected: expected.to_string(),
                actual: actual.to_string(),
            });
        }
        Ok(())
    }

    /// Publishes `bytes` as the archive of `package`.
    ///
    /// Nothing is cached or committed unless the hash policy is satisfied and
    /// the archive has the expected layout.
    pub async fn publish(
        &self,
        package: &PackageRef,
        bytes: Vec<u8>,
        expected_hash: Option<&str>,
    ) -> Result<CommitReceipt, PublishError> {
        let content_hash = ContentHash::compute(&bytes);
        self.check_hash(package, &content_hash, expected_hash)?;
        let documents = read_documents(&bytes, package)?;

        let stored = self.content.store(package, bytes).await?;
        if stored.content_hash != content_hash {
            return Err(PublishError::CachedArchiveConflict {
                package: package.to_string(),
                cached: stored.content_hash.to_string(),
                given: content_hash.to_string(),
            });
        }
        if stored.from_cache {
            warn!("Archive of {} was already cached at {:?}", package, stored.path);
        }

        let new_package = NewPackage {
            name: package.name.clone(),
            summary: documents.manifest.summary,
            license: documents.manifest.license,
        };
        let new_release = NewRelease {
            version: package.version.clone(),
            published_at: chrono::Utc::now().timestamp(),
            manifest_json: documents.manifest_json,
            readme_text: documents.readme_text,
            docs_json: documents.docs_json,
            content_hash: content_hash.to_string(),
        };

        let catalog = self.catalog.clone();
        let receipt = tokio::task::spawn_blocking(move || {
            catalog.register_local_package(&new_package, &new_release)
        })
        .await
        .map_err(|e| ReplicationError::TransactionFailed(format!("commit task failed: {}", e)))??;

        info!("Published {} locally ({})", package, content_hash);
        Ok(receipt)
    }
}
