//! Ingestion Pipeline: one release identifier in, one catalog commit out.
//!
//! 1. Content Store: archive bytes and content hash (cached per identity)
//! 2. Archive Reader: the archive must have the expected layout
//! 3. Metadata Fetcher: publish time, manifest, readme, docs
//! 4. Catalog Store: package upsert, release insert and cursor advance
//!
//! Nothing is retried here. A failed identifier leaves the cursor where it
//! was, which is what gets it attempted again on the next cycle.

use crate::archive_reader::ArchiveReader;
use crate::catalog_store::{CatalogStore, CommitReceipt, NewPackage, NewRelease, PackageRef, Uplink};
use crate::content_store::{ContentHash, ContentStore};
use crate::error::{ReplicationError, Result};
use crate::metadata::MetadataFetcher;
use std::sync::Arc;
use tracing::debug;

#[derive(Debug, Clone)]
pub struct IngestedRelease {
    pub package: PackageRef,
    pub content_hash: ContentHash,
    pub receipt: CommitReceipt,
}

#[derive(Clone)]
pub struct IngestionPipeline {
    content: ContentStore,
    metadata: MetadataFetcher,
    catalog: Arc<dyn CatalogStore>,
}

impl IngestionPipeline {
    pub fn new(
        content: ContentStore,
        metadata: MetadataFetcher,
        catalog: Arc<dyn CatalogStore>,
    ) -> Self {
        Self {
            content,
            metadata,
            catalog,
        }
    }

    pub async fn ingest(&self, uplink: &Uplink, package: &PackageRef) -> Result<IngestedRelease> {
        let archive = self.content.fetch(package).await?;
        let root = ArchiveReader::open(&archive.bytes, package)?.root().to_string();
        debug!("Archive of {} rooted at {}/", package, root);

        let metadata = self
            .metadata
            .fetch(&uplink.url, package, &archive.bytes)
            .await?;

        let new_package = NewPackage {
            name: package.name.clone(),
            summary: metadata.manifest.summary,
            license: metadata.manifest.license,
        };
        let new_release = NewRelease {
            version: package.version.clone(),
            published_at: metadata.published_at,
            manifest_json: metadata.manifest_json,
            readme_text: metadata.readme_text,
            docs_json: metadata.docs_json,
            content_hash: archive.content_hash.to_string(),
        };

        // The commit runs on the blocking pool and is not cancelled if this
        // future is dropped: a started transaction always commits or rolls back.
        let catalog = self.catalog.clone();
        let uplink_id = uplink.id;
        let receipt = tokio::task::spawn_blocking(move || {
            catalog.upsert_package_and_release(&new_package, &new_release, uplink_id)
        })
        .await
        .map_err(|e| ReplicationError::TransactionFailed(format!("commit task failed: {}", e)))??;

        Ok(IngestedRelease {
            package: package.clone(),
            content_hash: archive.content_hash,
            receipt,
        })
    }
}
