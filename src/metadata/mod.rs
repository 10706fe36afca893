//! Metadata Fetcher: the documents that accompany a release archive.
//!
//! In `Http` mode everything comes from the uplink. In `Archive` mode the
//! manifest and readme are read from the archive itself, while the publish
//! time and the docs still come from the uplink since archives carry neither.
//! Either way a release only gets metadata if every piece was obtained and
//! parsed; there is no partial result.

mod documents;

pub use documents::{parse_docs, ModuleDocs, ProjectManifest, ReleaseTimes};

use crate::archive_reader::ArchiveReader;
use crate::catalog_store::PackageRef;
use crate::error::{ReplicationError, Result};
use crate::uplink::{ReleaseDocument, UplinkApi};
use serde::Deserialize;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum MetadataSource {
    #[default]
    Http,
    Archive,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ReleaseMetadata {
    pub published_at: i64,
    pub manifest: ProjectManifest,
    pub manifest_json: String,
    pub readme_text: String,
    pub docs_json: String,
}

#[derive(Clone)]
pub struct MetadataFetcher {
    api: Arc<dyn UplinkApi>,
    source: MetadataSource,
}

impl MetadataFetcher {
    pub fn new(api: Arc<dyn UplinkApi>, source: MetadataSource) -> Self {
        Self { api, source }
    }

    pub fn source(&self) -> MetadataSource {
        self.source
    }

    /// Gathers the metadata of `package` from `uplink_url`, using
    /// `archive_bytes` in archive mode.
    pub async fn fetch(
        &self,
        uplink_url: &str,
        package: &PackageRef,
        archive_bytes: &[u8],
    ) -> Result<ReleaseMetadata> {
        let incomplete = |reason: String| ReplicationError::MetadataIncomplete {
            package: package.to_string(),
            reason,
        };
        let document = |document: ReleaseDocument| async move {
            self.api
                .fetch_release_document(uplink_url, package, document)
                .await
                .map_err(|e| incomplete(format!("{}: {}", document.file_name(), e)))
        };
        let times = async {
            self.api
                .fetch_release_times(uplink_url, &package.name)
                .await
                .map_err(|e| incomplete(format!("releases.json: {}", e)))
        };

        let (times_body, manifest_json, readme_text, docs_json) = match self.source {
            MetadataSource::Http => tokio::try_join!(
                times,
                document(ReleaseDocument::Manifest),
                document(ReleaseDocument::Readme),
                document(ReleaseDocument::Docs),
            )?,
            MetadataSource::Archive => {
                let (manifest_json, readme_text) = {
                    let mut reader = ArchiveReader::open(archive_bytes, package)?;
                    let manifest = reader.read_manifest()?;
                    let readme = reader.read_file("README.md")?.unwrap_or_default();
                    (manifest, readme)
                };
                let (times_body, docs_json) =
                    tokio::try_join!(times, document(ReleaseDocument::Docs))?;
                (times_body, manifest_json, readme_text, docs_json)
            }
        };

        let published_at = ReleaseTimes::parse(&times_body)
            .and_then(|times| times.published_at(package))
            .map_err(incomplete)?;
        let manifest = ProjectManifest::parse(&manifest_json).map_err(incomplete)?;
        parse_docs(&docs_json).map_err(incomplete)?;

        Ok(ReleaseMetadata {
            published_at,
            manifest,
            manifest_json,
            readme_text,
            docs_json,
        })
    }
}
