//! HTTP client for upstream registries.

use crate::catalog_store::{PackageName, PackageRef};
use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum UplinkError {
    #[error("request to {url} failed: {reason}")]
    Transport { url: String, reason: String },

    #[error("{url} answered with status {status}")]
    Status { url: String, status: u16 },
}

/// Per-release documents an uplink serves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReleaseDocument {
    Manifest,
    Docs,
    Readme,
}

impl ReleaseDocument {
    pub fn file_name(&self) -> &'static str {
        match self {
            ReleaseDocument::Manifest => "elm.json",
            ReleaseDocument::Docs => "docs.json",
            ReleaseDocument::Readme => "README.md",
        }
    }
}

/// The registry API consumed from an uplink. Bodies are returned raw; typing
/// and validation is up to the caller.
#[async_trait]
pub trait UplinkApi: Send + Sync {
    /// `GET {base_url}/all-packages/since/{cursor}`
    async fn fetch_since(&self, base_url: &str, cursor: i64) -> Result<String, UplinkError>;

    /// `GET {base_url}/packages/{author}/{project}/releases.json`
    async fn fetch_release_times(
        &self,
        base_url: &str,
        name: &PackageName,
    ) -> Result<String, UplinkError>;

    /// `GET {base_url}/packages/{author}/{project}/{version}/{document}`
    async fn fetch_release_document(
        &self,
        base_url: &str,
        package: &PackageRef,
        document: ReleaseDocument,
    ) -> Result<String, UplinkError>;
}

pub struct HttpUplinkApi {
    client: reqwest::Client,
}

impl HttpUplinkApi {
    /// Every request is bounded by `timeout_sec`; a timeout surfaces as a
    /// transport error.
    pub fn new(timeout_sec: u64) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_sec))
            .build()?;
        Ok(Self { client })
    }

    async fn get_text(&self, url: String) -> Result<String, UplinkError> {
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| UplinkError::Transport {
                url: url.clone(),
                reason: e.to_string(),
            })?;

        if !response.status().is_success() {
            return Err(UplinkError::Status {
                url,
                status: response.status().as_u16(),
            });
        }

        response.text().await.map_err(|e| UplinkError::Transport {
            url,
            reason: e.to_string(),
        })
    }
}

fn base(base_url: &str) -> &str {
    base_url.trim_end_matches('/')
}

#[async_trait]
impl UplinkApi for HttpUplinkApi {
    async fn fetch_since(&self, base_url: &str, cursor: i64) -> Result<String, UplinkError> {
        self.get_text(format!("{}/all-packages/since/{}", base(base_url), cursor))
            .await
    }

    async fn fetch_release_times(
        &self,
        base_url: &str,
        name: &PackageName,
    ) -> Result<String, UplinkError> {
        self.get_text(format!(
            "{}/packages/{}/{}/releases.json",
            base(base_url),
            name.author,
            name.project
        ))
        .await
    }

    async fn fetch_release_document(
        &self,
        base_url: &str,
        package: &PackageRef,
        document: ReleaseDocument,
    ) -> Result<String, UplinkError> {
        self.get_text(format!(
            "{}/packages/{}/{}/{}/{}",
            base(base_url),
            package.author(),
            package.project(),
            package.version,
            document.file_name()
        ))
        .await
    }
}
