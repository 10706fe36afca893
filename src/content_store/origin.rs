//! Where source archives come from.

use crate::catalog_store::PackageRef;
use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;

pub const DEFAULT_ARCHIVE_ORIGIN: &str = "https://github.com/{author}/{project}/zipball/{version}/";

#[derive(Debug, Error)]
pub enum OriginError {
    #[error("no archive at {0}")]
    NotFound(String),

    #[error("fetching {url} failed: {reason}")]
    Failed { url: String, reason: String },
}

/// URL of a tagged archive, with `{author}`, `{project}` and `{version}`
/// placeholders.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveUrlTemplate(String);

impl ArchiveUrlTemplate {
    pub fn new(template: impl Into<String>) -> Self {
        ArchiveUrlTemplate(template.into())
    }

    pub fn render(&self, package: &PackageRef) -> String {
        self.0
            .replace("{author}", package.author())
            .replace("{project}", package.project())
            .replace("{version}", &package.version.to_string())
    }
}

impl Default for ArchiveUrlTemplate {
    fn default() -> Self {
        ArchiveUrlTemplate::new(DEFAULT_ARCHIVE_ORIGIN)
    }
}

#[async_trait]
pub trait ArchiveOrigin: Send + Sync {
    async fn fetch_archive(&self, package: &PackageRef) -> Result<Vec<u8>, OriginError>;
}

pub struct HttpArchiveOrigin {
    client: reqwest::Client,
    template: ArchiveUrlTemplate,
}

impl HttpArchiveOrigin {
    pub fn new(template: ArchiveUrlTemplate, timeout_sec: u64) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_sec))
            .build()?;
        Ok(Self { client, template })
    }
}

#[async_trait]
impl ArchiveOrigin for HttpArchiveOrigin {
    async fn fetch_archive(&self, package: &PackageRef) -> Result<Vec<u8>, OriginError> {
        let url = self.template.render(package);
        let failed = |reason: String| OriginError::Failed {
            url: url.clone(),
            reason,
        };

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| failed(e.to_string()))?;

        let status = response.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(OriginError::NotFound(url));
        }
        if !status.is_success() {
            return Err(failed(format!("status {}", status)));
        }

        let bytes = response.bytes().await.map_err(|e| failed(e.to_string()))?;
        Ok(bytes.to_vec())
    }
}
