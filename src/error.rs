//! Error taxonomy shared by the replication components.
//!
//! Every component on the ingestion path (delta fetch, content store, archive
//! reader, metadata fetch, catalog commit) reports failures through
//! [`ReplicationError`]. The sync orchestrator only cares about the kind of
//! failure: whether the same identifier should be retried on the next cycle
//! or needs an operator to look at it.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, ReplicationError>;

/// Errors that can occur while replicating a release from an uplink.
#[derive(Debug, Error)]
pub enum ReplicationError {
    /// The uplink delta query failed or returned something unparseable.
    #[error("Delta fetch from {uplink} failed: {reason}")]
    DeltaFetchFailed { uplink: String, reason: String },

    /// The origin has no archive for this tag.
    #[error("Archive not found at origin for {package}")]
    ArtifactNotFound { package: String },

    /// Transient origin or network failure while fetching an archive.
    #[error("Archive fetch failed for {package}: {reason}")]
    ArtifactFetchFailed { package: String, reason: String },

    /// The archive does not contain the expected `{author}-{project}-{rev}/` root.
    #[error("Unexpected archive layout for {package}: {reason}")]
    ArchiveLayoutMismatch { package: String, reason: String },

    /// One of the release documents could not be fetched or parsed.
    #[error("Incomplete metadata for {package}: {reason}")]
    MetadataIncomplete { package: String, reason: String },

    /// The release is already in the catalog.
    #[error("Release {package} already exists in the catalog")]
    DuplicateRelease { package: String },

    /// The catalog transaction could not be committed.
    #[error("Catalog transaction failed: {0}")]
    TransactionFailed(String),
}

/// Coarse classification used for logging, metrics and retry decisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    DeltaFetchFailed,
    ArtifactNotFound,
    ArtifactFetchFailed,
    ArchiveLayoutMismatch,
    MetadataIncomplete,
    DuplicateRelease,
    TransactionFailed,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::DeltaFetchFailed => "delta_fetch_failed",
            ErrorKind::ArtifactNotFound => "artifact_not_found",
            ErrorKind::ArtifactFetchFailed => "artifact_fetch_failed",
            ErrorKind::ArchiveLayoutMismatch => "archive_layout_mismatch",
            ErrorKind::MetadataIncomplete => "metadata_incomplete",
            ErrorKind::DuplicateRelease => "duplicate_release",
            ErrorKind::TransactionFailed => "transaction_failed",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl ReplicationError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ReplicationError::DeltaFetchFailed { .. } => ErrorKind::DeltaFetchFailed,
            ReplicationError::ArtifactNotFound { .. } => ErrorKind::ArtifactNotFound,
            ReplicationError::ArtifactFetchFailed { .. } => ErrorKind::ArtifactFetchFailed,
            ReplicationError::ArchiveLayoutMismatch { .. } => ErrorKind::ArchiveLayoutMismatch,
            ReplicationError::MetadataIncomplete { .. } => ErrorKind::MetadataIncomplete,
            ReplicationError::DuplicateRelease { .. } => ErrorKind::DuplicateRelease,
            ReplicationError::TransactionFailed(_) => ErrorKind::TransactionFailed,
        }
    }

    /// Transient failures are expected to go away on their own; the same
    /// identifier is attempted again on the next cycle.
    ///
    /// Terminal failures (missing tag, duplicate, broken archive) will keep
    /// failing until someone intervenes.
    pub fn is_transient(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::DeltaFetchFailed
                | ErrorKind::ArtifactFetchFailed
                | ErrorKind::MetadataIncomplete
                | ErrorKind::TransactionFailed
        )
    }
}

impl From<rusqlite::Error> for ReplicationError {
    fn from(err: rusqlite::Error) -> Self {
        ReplicationError::TransactionFailed(err.to_string())
    }
}
