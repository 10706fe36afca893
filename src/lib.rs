//! Package Mirror Server Library
//!
//! Replicates a package registry from one or more uplinks into a local
//! catalog and serves that catalog with the same read API, so mirrors can
//! be chained.

pub mod archive_reader;
pub mod background_jobs;
pub mod catalog_store;
pub mod config;
pub mod content_store;
pub mod error;
pub mod ingestion;
pub mod metadata;
pub mod publish;
pub mod server;
pub mod sqlite_persistence;
pub mod sync;
pub mod uplink;

#[cfg(test)]
mod test_support;

// Re-export commonly used types for convenience
pub use catalog_store::{CatalogStore, SqliteCatalogStore};
pub use error::{ErrorKind, ReplicationError};
pub use server::{run_server, RequestsLoggingLevel};
