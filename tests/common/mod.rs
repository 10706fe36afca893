//! Common test infrastructure
//!
//! Tests should only import from this module, not from internal submodules.
//!
//! # Example
//!
//! ```no_run
//! mod common;
//! use common::{FakeRegistry, MirrorOptions, TestClient, TestServer, CORE_1_0_0};
//!
//! #[tokio::test]
//! async fn test_replicates() {
//!     let upstream = FakeRegistry::spawn().await;
//!     upstream.publish(CORE_1_0_0);
//!     let mirror = TestServer::spawn(MirrorOptions::new(
//!         &[&upstream.base_url],
//!         &upstream.archive_template(),
//!     ))
//!     .await;
//!     mirror.sync().await;
//!
//!     let client = TestClient::new(mirror.base_url.clone());
//!     assert_eq!(client.since_ids(0).await, vec![CORE_1_0_0]);
//! }
//! ```

mod client;
mod constants;
mod fixtures;
mod server;
mod upstream;

// Public API - this is what tests import
pub use client::TestClient;
pub use constants::*;
#[allow(unused_imports)]
pub use fixtures::{build_zip, ReleaseDocuments};
pub use server::{MirrorOptions, TestServer};
pub use upstream::FakeRegistry;
