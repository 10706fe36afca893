//! In-memory uplink and origin used by unit tests.

use crate::catalog_store::{PackageName, PackageRef};
use crate::content_store::{ArchiveOrigin, OriginError};
use crate::uplink::{ReleaseDocument, UplinkApi, UplinkError};
use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::io::{Cursor, Write};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

pub fn build_zip(entries: &[(&str, &str)]) -> Vec<u8> {
    let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
    let options = zip::write::SimpleFileOptions::default();
    for (name, content) in entries {
        writer.start_file(*name, options).unwrap();
        writer.write_all(content.as_bytes()).unwrap();
    }
    writer.finish().unwrap().into_inner()
}

/// A well formed archive for `package`.
pub fn release_archive(package: &PackageRef) -> Vec<u8> {
    let root = format!("{}-{}-0123abcd", package.author(), package.project());
    let manifest = format!(
        r#"{{"type":"package","name":"{}","summary":"archive summary","license":"BSD-3-Clause","version":"{}"}}"#,
        package.name, package.version
    );
    let manifest_path = format!("{}/elm.json", root);
    let readme_path = format!("{}/README.md", root);
    build_zip(&[
        (manifest_path.as_str(), manifest.as_str()),
        (readme_path.as_str(), "# archive readme"),
    ])
}

#[derive(Default)]
struct FakeUplinkState {
    events: Vec<PackageRef>,
    since_overrides: HashMap<i64, String>,
    times: HashMap<PackageName, BTreeMap<String, i64>>,
    documents: HashMap<(PackageRef, ReleaseDocument), String>,
    since_unreachable: bool,
}

/// Serves an append-only event log the way a registry does.
#[derive(Default)]
pub struct FakeUplink {
    state: Mutex<FakeUplinkState>,
    since_delay: Mutex<Option<Duration>>,
    since_calls: AtomicUsize,
}

impl FakeUplink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_since(&self, cursor: i64, body: &str) {
        let mut state = self.state.lock().unwrap();
        state.since_overrides.insert(cursor, body.to_string());
    }

    pub fn add_release(
        &self,
        package: &PackageRef,
        published_at: i64,
        manifest: &str,
        readme: &str,
        docs: &str,
    ) {
        let mut state = self.state.lock().unwrap();
        state.events.push(package.clone());
        state
            .times
            .entry(package.name.clone())
            .or_default()
            .insert(package.version.to_string(), published_at);
        for (document, body) in [
            (ReleaseDocument::Manifest, manifest),
            (ReleaseDocument::Readme, readme),
            (ReleaseDocument::Docs, docs),
        ] {
            state
                .documents
                .insert((package.clone(), document), body.to_string());
        }
    }

    /// Adds a release with plausible documents.
    pub fn publish(&self, id: &str, published_at: i64) -> PackageRef {
        let package: PackageRef = id.parse().unwrap();
        self.add_release(
            &package,
            published_at,
            &format!(r#"{{"summary":"{} summary","license":"MIT"}}"#, package.name),
            &format!("# {}", package),
            "[]",
        );
        package
    }

    pub fn set_document(&self, package: &PackageRef, document: ReleaseDocument, body: &str) {
        let mut state = self.state.lock().unwrap();
        state
            .documents
            .insert((package.clone(), document), body.to_string());
    }

    pub fn remove_document(&self, package: &PackageRef, document: ReleaseDocument) {
        let mut state = self.state.lock().unwrap();
        state.documents.remove(&(package.clone(), document));
    }

    pub fn set_since_unreachable(&self, unreachable: bool) {
        self.state.lock().unwrap().since_unreachable = unreachable;
    }

    pub fn set_since_delay(&self, delay: Duration) {
        *self.since_delay.lock().unwrap() = Some(delay);
    }

    pub fn since_calls(&self) -> usize {
        self.since_calls.load(Ordering::SeqCst)
    }
}

fn not_found(url: String) -> UplinkError {
    UplinkError::Status { url, status: 404 }
}

#[async_trait]
impl UplinkApi for FakeUplink {
    async fn fetch_since(&self, base_url: &str, cursor: i64) -> Result<String, UplinkError> {
        self.since_calls.fetch_add(1, Ordering::SeqCst);
        let delay = *self.since_delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let state = self.state.lock().unwrap();
        if state.since_unreachable {
            return Err(UplinkError::Transport {
                url: base_url.to_string(),
                reason: "connection refused".to_string(),
            });
        }
        if let Some(body) = state.since_overrides.get(&cursor) {
            return Ok(body.clone());
        }
        let newer: Vec<String> = state
            .events
            .iter()
            .skip(cursor.max(0) as usize)
            .rev()
            .map(|p| p.to_string())
            .collect();
        Ok(serde_json::to_string(&newer).unwrap())
    }

    async fn fetch_release_times(
        &self,
        base_url: &str,
        name: &PackageName,
    ) -> Result<String, UplinkError> {
        let state = self.state.lock().unwrap();
        state
            .times
            .get(name)
            .map(|times| serde_json::to_string(times).unwrap())
            .ok_or_else(|| not_found(format!("{}/packages/{}/releases.json", base_url, name)))
    }

    async fn fetch_release_document(
        &self,
        base_url: &str,
        package: &PackageRef,
        document: ReleaseDocument,
    ) -> Result<String, UplinkError> {
        let state = self.state.lock().unwrap();
        state
            .documents
            .get(&(package.clone(), document))
            .cloned()
            .ok_or_else(|| {
                not_found(format!(
                    "{}/packages/{}/{}/{}",
                    base_url,
                    package.name,
                    package.version,
                    document.file_name()
                ))
            })
    }
}

#[derive(Default)]
struct FakeOriginState {
    archives: HashMap<String, Vec<u8>>,
    failing: HashMap<String, String>,
    failure: Option<String>,
}

#[derive(Default)]
pub struct FakeOrigin {
    state: Mutex<FakeOriginState>,
    fetches: AtomicUsize,
}

impl FakeOrigin {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, package: &PackageRef, bytes: Vec<u8>) {
        let mut state = self.state.lock().unwrap();
        state.archives.insert(package.to_string(), bytes);
    }

    /// Makes every fetch fail as if the origin were down.
    pub fn fail_with(&self, reason: &str) {
        self.state.lock().unwrap().failure = Some(reason.to_string());
    }

    pub fn fail_package(&self, package: &PackageRef, reason: &str) {
        let mut state = self.state.lock().unwrap();
        state.failing.insert(package.to_string(), reason.to_string());
    }

    pub fn heal_package(&self, package: &PackageRef) {
        self.state.lock().unwrap().failing.remove(&package.to_string());
    }

    pub fn fetch_count(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ArchiveOrigin for FakeOrigin {
    async fn fetch_archive(&self, package: &PackageRef) -> Result<Vec<u8>, OriginError> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        let state = self.state.lock().unwrap();
        let key = package.to_string();
        if let Some(reason) = state.failure.as_ref().or_else(|| state.failing.get(&key)) {
            return Err(OriginError::Failed {
                url: key,
                reason: reason.clone(),
            });
        }
        state
            .archives
            .get(&key)
            .cloned()
            .ok_or(OriginError::NotFound(key))
    }
}
