//! A fake upstream registry and archive host
//!
//! Serves the same read API a mirror consumes from its uplinks, backed by an
//! in-memory release log. Archives are served from `/archives/...` on the same
//! listener so one instance can play both the registry and the source host.

use super::constants::*;
use super::fixtures::ReleaseDocuments;
use axum::{
    body::Body,
    extract::{Path, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use package_mirror_server::catalog_store::PackageRef;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::net::TcpListener;

#[derive(Default)]
struct RegistryState {
    /// Release events in publication order
    events: Vec<(PackageRef, i64)>,
    documents: HashMap<PackageRef, ReleaseDocuments>,
    archives: HashMap<PackageRef, Vec<u8>>,
    missing_archives: HashSet<PackageRef>,
    archive_requests: usize,
    since_available: bool,
    since_delay: Option<Duration>,
    archive_delay: Option<Duration>,
}

type SharedRegistry = Arc<Mutex<RegistryState>>;

pub struct FakeRegistry {
    /// Base URL to configure as an uplink
    pub base_url: String,
    state: SharedRegistry,
    _shutdown_tx: Option<tokio::sync::oneshot::Sender<()>>,
}

impl FakeRegistry {
    pub async fn spawn() -> Self {
        let state: SharedRegistry = Arc::new(Mutex::new(RegistryState {
            since_available: true,
            ..Default::default()
        }));

        let app = Router::new()
            .route("/all-packages/since/{cursor}", get(since))
            .route("/packages/{author}/{project}/releases.json", get(releases))
            .route(
                "/packages/{author}/{project}/{version}/{file}",
                get(document),
            )
            .route(
                "/archives/{author}/{project}/{version}/package.zip",
                get(archive),
            )
            .with_state(state.clone());

        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("Failed to bind fake registry");
        let port = listener
            .local_addr()
            .expect("Failed to get local address")
            .port();

        let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel::<()>();
        tokio::spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(async {
                    shutdown_rx.await.ok();
                })
                .await
                .expect("Fake registry failed");
        });

        Self {
            base_url: format!("http://127.0.0.1:{}", port),
            state,
            _shutdown_tx: Some(shutdown_tx),
        }
    }

    /// Archive URL template pointing at this registry's archive host.
    pub fn archive_template(&self) -> String {
        format!(
            "{}/archives/{{author}}/{{project}}/{{version}}/package.zip",
            self.base_url
        )
    }

    /// Appends a release with well formed documents and archive.
    pub fn publish(&self, id: &str) -> PackageRef {
        let package: PackageRef = id.parse().expect("Invalid package id");
        let documents = ReleaseDocuments::for_package(&package);
        let archive = documents.archive(&package);
        self.publish_with(&package, documents, archive);
        package
    }

    pub fn publish_with(&self, package: &PackageRef, documents: ReleaseDocuments, archive: Vec<u8>) {
        let mut state = self.state.lock().unwrap();
        let published_at = FIRST_PUBLISHED_AT + 60 * state.events.len() as i64;
        state.events.push((package.clone(), published_at));
        state.documents.insert(package.clone(), documents);
        state.archives.insert(package.clone(), archive);
    }

    /// Serves an archive without announcing a release.
    pub fn host_archive(&self, package: &PackageRef, archive: Vec<u8>) {
        self.state
            .lock()
            .unwrap()
            .archives
            .insert(package.clone(), archive);
    }

    pub fn remove_archive(&self, package: &PackageRef) {
        self.state
            .lock()
            .unwrap()
            .missing_archives
            .insert(package.clone());
    }

    pub fn restore_archive(&self, package: &PackageRef) {
        self.state
            .lock()
            .unwrap()
            .missing_archives
            .remove(package);
    }

    pub fn set_since_available(&self, available: bool) {
        self.state.lock().unwrap().since_available = available;
    }

    /// Holds every `since` response back for `delay`.
    pub fn stall_since(&self, delay: Option<Duration>) {
        self.state.lock().unwrap().since_delay = delay;
    }

    /// Holds every archive response back for `delay`.
    pub fn stall_archives(&self, delay: Option<Duration>) {
        self.state.lock().unwrap().archive_delay = delay;
    }

    pub fn archive_requests(&self) -> usize {
        self.state.lock().unwrap().archive_requests
    }

    pub fn archive_of(&self, package: &PackageRef) -> Vec<u8> {
        self.state.lock().unwrap().archives[package].clone()
    }
}

impl Drop for FakeRegistry {
    fn drop(&mut self) {
        if let Some(tx) = self._shutdown_tx.take() {
            let _ = tx.send(());
        }
    }
}

fn parse_ref(author: &str, project: &str, version: &str) -> Option<PackageRef> {
    format!("{}/{}@{}", author, project, version).parse().ok()
}

async fn since(State(state): State<SharedRegistry>, Path(cursor): Path<usize>) -> Response {
    let delay = state.lock().unwrap().since_delay;
    if let Some(delay) = delay {
        tokio::time::sleep(delay).await;
    }
    let state = state.lock().unwrap();
    if !state.since_available {
        return StatusCode::SERVICE_UNAVAILABLE.into_response();
    }
    let newest_first: Vec<String> = state
        .events
        .iter()
        .skip(cursor)
        .rev()
        .map(|(package, _)| package.to_string())
        .collect();
    Json(newest_first).into_response()
}

async fn releases(
    State(state): State<SharedRegistry>,
    Path((author, project)): Path<(String, String)>,
) -> Response {
    let state = state.lock().unwrap();
    let times: BTreeMap<String, i64> = state
        .events
        .iter()
        .filter(|(package, _)| package.author() == author && package.project() == project)
        .map(|(package, time)| (package.version.to_string(), *time))
        .collect();
    if times.is_empty() {
        return StatusCode::NOT_FOUND.into_response();
    }
    Json(times).into_response()
}

async fn document(
    State(state): State<SharedRegistry>,
    Path((author, project, version, file)): Path<(String, String, String, String)>,
) -> Response {
    let state = state.lock().unwrap();
    let Some(documents) =
        parse_ref(&author, &project, &version).and_then(|p| state.documents.get(&p))
    else {
        return StatusCode::NOT_FOUND.into_response();
    };
    let body = match file.as_str() {
        "elm.json" => documents.manifest.clone(),
        "docs.json" => documents.docs.clone(),
        "README.md" => documents.readme.clone(),
        _ => return StatusCode::NOT_FOUND.into_response(),
    };
    body.into_response()
}

async fn archive(
    State(state): State<SharedRegistry>,
    Path((author, project, version)): Path<(String, String, String)>,
) -> Response {
    let delay = {
        let mut state = state.lock().unwrap();
        state.archive_requests += 1;
        state.archive_delay
    };
    if let Some(delay) = delay {
        tokio::time::sleep(delay).await;
    }
    let state = state.lock().unwrap();
    let Some(package) = parse_ref(&author, &project, &version) else {
        return StatusCode::NOT_FOUND.into_response();
    };
    if state.missing_archives.contains(&package) {
        return StatusCode::NOT_FOUND.into_response();
    }
    match state.archives.get(&package) {
        Some(bytes) => Response::builder()
            .header(header::CONTENT_TYPE, "application/zip")
            .body(Body::from(bytes.clone()))
            .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response()),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}
