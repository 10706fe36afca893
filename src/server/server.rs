use anyhow::{Context, Result};
use std::collections::BTreeMap;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use axum::{
    extract::{Path, State},
    http::{header, StatusCode},
    middleware,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};

use super::{log_requests, metrics::metrics_handler, state::*};
use crate::background_jobs::JobError;
use crate::catalog_store::{PackageName, PackageRef, ReleaseVersion};

/// Where to download a release archive from, and what it must hash to.
#[derive(serde::Serialize)]
struct ReleaseEndpoint {
    #[serde(rename = "url")]
    archive_url: String,
    #[serde(rename = "hash")]
    content_hash: String,
}

fn internal_error(context: &str, err: anyhow::Error) -> Response {
    error!("{}: {:#}", context, err);
    (StatusCode::INTERNAL_SERVER_ERROR, format!("{}", err)).into_response()
}

fn parse_name(author: &str, project: &str) -> Option<PackageName> {
    PackageName::new(author, project).ok()
}

async fn get_all_packages(State(catalog): State<GuardedCatalogStore>) -> Response {
    match catalog.list_all_packages() {
        Ok(packages) => {
            let listing: BTreeMap<String, Vec<ReleaseVersion>> = packages
                .into_iter()
                .map(|(name, mut versions)| {
                    versions.sort();
                    (name.to_string(), versions)
                })
                .collect();
            Json(listing).into_response()
        }
        Err(err) => internal_error("Failed to list packages", err),
    }
}

async fn get_packages_since(
    State(catalog): State<GuardedCatalogStore>,
    Path(cursor): Path<i64>,
) -> Response {
    match catalog.list_releases_since(cursor) {
        Ok(releases) => {
            let identifiers: Vec<String> = releases.iter().map(PackageRef::to_string).collect();
            Json(identifiers).into_response()
        }
        Err(err) => internal_error("Failed to list releases", err),
    }
}

async fn get_releases(
    State(catalog): State<GuardedCatalogStore>,
    Path((author, project)): Path<(String, String)>,
) -> Response {
    let Some(name) = parse_name(&author, &project) else {
        return StatusCode::NOT_FOUND.into_response();
    };
    match catalog.get_release_timeline(&name) {
        Ok(Some(timeline)) => Json(timeline).into_response(),
        Ok(None) => StatusCode::NOT_FOUND.into_response(),
        Err(err) => internal_error("Failed to read releases", err),
    }
}

async fn get_release_file(
    State(state): State<ServerState>,
    Path((author, project, version, file)): Path<(String, String, String, String)>,
) -> Response {
    let Ok(version) = version.parse::<ReleaseVersion>() else {
        return StatusCode::NOT_FOUND.into_response();
    };
    let Ok(package) = PackageRef::new(&author, &project, version) else {
        return StatusCode::NOT_FOUND.into_response();
    };

    let release = match state
        .catalog_store
        .get_release(&package.name, &package.version)
    {
        Ok(Some(release)) => release,
        Ok(None) => return StatusCode::NOT_FOUND.into_response(),
        Err(err) => return internal_error("Failed to read release", err),
    };

    let json = [(header::CONTENT_TYPE, "application/json")];
    match file.as_str() {
        "endpoint.json" => Json(ReleaseEndpoint {
            archive_url: state.archive_urls.render(&package),
            content_hash: release.content_hash,
        })
        .into_response(),
        "elm.json" => (json, release.manifest_json).into_response(),
        "docs.json" => (json, release.docs_json).into_response(),
        "README.md" => (
            [(header::CONTENT_TYPE, "text/markdown; charset=utf-8")],
            release.readme_text,
        )
            .into_response(),
        _ => StatusCode::NOT_FOUND.into_response(),
    }
}

async fn get_search_listing(State(catalog): State<GuardedCatalogStore>) -> Response {
    match catalog.list_latest_releases() {
        Ok(listings) => Json(listings).into_response(),
        Err(err) => internal_error("Failed to list latest releases", err),
    }
}

async fn list_jobs(State(scheduler): State<OptionalSchedulerHandle>) -> Response {
    match scheduler {
        Some(handle) => Json(handle.list_jobs().await).into_response(),
        None => Json(Vec::<()>::new()).into_response(),
    }
}

async fn trigger_job(
    State(scheduler): State<OptionalSchedulerHandle>,
    Path(job_id): Path<String>,
) -> Response {
    let Some(handle) = scheduler else {
        return StatusCode::NOT_FOUND.into_response();
    };
    match handle.trigger_job(&job_id).await {
        Ok(()) => {
            info!("Job {} triggered over HTTP", job_id);
            StatusCode::ACCEPTED.into_response()
        }
        Err(JobError::NotFound) => StatusCode::NOT_FOUND.into_response(),
        Err(err @ JobError::AlreadyRunning) => {
            (StatusCode::CONFLICT, err.to_string()).into_response()
        }
        Err(err) => (StatusCode::INTERNAL_SERVER_ERROR, err.to_string()).into_response(),
    }
}

async fn not_found() -> StatusCode {
    StatusCode::NOT_FOUND
}

/// The catalog surface served to clients and downstream mirrors.
pub fn make_app(state: ServerState) -> Router {
    let package_routes: Router = Router::new()
        .route("/{author}/{project}/releases.json", get(get_releases))
        .route(
            "/{author}/{project}/{version}/{file}",
            get(get_release_file),
        )
        .with_state(state.clone());

    let job_routes: Router = Router::new()
        .route("/", get(list_jobs))
        .route("/{id}/trigger", post(trigger_job))
        .with_state(state.clone());

    Router::new()
        .route("/all-packages", get(get_all_packages))
        .route("/all-packages/since/{cursor}", get(get_packages_since))
        .route("/search.json", get(get_search_listing))
        .with_state(state.clone())
        .nest("/packages", package_routes)
        .nest("/jobs", job_routes)
        .fallback(not_found)
        .layer(middleware::from_fn_with_state(
            state.config.requests_logging_level.clone(),
            log_requests,
        ))
}

pub fn make_metrics_app() -> Router {
    Router::new().route("/metrics", get(metrics_handler))
}

/// Serves `app` on `listener` until `shutdown` is cancelled.
pub async fn serve(listener: TcpListener, app: Router, shutdown: CancellationToken) -> Result<()> {
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown.cancelled_owned())
        .await
        .context("HTTP server failed")
}

pub async fn run_server(state: ServerState, shutdown: CancellationToken) -> Result<()> {
    let port = state.config.port;
    let metrics_port = state.config.metrics_port;

    let listener = TcpListener::bind(("0.0.0.0", port))
        .await
        .with_context(|| format!("Failed to bind port {}", port))?;
    let metrics_listener = TcpListener::bind(("0.0.0.0", metrics_port))
        .await
        .with_context(|| format!("Failed to bind metrics port {}", metrics_port))?;

    info!("Ready to serve at port {}!", port);
    info!("Metrics available at port {}!", metrics_port);

    tokio::try_join!(
        serve(listener, make_app(state), shutdown.clone()),
        serve(metrics_listener, make_metrics_app(), shutdown),
    )?;
    Ok(())
}
