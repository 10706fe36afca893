//! HTTP client for end-to-end tests
//!
//! Wraps reqwest with one method per route of the mirror's read API.
//! When routes change, update only this file.

use super::constants::*;
use reqwest::Response;
use std::time::Duration;

pub struct TestClient {
    /// The underlying reqwest client (public for custom requests in tests)
    pub client: reqwest::Client,
    pub base_url: String,
}

impl TestClient {
    pub fn new(base_url: String) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()
            .expect("Failed to build reqwest client");

        Self { client, base_url }
    }

    async fn get(&self, path: &str) -> Response {
        self.client
            .get(format!("{}{}", self.base_url, path))
            .send()
            .await
            .expect("Request failed")
    }

    /// GET /all-packages
    pub async fn get_all_packages(&self) -> Response {
        self.get("/all-packages").await
    }

    /// GET /all-packages/since/{cursor}
    pub async fn get_packages_since(&self, cursor: i64) -> Response {
        self.get(&format!("/all-packages/since/{}", cursor)).await
    }

    /// GET /packages/{author}/{project}/releases.json
    pub async fn get_releases(&self, name: &str) -> Response {
        self.get(&format!("/packages/{}/releases.json", name)).await
    }

    /// GET /packages/{author}/{project}/{version}/{file}
    pub async fn get_release_file(&self, id: &str, file: &str) -> Response {
        let (name, version) = id.split_once('@').expect("Expected author/project@version");
        self.get(&format!("/packages/{}/{}/{}", name, version, file))
            .await
    }

    /// GET /search.json
    pub async fn get_search(&self) -> Response {
        self.get("/search.json").await
    }

    /// GET /jobs
    pub async fn list_jobs(&self) -> Response {
        self.get("/jobs").await
    }

    /// POST /jobs/{id}/trigger
    pub async fn trigger_job(&self, job_id: &str) -> Response {
        self.client
            .post(format!("{}/jobs/{}/trigger", self.base_url, job_id))
            .send()
            .await
            .expect("Request failed")
    }

    /// Ids returned by /all-packages/since/{cursor}, newest first.
    pub async fn since_ids(&self, cursor: i64) -> Vec<String> {
        let response = self.get_packages_since(cursor).await;
        assert_eq!(response.status(), reqwest::StatusCode::OK);
        response.json().await.expect("Invalid since listing")
    }
}
