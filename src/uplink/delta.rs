use super::client::UplinkApi;
use crate::catalog_store::{PackageRef, Uplink};
use crate::error::{ReplicationError, Result};
use std::sync::Arc;
use tracing::debug;

/// Asks an uplink for the release events past its cursor.
#[derive(Clone)]
pub struct DeltaFetcher {
    api: Arc<dyn UplinkApi>,
}

impl DeltaFetcher {
    pub fn new(api: Arc<dyn UplinkApi>) -> Self {
        Self { api }
    }

    /// Returns the new release identifiers of `uplink`, oldest first.
    ///
    /// Uplinks list newest first; the order is flipped here so that events are
    /// committed, and the cursor advanced, in the order they were produced.
    pub async fn fetch(&self, uplink: &Uplink) -> Result<Vec<PackageRef>> {
        let body = self
            .api
            .fetch_since(&uplink.url, uplink.cursor)
            .await
            .map_err(|e| ReplicationError::DeltaFetchFailed {
                uplink: uplink.url.clone(),
                reason: e.to_string(),
            })?;

        let delta = parse_delta(&uplink.url, &body)?;
        debug!(
            "Uplink {} has {} new releases past cursor {}",
            uplink.url,
            delta.len(),
            uplink.cursor
        );
        Ok(delta)
    }
}

fn parse_delta(uplink_url: &str, body: &str) -> Result<Vec<PackageRef>> {
    let failed = |reason: String| ReplicationError::DeltaFetchFailed {
        uplink: uplink_url.to_string(),
        reason,
    };

    let identifiers: Vec<String> =
        serde_json::from_str(body).map_err(|e| failed(format!("malformed delta: {}", e)))?;

    let mut delta = identifiers
        .iter()
        .map(|id| id.parse::<PackageRef>().map_err(|e| failed(e.to_string())))
        .collect::<Result<Vec<_>>>()?;
    delta.reverse();
    Ok(delta)
}
