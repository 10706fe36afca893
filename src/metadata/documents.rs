//! Typed views of the documents an uplink publishes for each release.
//!
//! The raw text is what gets stored; parsing is only there to reject
//! documents of the wrong shape before anything is committed.

use crate::catalog_store::{PackageRef, ReleaseVersion};
use serde::Deserialize;
use std::collections::HashMap;

/// `releases.json`: version to unix publish time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReleaseTimes(HashMap<ReleaseVersion, i64>);

impl ReleaseTimes {
    pub fn parse(body: &str) -> Result<Self, String> {
        let raw: HashMap<String, i64> =
            serde_json::from_str(body).map_err(|e| format!("releases.json: {}", e))?;
        raw.into_iter()
            .map(|(version, time)| {
                version
                    .parse::<ReleaseVersion>()
                    .map(|v| (v, time))
                    .map_err(|e| format!("releases.json: {}", e))
            })
            .collect::<Result<HashMap<_, _>, _>>()
            .map(ReleaseTimes)
    }

    pub fn published_at(&self, package: &PackageRef) -> Result<i64, String> {
        self.0
            .get(&package.version)
            .copied()
            .ok_or_else(|| format!("releases.json has no entry for {}", package.version))
    }
}

/// The fields of `elm.json` (or the legacy `elm-package.json`) the catalog
/// keeps on the package row. Releases without a manifest parse as empty.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct ProjectManifest {
    #[serde(default)]
    pub summary: String,
    #[serde(default)]
    pub license: String,
    #[serde(flatten)]
    pub rest: serde_json::Map<String, serde_json::Value>,
}

impl ProjectManifest {
    pub fn parse(body: &str) -> Result<Self, String> {
        serde_json::from_str(body).map_err(|e| format!("manifest: {}", e))
    }
}

/// One entry of `docs.json`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ModuleDocs {
    pub name: String,
    #[serde(default)]
    pub comment: String,
}

pub fn parse_docs(body: &str) -> Result<Vec<ModuleDocs>, String> {
    serde_json::from_str(body).map_err(|e| format!("docs.json: {}", e))
}
