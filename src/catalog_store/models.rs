//! Catalog models.
//!
//! Rows as they are stored in the catalog database, plus the small value
//! types (versions, package identifiers) shared by every replication stage.

use lazy_static::lazy_static;
use regex::Regex;
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

lazy_static! {
    static ref NAME_PART_RE: Regex = Regex::new(r"^[A-Za-z0-9][A-Za-z0-9_.-]*$").unwrap();
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    #[error("invalid version '{0}': expected MAJOR.MINOR.PATCH")]
    Version(String),

    #[error("invalid package identifier '{0}': expected author/project@version")]
    PackageRef(String),

    #[error("invalid package name '{0}': expected author/project")]
    PackageName(String),
}

// =============================================================================
// Versions
// =============================================================================

/// A release version: exactly three numeric components.
///
/// Ordering is numeric per component, so `1.2.10` sorts after `1.2.2`.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ReleaseVersion(semver::Version);

impl ReleaseVersion {
    pub fn new(major: u64, minor: u64, patch: u64) -> Self {
        ReleaseVersion(semver::Version::new(major, minor, patch))
    }

    pub fn major(&self) -> u64 {
        self.0.major
    }

    pub fn minor(&self) -> u64 {
        self.0.minor
    }

    pub fn patch(&self) -> u64 {
        self.0.patch
    }
}

impl FromStr for ReleaseVersion {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let version =
            semver::Version::parse(s.trim()).map_err(|_| ParseError::Version(s.to_string()))?;
        if !version.pre.is_empty() || !version.build.is_empty() {
            return Err(ParseError::Version(s.to_string()));
        }
        Ok(ReleaseVersion(version))
    }
}

impl fmt::Display for ReleaseVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.0.major, self.0.minor, self.0.patch)
    }
}

impl Serialize for ReleaseVersion {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for ReleaseVersion {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

// =============================================================================
// Package identity
// =============================================================================

/// `author/project`
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PackageName {
    pub author: String,
    pub project: String,
}

impl PackageName {
    pub fn new(author: impl Into<String>, project: impl Into<String>) -> Result<Self, ParseError> {
        let author = author.into();
        let project = project.into();
        if !is_valid_name_part(&author) || !is_valid_name_part(&project) {
            return Err(ParseError::PackageName(format!("{}/{}", author, project)));
        }
        Ok(PackageName { author, project })
    }
}

/// Name parts end up in filesystem paths and URLs, so keep them boring.
fn is_valid_name_part(part: &str) -> bool {
    NAME_PART_RE.is_match(part) && !part.contains("..")
}

impl FromStr for PackageName {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (author, project) = s
            .split_once('/')
            .ok_or_else(|| ParseError::PackageName(s.to_string()))?;
        PackageName::new(author, project).map_err(|_| ParseError::PackageName(s.to_string()))
    }
}

impl fmt::Display for PackageName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.author, self.project)
    }
}

/// One release event as exchanged between uplinks: `author/project@version`.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct PackageRef {
    pub name: PackageName,
    pub version: ReleaseVersion,
}

impl PackageRef {
    pub fn new(author: &str, project: &str, version: ReleaseVersion) -> Result<Self, ParseError> {
        Ok(PackageRef {
            name: PackageName::new(author, project)?,
            version,
        })
    }

    pub fn author(&self) -> &str {
        &self.name.author
    }

    pub fn project(&self) -> &str {
        &self.name.project
    }
}

impl FromStr for PackageRef {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (name, version) = s
            .split_once('@')
            .ok_or_else(|| ParseError::PackageRef(s.to_string()))?;
        Ok(PackageRef {
            name: name
                .parse()
                .map_err(|_| ParseError::PackageRef(s.to_string()))?,
            version: version
                .parse()
                .map_err(|_| ParseError::PackageRef(s.to_string()))?,
        })
    }
}

impl fmt::Display for PackageRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.name, self.version)
    }
}

// =============================================================================
// Rows
// =============================================================================

/// An upstream registry this catalog mirrors from.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Uplink {
    pub id: i64,
    pub url: String,
    /// Index of the last release event committed from this uplink.
    pub cursor: i64,
}

/// Who a package row belongs to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum PackageOwner {
    Local,
    Uplink(i64),
}

impl PackageOwner {
    pub(crate) fn uplink_id(&self) -> Option<i64> {
        match self {
            PackageOwner::Local => None,
            PackageOwner::Uplink(id) => Some(*id),
        }
    }

    pub(crate) fn from_uplink_id(uplink_id: Option<i64>) -> Self {
        match uplink_id {
            Some(id) => PackageOwner::Uplink(id),
            None => PackageOwner::Local,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Package {
    pub id: i64,
    pub author: String,
    pub project: String,
    pub summary: String,
    pub license: String,
    pub owner: PackageOwner,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Release {
    pub id: i64,
    pub package_id: i64,
    pub version: ReleaseVersion,
    /// Unix seconds.
    pub published_at: i64,
    pub manifest_json: String,
    pub readme_text: String,
    pub docs_json: String,
    pub content_hash: String,
}

/// Package fields refreshed on every ingested release.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NewPackage {
    pub name: PackageName,
    pub summary: String,
    pub license: String,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NewRelease {
    pub version: ReleaseVersion,
    pub published_at: i64,
    pub manifest_json: String,
    pub readme_text: String,
    pub docs_json: String,
    pub content_hash: String,
}

/// What a successful catalog commit produced.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CommitReceipt {
    pub package_id: i64,
    pub release_id: i64,
    pub package_created: bool,
    /// The uplink cursor after the commit, `None` for local publications.
    pub cursor: Option<i64>,
}

/// Latest release of a package, as listed by `search.json`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct PackageListing {
    pub name: String,
    pub summary: String,
    pub license: String,
    pub version: ReleaseVersion,
}

/// Version to publish time map, kept in ascending version order.
///
/// Serialized as a JSON object whose keys follow that order, which a plain
/// map keyed by the version string would not preserve.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ReleaseTimeline(pub Vec<(ReleaseVersion, i64)>);

impl ReleaseTimeline {
    pub fn from_unsorted(mut entries: Vec<(ReleaseVersion, i64)>) -> Self {
        entries.sort_by(|a, b| a.0.cmp(&b.0));
        ReleaseTimeline(entries)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl Serialize for ReleaseTimeline {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.0.len()))?;
        for (version, time) in &self.0 {
            map.serialize_entry(&version.to_string(), time)?;
        }
        map.end()
    }
}
