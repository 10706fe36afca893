//! CatalogStore trait definition.
//!
//! Write operations report failures through the replication error taxonomy so
//! callers can tell a duplicate from a failed transaction. Read operations
//! serve the outbound catalog surface and use `anyhow`.

use super::models::*;
use anyhow::Result;

pub trait CatalogStore: Send + Sync {
    // =========================================================================
    // Uplinks
    // =========================================================================

    /// Registers `url` as an uplink with cursor 0, or returns the existing row.
    fn ensure_uplink(&self, url: &str) -> Result<Uplink>;

    /// All uplinks, ordered by id.
    fn list_uplinks(&self) -> Result<Vec<Uplink>>;

    fn get_uplink(&self, id: i64) -> Result<Option<Uplink>>;

    // =========================================================================
    // Writes
    // =========================================================================

    /// Commits one replicated release and advances the uplink cursor by one.
    ///
    /// The package row is created or has its summary and license refreshed,
    /// the release row is inserted, and the cursor moves, all in a single
    /// transaction. If the release already exists the refresh still commits,
    /// nothing else does, and `DuplicateRelease` is returned.
    fn upsert_package_and_release(
        &self,
        package: &NewPackage,
        release: &NewRelease,
        uplink_id: i64,
    ) -> crate::error::Result<CommitReceipt>;

    /// Same as [`CatalogStore::upsert_package_and_release`] for a locally
    /// published package. No cursor is involved.
    fn register_local_package(
        &self,
        package: &NewPackage,
        release: &NewRelease,
    ) -> crate::error::Result<CommitReceipt>;

    // =========================================================================
    // Reads
    // =========================================================================

    /// The package served under `name`: the local one if present, otherwise
    /// the one owned by the lowest uplink id.
    fn get_package(&self, name: &PackageName) -> Result<Option<Package>>;

    /// `version` of `name` from the first owner, in the same precedence as
    /// [`CatalogStore::get_package`], that holds it.
    fn get_release(
        &self,
        name: &PackageName,
        version: &ReleaseVersion,
    ) -> Result<Option<Release>>;

    /// Versions of `name` across all owners. A version held by several
    /// owners takes the publication time of the preferred one. `None` when no
    /// package is served under `name`.
    fn get_release_timeline(&self, name: &PackageName) -> Result<Option<ReleaseTimeline>>;

    /// Every served package with the versions held by any of its owners, in
    /// ascending order.
    fn list_all_packages(&self) -> Result<Vec<(PackageName, Vec<ReleaseVersion>)>>;

    /// Highest version of every served package, with the summary and license
    /// of the preferred owner.
    fn list_latest_releases(&self) -> Result<Vec<PackageListing>>;

    /// Release events with index greater than `index`, newest first.
    fn list_releases_since(&self, index: i64) -> Result<Vec<PackageRef>>;

    fn count_releases(&self) -> Result<usize>;
}
