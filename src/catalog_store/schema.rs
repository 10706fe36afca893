//! SQLite schema for the mirror catalog.
//!
//! Three relations: the uplinks we replicate from, the packages they (or local
//! publishers) own, and the immutable releases of those packages. Release
//! rowids are dense and never deleted, so they double as the event index
//! exposed to downstream mirrors.

use crate::sqlite_column;
use crate::sqlite_persistence::{
    Column, ForeignKey, ForeignKeyOnChange, SqlType, Table, VersionedSchema,
};

const UPLINK_FK: ForeignKey = ForeignKey {
    foreign_table: "uplinks",
    foreign_column: "id",
    on_delete: ForeignKeyOnChange::Restrict,
};

const PACKAGE_FK: ForeignKey = ForeignKey {
    foreign_table: "packages",
    foreign_column: "id",
    on_delete: ForeignKeyOnChange::Restrict,
};

/// Upstream registries and their replication cursors
const UPLINKS_TABLE: Table = Table {
    name: "uplinks",
    columns: &[
        sqlite_column!("id", &SqlType::Integer, is_primary_key = true),
        sqlite_column!("url", &SqlType::Text, non_null = true),
        sqlite_column!(
            "cursor",
            &SqlType::Integer,
            non_null = true,
            default_value = Some("0")
        ),
    ],
    indices: &[],
    unique_constraints: &[&["url"]],
};

/// Packages, one row per (author, project, owner). NULL uplink_id = local.
const PACKAGES_TABLE: Table = Table {
    name: "packages",
    columns: &[
        sqlite_column!("id", &SqlType::Integer, is_primary_key = true),
        sqlite_column!("author", &SqlType::Text, non_null = true),
        sqlite_column!("project", &SqlType::Text, non_null = true),
        sqlite_column!("summary", &SqlType::Text, non_null = true),
        sqlite_column!("license", &SqlType::Text, non_null = true),
        sqlite_column!("uplink_id", &SqlType::Integer, foreign_key = Some(&UPLINK_FK)),
    ],
    indices: &[("idx_packages_name", "author, project")],
    unique_constraints: &[&["author", "project", "uplink_id"]],
};

const RELEASES_TABLE: Table = Table {
    name: "releases",
    columns: &[
        sqlite_column!("id", &SqlType::Integer, is_primary_key = true),
        sqlite_column!("version", &SqlType::Text, non_null = true), // 'MAJOR.MINOR.PATCH'
        sqlite_column!("published_at", &SqlType::Integer, non_null = true), // unix seconds
        sqlite_column!("manifest", &SqlType::Text, non_null = true),
        sqlite_column!("readme", &SqlType::Text, non_null = true),
        sqlite_column!("docs", &SqlType::Text, non_null = true),
        sqlite_column!("content_hash", &SqlType::Text, non_null = true), // hex sha1
        sqlite_column!(
            "package_id",
            &SqlType::Integer,
            non_null = true,
            foreign_key = Some(&PACKAGE_FK)
        ),
    ],
    indices: &[("idx_releases_package", "package_id")],
    unique_constraints: &[&["package_id", "version"]],
};

pub const CATALOG_VERSIONED_SCHEMAS: &[VersionedSchema] = &[VersionedSchema {
    version: 0,
    tables: &[UPLINKS_TABLE, PACKAGES_TABLE, RELEASES_TABLE],
    migration: None,
}];
