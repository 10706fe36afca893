//! SQLite-backed catalog store.
//!
//! All writes go through a single connection guarded by a mutex, and every
//! write transaction holds that mutex from `BEGIN IMMEDIATE` to `COMMIT`, so
//! transactions issued by concurrent uplink tasks can never interleave.
//! Reads are spread over a small pool of read-only connections (WAL mode).

use super::models::*;
use super::schema::CATALOG_VERSIONED_SCHEMAS;
use super::trait_def::CatalogStore;
use crate::error::ReplicationError;
use crate::sqlite_persistence::initialize_schema;
use anyhow::{anyhow, Context, Result};
use rusqlite::{params, Connection, OptionalExtension};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, info};

const DEFAULT_READ_POOL_SIZE: usize = 4;

#[derive(Clone)]
pub struct SqliteCatalogStore {
    read_pool: Vec<Arc<Mutex<Connection>>>,
    write_conn: Arc<Mutex<Connection>>,
    read_index: Arc<AtomicUsize>,
}

/// Outcome of the body of a release write transaction.
enum ReleaseWrite {
    Committed(CommitReceipt),
    /// The package refresh was applied but the release already existed.
    Duplicate,
}

impl SqliteCatalogStore {
    pub fn new<P: AsRef<Path>>(db_path: P) -> Result<Self> {
        Self::with_read_pool_size(db_path, DEFAULT_READ_POOL_SIZE)
    }

    pub fn with_read_pool_size<P: AsRef<Path>>(db_path: P, read_pool_size: usize) -> Result<Self> {
        let db_path_ref = db_path.as_ref();

        let mut write_conn = Connection::open_with_flags(
            db_path_ref,
            rusqlite::OpenFlags::SQLITE_OPEN_READ_WRITE
                | rusqlite::OpenFlags::SQLITE_OPEN_CREATE
                | rusqlite::OpenFlags::SQLITE_OPEN_URI
                | rusqlite::OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )
        .with_context(|| format!("Failed to open catalog database {:?}", db_path_ref))?;

        initialize_schema(&mut write_conn, CATALOG_VERSIONED_SCHEMAS, "catalog")?;
        write_conn.pragma_update(None, "journal_mode", "WAL")?;
        write_conn.busy_timeout(std::time::Duration::from_secs(5))?;

        let (uplinks, packages, releases): (i64, i64, i64) = write_conn.query_row(
            "SELECT (SELECT COUNT(*) FROM uplinks), (SELECT COUNT(*) FROM packages), (SELECT COUNT(*) FROM releases)",
            [],
            |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?)),
        )?;
        info!(
            "Opened catalog: {} uplinks, {} packages, {} releases",
            uplinks, packages, releases
        );

        let mut read_pool = Vec::with_capacity(read_pool_size.max(1));
        for _ in 0..read_pool_size.max(1) {
            let read_conn = Connection::open_with_flags(
                db_path_ref,
                rusqlite::OpenFlags::SQLITE_OPEN_READ_ONLY
                    | rusqlite::OpenFlags::SQLITE_OPEN_URI
                    | rusqlite::OpenFlags::SQLITE_OPEN_NO_MUTEX,
            )?;
            read_conn.busy_timeout(std::time::Duration::from_secs(5))?;
            read_pool.push(Arc::new(Mutex::new(read_conn)));
        }

        Ok(SqliteCatalogStore {
            read_pool,
            write_conn: Arc::new(Mutex::new(write_conn)),
            read_index: Arc::new(AtomicUsize::new(0)),
        })
    }

    fn read<T>(&self, f: impl FnOnce(&Connection) -> Result<T>) -> Result<T> {
        let index = self.read_index.fetch_add(1, Ordering::SeqCst) % self.read_pool.len();
        let conn = self.read_pool[index]
            .lock()
            .map_err(|_| anyhow!("catalog read connection poisoned"))?;
        f(&conn)
    }

    fn lock_writer(&self) -> crate::error::Result<MutexGuard<'_, Connection>> {
        self.write_conn
            .lock()
            .map_err(|_| ReplicationError::TransactionFailed("catalog writer poisoned".to_string()))
    }

    /// Runs `body` between `BEGIN IMMEDIATE` and `COMMIT` while holding the
    /// writer. Any error rolls the whole transaction back.
    fn write_transaction<T>(
        &self,
        body: impl FnOnce(&Connection) -> crate::error::Result<T>,
    ) -> crate::error::Result<T> {
        let conn = self.lock_writer()?;
        conn.execute("BEGIN IMMEDIATE", [])?;

        match body(&conn) {
            Ok(value) => {
                if let Err(e) = conn.execute("COMMIT", []) {
                    let _ = conn.execute("ROLLBACK", []);
                    return Err(e.into());
                }
                Ok(value)
            }
            Err(e) => {
                let _ = conn.execute("ROLLBACK", []);
                Err(e)
            }
        }
    }

    /// Shared body of the two release write operations.
    fn write_release(
        &self,
        package: &NewPackage,
        release: &NewRelease,
        owner: PackageOwner,
    ) -> crate::error::Result<CommitReceipt> {
        let outcome = self.write_transaction(|conn| {
            let (package_id, package_created) = upsert_package(conn, package, owner)?;

            let exists: bool = conn.query_row(
                "SELECT EXISTS(SELECT 1 FROM releases WHERE package_id = ?1 AND version = ?2)",
                params![package_id, release.version.to_string()],
                |r| r.get(0),
            )?;
            if exists {
                return Ok(ReleaseWrite::Duplicate);
            }

            conn.execute(
                "INSERT INTO releases (version, published_at, manifest, readme, docs, content_hash, package_id) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    release.version.to_string(),
                    release.published_at,
                    release.manifest_json,
                    release.readme_text,
                    release.docs_json,
                    release.content_hash,
                    package_id,
                ],
            )?;
            let release_id = conn.last_insert_rowid();

            let cursor = match owner {
                PackageOwner::Local => None,
                PackageOwner::Uplink(uplink_id) => Some(advance_cursor(conn, uplink_id)?),
            };

            Ok(ReleaseWrite::Committed(CommitReceipt {
                package_id,
                release_id,
                package_created,
                cursor,
            }))
        })?;

        match outcome {
            ReleaseWrite::Committed(receipt) => {
                debug!(
                    "Committed {}@{} as release {}",
                    package.name, release.version, receipt.release_id
                );
                Ok(receipt)
            }
            ReleaseWrite::Duplicate => Err(ReplicationError::DuplicateRelease {
                package: format!("{}@{}", package.name, release.version),
            }),
        }
    }
}

fn upsert_package(
    conn: &Connection,
    package: &NewPackage,
    owner: PackageOwner,
) -> crate::error::Result<(i64, bool)> {
    let uplink_id = owner.uplink_id();
    let existing: Option<i64> = conn
        .query_row(
            "SELECT id FROM packages WHERE author = ?1 AND project = ?2 AND uplink_id IS ?3",
            params![package.name.author, package.name.project, uplink_id],
            |r| r.get(0),
        )
        .optional()?;

    match existing {
        Some(id) => {
            conn.execute(
                "UPDATE packages SET summary = ?1, license = ?2 WHERE id = ?3",
                params![package.summary, package.license, id],
            )?;
            Ok((id, false))
        }
        None => {
            conn.execute(
                "INSERT INTO packages (author, project, summary, license, uplink_id) VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    package.name.author,
                    package.name.project,
                    package.summary,
                    package.license,
                    uplink_id
                ],
            )?;
            Ok((conn.last_insert_rowid(), true))
        }
    }
}

fn advance_cursor(conn: &Connection, uplink_id: i64) -> crate::error::Result<i64> {
    let cursor: Option<i64> = conn
        .query_row(
            "UPDATE uplinks SET cursor = cursor + 1 WHERE id = ?1 RETURNING cursor",
            params![uplink_id],
            |r| r.get(0),
        )
        .optional()?;
    cursor.ok_or_else(|| ReplicationError::TransactionFailed(format!("unknown uplink {}", uplink_id)))
}

fn parse_version(idx: usize, raw: String) -> rusqlite::Result<ReleaseVersion> {
    raw.parse().map_err(|e: ParseError| {
        rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
    })
}

fn parse_uplink_row(row: &rusqlite::Row) -> rusqlite::Result<Uplink> {
    Ok(Uplink {
        id: row.get(0)?,
        url: row.get(1)?,
        cursor: row.get(2)?,
    })
}

fn parse_package_row(row: &rusqlite::Row) -> rusqlite::Result<Package> {
    Ok(Package {
        id: row.get(0)?,
        author: row.get(1)?,
        project: row.get(2)?,
        summary: row.get(3)?,
        license: row.get(4)?,
        owner: PackageOwner::from_uplink_id(row.get(5)?),
    })
}

fn parse_release_row(row: &rusqlite::Row) -> rusqlite::Result<Release> {
    Ok(Release {
        id: row.get(0)?,
        package_id: row.get(1)?,
        version: parse_version(2, row.get(2)?)?,
        published_at: row.get(3)?,
        manifest_json: row.get(4)?,
        readme_text: row.get(5)?,
        docs_json: row.get(6)?,
        content_hash: row.get(7)?,
    })
}

const PACKAGE_COLUMNS: &str = "id, author, project, summary, license, uplink_id";
const RELEASE_COLUMNS: &str =
    "r.id, r.package_id, r.version, r.published_at, r.manifest, r.readme, r.docs, r.content_hash";

/// Local rows sort first, then uplinks by ascending id.
const OWNER_PRECEDENCE: &str = "(uplink_id IS NOT NULL), uplink_id";

fn served_package(conn: &Connection, name: &PackageName) -> Result<Option<Package>> {
    let package = conn
        .query_row(
            &format!(
                "SELECT {} FROM packages WHERE author = ?1 AND project = ?2 ORDER BY {} LIMIT 1",
                PACKAGE_COLUMNS, OWNER_PRECEDENCE
            ),
            params![name.author, name.project],
            parse_package_row,
        )
        .optional()?;
    Ok(package)
}

/// Every served package, keyed by name.
fn served_packages(conn: &Connection) -> Result<BTreeMap<PackageName, Package>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {} FROM packages ORDER BY author, project, {}",
        PACKAGE_COLUMNS, OWNER_PRECEDENCE
    ))?;
    let rows = stmt.query_map([], parse_package_row)?;

    let mut served = BTreeMap::new();
    for package in rows {
        let package = package?;
        let name = PackageName {
            author: package.author.clone(),
            project: package.project.clone(),
        };
        served.entry(name).or_insert(package);
    }
    Ok(served)
}

/// Versions held by any owner, keyed by package name, ascending and without
/// repeats.
fn versions_by_name(conn: &Connection) -> Result<BTreeMap<PackageName, Vec<ReleaseVersion>>> {
    let mut stmt = conn.prepare(
        "SELECT p.author, p.project, r.version FROM releases AS r \
         INNER JOIN packages AS p ON p.id = r.package_id",
    )?;
    let rows = stmt.query_map([], |row| {
        Ok((
            PackageName {
                author: row.get(0)?,
                project: row.get(1)?,
            },
            parse_version(2, row.get(2)?)?,
        ))
    })?;

    let mut versions: BTreeMap<PackageName, Vec<ReleaseVersion>> = BTreeMap::new();
    for row in rows {
        let (name, version) = row?;
        versions.entry(name).or_default().push(version);
    }
    for list in versions.values_mut() {
        list.sort();
        list.dedup();
    }
    Ok(versions)
}

impl CatalogStore for SqliteCatalogStore {
    fn ensure_uplink(&self, url: &str) -> Result<Uplink> {
        let conn = self.lock_writer()?;
        let inserted = conn.execute(
            "INSERT OR IGNORE INTO uplinks (url, cursor) VALUES (?1, 0)",
            params![url],
        )?;
        let uplink = conn.query_row(
            "SELECT id, url, cursor FROM uplinks WHERE url = ?1",
            params![url],
            parse_uplink_row,
        )?;
        if inserted > 0 {
            info!("Registered uplink {} as #{}", uplink.url, uplink.id);
        }
        Ok(uplink)
    }

    fn list_uplinks(&self) -> Result<Vec<Uplink>> {
        self.read(|conn| {
            let mut stmt = conn.prepare("SELECT id, url, cursor FROM uplinks ORDER BY id")?;
            let uplinks = stmt
                .query_map([], parse_uplink_row)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(uplinks)
        })
    }

    fn get_uplink(&self, id: i64) -> Result<Option<Uplink>> {
        self.read(|conn| {
            Ok(conn
                .query_row(
                    "SELECT id, url, cursor FROM uplinks WHERE id = ?1",
                    params![id],
                    parse_uplink_row,
                )
                .optional()?)
        })
    }

    fn upsert_package_and_release(
        &self,
        package: &NewPackage,
        release: &NewRelease,
        uplink_id: i64,
    ) -> crate::error::Result<CommitReceipt> {
        self.write_release(package, release, PackageOwner::Uplink(uplink_id))
    }

    fn register_local_package(
        &self,
        package: &NewPackage,
        release: &NewRelease,
    ) -> crate::error::Result<CommitReceipt> {
        self.write_release(package, release, PackageOwner::Local)
    }

    fn get_package(&self, name: &PackageName) -> Result<Option<Package>> {
        self.read(|conn| served_package(conn, name))
    }

    fn get_release(
        &self,
        name: &PackageName,
        version: &ReleaseVersion,
    ) -> Result<Option<Release>> {
        self.read(|conn| {
            Ok(conn
                .query_row(
                    &format!(
                        "SELECT {} FROM releases AS r \
                         INNER JOIN packages AS p ON p.id = r.package_id \
                         WHERE p.author = ?1 AND p.project = ?2 AND r.version = ?3 \
                         ORDER BY {} LIMIT 1",
                        RELEASE_COLUMNS,
                        OWNER_PRECEDENCE
                    ),
                    params![name.author, name.project, version.to_string()],
                    parse_release_row,
                )
                .optional()?)
        })
    }

    fn get_release_timeline(&self, name: &PackageName) -> Result<Option<ReleaseTimeline>> {
        self.read(|conn| {
            if served_package(conn, name)?.is_none() {
                return Ok(None);
            }
            let mut stmt = conn.prepare(&format!(
                "SELECT r.version, r.published_at FROM releases AS r \
                 INNER JOIN packages AS p ON p.id = r.package_id \
                 WHERE p.author = ?1 AND p.project = ?2 ORDER BY {}",
                OWNER_PRECEDENCE
            ))?;
            let rows = stmt
                .query_map(params![name.author, name.project], |row| {
                    Ok((parse_version(0, row.get(0)?)?, row.get::<_, i64>(1)?))
                })?
                .collect::<rusqlite::Result<Vec<_>>>()?;

            // Rows arrive in owner precedence, so the first time seen wins
            let mut times: BTreeMap<ReleaseVersion, i64> = BTreeMap::new();
            for (version, published_at) in rows {
                times.entry(version).or_insert(published_at);
            }
            Ok(Some(ReleaseTimeline::from_unsorted(times.into_iter().collect())))
        })
    }

    fn list_all_packages(&self) -> Result<Vec<(PackageName, Vec<ReleaseVersion>)>> {
        self.read(|conn| Ok(versions_by_name(conn)?.into_iter().collect()))
    }

    fn list_latest_releases(&self) -> Result<Vec<PackageListing>> {
        self.read(|conn| {
            let served = served_packages(conn)?;
            let mut versions = versions_by_name(conn)?;
            Ok(served
                .into_iter()
                .filter_map(|(name, package)| {
                    let latest = versions.remove(&name)?.pop()?;
                    Some(PackageListing {
                        name: name.to_string(),
                        summary: package.summary,
                        license: package.license,
                        version: latest,
                    })
                })
                .collect())
        })
    }

    fn list_releases_since(&self, index: i64) -> Result<Vec<PackageRef>> {
        self.read(|conn| {
            let mut stmt = conn.prepare(
                "SELECT p.author, p.project, r.version FROM releases AS r \
                 INNER JOIN packages AS p ON p.id = r.package_id \
                 WHERE r.id > ?1 ORDER BY r.id DESC",
            )?;
            let rows = stmt
                .query_map(params![index], |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        parse_version(2, row.get(2)?)?,
                    ))
                })?
                .collect::<rusqlite::Result<Vec<_>>>()?;

            rows.into_iter()
                .map(|(author, project, version)| {
                    PackageRef::new(&author, &project, version)
                        .with_context(|| format!("Stored package {}/{} has an invalid name", author, project))
                })
                .collect()
        })
    }

    fn count_releases(&self) -> Result<usize> {
        self.read(|conn| {
            let count: i64 = conn.query_row("SELECT COUNT(*) FROM releases", [], |r| r.get(0))?;
            Ok(count as usize)
        })
    }
}
