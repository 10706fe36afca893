//! Reads files out of release archives.
//!
//! Release archives are zipballs with a single top-level directory named
//! `{author}-{project}-{revision}/`, `revision` being 5 to 40 hex digits.
//! Paths handed to the reader are relative to that directory.

use crate::catalog_store::PackageRef;
use crate::error::{ReplicationError, Result};
use regex::Regex;
use std::collections::BTreeSet;
use std::io::{Cursor, Read, Seek};
use zip::result::ZipError;
use zip::ZipArchive;

/// Current manifest name first, then the legacy one.
const MANIFEST_FILES: &[&str] = &["elm.json", "elm-package.json"];
const EMPTY_MANIFEST: &str = "{}";

/// An opened archive. Borrowing the bytes keeps it scoped: the zip handle is
/// released when the reader goes out of scope, whatever the outcome.
pub struct ArchiveReader<'a> {
    archive: ZipArchive<Cursor<&'a [u8]>>,
    root: String,
    package: String,
}

impl<'a> ArchiveReader<'a> {
    pub fn open(bytes: &'a [u8], package: &PackageRef) -> Result<Self> {
        let mismatch = |reason: String| ReplicationError::ArchiveLayoutMismatch {
            package: package.to_string(),
            reason,
        };

        let archive = ZipArchive::new(Cursor::new(bytes))
            .map_err(|e| mismatch(format!("not a zip archive: {}", e)))?;
        let root = find_root(&archive, package).map_err(mismatch)?;

        Ok(Self {
            archive,
            root,
            package: package.to_string(),
        })
    }

    pub fn root(&self) -> &str {
        &self.root
    }

    /// Text of `path`, or `None` if the archive has no such file.
    pub fn read_file(&mut self, path: &str) -> Result<Option<String>> {
        let full_path = format!("{}/{}", self.root, path.trim_start_matches('/'));
        let mut file = match self.archive.by_name(&full_path) {
            Ok(file) => file,
            Err(ZipError::FileNotFound) => return Ok(None),
            Err(e) => {
                return Err(ReplicationError::ArchiveLayoutMismatch {
                    package: self.package.clone(),
                    reason: format!("cannot read {}: {}", full_path, e),
                })
            }
        };

        let mut text = String::new();
        file.read_to_string(&mut text)
            .map_err(|e| ReplicationError::MetadataIncomplete {
                package: self.package.clone(),
                reason: format!("{} is not valid text: {}", full_path, e),
            })?;
        Ok(Some(text))
    }

    /// The package manifest, `{}` for releases that predate manifests.
    pub fn read_manifest(&mut self) -> Result<String> {
        for name in MANIFEST_FILES {
            if let Some(manifest) = self.read_file(name)? {
                return Ok(manifest);
            }
        }
        Ok(EMPTY_MANIFEST.to_string())
    }
}

/// Finds the one top-level directory named after the package.
fn find_root<R: Read + Seek>(
    archive: &ZipArchive<R>,
    package: &PackageRef,
) -> std::result::Result<String, String> {
    let pattern = Regex::new(&format!(
        r"^{}-{}-(?i:[0-9a-f]{{5,40}})$",
        regex::escape(package.author()),
        regex::escape(package.project())
    ))
    .map_err(|e| e.to_string())?;

    let top_level_dirs: BTreeSet<&str> = archive
        .file_names()
        .filter_map(|name| name.split_once('/').map(|(top, _)| top))
        .collect();

    let mut matching = top_level_dirs.iter().filter(|dir| pattern.is_match(dir));
    match (matching.next(), matching.next()) {
        (Some(root), None) => Ok(root.to_string()),
        (None, _) => Err(format!(
            "no top-level directory matching {}-{}-<revision>/ among {:?}",
            package.author(),
            package.project(),
            top_level_dirs
        )),
        (Some(first), Some(second)) => Err(format!(
            "several candidate top-level directories: {}, {}",
            first, second
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::test_support::build_zip;

    fn package() -> PackageRef {
        "elm/core@1.0.0".parse().unwrap()
    }

    #[test]
    fn test_reads_files_under_root() {
        let bytes = build_zip(&[
            ("elm-core-1a2b3c4/elm.json", r#"{"summary":"core"}"#),
            ("elm-core-1a2b3c4/README.md", "# core"),
            ("elm-core-1a2b3c4/src/Basics.elm", "module Basics"),
        ]);
        let mut reader = ArchiveReader::open(&bytes, &package()).unwrap();

        assert_eq!(reader.root(), "elm-core-1a2b3c4");
        assert_eq!(reader.read_file("README.md").unwrap().unwrap(), "# core");
        assert_eq!(
            reader.read_file("src/Basics.elm").unwrap().unwrap(),
            "module Basics"
        );
        assert!(reader.read_file("missing.txt").unwrap().is_none());
        assert_eq!(reader.read_manifest().unwrap(), r#"{"summary":"core"}"#);
    }

    #[test]
    fn test_revision_is_case_insensitive_hex() {
        let bytes = build_zip(&[("elm-core-ABCDEF0123/README.md", "hi")]);
        assert!(ArchiveReader::open(&bytes, &package()).is_ok());

        let too_short = build_zip(&[("elm-core-abcd/README.md", "hi")]);
        assert!(ArchiveReader::open(&too_short, &package()).is_err());

        let not_hex = build_zip(&[("elm-core-xyz12345/README.md", "hi")]);
        assert!(ArchiveReader::open(&not_hex, &package()).is_err());
    }

    #[test]
    fn test_unexpected_root_is_a_layout_mismatch() {
        let bytes = build_zip(&[("random-folder/elm.json", "{}")]);
        let err = ArchiveReader::open(&bytes, &package()).err().unwrap();
        assert_eq!(err.kind(), ErrorKind::ArchiveLayoutMismatch);
    }

    #[test]
    fn test_other_package_root_is_rejected() {
        let bytes = build_zip(&[("elm-json-1a2b3c4/elm.json", "{}")]);
        let err = ArchiveReader::open(&bytes, &package()).err().unwrap();
        assert_eq!(err.kind(), ErrorKind::ArchiveLayoutMismatch);
    }

    #[test]
    fn test_ambiguous_roots_are_rejected() {
        let bytes = build_zip(&[
            ("elm-core-1a2b3c4/elm.json", "{}"),
            ("elm-core-5d6e7f8/elm.json", "{}"),
        ]);
        let err = ArchiveReader::open(&bytes, &package()).err().unwrap();
        assert_eq!(err.kind(), ErrorKind::ArchiveLayoutMismatch);
    }

    #[test]
    fn test_garbage_is_a_layout_mismatch() {
        let err = ArchiveReader::open(b"definitely not a zip", &package())
            .err()
            .unwrap();
        assert_eq!(err.kind(), ErrorKind::ArchiveLayoutMismatch);
    }

    #[test]
    fn test_manifest_falls_back_to_legacy_then_empty() {
        let legacy = build_zip(&[("elm-core-1a2b3c4/elm-package.json", r#"{"version":"1.0.0"}"#)]);
        let mut reader = ArchiveReader::open(&legacy, &package()).unwrap();
        assert_eq!(reader.read_manifest().unwrap(), r#"{"version":"1.0.0"}"#);

        let none = build_zip(&[("elm-core-1a2b3c4/README.md", "old")]);
        let mut reader = ArchiveReader::open(&none, &package()).unwrap();
        assert_eq!(reader.read_manifest().unwrap(), "{}");
    }
}
