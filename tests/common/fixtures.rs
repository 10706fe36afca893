//! Release fixtures: archives and the documents an upstream serves for them

use package_mirror_server::catalog_store::PackageRef;
use std::io::{Cursor, Write};
use zip::write::SimpleFileOptions;
use zip::ZipWriter;

pub fn build_zip(entries: &[(&str, &str)]) -> Vec<u8> {
    let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
    for (path, content) in entries {
        writer
            .start_file(*path, SimpleFileOptions::default())
            .expect("Failed to start zip entry");
        writer
            .write_all(content.as_bytes())
            .expect("Failed to write zip entry");
    }
    writer
        .finish()
        .expect("Failed to finish zip")
        .into_inner()
}

/// Documents of one upstream release.
#[derive(Clone, Debug)]
pub struct ReleaseDocuments {
    pub manifest: String,
    pub readme: String,
    pub docs: String,
}

impl ReleaseDocuments {
    pub fn for_package(package: &PackageRef) -> Self {
        Self {
            manifest: format!(
                r#"{{"type":"package","name":"{}","summary":"Summary of {}","license":"BSD-3-Clause","version":"{}"}}"#,
                package.name, package.name, package.version
            ),
            readme: format!("# {}\n\nVersion {}.", package.name, package.version),
            docs: format!(
                r#"[{{"name":"{}","comment":"","unions":[],"aliases":[],"values":[],"binops":[]}}]"#,
                capitalize(package.project())
            ),
        }
    }

    /// Zip archive laid out the way a source host serves a tagged release.
    pub fn archive(&self, package: &PackageRef) -> Vec<u8> {
        let root = format!("{}-{}-5e1fa0c", package.author(), package.project());
        let manifest_path = format!("{}/elm.json", root);
        let readme_path = format!("{}/README.md", root);
        let docs_path = format!("{}/docs.json", root);
        let source_path = format!("{}/src/{}.elm", root, capitalize(package.project()));
        build_zip(&[
            (manifest_path.as_str(), self.manifest.as_str()),
            (readme_path.as_str(), self.readme.as_str()),
            (docs_path.as_str(), self.docs.as_str()),
            (source_path.as_str(), "module Main exposing (..)\n"),
        ])
    }
}

fn capitalize(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}
