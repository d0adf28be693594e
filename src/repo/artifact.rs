// src/repo/artifact.rs

//! Package artifacts (`.apk` files)
//!
//! An artifact is a series of concatenated gzip'd tar segments. The control
//! segment carries a `.PKGINFO` file with `key = value` lines; the fields
//! needed here are `pkgname`, `pkgver`, `origin` and `arch`.

use crate::db::models::Package;
use crate::error::{Error, Result};
use flate2::read::MultiGzDecoder;
use rusqlite::Connection;
use std::fs::{self, File};
use std::io::Read;
use std::path::{Path, PathBuf};
use tar::Archive;
use tracing::debug;

pub const ARTIFACT_EXTENSION: &str = "apk";

/// Metadata read from an artifact's `.PKGINFO`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactInfo {
    pub pkgname: String,
    pub pkgver: String,
    /// Source package the artifact was built from
    pub origin: String,
    pub arch: Option<String>,
}

/// File name of the artifact for `pkgname` at `version`
pub fn file_name(pkgname: &str, version: &str) -> String {
    format!("{pkgname}-{version}.{ARTIFACT_EXTENSION}")
}

pub fn is_artifact(path: &Path) -> bool {
    path.extension().and_then(|e| e.to_str()) == Some(ARTIFACT_EXTENSION)
}

/// Artifacts in a directory, sorted by file name
///
/// A missing directory has no artifacts.
pub fn list(dir: &Path) -> Result<Vec<PathBuf>> {
    if !dir.is_dir() {
        return Ok(Vec::new());
    }

    let mut artifacts = Vec::new();
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        if is_artifact(&path) {
            artifacts.push(path);
        }
    }
    artifacts.sort();
    Ok(artifacts)
}

/// Read the `.PKGINFO` of an artifact
pub fn read_info(path: &Path) -> Result<ArtifactInfo> {
    let file = File::open(path)
        .map_err(|e| Error::ArtifactError(format!("Failed to open {}: {e}", path.display())))?;

    let mut archive = Archive::new(MultiGzDecoder::new(file));
    archive.set_ignore_zeros(true);

    let entries = archive
        .entries()
        .map_err(|e| Error::ArtifactError(format!("Failed to read {}: {e}", path.display())))?;

    for entry in entries {
        let mut entry = entry.map_err(|e| {
            Error::ArtifactError(format!("Failed to read entry in {}: {e}", path.display()))
        })?;

        let is_pkginfo = entry
            .path()
            .map(|p| p.as_os_str() == ".PKGINFO")
            .unwrap_or(false);
        if !is_pkginfo {
            continue;
        }

        let mut content = String::new();
        entry.read_to_string(&mut content).map_err(|e| {
            Error::ArtifactError(format!("Failed to read .PKGINFO of {}: {e}", path.display()))
        })?;
        return parse_pkginfo(&content)
            .map_err(|e| Error::ArtifactError(format!("{}: {e}", path.display())));
    }

    Err(Error::ArtifactError(format!(
        "No .PKGINFO found in {}",
        path.display()
    )))
}

/// Parse `.PKGINFO` content
pub fn parse_pkginfo(content: &str) -> std::result::Result<ArtifactInfo, String> {
    let mut pkgname = None;
    let mut pkgver = None;
    let mut origin = None;
    let mut arch = None;

    for line in content.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        if let Some((key, value)) = line.split_once('=') {
            let value = value.trim().to_string();
            match key.trim() {
                "pkgname" => pkgname = Some(value),
                "pkgver" => pkgver = Some(value),
                "origin" => origin = Some(value),
                "arch" => arch = Some(value),
                _ => {}
            }
        }
    }

    let pkgname = pkgname.ok_or("missing pkgname in .PKGINFO")?;
    let pkgver = pkgver.ok_or("missing pkgver in .PKGINFO")?;
    // Packages without sub-packages may omit origin
    let origin = origin.unwrap_or_else(|| pkgname.clone());

    Ok(ArtifactInfo {
        pkgname,
        pkgver,
        origin,
        arch,
    })
}

/// Metadata of an artifact whose origin package is recorded at exactly its version
///
/// Returns `None` for artifacts of superseded or unknown packages.
pub fn origin_in_db(
    conn: &Connection,
    arch: &str,
    branch: &str,
    splitrepo: Option<&str>,
    path: &Path,
) -> Result<Option<ArtifactInfo>> {
    let info = read_info(path)?;
    if Package::has_version(conn, arch, branch, splitrepo, &info.origin, &info.pkgver)? {
        Ok(Some(info))
    } else {
        debug!(
            "{}: origin {} {} is not current",
            path.display(),
            info.origin,
            info.pkgver
        );
        Ok(None)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use flate2::Compression;
    use flate2::write::GzEncoder;
    use tempfile::TempDir;

    /// Write a minimal artifact with a `.PKGINFO` into `dir`
    pub(crate) fn write_artifact(dir: &Path, pkgname: &str, version: &str, origin: &str) -> PathBuf {
        fs::create_dir_all(dir).unwrap();
        let path = dir.join(file_name(pkgname, version));
        let pkginfo = format!(
            "# Generated by abuild\npkgname = {pkgname}\npkgver = {version}\narch = x86_64\norigin = {origin}\n"
        );

        let file = File::create(&path).unwrap();
        let mut builder = tar::Builder::new(GzEncoder::new(file, Compression::default()));
        let mut header = tar::Header::new_gnu();
        header.set_size(pkginfo.len() as u64);
        header.set_mode(0o644);
        header.set_cksum();
        builder
            .append_data(&mut header, ".PKGINFO", pkginfo.as_bytes())
            .unwrap();
        builder.into_inner().unwrap().finish().unwrap();
        path
    }

    #[test]
    fn test_parse_pkginfo() {
        let info = parse_pkginfo(
            "# comment\npkgname = hello-world-doc\npkgver = 1-r4\norigin = hello-world\narch = x86_64\n",
        )
        .unwrap();
        assert_eq!(info.pkgname, "hello-world-doc");
        assert_eq!(info.pkgver, "1-r4");
        assert_eq!(info.origin, "hello-world");
        assert_eq!(info.arch.as_deref(), Some("x86_64"));
    }

    #[test]
    fn test_parse_pkginfo_without_origin() {
        let info = parse_pkginfo("pkgname = hello-world\npkgver = 1-r4\n").unwrap();
        assert_eq!(info.origin, "hello-world");
        assert!(parse_pkginfo("pkgname = x\n").is_err());
    }

    #[test]
    fn test_read_info_and_list() {
        let dir = TempDir::new().unwrap();
        write_artifact(dir.path(), "hello-world", "1-r4", "hello-world");
        write_artifact(dir.path(), "hello-world-doc", "1-r4", "hello-world");
        fs::write(dir.path().join("APKINDEX.tar.gz"), b"not an artifact").unwrap();

        let artifacts = list(dir.path()).unwrap();
        assert_eq!(artifacts.len(), 2);
        assert!(artifacts[0].ends_with("hello-world-1-r4.apk"));

        let info = read_info(&artifacts[1]).unwrap();
        assert_eq!(info.pkgname, "hello-world-doc");
        assert_eq!(info.origin, "hello-world");
    }

    #[test]
    fn test_list_missing_dir() {
        let dir = TempDir::new().unwrap();
        assert!(list(&dir.path().join("nope")).unwrap().is_empty());
    }
}
