// src/repo/index.rs

//! Repository index generation
//!
//! Writes `APKINDEX.tar.gz` for a directory of artifacts. The output only
//! depends on the artifacts (fixed mtimes, sorted entries), so indexing the
//! same set twice yields identical bytes.

use crate::error::{Error, Result};
use crate::repo::artifact;
use flate2::read::GzDecoder;
use flate2::{Compression, GzBuilder};
use sha2::{Digest, Sha256};
use std::fs::{self, File};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use tar::{Archive, Builder, Header};
use tempfile::NamedTempFile;
use tracing::debug;

pub const INDEX_NAME: &str = "APKINDEX.tar.gz";

/// Unsigned index copied into the WIP repo for the signing job
pub const SYMLINK_INDEX_NAME: &str = "APKINDEX-symlink-repo.tar.gz";

/// One artifact as listed in the index
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexEntry {
    pub checksum: String,
    pub pkgname: String,
    pub pkgver: String,
    pub arch: Option<String>,
    pub size: u64,
    pub origin: String,
}

impl IndexEntry {
    fn render(&self, out: &mut String) {
        out.push_str(&format!("C:{}\n", self.checksum));
        out.push_str(&format!("P:{}\n", self.pkgname));
        out.push_str(&format!("V:{}\n", self.pkgver));
        if let Some(arch) = &self.arch {
            out.push_str(&format!("A:{arch}\n"));
        }
        out.push_str(&format!("S:{}\n", self.size));
        out.push_str(&format!("o:{}\n", self.origin));
        out.push('\n');
    }
}

fn entry_for(path: &Path) -> Result<IndexEntry> {
    let info = artifact::read_info(path)?;
    let data = fs::read(path)?;
    let checksum = hex::encode(Sha256::digest(&data));

    Ok(IndexEntry {
        checksum,
        pkgname: info.pkgname,
        pkgver: info.pkgver,
        arch: info.arch,
        size: data.len() as u64,
        origin: info.origin,
    })
}

/// Index every artifact in `dir`, writing `dir/APKINDEX.tar.gz`
pub fn write_index(dir: &Path) -> Result<PathBuf> {
    let mut text = String::new();
    let artifacts = artifact::list(dir)?;
    for path in &artifacts {
        entry_for(path)?.render(&mut text);
    }

    let mut header = Header::new_gnu();
    header.set_size(text.len() as u64);
    header.set_mode(0o644);
    header.set_mtime(0);
    header.set_uid(0);
    header.set_gid(0);
    header.set_cksum();

    let mut tmp = NamedTempFile::new_in(dir)?;
    {
        let encoder = GzBuilder::new()
            .mtime(0)
            .write(tmp.as_file_mut(), Compression::default());
        let mut builder = Builder::new(encoder);
        builder.append_data(&mut header, "APKINDEX", text.as_bytes())?;
        let encoder = builder.into_inner()?;
        encoder.finish()?.flush()?;
    }

    let index_path = dir.join(INDEX_NAME);
    tmp.persist(&index_path)
        .map_err(|e| Error::IoError(format!("Failed to write {}: {e}", index_path.display())))?;

    debug!("Indexed {} artifacts in {}", artifacts.len(), dir.display());
    Ok(index_path)
}

/// Read the entries of an index written by `write_index`
pub fn read_index(path: &Path) -> Result<Vec<IndexEntry>> {
    let file = File::open(path)?;
    let mut archive = Archive::new(GzDecoder::new(file));
    let mut text = String::new();

    for entry in archive.entries()? {
        let mut entry = entry?;
        if entry.path()?.as_os_str() == "APKINDEX" {
            entry.read_to_string(&mut text)?;
            break;
        }
    }

    let mut entries = Vec::new();
    for block in text.split("\n\n").filter(|b| !b.trim().is_empty()) {
        let mut entry = IndexEntry {
            checksum: String::new(),
            pkgname: String::new(),
            pkgver: String::new(),
            arch: None,
            size: 0,
            origin: String::new(),
        };
        for line in block.lines() {
            let Some((key, value)) = line.split_once(':') else {
                continue;
            };
            match key {
                "C" => entry.checksum = value.to_string(),
                "P" => entry.pkgname = value.to_string(),
                "V" => entry.pkgver = value.to_string(),
                "A" => entry.arch = Some(value.to_string()),
                "S" => entry.size = value.parse().unwrap_or(0),
                "o" => entry.origin = value.to_string(),
                _ => {}
            }
        }
        entries.push(entry);
    }
    Ok(entries)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repo::artifact::tests::write_artifact;
    use tempfile::TempDir;

    #[test]
    fn test_index_lists_artifacts() {
        let dir = TempDir::new().unwrap();
        write_artifact(dir.path(), "hello-world", "1-r4", "hello-world");
        write_artifact(dir.path(), "hello-world-doc", "1-r4", "hello-world");

        let index = write_index(dir.path()).unwrap();
        let entries = read_index(&index).unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].pkgname, "hello-world");
        assert_eq!(entries[1].origin, "hello-world");
        assert_eq!(entries[1].checksum.len(), 64);
    }

    #[test]
    fn test_index_is_deterministic() {
        let dir = TempDir::new().unwrap();
        write_artifact(dir.path(), "hello-world", "1-r4", "hello-world");

        let first = fs::read(write_index(dir.path()).unwrap()).unwrap();
        let second = fs::read(write_index(dir.path()).unwrap()).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_empty_index() {
        let dir = TempDir::new().unwrap();
        let index = write_index(dir.path()).unwrap();
        assert!(read_index(&index).unwrap().is_empty());
    }
}
