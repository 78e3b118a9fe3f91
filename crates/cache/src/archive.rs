//! Archive service boundary
//!
//! The cache never decodes archives itself. It asks an [`ArchiveService`] for
//! the entry listing (header information only) and to materialize single
//! entries. [`TarArchive`] covers comic-book tar (`.cbt`) files; other formats
//! plug in by implementing the trait.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::BufReader;
use std::path::{Component, Path};

/// One entry of an archive listing
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArchiveEntry {
    /// Path inside the archive
    pub path: String,
    /// Uncompressed size in bytes
    pub size: u64,
    /// Whether the entry is a directory
    pub is_directory: bool,
}

/// Container format of a comic archive
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArchiveFormat {
    /// Zip container
    Cbz,
    /// Rar container
    Cbr,
    /// 7z container
    Cb7,
    /// Tar container
    Cbt,
    /// PDF document
    Pdf,
    /// Unknown, e.g. when a descriptor was rebuilt from disk
    Unknown,
}

impl ArchiveFormat {
    /// Guess the format from the archive's file extension
    #[must_use]
    pub fn from_path(path: &Path) -> Self {
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_ascii_lowercase);
        match ext.as_deref() {
            Some("cbz" | "zip") => Self::Cbz,
            Some("cbr" | "rar") => Self::Cbr,
            Some("cb7" | "7z") => Self::Cb7,
            Some("cbt" | "tar") => Self::Cbt,
            Some("pdf") => Self::Pdf,
            _ => Self::Unknown,
        }
    }
}

/// Archive decoding collaborator
pub trait ArchiveService: Send + Sync {
    /// List every entry in the archive without extracting any bytes
    fn list_contents(&self, archive: &Path) -> Result<Vec<ArchiveEntry>>;

    /// Write the bytes of a single entry to `dest`
    fn extract_entry(&self, archive: &Path, entry_path: &str, dest: &Path) -> Result<()>;

    /// Extract every file entry below `dest_dir`, keeping relative paths
    fn extract(&self, archive: &Path, dest_dir: &Path) -> Result<()> {
        for entry in self.list_contents(archive)? {
            if entry.is_directory {
                continue;
            }
            let rel = Path::new(&entry.path);
            if rel
                .components()
                .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir))
            {
                tracing::warn!(
                    archive = %archive.display(),
                    entry = %entry.path,
                    "Skipping archive entry escaping the destination"
                );
                continue;
            }
            let dest = dest_dir.join(rel);
            if let Some(parent) = dest.parent() {
                fs::create_dir_all(parent).map_err(|e| Error::io(e, parent, "create_dir_all"))?;
            }
            self.extract_entry(archive, &entry.path, &dest)?;
        }
        Ok(())
    }
}

/// Comic-book tar reader
#[derive(Debug, Clone, Copy, Default)]
pub struct TarArchive;

impl TarArchive {
    fn open(archive: &Path) -> Result<tar::Archive<BufReader<fs::File>>> {
        let file = fs::File::open(archive)
            .map_err(|e| Error::archive(archive, format!("open failed: {e}")))?;
        Ok(tar::Archive::new(BufReader::new(file)))
    }
}

impl ArchiveService for TarArchive {
    fn list_contents(&self, archive: &Path) -> Result<Vec<ArchiveEntry>> {
        let mut ar = Self::open(archive)?;
        let entries = ar
            .entries()
            .map_err(|e| Error::archive(archive, format!("read failed: {e}")))?;

        let mut listing = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| Error::archive(archive, format!("bad entry: {e}")))?;
            let path = entry
                .path()
                .map_err(|e| Error::archive(archive, format!("bad entry path: {e}")))?
                .to_string_lossy()
                .into_owned();
            listing.push(ArchiveEntry {
                path,
                size: entry.size(),
                is_directory: entry.header().entry_type().is_dir(),
            });
        }
        Ok(listing)
    }

    fn extract_entry(&self, archive: &Path, entry_path: &str, dest: &Path) -> Result<()> {
        let mut ar = Self::open(archive)?;
        let entries = ar
            .entries()
            .map_err(|e| Error::archive(archive, format!("read failed: {e}")))?;

        for entry in entries {
            let mut entry =
                entry.map_err(|e| Error::archive(archive, format!("bad entry: {e}")))?;
            let matches = entry
                .path()
                .map(|p| p.to_string_lossy() == entry_path)
                .unwrap_or(false);
            if !matches {
                continue;
            }
            let mut out = fs::File::create(dest).map_err(|e| Error::io(e, dest, "create"))?;
            std::io::copy(&mut entry, &mut out).map_err(|e| {
                Error::archive(archive, format!("extracting {entry_path} failed: {e}"))
            })?;
            out.sync_all().map_err(|e| Error::io(e, dest, "sync"))?;
            return Ok(());
        }

        Err(Error::archive(
            archive,
            format!("entry {entry_path} not found"),
        ))
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use tempfile::TempDir;

    /// Write a tar archive holding `(path, bytes)` files
    pub(crate) fn write_tar(path: &Path, files: &[(&str, Vec<u8>)]) {
        let file = fs::File::create(path).unwrap();
        let mut builder = tar::Builder::new(file);
        for (name, data) in files {
            let mut header = tar::Header::new_gnu();
            header.set_size(data.len() as u64);
            header.set_mode(0o644);
            header.set_cksum();
            builder.append_data(&mut header, name, data.as_slice()).unwrap();
        }
        builder.finish().unwrap();
    }

    #[test]
    fn format_from_extension() {
        assert_eq!(ArchiveFormat::from_path(Path::new("a.CBZ")), ArchiveFormat::Cbz);
        assert_eq!(ArchiveFormat::from_path(Path::new("a.cbt")), ArchiveFormat::Cbt);
        assert_eq!(ArchiveFormat::from_path(Path::new("a")), ArchiveFormat::Unknown);
    }

    #[test]
    fn tar_listing_reports_sizes() {
        let tmp = TempDir::new().unwrap();
        let archive = tmp.path().join("issue.cbt");
        write_tar(
            &archive,
            &[("p1.jpg", vec![1; 10]), ("p2.png", vec![2; 20])],
        );

        let listing = TarArchive.list_contents(&archive).unwrap();
        assert_eq!(listing.len(), 2);
        assert_eq!(listing[0].path, "p1.jpg");
        assert_eq!(listing[0].size, 10);
        assert_eq!(listing[1].size, 20);
        assert!(!listing[0].is_directory);
    }

    #[test]
    fn tar_extracts_single_entry() {
        let tmp = TempDir::new().unwrap();
        let archive = tmp.path().join("issue.cbt");
        write_tar(
            &archive,
            &[("p1.jpg", b"first".to_vec()), ("p2.jpg", b"second".to_vec())],
        );

        let dest = tmp.path().join("out.jpg");
        TarArchive.extract_entry(&archive, "p2.jpg", &dest).unwrap();
        assert_eq!(fs::read(&dest).unwrap(), b"second");
    }

    #[test]
    fn tar_missing_entry_is_archive_error() {
        let tmp = TempDir::new().unwrap();
        let archive = tmp.path().join("issue.cbt");
        write_tar(&archive, &[("p1.jpg", b"x".to_vec())]);

        let err = TarArchive
            .extract_entry(&archive, "nope.jpg", &tmp.path().join("o"))
            .unwrap_err();
        assert!(matches!(err, Error::Archive { .. }));
    }

    #[test]
    fn missing_archive_is_archive_error() {
        let err = TarArchive
            .list_contents(Path::new("/definitely/not/here.cbt"))
            .unwrap_err();
        assert!(matches!(err, Error::Archive { .. }));
    }

    #[test]
    fn extract_all_keeps_relative_paths() {
        let tmp = TempDir::new().unwrap();
        let archive = tmp.path().join("issue.cbt");
        write_tar(
            &archive,
            &[("ch1/p1.jpg", b"a".to_vec()), ("ch2/p1.jpg", b"b".to_vec())],
        );
        let out = tmp.path().join("out");
        TarArchive.extract(&archive, &out).unwrap();
        assert_eq!(fs::read(out.join("ch1/p1.jpg")).unwrap(), b"a");
        assert_eq!(fs::read(out.join("ch2/p1.jpg")).unwrap(), b"b");
    }
}
