//! Per-file metadata descriptors
//!
//! Every file cache directory carries a `.metadata.json` sidecar enumerating
//! all pages of the archive, their sizes, and which of them are currently
//! extracted. The descriptor is the durable source of truth for the global
//! index; anything that cannot be parsed is rebuilt from the directory
//! contents instead.

use crate::archive::{ArchiveEntry, ArchiveFormat};
use crate::layout::{self, FileId, METADATA_FILE, PARTIAL_SUFFIX};
use crate::{Error, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fs;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};

/// Current descriptor schema version
pub const DESCRIPTOR_VERSION: u32 = 1;

static WRITE_SEQ: AtomicU64 = AtomicU64::new(0);

const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "gif", "webp", "bmp", "avif", "jxl"];

/// One page of an archive
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageDescriptor {
    /// 0-based page index in reading order
    pub page_index: u32,
    /// Path of the page inside the archive
    pub source_path: String,
    /// Filename of the extracted page inside the cache directory
    pub cached_filename: String,
    /// Uncompressed size in bytes
    pub size_bytes: u64,
    /// Whether the page file was present on disk at the last reconcile
    #[serde(default)]
    pub cached: bool,
}

/// Cache descriptor for one source file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetadataDescriptor {
    /// Schema version, see [`DESCRIPTOR_VERSION`]
    pub version: u32,
    /// File the descriptor belongs to
    pub file_id: FileId,
    /// Container format of the source archive
    pub archive_format: ArchiveFormat,
    /// When the file cache was created
    pub created_at: DateTime<Utc>,
    /// Last access recorded when the descriptor was written
    pub last_accessed_at: DateTime<Utc>,
    /// Sum of all page sizes if every page were cached
    pub potential_size_bytes: u64,
    /// Sum of sizes of the pages present on disk
    pub cached_size_bytes: u64,
    /// All pages in reading order
    pub pages: Vec<PageDescriptor>,
}

impl MetadataDescriptor {
    /// Build a descriptor from an archive listing without extracting anything
    ///
    /// Non-image entries are dropped and the rest are ordered naturally by
    /// path (`page2` before `page10`).
    #[must_use]
    pub fn from_listing(file_id: FileId, format: ArchiveFormat, listing: &[ArchiveEntry]) -> Self {
        let mut images: Vec<&ArchiveEntry> = listing.iter().filter(|e| is_image_entry(e)).collect();
        images.sort_by(|a, b| natural_cmp(&a.path, &b.path));

        let pages: Vec<PageDescriptor> = images
            .into_iter()
            .zip(0u32..)
            .map(|(entry, page_index)| PageDescriptor {
                page_index,
                source_path: entry.path.clone(),
                cached_filename: layout::page_filename(page_index, &entry.path),
                size_bytes: entry.size,
                cached: false,
            })
            .collect();

        let now = Utc::now();
        Self {
            version: DESCRIPTOR_VERSION,
            file_id,
            archive_format: format,
            created_at: now,
            last_accessed_at: now,
            potential_size_bytes: pages.iter().map(|p| p.size_bytes).sum(),
            cached_size_bytes: 0,
            pages,
        }
    }

    /// Reconstruct a descriptor from the page files found in `dir`
    ///
    /// Page indices come from the file stems; every page found counts as
    /// cached, so `cached_size_bytes == potential_size_bytes`.
    pub fn rebuild_from_disk(file_id: FileId, dir: &Path) -> Result<Self> {
        let mut pages: Vec<PageDescriptor> = Vec::new();

        for entry in fs::read_dir(dir).map_err(|e| Error::io(e, dir, "read_dir"))? {
            let entry = entry.map_err(|e| Error::io(e, dir, "read_dir_entry"))?;
            let name = entry.file_name().to_string_lossy().into_owned();
            let Some(page_index) = layout::page_index_from_filename(&name) else {
                continue;
            };
            let meta = entry
                .metadata()
                .map_err(|e| Error::io(e, entry.path(), "metadata"))?;
            if !meta.is_file() {
                continue;
            }
            pages.push(PageDescriptor {
                page_index,
                source_path: name.clone(),
                cached_filename: name,
                size_bytes: meta.len(),
                cached: true,
            });
        }

        pages.sort_by(|a, b| {
            a.page_index
                .cmp(&b.page_index)
                .then_with(|| a.cached_filename.cmp(&b.cached_filename))
        });
        let before = pages.len();
        pages.dedup_by_key(|p| p.page_index);
        if pages.len() != before {
            tracing::warn!(
                file_id = %file_id,
                duplicates = before - pages.len(),
                "Ignoring duplicate page files while rebuilding descriptor"
            );
        }

        let total: u64 = pages.iter().map(|p| p.size_bytes).sum();
        let now = Utc::now();
        Ok(Self {
            version: DESCRIPTOR_VERSION,
            file_id,
            archive_format: ArchiveFormat::Unknown,
            created_at: now,
            last_accessed_at: now,
            potential_size_bytes: total,
            cached_size_bytes: total,
            pages,
        })
    }

    /// Load the descriptor sidecar from `dir`
    ///
    /// Returns `None` when the sidecar is missing, unreadable, unparsable or
    /// from another schema version; callers rebuild in that case.
    #[must_use]
    pub fn load(dir: &Path) -> Option<Self> {
        let path = dir.join(METADATA_FILE);
        let content = match fs::read(&path) {
            Ok(c) => c,
            Err(e) => {
                if e.kind() != std::io::ErrorKind::NotFound {
                    tracing::debug!(path = %path.display(), "Unreadable descriptor: {e}");
                }
                return None;
            }
        };
        match serde_json::from_slice::<Self>(&content) {
            Ok(desc) if desc.version == DESCRIPTOR_VERSION => Some(desc),
            Ok(desc) => {
                tracing::debug!(
                    path = %path.display(),
                    version = desc.version,
                    "Descriptor has unsupported version"
                );
                None
            }
            Err(e) => {
                tracing::debug!(path = %path.display(), "Corrupt descriptor: {e}");
                None
            }
        }
    }

    /// Persist the descriptor sidecar into `dir` (write to temp, then rename)
    pub fn write(&self, dir: &Path) -> Result<()> {
        let path = dir.join(METADATA_FILE);
        let seq = WRITE_SEQ.fetch_add(1, AtomicOrdering::Relaxed);
        let tmp = dir.join(format!(
            "{METADATA_FILE}.{}-{seq}{PARTIAL_SUFFIX}",
            std::process::id()
        ));
        let json = serde_json::to_vec_pretty(self)
            .map_err(|e| Error::serialization(format!("Failed to serialize descriptor: {e}")))?;
        fs::write(&tmp, json).map_err(|e| Error::io(e, &tmp, "write"))?;
        if let Err(e) = fs::rename(&tmp, &path) {
            let _ = fs::remove_file(&tmp);
            return Err(Error::io(e, &path, "rename"));
        }
        Ok(())
    }

    /// Refresh the `cached` flags and `cached_size_bytes` from the files in `dir`
    ///
    /// Returns `true` if anything changed.
    pub fn reconcile(&mut self, dir: &Path) -> bool {
        let mut changed = false;
        for page in &mut self.pages {
            let present = dir.join(&page.cached_filename).is_file();
            if page.cached != present {
                page.cached = present;
                changed = true;
            }
        }
        let cached = self.recomputed_cached_size();
        if cached != self.cached_size_bytes {
            self.cached_size_bytes = cached;
            changed = true;
        }
        changed
    }

    /// Sum of sizes of pages flagged as cached
    #[must_use]
    pub fn recomputed_cached_size(&self) -> u64 {
        self.pages
            .iter()
            .filter(|p| p.cached)
            .map(|p| p.size_bytes)
            .sum()
    }

    /// Number of pages flagged as cached
    #[must_use]
    pub fn cached_pages(&self) -> usize {
        self.pages.iter().filter(|p| p.cached).count()
    }

    /// Look up a page by index
    #[must_use]
    pub fn page(&self, page_index: u32) -> Option<&PageDescriptor> {
        self.pages.iter().find(|p| p.page_index == page_index)
    }

    /// Whether the descriptor came from a disk rebuild and lacks archive paths
    #[must_use]
    pub fn is_rebuilt(&self) -> bool {
        self.archive_format == ArchiveFormat::Unknown
    }
}

fn is_image_entry(entry: &ArchiveEntry) -> bool {
    if entry.is_directory {
        return false;
    }
    let path = Path::new(&entry.path);
    let hidden = path.components().any(|c| {
        let s = c.as_os_str().to_string_lossy();
        s.starts_with('.') || s == "__MACOSX"
    });
    if hidden {
        return false;
    }
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|ext| IMAGE_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
}

/// Natural ordering: digit runs compare numerically, text case-insensitively
fn natural_cmp(a: &str, b: &str) -> Ordering {
    let mut ai = a.chars().peekable();
    let mut bi = b.chars().peekable();

    loop {
        match (ai.peek().copied(), bi.peek().copied()) {
            (None, None) => return a.cmp(b),
            (None, Some(_)) => return Ordering::Less,
            (Some(_), None) => return Ordering::Greater,
            (Some(x), Some(y)) if x.is_ascii_digit() && y.is_ascii_digit() => {
                let na = take_digits(&mut ai);
                let nb = take_digits(&mut bi);
                let ta = na.trim_start_matches('0');
                let tb = nb.trim_start_matches('0');
                let ord = ta
                    .len()
                    .cmp(&tb.len())
                    .then_with(|| ta.cmp(tb))
                    .then_with(|| na.len().cmp(&nb.len()));
                if ord != Ordering::Equal {
                    return ord;
                }
            }
            (Some(x), Some(y)) => {
                let ord = x.to_lowercase().cmp(y.to_lowercase());
                if ord != Ordering::Equal {
                    return ord;
                }
                ai.next();
                bi.next();
            }
        }
    }
}

fn take_digits(it: &mut std::iter::Peekable<std::str::Chars<'_>>) -> String {
    let mut digits = String::new();
    while let Some(c) = it.peek().copied().filter(char::is_ascii_digit) {
        digits.push(c);
        it.next();
    }
    digits
}
