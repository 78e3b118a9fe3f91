//! Shared fixtures for page cache integration tests

#![allow(dead_code)]

use folio_cache::{
    ArchiveEntry, ArchiveService, CacheConfig, Error, FileId, MetadataDescriptor, PageCache,
    ReadingProgress, Result,
};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

/// Archive service backed by in-memory page lists
#[derive(Debug, Default)]
pub struct MemoryArchive {
    archives: RwLock<HashMap<PathBuf, Vec<(String, Vec<u8>)>>>,
}

impl MemoryArchive {
    /// Register an archive whose pages have the given sizes
    pub fn add(&self, path: impl Into<PathBuf>, sizes: &[usize]) {
        let pages = sizes
            .iter()
            .enumerate()
            .map(|(i, size)| (format!("page{i}.jpg"), vec![0u8; *size]))
            .collect();
        self.archives.write().unwrap().insert(path.into(), pages);
    }
}

impl ArchiveService for MemoryArchive {
    fn list_contents(&self, archive: &Path) -> Result<Vec<ArchiveEntry>> {
        let archives = self.archives.read().unwrap();
        let pages = archives
            .get(archive)
            .ok_or_else(|| Error::archive(archive, "no such archive"))?;
        Ok(pages
            .iter()
            .map(|(path, data)| ArchiveEntry {
                path: path.clone(),
                size: data.len() as u64,
                is_directory: false,
            })
            .collect())
    }

    fn extract_entry(&self, archive: &Path, entry_path: &str, dest: &Path) -> Result<()> {
        let archives = self.archives.read().unwrap();
        let data = archives
            .get(archive)
            .and_then(|pages| pages.iter().find(|(p, _)| p == entry_path))
            .map(|(_, data)| data.clone())
            .ok_or_else(|| Error::archive(archive, format!("no entry {entry_path}")))?;
        fs::write(dest, data).map_err(|e| Error::io(e, dest, "write"))
    }
}

/// Open a cache rooted at `root` with the given quota and protection radius
pub fn open_cache(
    root: &Path,
    max_size_bytes: u64,
    protection_radius: u32,
    archive: Arc<dyn ArchiveService>,
    progress: Arc<dyn ReadingProgress>,
) -> PageCache {
    let config = CacheConfig {
        max_size_bytes,
        protection_radius,
        ..CacheConfig::with_root(root)
    };
    PageCache::open(config, archive, progress).unwrap()
}

/// Register `sizes` as an archive and extract every page of it
pub fn cache_all_pages(cache: &PageCache, archive: &MemoryArchive, id: &str, sizes: &[usize]) -> FileId {
    let file_id = FileId::new(id).unwrap();
    let path = PathBuf::from(format!("/library/{id}.cbz"));
    archive.add(&path, sizes);
    for page in 0..sizes.len() {
        cache
            .ensure_page_cached(&path, &file_id, u32::try_from(page).unwrap())
            .unwrap();
    }
    file_id
}

/// Pages of a file cache present on disk, by index
pub fn pages_on_disk(root: &Path, id: &FileId) -> Vec<u32> {
    let mut pages: Vec<u32> = fs::read_dir(root.join(id.as_str()))
        .map(|entries| {
            entries
                .filter_map(|e| e.ok())
                .filter_map(|e| {
                    let name = e.file_name().to_string_lossy().into_owned();
                    if name.starts_with('.') || name.ends_with(".partial") {
                        return None;
                    }
                    name.split('.').next()?.parse().ok()
                })
                .collect()
        })
        .unwrap_or_default();
    pages.sort_unstable();
    pages
}

/// Sum of the sizes of page files actually on disk for one file cache
pub fn bytes_on_disk(root: &Path, id: &FileId) -> u64 {
    let Ok(entries) = fs::read_dir(root.join(id.as_str())) else {
        return 0;
    };
    entries
        .filter_map(|e| e.ok())
        .filter(|e| !e.file_name().to_string_lossy().starts_with('.'))
        .filter_map(|e| e.metadata().ok())
        .map(|m| m.len())
        .sum()
}

/// Assert every persisted descriptor matches the page files next to it
pub fn assert_descriptors_match_disk(root: &Path) {
    for entry in fs::read_dir(root).unwrap() {
        let dir = entry.unwrap().path();
        if !dir.is_dir() {
            continue;
        }
        let id = FileId::new(dir.file_name().unwrap().to_string_lossy()).unwrap();
        let desc = MetadataDescriptor::load(&dir).expect("descriptor present");
        assert_eq!(
            desc.cached_size_bytes,
            bytes_on_disk(root, &id),
            "descriptor of {id} drifted from disk"
        );
    }
}
