//! Whole-cache reclamation: TTL expiry and explicit clearing
//!
//! The sweep walks the cache root rather than the index, so directories left
//! behind by a crash or created by another process are reclaimed too.

use crate::access;
use crate::index::CacheIndex;
use crate::layout::{CacheLayout, FileId};
use crate::{Error, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;

/// Outcome of a sweep
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SweepResult {
    /// File caches deleted
    pub caches_removed: usize,
    /// Bytes freed on disk, sidecars included
    pub bytes_freed: u64,
    /// Entries that failed and were skipped
    pub errors: usize,
}

/// Delete every file cache idle for longer than `ttl`
pub fn sweep_expired(
    layout: &CacheLayout,
    index: &CacheIndex,
    ttl: Duration,
    now: DateTime<Utc>,
) -> SweepResult {
    let ttl = chrono::Duration::from_std(ttl).unwrap_or(chrono::Duration::MAX);
    let result = sweep_where(
        layout,
        index,
        |last_access| now - last_access > ttl,
        remove_cache_dir,
    );
    tracing::info!(
        caches_removed = result.caches_removed,
        bytes_freed = result.bytes_freed,
        errors = result.errors,
        "TTL sweep finished"
    );
    result
}

/// Delete every file cache
pub fn clear_all(layout: &CacheLayout, index: &CacheIndex) -> SweepResult {
    let result = sweep_where(layout, index, |_| true, remove_cache_dir);
    tracing::info!(
        caches_removed = result.caches_removed,
        bytes_freed = result.bytes_freed,
        errors = result.errors,
        "Cache cleared"
    );
    result
}

fn sweep_where(
    layout: &CacheLayout,
    index: &CacheIndex,
    should_remove: impl Fn(DateTime<Utc>) -> bool,
    remove: impl Fn(&Path) -> Result<()>,
) -> SweepResult {
    let mut result = SweepResult::default();
    let root = layout.root();

    let entries = match fs::read_dir(root) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return result,
        Err(e) => {
            tracing::warn!(root = %root.display(), "Failed to read cache root: {e}");
            result.errors += 1;
            return result;
        }
    };

    for entry in entries {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                tracing::warn!(root = %root.display(), "Failed to read cache entry: {e}");
                result.errors += 1;
                continue;
            }
        };
        let path = entry.path();
        if !path.is_dir() {
            continue;
        }
        let Ok(file_id) = FileId::new(entry.file_name().to_string_lossy()) else {
            continue;
        };

        // The in-memory touch may be newer than a sidecar write that failed
        let mut last = access::last_access(&path);
        if let Some(tracked) = index.get(&file_id) {
            last = last.max(tracked.last_accessed_at);
        }
        if !should_remove(last) {
            continue;
        }

        let size = directory_size(&path);
        match remove(&path) {
            Ok(()) => {
                index.remove(&file_id);
                result.caches_removed += 1;
                result.bytes_freed += size;
                tracing::debug!(
                    file_id = %file_id,
                    size,
                    last_access = %last.to_rfc3339(),
                    "Removed file cache"
                );
            }
            Err(e) => {
                tracing::warn!(file_id = %file_id, "Failed to remove file cache: {e}");
                result.errors += 1;
            }
        }
    }

    result
}

/// Remove a file cache directory; a directory that is already gone counts as removed
pub fn remove_cache_dir(path: &Path) -> Result<()> {
    match fs::remove_dir_all(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(Error::io(e, path, "remove_dir_all")),
    }
}

/// Total size of the files below `path`; unreadable entries count as zero
pub fn directory_size(path: &Path) -> u64 {
    walkdir::WalkDir::new(path)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .filter_map(|e| e.metadata().ok())
        .map(|m| m.len())
        .sum()
}
