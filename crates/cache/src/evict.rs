//! Size-based eviction
//!
//! When the ledger exceeds the quota, file caches are visited least recently
//! used first. Pages are trimmed from each, furthest from the reader's
//! position first, never touching the protection zone around that position.
//! A cache that alone exceeds the quota and has no known reading position is
//! dropped outright.

use crate::access;
use crate::index::CacheIndex;
use crate::layout::{CacheLayout, FileId};
use crate::metadata::MetadataDescriptor;
use crate::progress::ReadingProgress;
use crate::sweep::remove_cache_dir;
use serde::{Deserialize, Serialize};
use std::cmp::Reverse;
use std::fs;
use std::sync::atomic::{AtomicBool, Ordering};

/// Outcome of one eviction pass
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EvictionResult {
    /// Another pass was already running, nothing was done
    pub skipped: bool,
    /// Ledger total before the pass
    pub total_before: u64,
    /// Ledger total after the pass
    pub total_after: u64,
    /// Bytes removed from the ledger
    pub bytes_freed: u64,
    /// File caches deleted outright
    pub caches_removed: usize,
    /// File caches that lost pages
    pub caches_trimmed: usize,
    /// Individual pages deleted
    pub pages_removed: usize,
    /// Failures that were logged and skipped
    pub errors: usize,
}

/// Outcome of trimming pages from one file cache
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrimResult {
    /// Bytes removed from the file's cached total
    pub bytes_freed: u64,
    /// Pages deleted
    pub pages_removed: usize,
    /// Failures that were logged and skipped
    pub errors: usize,
}

/// Single-flight flag for eviction passes
#[derive(Debug, Default)]
pub struct EvictionFlag(AtomicBool);

/// Held while an eviction pass runs; releases the flag on drop
#[derive(Debug)]
pub struct EvictionGuard<'a>(&'a AtomicBool);

impl EvictionFlag {
    /// Claim the flag, or `None` if a pass is already in flight
    pub fn try_acquire(&self) -> Option<EvictionGuard<'_>> {
        self.0
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| EvictionGuard(&self.0))
    }

    #[cfg(test)]
    fn is_held(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

impl Drop for EvictionGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Shared inputs of an eviction pass
pub struct Evictor<'a> {
    pub layout: &'a CacheLayout,
    pub index: &'a CacheIndex,
    pub progress: &'a dyn ReadingProgress,
    pub protection_radius: u32,
}

impl Evictor<'_> {
    /// Reduce the ledger to `quota`; caller holds the [`EvictionGuard`]
    pub fn evict_to_quota(&self, quota: u64) -> EvictionResult {
        let total_before = self.index.total_bytes();
        let mut result = EvictionResult {
            total_before,
            ..Default::default()
        };
        if total_before <= quota {
            result.total_after = total_before;
            return result;
        }

        let overage = total_before - quota;
        let mut freed = 0u64;

        for (file_id, entry) in self.index.lru_order() {
            if freed >= overage {
                break;
            }
            if entry.cached_size_bytes == 0 {
                continue;
            }

            let unread = self.progress.current_page(&file_id).is_none();
            if unread && entry.cached_size_bytes > quota {
                let dir = self.layout.file_dir(&file_id);
                match remove_cache_dir(&dir) {
                    Ok(()) => {
                        let bytes = self
                            .index
                            .remove(&file_id)
                            .map_or(entry.cached_size_bytes, |e| e.cached_size_bytes);
                        freed += bytes;
                        result.caches_removed += 1;
                        tracing::debug!(file_id = %file_id, bytes, "Evicted oversized file cache");
                    }
                    Err(e) => {
                        tracing::warn!(file_id = %file_id, "Failed to evict file cache: {e}");
                        result.errors += 1;
                    }
                }
                continue;
            }

            let trim = self.trim(&file_id, overage - freed);
            freed += trim.bytes_freed;
            result.pages_removed += trim.pages_removed;
            result.errors += trim.errors;
            if trim.pages_removed > 0 {
                result.caches_trimmed += 1;
            }
        }

        result.bytes_freed = freed;
        result.total_after = self.index.total_bytes();
        if result.total_after > quota {
            tracing::warn!(
                quota,
                total = result.total_after,
                "Quota still exceeded; remaining pages are inside protection zones"
            );
        }
        tracing::info!(
            quota,
            total_before = result.total_before,
            total_after = result.total_after,
            caches_removed = result.caches_removed,
            caches_trimmed = result.caches_trimmed,
            pages_removed = result.pages_removed,
            errors = result.errors,
            "Size eviction finished"
        );
        result
    }

    /// Delete pages outside the protection zone of one file cache until
    /// `target_bytes` are freed or nothing evictable is left
    pub fn trim(&self, file_id: &FileId, target_bytes: u64) -> TrimResult {
        let mut result = TrimResult::default();
        let dir = self.layout.file_dir(file_id);

        let tracked = self.index.get(file_id);
        let last_access = tracked
            .as_ref()
            .map_or_else(|| access::last_access(&dir), |e| e.last_accessed_at);
        let Some(mut descriptor) = tracked
            .map(|e| e.descriptor)
            .or_else(|| MetadataDescriptor::load(&dir))
        else {
            return result;
        };

        descriptor.reconcile(&dir);
        let before = descriptor.cached_size_bytes;

        let current = self.progress.current_page(file_id).unwrap_or(0);
        let mut candidates: Vec<usize> = descriptor
            .pages
            .iter()
            .enumerate()
            .filter(|(_, p)| p.cached && p.page_index.abs_diff(current) > self.protection_radius)
            .map(|(i, _)| i)
            .collect();
        // Furthest first; equidistant pages go in ascending index order
        candidates.sort_by_key(|&i| {
            let page = &descriptor.pages[i];
            (Reverse(page.page_index.abs_diff(current)), page.page_index)
        });

        let mut freed = 0u64;
        for i in candidates {
            if freed >= target_bytes {
                break;
            }
            let page = &mut descriptor.pages[i];
            let path = dir.join(&page.cached_filename);
            match fs::remove_file(&path) {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => {
                    tracing::warn!(path = %path.display(), "Failed to evict page: {e}");
                    result.errors += 1;
                    continue;
                }
            }
            page.cached = false;
            freed += page.size_bytes;
            result.pages_removed += 1;
        }

        descriptor.reconcile(&dir);
        descriptor.last_accessed_at = last_access;
        result.bytes_freed = before.saturating_sub(descriptor.cached_size_bytes);
        if dir.is_dir() {
            if let Err(e) = descriptor.write(&dir) {
                tracing::warn!(file_id = %file_id, "Failed to persist descriptor after eviction: {e}");
                result.errors += 1;
            }
            self.index.upsert(descriptor, last_access);
        } else {
            // Swept or invalidated while trimming
            self.index.remove(file_id);
        }

        tracing::debug!(
            file_id = %file_id,
            current_page = current,
            target_bytes,
            bytes_freed = result.bytes_freed,
            pages_removed = result.pages_removed,
            "Trimmed file cache"
        );
        result
    }
}
