//! In-memory ledger of every file cache
//!
//! The index mirrors the per-file descriptors and keeps a running total of
//! cached bytes, which is the single number size-based eviction compares
//! against the quota. It is rebuilt from disk on startup and never persisted.

use crate::layout::FileId;
use crate::metadata::MetadataDescriptor;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

/// Ledger entry for one file cache
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexEntry {
    /// Bytes if every page were cached
    pub potential_size_bytes: u64,
    /// Bytes of pages present on disk
    pub cached_size_bytes: u64,
    /// Number of pages present on disk
    pub cached_pages: usize,
    /// Last access used for LRU ranking and TTL expiry
    pub last_accessed_at: DateTime<Utc>,
    /// Descriptor the entry was derived from
    pub descriptor: MetadataDescriptor,
}

/// Monitoring snapshot of the cache
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheStats {
    /// Number of file caches
    pub total_caches: usize,
    /// Running ledger total
    pub total_cached_bytes: u64,
    /// Pages present on disk across all caches
    pub total_pages: usize,
    /// Time since the least recently accessed cache was used
    pub oldest_age: Option<Duration>,
    /// Time since the most recently accessed cache was used
    pub newest_age: Option<Duration>,
}

#[derive(Debug, Default)]
struct IndexState {
    entries: HashMap<FileId, IndexEntry>,
    total_cached_bytes: u64,
}

/// Process-wide cache ledger, owned by one [`crate::PageCache`]
#[derive(Debug, Default)]
pub struct CacheIndex {
    state: Mutex<IndexState>,
}

impl CacheIndex {
    /// Create an empty index
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, IndexState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Insert or refresh the entry for a descriptor, adjusting the total by the delta
    pub(crate) fn upsert(&self, descriptor: MetadataDescriptor, last_accessed_at: DateTime<Utc>) {
        let entry = IndexEntry {
            potential_size_bytes: descriptor.potential_size_bytes,
            cached_size_bytes: descriptor.cached_size_bytes,
            cached_pages: descriptor.cached_pages(),
            last_accessed_at,
            descriptor,
        };
        let new_bytes = entry.cached_size_bytes;

        let mut state = self.lock();
        let old_bytes = state
            .entries
            .insert(entry.descriptor.file_id.clone(), entry)
            .map_or(0, |old| old.cached_size_bytes);
        state.total_cached_bytes = state
            .total_cached_bytes
            .saturating_sub(old_bytes)
            .saturating_add(new_bytes);
    }

    /// Drop an entry and subtract its bytes from the total
    pub(crate) fn remove(&self, file_id: &FileId) -> Option<IndexEntry> {
        let mut state = self.lock();
        let removed = state.entries.remove(file_id)?;
        state.total_cached_bytes = state
            .total_cached_bytes
            .saturating_sub(removed.cached_size_bytes);
        Some(removed)
    }

    /// Record a newer access time; returns `false` if the file is not tracked
    pub(crate) fn touch(&self, file_id: &FileId, at: DateTime<Utc>) -> bool {
        let mut state = self.lock();
        match state.entries.get_mut(file_id) {
            Some(entry) => {
                if at > entry.last_accessed_at {
                    entry.last_accessed_at = at;
                }
                true
            }
            None => false,
        }
    }

    /// Copy of one entry
    #[must_use]
    pub fn get(&self, file_id: &FileId) -> Option<IndexEntry> {
        self.lock().entries.get(file_id).cloned()
    }

    /// Running total of cached bytes
    #[must_use]
    pub fn total_bytes(&self) -> u64 {
        self.lock().total_cached_bytes
    }

    /// Number of tracked file caches
    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    /// Whether nothing is tracked
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lock().entries.is_empty()
    }

    /// Entries ranked least recently used first (file id breaks ties)
    #[must_use]
    pub fn lru_order(&self) -> Vec<(FileId, IndexEntry)> {
        let mut ranked: Vec<(FileId, IndexEntry)> = self
            .lock()
            .entries
            .iter()
            .map(|(id, e)| (id.clone(), e.clone()))
            .collect();
        ranked.sort_by(|(a_id, a), (b_id, b)| {
            a.last_accessed_at
                .cmp(&b.last_accessed_at)
                .then_with(|| a_id.cmp(b_id))
        });
        ranked
    }

    /// Sum of the entries' cached bytes, recomputed from scratch
    #[must_use]
    pub fn recomputed_total(&self) -> u64 {
        self.lock()
            .entries
            .values()
            .map(|e| e.cached_size_bytes)
            .sum()
    }

    /// Monitoring snapshot relative to `now`
    #[must_use]
    pub fn stats(&self, now: DateTime<Utc>) -> CacheStats {
        let state = self.lock();
        let age = |at: DateTime<Utc>| (now - at).to_std().unwrap_or(Duration::ZERO);

        CacheStats {
            total_caches: state.entries.len(),
            total_cached_bytes: state.total_cached_bytes,
            total_pages: state.entries.values().map(|e| e.cached_pages).sum(),
            oldest_age: state
                .entries
                .values()
                .map(|e| e.last_accessed_at)
                .min()
                .map(age),
            newest_age: state
                .entries
                .values()
                .map(|e| e.last_accessed_at)
                .max()
                .map(age),
        }
    }
}
