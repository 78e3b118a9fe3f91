//! The page cache facade
//!
//! [`PageCache`] owns the ledger, the collaborators and the eviction flag.
//! Everything else in the crate is plumbing behind its methods.

use crate::access;
use crate::archive::{ArchiveFormat, ArchiveService};
use crate::config::CacheConfig;
use crate::evict::{EvictionFlag, EvictionResult, Evictor, TrimResult};
use crate::index::{CacheIndex, CacheStats, IndexEntry};
use crate::layout::{self, CacheLayout, FileId, PARTIAL_SUFFIX};
use crate::metadata::MetadataDescriptor;
use crate::progress::ReadingProgress;
use crate::sweep::{self, SweepResult};
use crate::{Error, Result};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

/// What startup recovery found under the cache root
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InitReport {
    /// Descriptors loaded as-is
    pub loaded: usize,
    /// Descriptors rewritten because pages on disk drifted from them
    pub reconciled: usize,
    /// Descriptors rebuilt from the page files
    pub rebuilt: usize,
    /// Directories skipped because they could not be processed
    pub skipped: usize,
}

/// Adaptive on-disk cache of extracted comic pages
pub struct PageCache {
    config: CacheConfig,
    layout: CacheLayout,
    index: CacheIndex,
    archive: Arc<dyn ArchiveService>,
    progress: Arc<dyn ReadingProgress>,
    eviction: EvictionFlag,
    init_report: InitReport,
}

impl std::fmt::Debug for PageCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PageCache")
            .field("config", &self.config)
            .field("root", &self.layout.root())
            .field("index", &self.index)
            .finish_non_exhaustive()
    }
}

impl PageCache {
    /// Open the cache, creating the root if needed and rebuilding the ledger
    /// from what is on disk
    ///
    /// Individual file caches that cannot be read are skipped and logged.
    ///
    /// # Errors
    ///
    /// Fails if the config is invalid or the cache root cannot be created or
    /// listed.
    pub fn open(
        config: CacheConfig,
        archive: Arc<dyn ArchiveService>,
        progress: Arc<dyn ReadingProgress>,
    ) -> Result<Self> {
        config.validate()?;
        let root = match &config.root {
            Some(root) => root.clone(),
            None => layout::default_cache_root()?,
        };
        fs::create_dir_all(&root).map_err(|e| Error::io(e, &root, "create_dir_all"))?;

        let mut cache = Self {
            config,
            layout: CacheLayout::new(root),
            index: CacheIndex::new(),
            archive,
            progress,
            eviction: EvictionFlag::default(),
            init_report: InitReport::default(),
        };
        cache.init_report = cache.initialize()?;

        tracing::info!(
            root = %cache.layout.root().display(),
            caches = cache.index.len(),
            total_bytes = cache.index.total_bytes(),
            loaded = cache.init_report.loaded,
            reconciled = cache.init_report.reconciled,
            rebuilt = cache.init_report.rebuilt,
            skipped = cache.init_report.skipped,
            "Page cache initialized"
        );
        Ok(cache)
    }

    fn initialize(&self) -> Result<InitReport> {
        let mut report = InitReport::default();
        let root = self.layout.root();

        for entry in fs::read_dir(root).map_err(|e| Error::io(e, root, "read_dir"))? {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    tracing::warn!(root = %root.display(), "Skipping unreadable cache entry: {e}");
                    report.skipped += 1;
                    continue;
                }
            };
            let dir = entry.path();
            if !dir.is_dir() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().into_owned();
            let file_id = match FileId::new(name) {
                Ok(id) => id,
                Err(e) => {
                    tracing::warn!(dir = %dir.display(), "Skipping foreign directory: {e}");
                    report.skipped += 1;
                    continue;
                }
            };

            match recover_file_cache(&file_id, &dir, &mut report) {
                Ok(descriptor) => {
                    let last_access = access::last_access(&dir);
                    self.index.upsert(descriptor, last_access);
                }
                Err(e) => {
                    tracing::warn!(file_id = %file_id, "Quarantining unreadable file cache: {e}");
                    report.skipped += 1;
                }
            }
        }

        Ok(report)
    }

    /// Cache root directory
    #[must_use]
    pub fn root(&self) -> &Path {
        self.layout.root()
    }

    /// Active configuration
    #[must_use]
    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// Read-only view of the ledger
    #[must_use]
    pub fn index(&self) -> &CacheIndex {
        &self.index
    }

    /// Ledger entry for one file
    #[must_use]
    pub fn entry(&self, file_id: &FileId) -> Option<IndexEntry> {
        self.index.get(file_id)
    }

    /// Running ledger total
    #[must_use]
    pub fn total_bytes(&self) -> u64 {
        self.index.total_bytes()
    }

    /// What recovery found when the cache was opened
    #[must_use]
    pub fn init_report(&self) -> &InitReport {
        &self.init_report
    }

    /// Record an access to a file cache; never fails
    pub fn touch_access(&self, file_id: &FileId) {
        let now = Utc::now();
        access::touch(&self.layout.file_dir(file_id), now);
        self.index.touch(file_id, now);
    }

    /// Path of a cached page, extracting it from `archive_path` first if needed
    ///
    /// # Errors
    ///
    /// Returns [`Error::Archive`] when the archive cannot be listed or the
    /// page cannot be extracted, [`Error::PageOutOfRange`] when the archive
    /// has no such page, and I/O errors from writing the cache directory.
    pub fn ensure_page_cached(
        &self,
        archive_path: &Path,
        file_id: &FileId,
        page_index: u32,
    ) -> Result<PathBuf> {
        let dir = self.layout.file_dir(file_id);
        let existing = self
            .index
            .get(file_id)
            .map(|e| e.descriptor)
            .or_else(|| MetadataDescriptor::load(&dir));

        if let Some(page) = existing.as_ref().and_then(|d| d.page(page_index)) {
            let path = self.layout.page_path(file_id, &page.cached_filename);
            if path.is_file() {
                self.touch_access(file_id);
                return Ok(path);
            }
        }

        let mut descriptor = match existing {
            Some(d) if !d.is_rebuilt() && d.page(page_index).is_some() => d,
            previous => {
                let listing = self.archive.list_contents(archive_path)?;
                let mut fresh = MetadataDescriptor::from_listing(
                    file_id.clone(),
                    ArchiveFormat::from_path(archive_path),
                    &listing,
                );
                if let Some(previous) = previous {
                    fresh.created_at = previous.created_at;
                }
                fresh
            }
        };

        let page = descriptor
            .page(page_index)
            .cloned()
            .ok_or_else(|| Error::PageOutOfRange {
                file_id: file_id.to_string(),
                page: page_index,
                page_count: descriptor.pages.len(),
            })?;

        fs::create_dir_all(&dir).map_err(|e| Error::io(e, &dir, "create_dir_all"))?;
        let dest = dir.join(&page.cached_filename);
        let partial = dir.join(format!("{}{PARTIAL_SUFFIX}", page.cached_filename));
        if let Err(e) = self
            .archive
            .extract_entry(archive_path, &page.source_path, &partial)
        {
            let _ = fs::remove_file(&partial);
            return Err(e);
        }
        fs::rename(&partial, &dest).map_err(|e| Error::io(e, &dest, "rename"))?;

        let now = Utc::now();
        descriptor.reconcile(&dir);
        descriptor.last_accessed_at = now;
        descriptor.write(&dir)?;
        self.index.upsert(descriptor, now);
        access::touch(&dir, now);

        tracing::debug!(
            file_id = %file_id,
            page = page_index,
            size = page.size_bytes,
            "Extracted page into cache"
        );
        Ok(dest)
    }

    /// Delete a file cache outright, returning the bytes freed on disk
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the directory exists but cannot be removed.
    pub fn invalidate(&self, file_id: &FileId) -> Result<u64> {
        let dir = self.layout.file_dir(file_id);
        let size = sweep::directory_size(&dir);
        sweep::remove_cache_dir(&dir)?;
        self.index.remove(file_id);
        tracing::info!(file_id = %file_id, bytes_freed = size, "Invalidated file cache");
        Ok(size)
    }

    /// Monitoring snapshot
    #[must_use]
    pub fn stats(&self) -> CacheStats {
        self.index.stats(Utc::now())
    }

    /// Delete every file cache idle for more than `ttl_minutes`
    pub fn run_ttl_sweep(&self, ttl_minutes: u64) -> SweepResult {
        let ttl = Duration::from_secs(ttl_minutes.saturating_mul(60));
        sweep::sweep_expired(&self.layout, &self.index, ttl, Utc::now())
    }

    /// Delete every file cache
    pub fn clear_all(&self) -> SweepResult {
        sweep::clear_all(&self.layout, &self.index)
    }

    /// Bring the ledger back under the configured quota
    ///
    /// Only one pass runs at a time; a call made while another pass is in
    /// flight returns immediately with `skipped` set.
    pub fn run_size_eviction(&self) -> EvictionResult {
        let Some(_guard) = self.eviction.try_acquire() else {
            let total = self.index.total_bytes();
            tracing::info!("Size eviction already running, skipping this trigger");
            return EvictionResult {
                skipped: true,
                total_before: total,
                total_after: total,
                ..Default::default()
            };
        };
        self.evictor().evict_to_quota(self.config.max_size_bytes)
    }

    /// Evict up to `target_bytes` from one file cache using the page policy
    ///
    /// Returns `None` if a size eviction pass is in flight.
    pub fn trim_file_cache(&self, file_id: &FileId, target_bytes: u64) -> Option<TrimResult> {
        let _guard = self.eviction.try_acquire()?;
        Some(self.evictor().trim(file_id, target_bytes))
    }

    fn evictor(&self) -> Evictor<'_> {
        Evictor {
            layout: &self.layout,
            index: &self.index,
            progress: self.progress.as_ref(),
            protection_radius: self.config.protection_radius,
        }
    }
}

/// Load, reconcile or rebuild the descriptor of one cache directory
fn recover_file_cache(
    file_id: &FileId,
    dir: &Path,
    report: &mut InitReport,
) -> Result<MetadataDescriptor> {
    remove_partials(dir)?;

    if let Some(mut descriptor) =
        MetadataDescriptor::load(dir).filter(|d| &d.file_id == file_id)
    {
        if descriptor.reconcile(dir) {
            descriptor.write(dir)?;
            report.reconciled += 1;
            tracing::debug!(file_id = %file_id, "Reconciled descriptor with disk");
        } else {
            report.loaded += 1;
        }
        return Ok(descriptor);
    }

    let mut descriptor = MetadataDescriptor::rebuild_from_disk(file_id.clone(), dir)?;
    descriptor.last_accessed_at = access::last_access(dir);
    descriptor.write(dir)?;
    report.rebuilt += 1;
    tracing::info!(
        file_id = %file_id,
        pages = descriptor.pages.len(),
        cached_bytes = descriptor.cached_size_bytes,
        "Rebuilt missing or corrupt descriptor"
    );
    Ok(descriptor)
}

/// Drop extraction leftovers from an interrupted run
fn remove_partials(dir: &Path) -> Result<()> {
    for entry in fs::read_dir(dir).map_err(|e| Error::io(e, dir, "read_dir"))? {
        let entry = entry.map_err(|e| Error::io(e, dir, "read_dir_entry"))?;
        let path = entry.path();
        if entry.file_name().to_string_lossy().ends_with(PARTIAL_SUFFIX) {
            if let Err(e) = fs::remove_file(&path) {
                tracing::warn!(path = %path.display(), "Failed to remove partial file: {e}");
            }
        }
    }
    Ok(())
}
