//! Adaptive page extraction cache for comic archives
//!
//! Recently viewed pages are kept as decoded image files on local disk so
//! that re-opening a comic is near-instant, while total disk usage stays
//! bounded:
//! - a TTL sweep drops whole file caches nobody has touched recently
//! - size-based eviction trims least recently used caches once the quota is
//!   exceeded, sparing a window of pages around each reader's position
//! - the filesystem is the only source of truth; the in-memory ledger is
//!   rebuilt from per-file descriptors on startup
//!
//! # Usage
//!
//! ```rust,no_run
//! use folio_cache::{CacheConfig, FileId, NoProgress, PageCache, TarArchive};
//! use std::path::Path;
//! use std::sync::Arc;
//!
//! let cache = PageCache::open(
//!     CacheConfig::with_root("/var/cache/folio"),
//!     Arc::new(TarArchive),
//!     Arc::new(NoProgress),
//! )?;
//!
//! let id = FileId::new("issue-42")?;
//! let page = cache.ensure_page_cached(Path::new("/library/issue-42.cbt"), &id, 0)?;
//! println!("page 0 at {}", page.display());
//!
//! // Driven by a scheduler
//! let swept = cache.run_ttl_sweep(cache.config().ttl_minutes);
//! let evicted = cache.run_size_eviction();
//! println!("freed {} + {} bytes", swept.bytes_freed, evicted.bytes_freed);
//! # Ok::<(), folio_cache::Error>(())
//! ```

#![expect(
    clippy::missing_errors_doc,
    reason = "Error documentation to be added incrementally"
)]

mod access;
pub mod archive;
pub mod config;
mod error;
mod evict;
pub mod index;
pub mod layout;
mod manager;
pub mod metadata;
pub mod progress;
mod sweep;

// Re-export error types at crate root
pub use error::{Error, Result};

// Re-export main types
pub use archive::{ArchiveEntry, ArchiveFormat, ArchiveService, TarArchive};
pub use config::CacheConfig;
pub use evict::{EvictionResult, TrimResult};
pub use index::{CacheIndex, CacheStats, IndexEntry};
pub use layout::{CacheLayout, FileId, default_cache_root};
pub use manager::{InitReport, PageCache};
pub use metadata::{MetadataDescriptor, PageDescriptor};
pub use progress::{NoProgress, ReadingProgress, StaticProgress};
pub use sweep::SweepResult;
