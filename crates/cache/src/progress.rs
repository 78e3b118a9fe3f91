//! Reading-progress boundary used by the eviction policy

use crate::layout::FileId;
use std::collections::HashMap;
use std::sync::RwLock;

/// Source of the reader's current position per file
pub trait ReadingProgress: Send + Sync {
    /// Last page the reader viewed, if known
    fn current_page(&self, file_id: &FileId) -> Option<u32>;
}

/// Progress store that knows nothing; every file is treated as at page 0
#[derive(Debug, Clone, Copy, Default)]
pub struct NoProgress;

impl ReadingProgress for NoProgress {
    fn current_page(&self, _file_id: &FileId) -> Option<u32> {
        None
    }
}

/// In-memory progress store
#[derive(Debug, Default)]
pub struct StaticProgress {
    pages: RwLock<HashMap<FileId, u32>>,
}

impl StaticProgress {
    /// Create an empty store
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the current page for a file
    pub fn set(&self, file_id: FileId, page: u32) {
        if let Ok(mut pages) = self.pages.write() {
            pages.insert(file_id, page);
        }
    }
}

impl FromIterator<(FileId, u32)> for StaticProgress {
    fn from_iter<I: IntoIterator<Item = (FileId, u32)>>(iter: I) -> Self {
        Self {
            pages: RwLock::new(iter.into_iter().collect()),
        }
    }
}

impl ReadingProgress for StaticProgress {
    fn current_page(&self, file_id: &FileId) -> Option<u32> {
        self.pages.read().ok()?.get(file_id).copied()
    }
}
