//! Reading progress backed by a JSON file
//!
//! The file holds a flat map of file id to the page the reader last viewed:
//!
//! ```json
//! { "issue-42": 17, "4f1c0a9e2b7d": 3 }
//! ```
//!
//! It is re-read whenever its modification time changes, so a reader process
//! can update it while `folio watch` runs.

use folio_cache::{FileId, ReadingProgress};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::RwLock;
use std::time::SystemTime;

#[derive(Debug, Default)]
struct Snapshot {
    modified: Option<SystemTime>,
    pages: HashMap<FileId, u32>,
}

/// [`ReadingProgress`] implementation reading a JSON progress file
#[derive(Debug)]
pub struct JsonProgressFile {
    path: PathBuf,
    snapshot: RwLock<Snapshot>,
}

impl JsonProgressFile {
    /// Track the progress file at `path`; a missing file means no progress
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let store = Self {
            path: path.into(),
            snapshot: RwLock::new(Snapshot::default()),
        };
        store.refresh();
        store
    }

    /// Path of the progress file
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn refresh(&self) {
        let modified = fs::metadata(&self.path).and_then(|m| m.modified()).ok();
        let stale = self
            .snapshot
            .read()
            .map(|snapshot| snapshot.modified != modified)
            .unwrap_or(true);
        if !stale {
            return;
        }

        let pages = match modified {
            Some(_) => load_pages(&self.path),
            None => HashMap::new(),
        };
        if let Ok(mut snapshot) = self.snapshot.write() {
            *snapshot = Snapshot { modified, pages };
        }
    }
}

fn load_pages(path: &Path) -> HashMap<FileId, u32> {
    let raw: HashMap<String, u32> = match fs::read(path)
        .map_err(|e| e.to_string())
        .and_then(|bytes| serde_json::from_slice(&bytes).map_err(|e| e.to_string()))
    {
        Ok(raw) => raw,
        Err(e) => {
            tracing::warn!(path = %path.display(), "Ignoring unreadable progress file: {e}");
            return HashMap::new();
        }
    };

    raw.into_iter()
        .filter_map(|(id, page)| match FileId::new(id) {
            Ok(id) => Some((id, page)),
            Err(e) => {
                tracing::debug!(path = %path.display(), "Skipping progress entry: {e}");
                None
            }
        })
        .collect()
}

impl ReadingProgress for JsonProgressFile {
    fn current_page(&self, file_id: &FileId) -> Option<u32> {
        self.refresh();
        self.snapshot.read().ok()?.pages.get(file_id).copied()
    }
}
