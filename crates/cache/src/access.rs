//! Access-time tracking
//!
//! Last access is kept in a `.last_access` sidecar rather than relying on
//! filesystem timestamps, which backup and sync tooling rewrites freely.

use crate::layout::ACCESS_FILE;
use chrono::{DateTime, Utc};
use std::fs;
use std::path::Path;

/// Record `at` as the last access of the file cache in `dir`
///
/// Best effort: a missing directory is a no-op and write failures are only
/// logged, so a read is never blocked on access tracking.
pub fn touch(dir: &Path, at: DateTime<Utc>) {
    if !dir.is_dir() {
        return;
    }
    let path = dir.join(ACCESS_FILE);
    if let Err(e) = fs::write(&path, at.to_rfc3339()) {
        tracing::warn!(path = %path.display(), "Failed to record cache access: {e}");
    }
}

/// Last access of the file cache in `dir`
///
/// Falls back to the directory mtime, then to now, so an unreadable cache is
/// never treated as idle.
#[must_use]
pub fn last_access(dir: &Path) -> DateTime<Utc> {
    if let Some(at) = read_record(dir) {
        return at;
    }
    fs::metadata(dir)
        .and_then(|m| m.modified())
        .map_or_else(|_| Utc::now(), DateTime::<Utc>::from)
}

fn read_record(dir: &Path) -> Option<DateTime<Utc>> {
    let content = fs::read_to_string(dir.join(ACCESS_FILE)).ok()?;
    DateTime::parse_from_rfc3339(content.trim())
        .ok()
        .map(|at| at.with_timezone(&Utc))
}
