//! On-disk layout of the page cache
//!
//! ```text
//! <root>/
//!   <file_id>/
//!     0000.jpg            cached pages: zero-padded index + original extension
//!     0001.png
//!     .last_access        access record (RFC 3339 timestamp)
//!     .metadata.json      metadata descriptor
//! ```

use crate::{Error, Result};
use dirs::{cache_dir, home_dir};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::io::Read;
use std::path::{Path, PathBuf};

/// Metadata descriptor sidecar name
pub const METADATA_FILE: &str = ".metadata.json";
/// Access record sidecar name
pub const ACCESS_FILE: &str = ".last_access";
/// Suffix of pages that are still being extracted
pub const PARTIAL_SUFFIX: &str = ".partial";

const MAX_FILE_ID_LEN: usize = 128;

/// Stable identifier of a source comic file, used as its cache directory name
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct FileId(String);

impl FileId {
    /// Validate and wrap an identifier
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidFileId`] if the id is empty, too long, starts
    /// with `.` or contains characters other than ASCII alphanumerics, `-` and `_`.
    pub fn new(id: impl Into<String>) -> Result<Self> {
        let id = id.into();
        if id.is_empty() {
            return Err(Error::invalid_file_id(id, "must not be empty"));
        }
        if id.len() > MAX_FILE_ID_LEN {
            return Err(Error::invalid_file_id(
                id,
                format!("must be at most {MAX_FILE_ID_LEN} bytes"),
            ));
        }
        if id.starts_with('.') {
            return Err(Error::invalid_file_id(id, "must not start with '.'"));
        }
        if !id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        {
            return Err(Error::invalid_file_id(id, "contains invalid characters"));
        }
        Ok(Self(id))
    }

    /// Derive an id from archive contents (first 16 bytes of the SHA-256, hex)
    pub fn from_content(mut reader: impl Read) -> std::io::Result<Self> {
        let mut hasher = Sha256::new();
        let mut buf = [0u8; 64 * 1024];
        loop {
            let n = reader.read(&mut buf)?;
            if n == 0 {
                break;
            }
            hasher.update(&buf[..n]);
        }
        let digest = hasher.finalize();
        Ok(Self(hex::encode(&digest[..16])))
    }

    /// Derive an id by hashing the file at `path`
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the file cannot be read
    pub fn from_file(path: &Path) -> Result<Self> {
        let file = std::fs::File::open(path).map_err(|e| Error::io(e, path, "open"))?;
        Self::from_content(std::io::BufReader::new(file)).map_err(|e| Error::io(e, path, "read"))
    }

    /// The identifier as a string slice
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for FileId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for FileId {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        Self::new(value)
    }
}

impl From<FileId> for String {
    fn from(id: FileId) -> Self {
        id.0
    }
}

impl std::str::FromStr for FileId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::new(s)
    }
}

/// Path resolver rooted at the cache directory
#[derive(Debug, Clone)]
pub struct CacheLayout {
    root: PathBuf,
}

impl CacheLayout {
    /// Create a layout rooted at `root`
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// The cache root
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory holding one file's cached pages and sidecars
    #[must_use]
    pub fn file_dir(&self, id: &FileId) -> PathBuf {
        self.root.join(id.as_str())
    }

    /// Path of a cached page inside a file cache directory
    #[must_use]
    pub fn page_path(&self, id: &FileId, cached_filename: &str) -> PathBuf {
        self.file_dir(id).join(cached_filename)
    }
}

/// Cached filename for a page: zero-padded index plus the source extension
#[must_use]
pub fn page_filename(page_index: u32, source_path: &str) -> String {
    let ext = Path::new(source_path)
        .extension()
        .and_then(|e| e.to_str())
        .map_or_else(|| "img".to_string(), str::to_ascii_lowercase);
    format!("{page_index:04}.{ext}")
}

/// Infer a page index from a cached filename (`0012.jpg` -> 12)
#[must_use]
pub fn page_index_from_filename(name: &str) -> Option<u32> {
    if name.starts_with('.') || name.ends_with(PARTIAL_SUFFIX) {
        return None;
    }
    let stem = Path::new(name).file_stem()?.to_str()?;
    stem.parse().ok()
}

/// Inputs for determining the default cache root
#[derive(Debug, Clone)]
struct RootInputs {
    override_dir: Option<PathBuf>,
    xdg_cache_home: Option<PathBuf>,
    os_cache_dir: Option<PathBuf>,
    home_dir: Option<PathBuf>,
    temp_dir: PathBuf,
}

fn cache_root_from_inputs(inputs: RootInputs) -> Result<PathBuf> {
    // Resolution order (first writable wins):
    // 1) FOLIO_CACHE_DIR
    // 2) XDG_CACHE_HOME/folio/pages
    // 3) OS cache dir/folio/pages
    // 4) ~/.folio/cache/pages
    // 5) TMPDIR/folio/cache/pages
    let mut candidates: Vec<PathBuf> = Vec::new();

    if let Some(dir) = inputs.override_dir.filter(|p| !p.as_os_str().is_empty()) {
        candidates.push(dir);
    }
    if let Some(xdg) = inputs.xdg_cache_home {
        candidates.push(xdg.join("folio/pages"));
    }
    if let Some(os_cache) = inputs.os_cache_dir {
        candidates.push(os_cache.join("folio/pages"));
    }
    if let Some(home) = inputs.home_dir {
        candidates.push(home.join(".folio/cache/pages"));
    }
    candidates.push(inputs.temp_dir.join("folio/cache/pages"));

    for path in candidates {
        if path.exists() {
            // Read-only cache directories show up on some hosts
            let probe = path.join(".write_probe");
            match std::fs::OpenOptions::new()
                .create(true)
                .truncate(true)
                .write(true)
                .open(&probe)
            {
                Ok(_) => {
                    let _ = std::fs::remove_file(&probe);
                    return Ok(path);
                }
                Err(_) => continue,
            }
        }
        if std::fs::create_dir_all(&path).is_ok() {
            return Ok(path);
        }
    }
    Err(Error::configuration(
        "Failed to determine a writable cache directory",
    ))
}

/// Resolve the default cache root from the environment
///
/// # Errors
///
/// Returns a configuration error if no candidate directory is writable
pub fn default_cache_root() -> Result<PathBuf> {
    let inputs = RootInputs {
        override_dir: std::env::var("FOLIO_CACHE_DIR")
            .ok()
            .filter(|s| !s.trim().is_empty())
            .map(PathBuf::from),
        xdg_cache_home: std::env::var("XDG_CACHE_HOME")
            .ok()
            .filter(|s| !s.trim().is_empty())
            .map(PathBuf::from),
        os_cache_dir: cache_dir(),
        home_dir: home_dir(),
        temp_dir: std::env::temp_dir(),
    };
    cache_root_from_inputs(inputs)
}
