//! Error types for the page cache crate

// Rust 1.92 compiler bug: false positives for thiserror/miette derive macro fields
// https://github.com/rust-lang/rust/issues/147648
#![allow(unused_assignments)]

use miette::Diagnostic;
use std::path::Path;
use thiserror::Error;

/// Error type for page cache operations
#[derive(Error, Debug, Diagnostic)]
pub enum Error {
    /// I/O error during cache operations
    #[error("I/O {operation} failed{}", path.as_ref().map_or(String::new(), |p| format!(": {}", p.display())))]
    #[diagnostic(
        code(folio::cache::io),
        help("Check file permissions and free space under the cache root")
    )]
    Io {
        /// The underlying I/O error
        #[source]
        source: std::io::Error,
        /// Path that caused the error, if available
        path: Option<Box<Path>>,
        /// Operation that failed (e.g., "read", "write", "remove_dir_all")
        operation: String,
    },

    /// Configuration or validation error
    #[error("Cache configuration error: {message}")]
    #[diagnostic(code(folio::cache::config))]
    Configuration {
        /// Error message describing the configuration issue
        message: String,
    },

    /// File identifier cannot be used as a cache directory name
    #[error("Invalid file id {id:?}: {reason}")]
    #[diagnostic(
        code(folio::cache::invalid_file_id),
        help("File ids may only contain ASCII letters, digits, '-' and '_'")
    )]
    InvalidFileId {
        /// The rejected identifier
        id: String,
        /// Why it was rejected
        reason: String,
    },

    /// Requested page does not exist in the archive
    #[error("Page {page} out of range for {file_id} ({page_count} pages)")]
    #[diagnostic(code(folio::cache::page_out_of_range))]
    PageOutOfRange {
        /// File cache the page was requested from
        file_id: String,
        /// Requested 0-based page index
        page: u32,
        /// Number of pages the archive listing contains
        page_count: usize,
    },

    /// Archive listing or extraction failed
    #[error("Archive operation failed for {}: {message}", archive.display())]
    #[diagnostic(
        code(folio::cache::archive),
        help("The archive may be missing, truncated or in an unsupported format")
    )]
    Archive {
        /// Archive that failed
        archive: Box<Path>,
        /// Error message from the archive service
        message: String,
    },

    /// Serialization error
    #[error("Serialization error: {message}")]
    #[diagnostic(code(folio::cache::serialization))]
    Serialization {
        /// Error message describing the serialization issue
        message: String,
    },
}

impl Error {
    /// Create a configuration error
    #[must_use]
    pub fn configuration(msg: impl Into<String>) -> Self {
        Self::Configuration {
            message: msg.into(),
        }
    }

    /// Create an I/O error with path context
    #[must_use]
    pub fn io(
        source: std::io::Error,
        path: impl AsRef<Path>,
        operation: impl Into<String>,
    ) -> Self {
        Self::Io {
            source,
            path: Some(path.as_ref().into()),
            operation: operation.into(),
        }
    }

    /// Create an invalid file id error
    #[must_use]
    pub fn invalid_file_id(id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidFileId {
            id: id.into(),
            reason: reason.into(),
        }
    }

    /// Create an archive collaborator error
    #[must_use]
    pub fn archive(archive: impl AsRef<Path>, msg: impl Into<String>) -> Self {
        Self::Archive {
            archive: archive.as_ref().into(),
            message: msg.into(),
        }
    }

    /// Create a serialization error
    #[must_use]
    pub fn serialization(msg: impl Into<String>) -> Self {
        Self::Serialization {
            message: msg.into(),
        }
    }

}

/// Result type for page cache operations
pub type Result<T> = std::result::Result<T, Error>;
