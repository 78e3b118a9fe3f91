use crate::tracing::{LogLevel, TracingFormat};
use clap::{Args, Parser, Subcommand};
use folio_cache::CacheConfig;
use miette::{Diagnostic, Report};
use serde::{Deserialize, Serialize};
use std::io::{self, Write};
use std::path::PathBuf;
use thiserror::Error;

/// Exit codes for the CLI application
pub const EXIT_OK: i32 = 0;
/// CLI or configuration error exit code
pub const EXIT_CLI: i32 = 2;
/// Cache or archive failure exit code
pub const EXIT_CACHE: i32 = 3;
/// Exit code for SIGINT (128 + signal number 2)
pub const EXIT_SIGINT: i32 = 130;

/// CLI-specific error types with proper exit code mapping
#[derive(Error, Debug, Clone, Diagnostic)]
pub enum CliError {
    /// CLI or configuration error (exit code 2)
    #[error("CLI/configuration error: {message}")]
    #[diagnostic(code(folio::cli::config))]
    Config {
        /// The error message
        message: String,
        /// Optional help text
        #[help]
        help: Option<String>,
    },
    /// Cache operation failed (exit code 3)
    #[error("Cache error: {message}")]
    #[diagnostic(code(folio::cli::cache))]
    Cache {
        /// The error message
        message: String,
        /// Optional help text
        #[help]
        help: Option<String>,
    },
    /// Other unexpected error (exit code 3)
    #[error("Unexpected error: {message}")]
    #[diagnostic(code(folio::cli::other))]
    Other {
        /// The error message
        message: String,
    },
}

impl CliError {
    /// Create a new configuration error
    #[must_use]
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
            help: None,
        }
    }

    /// Create a new configuration error with help text
    #[must_use]
    pub fn config_with_help(message: impl Into<String>, help: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
            help: Some(help.into()),
        }
    }

    /// Create a new other error
    #[must_use]
    pub fn other(message: impl Into<String>) -> Self {
        Self::Other {
            message: message.into(),
        }
    }
}

/// Convert `folio_cache::Error` to the matching `CliError` variant.
///
/// Bad configuration and bad file ids are the caller's fault (exit code 2);
/// everything else is a cache failure (exit code 3).
impl From<folio_cache::Error> for CliError {
    fn from(err: folio_cache::Error) -> Self {
        match err {
            folio_cache::Error::Configuration { message } => Self::config(message),
            folio_cache::Error::InvalidFileId { .. } => Self::config_with_help(
                err.to_string(),
                "File ids may only contain ASCII letters, digits, '-' and '_'",
            ),
            folio_cache::Error::PageOutOfRange { .. } => Self::config(err.to_string()),
            folio_cache::Error::Archive { .. } => Self::Cache {
                message: err.to_string(),
                help: Some("Check that the archive exists and is a supported format".into()),
            },
            folio_cache::Error::Io {
                ref source,
                ref path,
                ref operation,
            } => {
                let path_str = path
                    .as_ref()
                    .map_or(String::new(), |p| format!(" on {}", p.display()));
                Self::Cache {
                    message: format!("I/O {operation} failed{path_str}: {source}"),
                    help: Some("Check file permissions and free space under the cache root".into()),
                }
            }
            folio_cache::Error::Serialization { .. } => Self::Cache {
                message: err.to_string(),
                help: None,
            },
        }
    }
}

/// Map CLI error to appropriate exit code
#[must_use]
pub const fn exit_code_for(err: &CliError) -> i32 {
    match err {
        CliError::Config { .. } => EXIT_CLI,
        CliError::Cache { .. } | CliError::Other { .. } => EXIT_CACHE,
    }
}

/// Render error appropriately based on JSON flag
pub fn render_error(err: &CliError, json_mode: bool) {
    if json_mode {
        let envelope = ErrorEnvelope::new(serde_json::json!({
            "code": match err {
                CliError::Config { .. } => "config",
                CliError::Cache { .. } => "cache",
                CliError::Other { .. } => "other",
            },
            "message": err.to_string()
        }));
        match serde_json::to_string(&envelope) {
            Ok(json) => println!("{json}"),
            Err(_) => eprintln!("Error serializing error response"),
        }
    } else {
        let report = Report::new(err.clone());
        eprintln!("{report:?}");
        let _ = io::stderr().flush();
    }
}

/// Success response envelope for JSON output
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OkEnvelope<T> {
    /// Status indicator - always "ok" for success
    pub status: &'static str,
    /// The actual data payload
    pub data: T,
}

impl<T> OkEnvelope<T> {
    /// Create a new success envelope
    #[must_use]
    pub const fn new(data: T) -> Self {
        Self { status: "ok", data }
    }
}

/// Error response envelope for JSON output
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorEnvelope<E> {
    /// Status indicator - always "error" for failures
    pub status: &'static str,
    /// The error details
    pub error: E,
}

impl<E> ErrorEnvelope<E> {
    /// Create a new error envelope
    #[must_use]
    pub const fn new(error: E) -> Self {
        Self {
            status: "error",
            error,
        }
    }
}

/// Main CLI entry point for folio.
///
/// Inspects and maintains the on-disk page cache of a comic reader.
#[derive(Parser, Debug)]
#[command(name = "folio")]
#[command(about = "Inspect and maintain the folio page cache")]
#[command(long_about = None)]
#[command(version)]
pub struct Cli {
    /// The subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,

    /// Logging verbosity level.
    #[arg(
        short = 'L',
        long = "log-level",
        global = true,
        help = "Set logging level",
        default_value = "warn",
        value_enum
    )]
    pub level: LogLevel,

    /// Log output format.
    #[arg(
        long = "log-format",
        global = true,
        help = "Set log output format",
        default_value = "pretty",
        value_enum
    )]
    pub log_format: TracingFormat,

    /// Emit JSON envelope instead of text.
    #[arg(long, global = true, help = "Emit JSON envelope instead of text")]
    pub json: bool,

    /// Cache settings shared by every subcommand.
    #[command(flatten)]
    pub cache: CacheArgs,
}

/// Cache settings; flags override the config file, which overrides defaults.
#[derive(Args, Debug, Clone, Default)]
pub struct CacheArgs {
    /// TOML config file.
    #[arg(long, global = true, env = "FOLIO_CONFIG", value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Cache root directory.
    #[arg(long, global = true, env = "FOLIO_CACHE_DIR", value_name = "DIR")]
    pub cache_dir: Option<PathBuf>,

    /// Disk quota in bytes.
    #[arg(long, global = true, env = "FOLIO_MAX_SIZE_BYTES", value_name = "BYTES")]
    pub max_size_bytes: Option<u64>,

    /// Idle minutes before a file cache expires.
    #[arg(long = "ttl", global = true, env = "FOLIO_TTL_MINUTES", value_name = "MINUTES")]
    pub ttl_minutes: Option<u64>,

    /// Pages this close to the reader's position are never evicted.
    #[arg(long, global = true, env = "FOLIO_PROTECTION_RADIUS", value_name = "PAGES")]
    pub protection_radius: Option<u32>,

    /// JSON file mapping file ids to the reader's current page.
    #[arg(long, global = true, env = "FOLIO_PROGRESS", value_name = "FILE")]
    pub progress: Option<PathBuf>,
}

impl CacheArgs {
    /// Build the effective cache config
    pub fn resolve_config(&self) -> Result<CacheConfig, CliError> {
        let mut config = match &self.config {
            Some(path) => CacheConfig::from_toml_file(path).map_err(|e| {
                CliError::config_with_help(
                    format!("Failed to load {}: {e}", path.display()),
                    "Check the config file syntax and field names",
                )
            })?,
            None => CacheConfig::default(),
        };

        if let Some(root) = &self.cache_dir {
            config.root = Some(root.clone());
        }
        if let Some(max) = self.max_size_bytes {
            config.max_size_bytes = max;
        }
        if let Some(ttl) = self.ttl_minutes {
            config.ttl_minutes = ttl;
        }
        if let Some(radius) = self.protection_radius {
            config.protection_radius = radius;
        }

        config.validate()?;
        Ok(config)
    }
}

/// Available CLI subcommands.
#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// Show cache usage.
    #[command(about = "Show cache usage")]
    Stats,

    /// Make sure a page is cached and print its path.
    #[command(about = "Make sure a page is cached and print its path")]
    Page {
        /// Archive containing the page.
        #[arg(value_name = "ARCHIVE")]
        archive: PathBuf,
        /// 0-based page index.
        #[arg(value_name = "INDEX")]
        index: u32,
        /// File id to cache under; defaults to a hash of the archive contents.
        #[arg(long)]
        file_id: Option<String>,
    },

    /// Record an access to a file cache.
    #[command(about = "Record an access to a file cache")]
    Touch {
        /// File id of the cache.
        file_id: String,
    },

    /// Delete one file cache.
    #[command(about = "Delete one file cache")]
    Invalidate {
        /// File id of the cache.
        file_id: String,
    },

    /// Delete file caches that have been idle too long.
    #[command(about = "Delete file caches that have been idle too long")]
    Sweep {
        /// Override the configured TTL for this sweep.
        #[arg(long = "ttl-minutes", id = "sweep_ttl_minutes", value_name = "MINUTES")]
        ttl_minutes: Option<u64>,
    },

    /// Evict pages until the cache is under quota.
    #[command(about = "Evict pages until the cache is under quota")]
    Evict,

    /// Evict pages from one file cache.
    #[command(about = "Evict pages from one file cache")]
    Trim {
        /// File id of the cache.
        file_id: String,
        /// Bytes to free.
        bytes: u64,
    },

    /// Delete every file cache.
    #[command(about = "Delete every file cache")]
    Clear,

    /// Run TTL sweeps and size eviction on a schedule until interrupted.
    #[command(about = "Run TTL sweeps and size eviction on a schedule until interrupted")]
    Watch {
        /// Seconds between TTL sweeps.
        #[arg(long, value_name = "SECS")]
        sweep_interval: Option<u64>,
        /// Seconds between size eviction passes.
        #[arg(long, value_name = "SECS")]
        eviction_interval: Option<u64>,
    },
}

impl Commands {
    /// Name used in logs
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Stats => "stats",
            Self::Page { .. } => "page",
            Self::Touch { .. } => "touch",
            Self::Invalidate { .. } => "invalidate",
            Self::Sweep { .. } => "sweep",
            Self::Evict => "evict",
            Self::Trim { .. } => "trim",
            Self::Clear => "clear",
            Self::Watch { .. } => "watch",
        }
    }

    /// Whether the command needs the tokio runtime
    #[must_use]
    pub const fn requires_async_runtime(&self) -> bool {
        matches!(self, Self::Watch { .. })
    }
}

/// Parse command line arguments
#[must_use]
pub fn parse() -> Cli {
    Cli::parse()
}
