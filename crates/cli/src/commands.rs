//! Command implementations
//!
//! Every one-shot command opens the cache, runs one operation and returns a
//! [`CommandOutput`] that `main` renders as text or as a JSON envelope.

use crate::cli::{CacheArgs, CliError, Commands, OkEnvelope};
use crate::progress::JsonProgressFile;
use folio_cache::{
    EvictionResult, FileId, NoProgress, PageCache, ReadingProgress, SweepResult, TarArchive,
};
use serde_json::json;
use std::fmt::Write as _;
use std::path::Path;
use std::sync::Arc;

/// Result of a command: human text plus the JSON payload
#[derive(Debug, Clone)]
pub struct CommandOutput {
    /// Human-readable rendering
    pub text: String,
    /// Payload of the JSON envelope
    pub data: serde_json::Value,
}

impl CommandOutput {
    fn new(text: impl Into<String>, data: serde_json::Value) -> Self {
        Self {
            text: text.into(),
            data,
        }
    }

    /// Render for stdout
    pub fn render(&self, json_mode: bool) -> Result<String, CliError> {
        if json_mode {
            serde_json::to_string(&OkEnvelope::new(&self.data))
                .map_err(|e| CliError::other(format!("JSON serialization failed: {e}")))
        } else {
            Ok(self.text.clone())
        }
    }
}

/// Open the cache described by `args`
pub fn open_cache(args: &CacheArgs) -> Result<Arc<PageCache>, CliError> {
    let config = args.resolve_config()?;
    let progress: Arc<dyn ReadingProgress> = match &args.progress {
        Some(path) => Arc::new(JsonProgressFile::new(path)),
        None => Arc::new(NoProgress),
    };
    let cache = PageCache::open(config, Arc::new(TarArchive), progress)?;
    Ok(Arc::new(cache))
}

fn parse_file_id(raw: &str) -> Result<FileId, CliError> {
    Ok(FileId::new(raw)?)
}

/// Run a one-shot command against an open cache
///
/// `watch` is not handled here; it needs the async runtime.
pub fn execute(command: &Commands, cache: &PageCache) -> Result<CommandOutput, CliError> {
    match command {
        Commands::Stats => Ok(stats(cache)),
        Commands::Page {
            archive,
            index,
            file_id,
        } => page(cache, archive, *index, file_id.as_deref()),
        Commands::Touch { file_id } => {
            let id = parse_file_id(file_id)?;
            cache.touch_access(&id);
            Ok(CommandOutput::new(
                format!("Touched {id}"),
                json!({ "file_id": id }),
            ))
        }
        Commands::Invalidate { file_id } => {
            let id = parse_file_id(file_id)?;
            let freed = cache.invalidate(&id)?;
            Ok(CommandOutput::new(
                format!("Invalidated {id}, freed {}", format_bytes(freed)),
                json!({ "file_id": id, "bytes_freed": freed }),
            ))
        }
        Commands::Sweep { ttl_minutes } => {
            let ttl = ttl_minutes.unwrap_or(cache.config().ttl_minutes);
            if ttl == 0 {
                return Err(CliError::config("--ttl-minutes must be greater than 0"));
            }
            let result = cache.run_ttl_sweep(ttl);
            Ok(sweep_output("Swept", &result))
        }
        Commands::Evict => Ok(eviction_output(&cache.run_size_eviction())),
        Commands::Trim { file_id, bytes } => {
            let id = parse_file_id(file_id)?;
            let Some(result) = cache.trim_file_cache(&id, *bytes) else {
                return Err(CliError::other("An eviction pass is already running"));
            };
            Ok(CommandOutput::new(
                format!(
                    "Trimmed {id}: {} pages, freed {}",
                    result.pages_removed,
                    format_bytes(result.bytes_freed)
                ),
                json!({ "file_id": id, "result": result }),
            ))
        }
        Commands::Clear => Ok(sweep_output("Cleared", &cache.clear_all())),
        Commands::Watch { .. } => Err(CliError::other("watch must run on the async runtime")),
    }
}

fn stats(cache: &PageCache) -> CommandOutput {
    let stats = cache.stats();
    let quota = cache.config().max_size_bytes;

    let mut text = String::new();
    let _ = writeln!(text, "Cache root:   {}", cache.root().display());
    let _ = writeln!(text, "File caches:  {}", stats.total_caches);
    let _ = writeln!(text, "Cached pages: {}", stats.total_pages);
    let _ = writeln!(
        text,
        "Disk usage:   {} of {}",
        format_bytes(stats.total_cached_bytes),
        format_bytes(quota)
    );
    if let Some(oldest) = stats.oldest_age {
        let _ = writeln!(text, "Oldest idle:  {}s", oldest.as_secs());
    }
    if let Some(newest) = stats.newest_age {
        let _ = write!(text, "Newest idle:  {}s", newest.as_secs());
    }

    CommandOutput::new(
        text.trim_end().to_string(),
        json!({
            "root": cache.root(),
            "max_size_bytes": quota,
            "stats": stats,
            "init": cache.init_report(),
        }),
    )
}

fn page(
    cache: &PageCache,
    archive: &Path,
    index: u32,
    file_id: Option<&str>,
) -> Result<CommandOutput, CliError> {
    let id = match file_id {
        Some(raw) => parse_file_id(raw)?,
        None => FileId::from_file(archive)?,
    };
    let path = cache.ensure_page_cached(archive, &id, index)?;
    Ok(CommandOutput::new(
        path.display().to_string(),
        json!({ "file_id": id, "page": index, "path": path }),
    ))
}

fn sweep_output(verb: &str, result: &SweepResult) -> CommandOutput {
    CommandOutput::new(
        format!(
            "{verb} {} file caches, freed {} ({} errors)",
            result.caches_removed,
            format_bytes(result.bytes_freed),
            result.errors
        ),
        json!(result),
    )
}

fn eviction_output(result: &EvictionResult) -> CommandOutput {
    let text = if result.skipped {
        "Eviction already running, skipped".to_string()
    } else {
        format!(
            "Evicted {} pages from {} caches and removed {} caches, freed {} ({} -> {})",
            result.pages_removed,
            result.caches_trimmed,
            result.caches_removed,
            format_bytes(result.bytes_freed),
            format_bytes(result.total_before),
            format_bytes(result.total_after)
        )
    };
    CommandOutput::new(text, json!(result))
}

/// Human-readable byte count
#[must_use]
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["KiB", "MiB", "GiB", "TiB"];
    if bytes < 1024 {
        return format!("{bytes} B");
    }
    #[allow(clippy::cast_precision_loss)]
    let mut value = bytes as f64 / 1024.0;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    format!("{value:.1} {}", UNITS[unit])
}
